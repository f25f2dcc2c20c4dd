/// B-tree operations: search, insert (with split), delete (with
/// borrow/merge rebalancing).
///
/// The root page number is pinned for the lifetime of the tree: splits and
/// collapses rewrite the root page in place instead of moving it, so the
/// catalog never has to chase root pointers.
///
/// Splits and merges rebuild the affected pages from their logical content.
/// A page is never left observable in a torn state: every structural step
/// completes before control returns.
use crate::btree::key_encoding::compare_keys;
use crate::btree::node::*;
use crate::error::{Result, ZqError};
use crate::storage::page::{Page, PageId, PageKind, PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::storage::page_store::PageStore;

/// Maximum B-tree depth to prevent stack overflow on corrupted trees.
pub const MAX_BTREE_DEPTH: usize = 64;

/// Usable bytes per node (cell pointers + cell content).
const NODE_CAPACITY: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Nodes below half occupancy are rebalanced (root excepted).
const MIN_FILL_BYTES: usize = NODE_CAPACITY / 2;

/// Bytes one leaf entry occupies: pointer + cell header + key-length prefix.
fn leaf_entry_size(key: &[u8], value: &[u8]) -> usize {
    2 + 2 + 2 + key.len() + value.len()
}

/// Bytes one interior cell occupies.
fn interior_cell_size(key: &[u8]) -> usize {
    2 + 2 + 4 + 2 + key.len()
}

fn interior_kind_for(kind: PageKind) -> PageKind {
    match kind {
        PageKind::TableLeaf | PageKind::TableInterior => PageKind::TableInterior,
        PageKind::IndexLeaf | PageKind::IndexInterior => PageKind::IndexInterior,
        other => panic!("BUG: {:?} is not a B-tree page kind", other),
    }
}

fn is_underflow(page: &Page) -> bool {
    page.live_bytes() < MIN_FILL_BYTES
}

/// Logical content of an interior node: children.len() == seps.len() + 1.
struct InteriorView {
    children: Vec<PageId>,
    seps: Vec<Vec<u8>>,
}

impl InteriorView {
    fn read(page: &Page) -> Self {
        let n = page.cell_count();
        let mut children = Vec::with_capacity(n as usize + 1);
        let mut seps = Vec::with_capacity(n as usize);
        for i in 0..n {
            let cell = page.cell(i).expect("BUG: cell index in range");
            let (child, key) = decode_interior_cell(cell);
            children.push(child);
            seps.push(key.to_vec());
        }
        children.push(page.right_sibling());
        InteriorView { children, seps }
    }

    fn size(&self) -> usize {
        self.seps.iter().map(|k| interior_cell_size(k)).sum()
    }

    fn fits(&self) -> bool {
        self.size() <= NODE_CAPACITY
    }

    /// Rebuild a page of the given number from this view.
    fn write(&self, page_no: PageId, kind: PageKind) -> Page {
        let mut page = Page::new(page_no, interior_kind_for(kind));
        for (child, sep) in self.children.iter().zip(&self.seps) {
            page.insert_cell(&encode_interior_cell(*child, sep))
                .expect("BUG: interior view checked to fit");
        }
        page.set_right_sibling(*self.children.last().expect("BUG: nonempty view"));
        page
    }
}

/// B-tree handle. Tracks the (pinned) root page.
pub struct BTree {
    root: PageId,
}

impl BTree {
    /// Create a new B-tree with a fresh root leaf page of the given kind.
    pub fn create(store: &mut impl PageStore, leaf_kind: PageKind) -> Result<Self> {
        let root = store.allocate_page(leaf_kind)?;
        let root_id = root.page_no();
        store.write_page(&root)?;
        Ok(BTree { root: root_id })
    }

    /// Open an existing B-tree by root page.
    pub fn open(root: PageId) -> Self {
        BTree { root }
    }

    pub fn root_page(&self) -> PageId {
        self.root
    }

    /// Point lookup. Returns the value for an exact key match.
    pub fn search(&self, store: &mut impl PageStore, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut page_no = self.root;
        for _ in 0..MAX_BTREE_DEPTH {
            let page = store.read_page(page_no)?;
            let kind = page.kind()?;
            if kind.is_leaf() {
                let (idx, exact) = leaf_search(&page, key);
                if !exact {
                    return Ok(None);
                }
                let (_, value) = leaf_entry(&page, idx).expect("BUG: exact index in range");
                return Ok(Some(value.to_vec()));
            }
            if !kind.is_interior() {
                return Err(ZqError::Corrupt(format!(
                    "page {} is not a B-tree node",
                    page_no
                )));
            }
            page_no = child_at_slot(&page, find_child_slot(&page, key));
        }
        Err(ZqError::Corrupt("B-tree deeper than maximum depth".into()))
    }

    /// Insert or replace. Keys are unique within one tree; non-unique index
    /// entries disambiguate with a row-id suffix before reaching here.
    pub fn insert(&self, store: &mut impl PageStore, key: &[u8], value: &[u8]) -> Result<()> {
        if leaf_entry_size(key, value) > NODE_CAPACITY {
            return Err(ZqError::Constraint(format!(
                "entry of {} bytes exceeds page capacity",
                key.len() + value.len()
            )));
        }
        if let Some((sep, right)) = self.insert_rec(store, self.root, key, value, 0)? {
            self.grow_root(store, sep, right)?;
        }
        Ok(())
    }

    fn insert_rec(
        &self,
        store: &mut impl PageStore,
        page_no: PageId,
        key: &[u8],
        value: &[u8],
        depth: usize,
    ) -> Result<Option<(Vec<u8>, PageId)>> {
        if depth >= MAX_BTREE_DEPTH {
            return Err(ZqError::Corrupt("B-tree deeper than maximum depth".into()));
        }
        let mut page = store.read_page(page_no)?;
        let kind = page.kind()?;

        if kind.is_leaf() {
            let (idx, exact) = leaf_search(&page, key);
            if exact {
                page.remove_cell(idx);
            }
            let cell = encode_leaf_cell(key, value);
            if !page.can_fit(cell.len()) {
                page.compact();
            }
            if page.can_fit(cell.len()) {
                page.insert_cell_at(idx, &cell)?;
                store.write_page(&page)?;
                return Ok(None);
            }
            return self.split_leaf(store, page, idx, key, value).map(Some);
        }

        let slot = find_child_slot(&page, key);
        let child = child_at_slot(&page, slot);
        let promoted = self.insert_rec(store, child, key, value, depth + 1)?;
        let Some((sep, right)) = promoted else {
            return Ok(None);
        };

        let mut view = InteriorView::read(&page);
        view.children.insert((slot + 1) as usize, right);
        view.seps.insert(slot as usize, sep);

        if view.fits() {
            store.write_page(&view.write(page_no, kind))?;
            return Ok(None);
        }
        self.split_interior(store, page_no, kind, view).map(Some)
    }

    /// Split an over-full leaf, distributing entries by accumulated bytes.
    /// The original page keeps the lower half; the new right sibling takes
    /// the rest and the separator is its first key.
    fn split_leaf(
        &self,
        store: &mut impl PageStore,
        page: Page,
        insert_idx: u16,
        key: &[u8],
        value: &[u8],
    ) -> Result<(Vec<u8>, PageId)> {
        let kind = page.kind()?;
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(page.cell_count() as usize + 1);
        for i in 0..page.cell_count() {
            let (k, v) = leaf_entry(&page, i).expect("BUG: cell index in range");
            entries.push((k.to_vec(), v.to_vec()));
        }
        entries.insert(insert_idx as usize, (key.to_vec(), value.to_vec()));

        let total: usize = entries.iter().map(|(k, v)| leaf_entry_size(k, v)).sum();
        let mut acc = 0usize;
        let mut split_at = entries.len() - 1;
        for (i, (k, v)) in entries.iter().enumerate() {
            acc += leaf_entry_size(k, v);
            if acc >= total / 2 && i + 1 < entries.len() {
                split_at = i + 1;
                break;
            }
        }

        let right_page = store.allocate_page(kind)?;
        let right_id = right_page.page_no();

        let mut left = Page::new(page.page_no(), kind);
        for (k, v) in &entries[..split_at] {
            left.insert_cell(&encode_leaf_cell(k, v))?;
        }
        let mut right = Page::new(right_id, kind);
        for (k, v) in &entries[split_at..] {
            right.insert_cell(&encode_leaf_cell(k, v))?;
        }
        // Leaf chain: left -> right -> left's old successor.
        right.set_right_sibling(page.right_sibling());
        left.set_right_sibling(right_id);

        store.write_page(&left)?;
        store.write_page(&right)?;
        Ok((entries[split_at].0.clone(), right_id))
    }

    /// Split an over-full interior view, promoting the median separator.
    fn split_interior(
        &self,
        store: &mut impl PageStore,
        page_no: PageId,
        kind: PageKind,
        view: InteriorView,
    ) -> Result<(Vec<u8>, PageId)> {
        let total = view.size();
        let mut acc = 0usize;
        let mut median = view.seps.len() / 2;
        for (i, sep) in view.seps.iter().enumerate() {
            acc += interior_cell_size(sep);
            if acc >= total / 2 && i + 1 < view.seps.len() {
                median = i;
                break;
            }
        }

        let promoted = view.seps[median].clone();
        let left_view = InteriorView {
            children: view.children[..=median].to_vec(),
            seps: view.seps[..median].to_vec(),
        };
        let right_view = InteriorView {
            children: view.children[median + 1..].to_vec(),
            seps: view.seps[median + 1..].to_vec(),
        };

        let right_id = store.allocate_page(interior_kind_for(kind))?.page_no();
        store.write_page(&left_view.write(page_no, kind))?;
        store.write_page(&right_view.write(right_id, kind))?;
        Ok((promoted, right_id))
    }

    /// Root split with a pinned root: move the current root content to a
    /// fresh page, then rewrite the root as a two-child interior node.
    fn grow_root(&self, store: &mut impl PageStore, sep: Vec<u8>, right: PageId) -> Result<()> {
        let root_page = store.read_page(self.root)?;
        let kind = root_page.kind()?;

        let left_id = store.allocate_page(kind)?.page_no();
        let mut left = Page::from_bytes(root_page.data);
        left.set_page_no(left_id);
        store.write_page(&left)?;

        let mut new_root = Page::new(self.root, interior_kind_for(kind));
        new_root.insert_cell(&encode_interior_cell(left_id, &sep))?;
        new_root.set_right_sibling(right);
        store.write_page(&new_root)?;
        Ok(())
    }

    /// Delete by exact key. Returns whether the key was present.
    pub fn delete(&self, store: &mut impl PageStore, key: &[u8]) -> Result<bool> {
        let found = self.delete_rec(store, self.root, key, 0)?;
        if found {
            self.collapse_root(store)?;
        }
        Ok(found)
    }

    fn delete_rec(
        &self,
        store: &mut impl PageStore,
        page_no: PageId,
        key: &[u8],
        depth: usize,
    ) -> Result<bool> {
        if depth >= MAX_BTREE_DEPTH {
            return Err(ZqError::Corrupt("B-tree deeper than maximum depth".into()));
        }
        let mut page = store.read_page(page_no)?;
        let kind = page.kind()?;

        if kind.is_leaf() {
            let (idx, exact) = leaf_search(&page, key);
            if !exact {
                return Ok(false);
            }
            page.remove_cell(idx);
            store.write_page(&page)?;
            return Ok(true);
        }

        let slot = find_child_slot(&page, key);
        let child = child_at_slot(&page, slot);
        let found = self.delete_rec(store, child, key, depth + 1)?;
        if found {
            let child_page = store.read_page(child)?;
            if is_underflow(&child_page) && page.cell_count() > 0 {
                self.rebalance_child(store, page_no, slot)?;
            }
        }
        Ok(found)
    }

    /// Restore fill of the child at `slot` by borrowing from or merging with
    /// an adjacent sibling, updating the parent's separator.
    fn rebalance_child(
        &self,
        store: &mut impl PageStore,
        parent_no: PageId,
        slot: u16,
    ) -> Result<()> {
        let parent = store.read_page(parent_no)?;
        let parent_kind = parent.kind()?;
        let mut view = InteriorView::read(&parent);

        let (left_slot, right_slot) = if slot > 0 {
            (slot as usize - 1, slot as usize)
        } else {
            (0, 1)
        };
        let left_no = view.children[left_slot];
        let right_no = view.children[right_slot];
        let left = store.read_page(left_no)?;
        let right = store.read_page(right_no)?;
        let child_kind = left.kind()?;

        if child_kind.is_leaf() {
            let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
            for page in [&left, &right] {
                for i in 0..page.cell_count() {
                    let (k, v) = leaf_entry(page, i).expect("BUG: cell index in range");
                    entries.push((k.to_vec(), v.to_vec()));
                }
            }
            let total: usize = entries.iter().map(|(k, v)| leaf_entry_size(k, v)).sum();

            if total <= NODE_CAPACITY {
                // Merge into the left page; unlink and free the right one.
                let mut merged = Page::new(left_no, child_kind);
                for (k, v) in &entries {
                    merged.insert_cell(&encode_leaf_cell(k, v))?;
                }
                merged.set_right_sibling(right.right_sibling());
                store.write_page(&merged)?;
                store.free_page(right_no);
                view.children.remove(right_slot);
                view.seps.remove(left_slot);
            } else {
                // Redistribute around the byte midpoint.
                let mut acc = 0usize;
                let mut split_at = entries.len() / 2;
                for (i, (k, v)) in entries.iter().enumerate() {
                    acc += leaf_entry_size(k, v);
                    if acc >= total / 2 && i + 1 < entries.len() {
                        split_at = i + 1;
                        break;
                    }
                }
                let mut new_left = Page::new(left_no, child_kind);
                for (k, v) in &entries[..split_at] {
                    new_left.insert_cell(&encode_leaf_cell(k, v))?;
                }
                new_left.set_right_sibling(right_no);
                let mut new_right = Page::new(right_no, child_kind);
                for (k, v) in &entries[split_at..] {
                    new_right.insert_cell(&encode_leaf_cell(k, v))?;
                }
                new_right.set_right_sibling(right.right_sibling());

                let new_sep = entries[split_at].0.clone();
                let old_sep = std::mem::replace(&mut view.seps[left_slot], new_sep);
                if !view.fits() {
                    // Larger separator would overflow the parent; keep the
                    // underfull child rather than split during delete.
                    view.seps[left_slot] = old_sep;
                    return Ok(());
                }
                store.write_page(&new_left)?;
                store.write_page(&new_right)?;
            }
        } else {
            let left_view = InteriorView::read(&left);
            let right_view = InteriorView::read(&right);
            let sep = view.seps[left_slot].clone();

            let mut children = left_view.children.clone();
            children.extend_from_slice(&right_view.children);
            let mut seps = left_view.seps.clone();
            seps.push(sep);
            seps.extend_from_slice(&right_view.seps);
            let combined = InteriorView { children, seps };

            if combined.fits() {
                store.write_page(&combined.write(left_no, child_kind))?;
                store.free_page(right_no);
                view.children.remove(right_slot);
                view.seps.remove(left_slot);
            } else {
                let total = combined.size();
                let mut acc = 0usize;
                let mut median = combined.seps.len() / 2;
                for (i, s) in combined.seps.iter().enumerate() {
                    acc += interior_cell_size(s);
                    if acc >= total / 2 && i + 1 < combined.seps.len() {
                        median = i;
                        break;
                    }
                }
                let new_left = InteriorView {
                    children: combined.children[..=median].to_vec(),
                    seps: combined.seps[..median].to_vec(),
                };
                let new_right = InteriorView {
                    children: combined.children[median + 1..].to_vec(),
                    seps: combined.seps[median + 1..].to_vec(),
                };
                let old_sep =
                    std::mem::replace(&mut view.seps[left_slot], combined.seps[median].clone());
                if !view.fits() {
                    view.seps[left_slot] = old_sep;
                    return Ok(());
                }
                store.write_page(&new_left.write(left_no, child_kind))?;
                store.write_page(&new_right.write(right_no, child_kind))?;
            }
        }

        store.write_page(&view.write(parent_no, parent_kind))?;
        Ok(())
    }

    /// If the root is an interior node with a single child, pull that child's
    /// content into the root page (the root number is pinned).
    fn collapse_root(&self, store: &mut impl PageStore) -> Result<()> {
        let root_page = store.read_page(self.root)?;
        let kind = root_page.kind()?;
        if !kind.is_interior() || root_page.cell_count() > 0 {
            return Ok(());
        }
        let only_child = root_page.right_sibling();
        if only_child == 0 {
            return Err(ZqError::Corrupt("interior root with no child".into()));
        }
        let child_page = store.read_page(only_child)?;
        let mut new_root = Page::from_bytes(child_page.data);
        new_root.set_page_no(self.root);
        store.write_page(&new_root)?;
        store.free_page(only_child);
        Ok(())
    }

    /// Free every page of the tree except the root, leaving the root as an
    /// empty leaf of the given kind.
    pub fn clear(&self, store: &mut impl PageStore, leaf_kind: PageKind) -> Result<()> {
        self.free_children(store, self.root, 0)?;
        store.write_page(&Page::new(self.root, leaf_kind))?;
        Ok(())
    }

    /// Free the entire tree, root included (DROP TABLE / DROP INDEX).
    pub fn destroy(&self, store: &mut impl PageStore) -> Result<()> {
        self.free_children(store, self.root, 0)?;
        store.free_page(self.root);
        Ok(())
    }

    fn free_children(
        &self,
        store: &mut impl PageStore,
        page_no: PageId,
        depth: usize,
    ) -> Result<()> {
        if depth >= MAX_BTREE_DEPTH {
            return Err(ZqError::Corrupt("B-tree deeper than maximum depth".into()));
        }
        let page = store.read_page(page_no)?;
        if page.kind()?.is_interior() {
            let view = InteriorView::read(&page);
            for child in view.children {
                self.free_children(store, child, depth + 1)?;
                store.free_page(child);
            }
        }
        Ok(())
    }

    /// Visit every (key, value) pair in order. The callback returns false to
    /// stop early.
    pub fn scan<F>(&self, store: &mut impl PageStore, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let mut page_no = self.leftmost_leaf(store)?;
        loop {
            let page = store.read_page(page_no)?;
            for i in 0..page.cell_count() {
                let (k, v) = leaf_entry(&page, i).expect("BUG: cell index in range");
                if !f(k, v)? {
                    return Ok(());
                }
            }
            page_no = page.right_sibling();
            if page_no == 0 {
                return Ok(());
            }
        }
    }

    fn leftmost_leaf(&self, store: &mut impl PageStore) -> Result<PageId> {
        let mut page_no = self.root;
        for _ in 0..MAX_BTREE_DEPTH {
            let page = store.read_page(page_no)?;
            if page.kind()?.is_leaf() {
                return Ok(page_no);
            }
            page_no = child_at_slot(&page, 0);
        }
        Err(ZqError::Corrupt("B-tree deeper than maximum depth".into()))
    }

    /// Descend to the leaf that would hold `key`, returning the path of
    /// (page, slot) pairs taken. Used by cursors.
    pub(crate) fn descend_to_leaf(
        &self,
        store: &mut impl PageStore,
        key: &[u8],
    ) -> Result<(PageId, Page)> {
        let mut page_no = self.root;
        for _ in 0..MAX_BTREE_DEPTH {
            let page = store.read_page(page_no)?;
            if page.kind()?.is_leaf() {
                return Ok((page_no, page));
            }
            page_no = child_at_slot(&page, find_child_slot(&page, key));
        }
        Err(ZqError::Corrupt("B-tree deeper than maximum depth".into()))
    }

    /// Key comparison helper re-exported for callers that sort externally.
    pub fn key_cmp(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
        compare_keys(a, b)
    }
}

#[cfg(test)]
mod tests;
