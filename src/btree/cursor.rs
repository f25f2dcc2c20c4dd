/// B-tree cursors: a positioned (page, cell-index) pair at the leaf level,
/// advancing through the leaf sibling chain.
///
/// Cursors hold page numbers, never page references; every step re-acquires
/// the page from the store, so pin lifetimes never outlive one call. After
/// any structural modification of the same tree not made through this
/// cursor, the position is stale: callers restore it with `reseek`, which
/// relocates by key comparison.
use crate::btree::key_encoding::compare_keys;
use crate::btree::node::{leaf_entry, leaf_search};
use crate::btree::ops::BTree;
use crate::error::Result;
use crate::storage::page::PageId;
use crate::storage::page_store::PageStore;

pub struct BTreeCursor {
    tree: BTree,
    leaf: PageId,
    idx: u16,
    exhausted: bool,
    /// Key of the entry the cursor last produced, for reseek and retreat.
    last_key: Option<Vec<u8>>,
}

impl BTreeCursor {
    /// Position at the first entry of the tree.
    pub fn first(tree: &BTree, store: &mut impl PageStore) -> Result<Self> {
        let mut cursor = BTreeCursor {
            tree: BTree::open(tree.root_page()),
            leaf: 0,
            idx: 0,
            exhausted: false,
            last_key: None,
        };
        let (leaf, page) = cursor.tree.descend_to_leaf(store, &[])?;
        cursor.leaf = leaf;
        cursor.idx = 0;
        if page.cell_count() == 0 {
            cursor.skip_empty_leaves(store, page.right_sibling())?;
        }
        Ok(cursor)
    }

    /// Position at the first entry with key >= the probe.
    pub fn seek(tree: &BTree, store: &mut impl PageStore, key: &[u8]) -> Result<Self> {
        let mut cursor = BTreeCursor {
            tree: BTree::open(tree.root_page()),
            leaf: 0,
            idx: 0,
            exhausted: false,
            last_key: None,
        };
        cursor.seek_internal(store, key)?;
        Ok(cursor)
    }

    fn seek_internal(&mut self, store: &mut impl PageStore, key: &[u8]) -> Result<()> {
        self.exhausted = false;
        let (leaf, page) = self.tree.descend_to_leaf(store, key)?;
        self.leaf = leaf;
        let (idx, _) = leaf_search(&page, key);
        self.idx = idx;
        if idx >= page.cell_count() {
            self.skip_empty_leaves(store, page.right_sibling())?;
        }
        Ok(())
    }

    fn skip_empty_leaves(&mut self, store: &mut impl PageStore, mut next: PageId) -> Result<()> {
        loop {
            if next == 0 {
                self.exhausted = true;
                return Ok(());
            }
            let page = store.read_page(next)?;
            if page.cell_count() > 0 {
                self.leaf = next;
                self.idx = 0;
                return Ok(());
            }
            next = page.right_sibling();
        }
    }

    /// The entry under the cursor, if any.
    pub fn current(&mut self, store: &mut impl PageStore) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = store.read_page(self.leaf)?;
        match leaf_entry(&page, self.idx) {
            Some((k, v)) => {
                self.last_key = Some(k.to_vec());
                Ok(Some((k.to_vec(), v.to_vec())))
            }
            None => Ok(None),
        }
    }

    /// Step forward. Returns the entry stepped onto.
    pub fn advance(&mut self, store: &mut impl PageStore) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = store.read_page(self.leaf)?;
        self.idx += 1;
        if self.idx >= page.cell_count() {
            self.skip_empty_leaves(store, page.right_sibling())?;
        }
        self.current(store)
    }

    /// Step backward to the greatest entry strictly below the current
    /// position, re-descending from the root (leaves have no back links).
    pub fn retreat(&mut self, store: &mut impl PageStore) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(key) = self.last_key.clone() else {
            return Ok(None);
        };
        // Walk the leaf chain position via a root descent: find the leaf
        // holding keys below `key`, backing up through ancestors when the
        // current leaf has nothing below it.
        let mut path: Vec<(PageId, u16)> = Vec::new();
        let mut page_no = self.tree.root_page();
        loop {
            let page = store.read_page(page_no)?;
            if page.kind()?.is_leaf() {
                let (idx, _) = leaf_search(&page, &key);
                if idx > 0 {
                    self.leaf = page_no;
                    self.idx = idx - 1;
                    self.exhausted = false;
                    return self.current(store);
                }
                break;
            }
            let slot = crate::btree::node::find_child_slot(&page, &key);
            path.push((page_no, slot));
            page_no = crate::btree::node::child_at_slot(&page, slot);
        }
        // Nothing below in this leaf: back up to an ancestor with a left
        // sibling subtree, then descend to its rightmost leaf.
        while let Some((ancestor, slot)) = path.pop() {
            if slot == 0 {
                continue;
            }
            let page = store.read_page(ancestor)?;
            let mut down = crate::btree::node::child_at_slot(&page, slot - 1);
            loop {
                let p = store.read_page(down)?;
                if p.kind()?.is_leaf() {
                    if p.cell_count() == 0 {
                        break;
                    }
                    self.leaf = down;
                    self.idx = p.cell_count() - 1;
                    self.exhausted = false;
                    return self.current(store);
                }
                down = crate::btree::node::child_at_slot(&p, p.cell_count());
            }
        }
        self.exhausted = true;
        Ok(None)
    }

    /// Restore a stale position after a structural modification: relocate to
    /// the first entry >= the last key produced.
    pub fn reseek(&mut self, store: &mut impl PageStore) -> Result<()> {
        let Some(key) = self.last_key.clone() else {
            let fresh = Self::first(&BTree::open(self.tree.root_page()), store)?;
            self.leaf = fresh.leaf;
            self.idx = fresh.idx;
            self.exhausted = fresh.exhausted;
            return Ok(());
        };
        self.seek_internal(store, &key)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// True when the current entry's key starts with the given prefix.
    pub fn key_has_prefix(key: &[u8], prefix: &[u8]) -> bool {
        key.len() >= prefix.len()
            && compare_keys(&key[..prefix.len()], prefix) == std::cmp::Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageKind;
    use crate::storage::page_store::mem::MemStore;

    fn setup() -> (MemStore, BTree) {
        let mut store = MemStore::new();
        let tree = BTree::create(&mut store, PageKind::IndexLeaf).unwrap();
        (store, tree)
    }

    #[test]
    fn iterates_in_sorted_order() {
        let (mut store, tree) = setup();
        tree.insert(&mut store, b"c", b"3").unwrap();
        tree.insert(&mut store, b"a", b"1").unwrap();
        tree.insert(&mut store, b"b", b"2").unwrap();

        let mut cursor = BTreeCursor::first(&tree, &mut store).unwrap();
        let (k, v) = cursor.current(&mut store).unwrap().unwrap();
        assert_eq!((k.as_slice(), v.as_slice()), (b"a".as_ref(), b"1".as_ref()));
        let (k, _) = cursor.advance(&mut store).unwrap().unwrap();
        assert_eq!(k, b"b");
        let (k, _) = cursor.advance(&mut store).unwrap().unwrap();
        assert_eq!(k, b"c");
        assert!(cursor.advance(&mut store).unwrap().is_none());
    }

    #[test]
    fn seek_positions_at_lower_bound() {
        let (mut store, tree) = setup();
        for k in ["b", "d", "f"] {
            tree.insert(&mut store, k.as_bytes(), b"v").unwrap();
        }
        let mut cursor = BTreeCursor::seek(&tree, &mut store, b"c").unwrap();
        let (k, _) = cursor.current(&mut store).unwrap().unwrap();
        assert_eq!(k, b"d");

        let mut cursor = BTreeCursor::seek(&tree, &mut store, b"g").unwrap();
        assert!(cursor.current(&mut store).unwrap().is_none());
    }

    #[test]
    fn retreat_walks_backwards() {
        let (mut store, tree) = setup();
        for k in ["a", "b", "c"] {
            tree.insert(&mut store, k.as_bytes(), b"v").unwrap();
        }
        let mut cursor = BTreeCursor::seek(&tree, &mut store, b"c").unwrap();
        cursor.current(&mut store).unwrap().unwrap();
        let (k, _) = cursor.retreat(&mut store).unwrap().unwrap();
        assert_eq!(k, b"b");
        let (k, _) = cursor.retreat(&mut store).unwrap().unwrap();
        assert_eq!(k, b"a");
        assert!(cursor.retreat(&mut store).unwrap().is_none());
    }

    #[test]
    fn reseek_recovers_after_modification() {
        let (mut store, tree) = setup();
        for i in 0..50u32 {
            let key = format!("key{:04}", i);
            tree.insert(&mut store, key.as_bytes(), b"v").unwrap();
        }
        let mut cursor = BTreeCursor::seek(&tree, &mut store, b"key0010").unwrap();
        cursor.current(&mut store).unwrap().unwrap();

        // Structural modification not through the cursor.
        for i in 50..80u32 {
            let key = format!("key{:04}", i);
            tree.insert(&mut store, key.as_bytes(), b"v").unwrap();
        }
        cursor.reseek(&mut store).unwrap();
        let (k, _) = cursor.current(&mut store).unwrap().unwrap();
        assert_eq!(k, b"key0010");
    }
}
