/// B-tree node layout on slotted pages.
///
/// A node is a page of kind table/index leaf or interior. The page kind
/// byte distinguishes them; no extra header cell is needed.
///
/// Leaf cell layout:
///   [key_len: u16] [key bytes] [value bytes]
///
/// Interior cell layout:
///   [left_child: u32] [key_len: u16] [key bytes]
///
/// Interior cells are (child, separator) pairs: the child subtree holds all
/// keys strictly below the separator. The rightmost child pointer reuses the
/// page header's right_sibling field (leaves use that field for the leaf
/// chain instead).
use crate::btree::key_encoding::compare_keys;
use crate::storage::page::{Page, PageId};

// --- Leaf cells ---

pub fn encode_leaf_cell(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + key.len() + value.len());
    buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}

pub fn decode_leaf_cell(cell: &[u8]) -> (&[u8], &[u8]) {
    let key_len = u16::from_le_bytes(cell[0..2].try_into().unwrap()) as usize;
    (&cell[2..2 + key_len], &cell[2 + key_len..])
}

pub fn leaf_key(page: &Page, idx: u16) -> Option<&[u8]> {
    page.cell(idx).map(|c| decode_leaf_cell(c).0)
}

pub fn leaf_entry(page: &Page, idx: u16) -> Option<(&[u8], &[u8])> {
    page.cell(idx).map(decode_leaf_cell)
}

// --- Interior cells ---

pub fn encode_interior_cell(left_child: PageId, key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + 2 + key.len());
    buf.extend_from_slice(&left_child.to_le_bytes());
    buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
    buf.extend_from_slice(key);
    buf
}

pub fn decode_interior_cell(cell: &[u8]) -> (PageId, &[u8]) {
    let left_child = u32::from_le_bytes(cell[0..4].try_into().unwrap());
    let key_len = u16::from_le_bytes(cell[4..6].try_into().unwrap()) as usize;
    (left_child, &cell[6..6 + key_len])
}

pub fn interior_key(page: &Page, idx: u16) -> Option<&[u8]> {
    page.cell(idx).map(|c| decode_interior_cell(c).1)
}

pub fn interior_child(page: &Page, idx: u16) -> Option<PageId> {
    page.cell(idx).map(|c| decode_interior_cell(c).0)
}

/// Child slot for a key: the index of the first separator greater than the
/// key, or cell_count for the rightmost child.
pub fn find_child_slot(page: &Page, key: &[u8]) -> u16 {
    let mut lo = 0u16;
    let mut hi = page.cell_count();
    while lo < hi {
        let mid = (lo + hi) / 2;
        let sep = interior_key(page, mid).expect("BUG: cell index in range");
        if compare_keys(key, sep) == std::cmp::Ordering::Less {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

/// Child page at a slot (cell_count addresses the rightmost child).
pub fn child_at_slot(page: &Page, slot: u16) -> PageId {
    if slot == page.cell_count() {
        page.right_sibling()
    } else {
        interior_child(page, slot).expect("BUG: slot in range")
    }
}

/// Leaf position of the first key >= the probe. Returns (index, exact).
pub fn leaf_search(page: &Page, key: &[u8]) -> (u16, bool) {
    let mut lo = 0u16;
    let mut hi = page.cell_count();
    while lo < hi {
        let mid = (lo + hi) / 2;
        let k = leaf_key(page, mid).expect("BUG: cell index in range");
        match compare_keys(k, key) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Equal => return (mid, true),
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    (lo, false)
}
