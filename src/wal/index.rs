use std::collections::HashMap;

use crate::storage::page::PageId;

/// Map from page number to the byte offset of the latest committed frame
/// carrying that page. Read transactions clone this at begin time; the
/// clone is their MVCC snapshot.
#[derive(Debug, Clone, Default)]
pub struct WalIndex {
    frames: HashMap<PageId, u64>,
    /// Offset just past the last committed frame.
    committed_len: u64,
    /// Database page count as of the last commit frame.
    db_size: u32,
}

impl WalIndex {
    pub fn new(db_size: u32, header_len: u64) -> Self {
        WalIndex {
            frames: HashMap::new(),
            committed_len: header_len,
            db_size,
        }
    }

    /// Latest frame offset for a page, if the WAL holds one.
    pub fn lookup(&self, page_no: PageId) -> Option<u64> {
        self.frames.get(&page_no).copied()
    }

    /// Record one committed transaction's frames and its post-commit state.
    pub fn apply_commit(&mut self, frames: &[(PageId, u64)], db_size: u32, end_offset: u64) {
        for &(page_no, offset) in frames {
            self.frames.insert(page_no, offset);
        }
        self.db_size = db_size;
        self.committed_len = end_offset;
    }

    pub fn db_size(&self) -> u32 {
        self.db_size
    }

    pub fn committed_len(&self) -> u64 {
        self.committed_len
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn pages(&self) -> impl Iterator<Item = (PageId, u64)> + '_ {
        self.frames.iter().map(|(&p, &o)| (p, o))
    }

    /// Drop all frame mappings, e.g. after checkpoint-truncate.
    pub fn reset(&mut self, header_len: u64) {
        self.frames.clear();
        self.committed_len = header_len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_overlays_latest_frame() {
        let mut index = WalIndex::new(4, 36);
        index.apply_commit(&[(2, 36), (3, 4156)], 5, 8276);
        index.apply_commit(&[(2, 8276)], 5, 12396);
        assert_eq!(index.lookup(2), Some(8276));
        assert_eq!(index.lookup(3), Some(4156));
        assert_eq!(index.lookup(9), None);
        assert_eq!(index.db_size(), 5);
    }

    #[test]
    fn reset_clears_frames() {
        let mut index = WalIndex::new(4, 36);
        index.apply_commit(&[(1, 36)], 4, 4156);
        index.reset(36);
        assert!(index.is_empty());
        assert_eq!(index.committed_len(), 36);
    }
}
