/// Hash index: a bucket-directory page structure for exact-match lookups.
/// Not usable for range scans.
///
/// The root is a directory page holding a fixed array of bucket heads in
/// its raw area; each bucket is a chain of slotted pages linked through
/// right_sibling. Bucket cells carry the entry hash so probes can skip
/// non-matching keys without comparing bytes:
///
///   [hash u64][key_len u16][key bytes][rowid u64]
///
/// Pages reuse the index-leaf/interior kind bytes; only this module
/// interprets their layout.
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Result, ZqError};
use crate::storage::page::{Page, PageId, PageKind, PAGE_HEADER_SIZE};
use crate::storage::page_store::PageStore;

const BUCKETS: usize = 64;

pub fn hash_key(key: &[u8]) -> u64 {
    xxh3_64(key)
}

fn encode_cell(hash: u64, key: &[u8], rowid: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(18 + key.len());
    buf.extend_from_slice(&hash.to_le_bytes());
    buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&rowid.to_le_bytes());
    buf
}

fn decode_cell(cell: &[u8]) -> (u64, &[u8], u64) {
    let hash = u64::from_le_bytes(cell[0..8].try_into().unwrap());
    let key_len = u16::from_le_bytes(cell[8..10].try_into().unwrap()) as usize;
    let key = &cell[10..10 + key_len];
    let rowid = u64::from_le_bytes(cell[10 + key_len..18 + key_len].try_into().unwrap());
    (hash, key, rowid)
}

pub struct HashIndex {
    root: PageId,
}

impl HashIndex {
    /// Allocate a directory page with all buckets empty.
    pub fn create(store: &mut impl PageStore) -> Result<Self> {
        let root = store.allocate_page(PageKind::IndexInterior)?;
        let root_id = root.page_no();
        store.write_page(&root)?;
        Ok(HashIndex { root: root_id })
    }

    pub fn open(root: PageId) -> Self {
        HashIndex { root }
    }

    pub fn root_page(&self) -> PageId {
        self.root
    }

    fn bucket_slot(hash: u64) -> usize {
        (hash % BUCKETS as u64) as usize
    }

    fn bucket_head(dir: &Page, slot: usize) -> PageId {
        let off = PAGE_HEADER_SIZE + slot * 4;
        u32::from_le_bytes(dir.data[off..off + 4].try_into().unwrap())
    }

    fn set_bucket_head(dir: &mut Page, slot: usize, head: PageId) {
        let off = PAGE_HEADER_SIZE + slot * 4;
        dir.data[off..off + 4].copy_from_slice(&head.to_le_bytes());
    }

    /// Insert an entry. The caller has already settled uniqueness.
    pub fn insert(&self, store: &mut impl PageStore, key: &[u8], rowid: u64) -> Result<()> {
        let hash = hash_key(key);
        let cell = encode_cell(hash, key, rowid);
        // Index keys never spill to overflow pages.
        if cell.len() > crate::storage::page::PAGE_SIZE - crate::storage::page::PAGE_HEADER_SIZE - 8
        {
            return Err(ZqError::Constraint(format!(
                "index key of {} bytes exceeds page capacity",
                key.len()
            )));
        }
        let mut dir = store.read_page(self.root)?;
        let slot = Self::bucket_slot(hash);

        // First chain page with room wins.
        let mut page_no = Self::bucket_head(&dir, slot);
        while page_no != 0 {
            let mut page = store.read_page(page_no)?;
            if page.can_fit(cell.len()) {
                page.insert_cell(&cell)?;
                return store.write_page(&page);
            }
            page_no = page.right_sibling();
        }

        // Chain full (or empty): prepend a fresh bucket page.
        let mut page = store.allocate_page(PageKind::IndexLeaf)?;
        page.set_right_sibling(Self::bucket_head(&dir, slot));
        page.insert_cell(&cell)?;
        Self::set_bucket_head(&mut dir, slot, page.page_no());
        store.write_page(&page)?;
        store.write_page(&dir)
    }

    /// Remove the entry for (key, rowid). Returns whether it was present.
    pub fn remove(&self, store: &mut impl PageStore, key: &[u8], rowid: u64) -> Result<bool> {
        let hash = hash_key(key);
        let dir = store.read_page(self.root)?;
        let mut page_no = Self::bucket_head(&dir, Self::bucket_slot(hash));
        while page_no != 0 {
            let mut page = store.read_page(page_no)?;
            for i in 0..page.cell_count() {
                let (h, k, r) = decode_cell(page.cell(i).expect("BUG: cell index in range"));
                if h == hash && r == rowid && k == key {
                    page.remove_cell(i);
                    store.write_page(&page)?;
                    return Ok(true);
                }
            }
            page_no = page.right_sibling();
        }
        Ok(false)
    }

    /// All row-ids matching the key exactly.
    pub fn lookup(&self, store: &mut impl PageStore, key: &[u8]) -> Result<Vec<u64>> {
        self.lookup_hashed(store, hash_key(key), key)
    }

    /// Probe with a precomputed hash (composite keys cache theirs).
    pub fn lookup_hashed(
        &self,
        store: &mut impl PageStore,
        hash: u64,
        key: &[u8],
    ) -> Result<Vec<u64>> {
        let dir = store.read_page(self.root)?;
        if dir.kind()? != PageKind::IndexInterior {
            return Err(ZqError::Corrupt(format!(
                "page {} is not a hash directory",
                self.root
            )));
        }
        let mut rowids = Vec::new();
        let mut page_no = Self::bucket_head(&dir, Self::bucket_slot(hash));
        while page_no != 0 {
            let page = store.read_page(page_no)?;
            for i in 0..page.cell_count() {
                let (h, k, r) = decode_cell(page.cell(i).expect("BUG: cell index in range"));
                if h == hash && k == key {
                    rowids.push(r);
                }
            }
            page_no = page.right_sibling();
        }
        Ok(rowids)
    }

    /// Free every bucket page and the directory (DROP INDEX).
    pub fn destroy(&self, store: &mut impl PageStore) -> Result<()> {
        let dir = store.read_page(self.root)?;
        for slot in 0..BUCKETS {
            let mut page_no = Self::bucket_head(&dir, slot);
            while page_no != 0 {
                let page = store.read_page(page_no)?;
                store.free_page(page_no);
                page_no = page.right_sibling();
            }
        }
        store.free_page(self.root);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page_store::mem::MemStore;

    fn setup() -> (MemStore, HashIndex) {
        let mut store = MemStore::new();
        let index = HashIndex::create(&mut store).unwrap();
        (store, index)
    }

    #[test]
    fn insert_and_lookup() {
        let (mut store, index) = setup();
        index.insert(&mut store, b"alpha", 1).unwrap();
        index.insert(&mut store, b"beta", 2).unwrap();
        index.insert(&mut store, b"alpha", 3).unwrap();

        let mut hits = index.lookup(&mut store, b"alpha").unwrap();
        hits.sort_unstable();
        assert_eq!(hits, vec![1, 3]);
        assert_eq!(index.lookup(&mut store, b"beta").unwrap(), vec![2]);
        assert!(index.lookup(&mut store, b"gamma").unwrap().is_empty());
    }

    #[test]
    fn remove_specific_entry() {
        let (mut store, index) = setup();
        index.insert(&mut store, b"k", 1).unwrap();
        index.insert(&mut store, b"k", 2).unwrap();
        assert!(index.remove(&mut store, b"k", 1).unwrap());
        assert!(!index.remove(&mut store, b"k", 1).unwrap());
        assert_eq!(index.lookup(&mut store, b"k").unwrap(), vec![2]);
    }

    #[test]
    fn many_entries_chain_buckets() {
        let (mut store, index) = setup();
        for i in 0..5000u64 {
            let key = format!("key-{}", i);
            index.insert(&mut store, key.as_bytes(), i).unwrap();
        }
        for i in (0..5000u64).step_by(371) {
            let key = format!("key-{}", i);
            assert_eq!(index.lookup(&mut store, key.as_bytes()).unwrap(), vec![i]);
        }
    }

    #[test]
    fn destroy_frees_everything() {
        let (mut store, index) = setup();
        for i in 0..2000u64 {
            index
                .insert(&mut store, format!("k{}", i).as_bytes(), i)
                .unwrap();
        }
        assert!(store.live_pages() > 1);
        index.destroy(&mut store).unwrap();
        assert_eq!(store.live_pages(), 0);
    }
}
