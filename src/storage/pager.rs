use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;

use crate::error::{Result, ZqError};
use crate::storage::codec::PageCodec;
use crate::storage::freelist::{FreeList, SanitizeReport};
use crate::storage::page::{Page, PageId, PageKind, NO_PAGE, PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::wal::index::WalIndex;
use crate::wal::writer::WalWriter;
use crate::wal::{recovery, WAL_HEADER_SIZE};

/// DB file meta page (page 0) payload, stored as cell 0.
/// Magic(16) + page_size(4) + page_count(4) + free_list_head(4) +
/// schema_cookie(4) + encryption_salt(32); the page-header checksum seals it.
const MAGIC: &[u8; 16] = b"ZQLite format 1\0";
const META_SIZE: usize = 64;

/// The catalog B-tree root lives at a fixed, reserved page.
pub const CATALOG_ROOT: PageId = 1;

/// Default LRU cache capacity in pages.
pub const DEFAULT_CACHE_PAGES: usize = 256;

/// Ids per freelist container page: [count u32][ids u32 ...] after the header.
const FREELIST_IDS_PER_PAGE: usize = (PAGE_SIZE - PAGE_HEADER_SIZE - 4) / 4;

#[derive(Debug, Clone, Copy)]
pub struct Meta {
    pub page_size: u32,
    pub page_count: u32,
    pub free_list_head: PageId,
    pub schema_cookie: u32,
    pub encryption_salt: [u8; 32],
}

impl Meta {
    fn fresh() -> Self {
        Meta {
            page_size: PAGE_SIZE as u32,
            page_count: 2, // meta page + catalog root
            free_list_head: NO_PAGE,
            schema_cookie: 0,
            encryption_salt: rand::random(),
        }
    }

    fn encode(&self) -> [u8; META_SIZE] {
        let mut buf = [0u8; META_SIZE];
        buf[0..16].copy_from_slice(MAGIC);
        buf[16..20].copy_from_slice(&self.page_size.to_le_bytes());
        buf[20..24].copy_from_slice(&self.page_count.to_le_bytes());
        buf[24..28].copy_from_slice(&self.free_list_head.to_le_bytes());
        buf[28..32].copy_from_slice(&self.schema_cookie.to_le_bytes());
        buf[32..64].copy_from_slice(&self.encryption_salt);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < META_SIZE {
            return Err(ZqError::Corrupt("meta page payload truncated".into()));
        }
        if &buf[0..16] != MAGIC {
            return Err(ZqError::Corrupt("bad database magic".into()));
        }
        let mut encryption_salt = [0u8; 32];
        encryption_salt.copy_from_slice(&buf[32..64]);
        Ok(Meta {
            page_size: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            page_count: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            free_list_head: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            schema_cookie: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
            encryption_salt,
        })
    }

    /// Render this meta into a sealed page 0.
    pub fn to_page(&self) -> Page {
        let mut page = Page::new(0, PageKind::Meta);
        page.insert_cell(&self.encode())
            .expect("BUG: meta payload fits in page 0");
        page
    }
}

/// A read transaction's view of the database: the WAL index as of begin.
#[derive(Debug, Clone)]
pub struct Snapshot {
    index: WalIndex,
}

impl Snapshot {
    pub fn db_size(&self) -> u32 {
        self.index.db_size()
    }

    /// WAL length this snapshot was taken at; used to detect staleness when
    /// a deferred transaction upgrades to a writer.
    pub fn committed_len(&self) -> u64 {
        self.index.committed_len()
    }
}

/// Page-granular file I/O with a bounded LRU cache and WAL-overlay reads.
///
/// One `Pager` is shared by all connections of a `Database` handle; the
/// containing mutex serializes page operations. Cached pages are cloned
/// out, so no borrowed page can be torn by eviction.
pub struct Pager {
    file: File,
    path: PathBuf,
    codec: Box<dyn PageCodec>,
    image_len: usize,
    meta: Meta,
    freelist: FreeList,
    freelist_report: Option<SanitizeReport>,
    /// Cache key is (page_no, wal frame offset or 0 for the main file), so
    /// readers at different snapshots never observe each other's versions.
    cache: LruCache<(PageId, u64), Page>,
    wal: WalWriter,
    wal_read: File,
    wal_index: WalIndex,
    cache_hits: u64,
    cache_misses: u64,
}

fn wal_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-wal");
    PathBuf::from(os)
}

impl Pager {
    /// Create a new database file with an empty catalog root.
    pub fn create(path: &Path, codec: Box<dyn PageCodec>, cache_pages: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let image_len = PAGE_SIZE + codec.overhead();
        let wal = WalWriter::create(&wal_path(path), PAGE_SIZE as u32, image_len)?;
        let wal_read = File::open(wal.wal_path())?;
        let meta = Meta::fresh();

        let mut pager = Pager {
            file,
            path: path.to_path_buf(),
            codec,
            image_len,
            meta,
            freelist: FreeList::new(),
            freelist_report: None,
            cache: LruCache::new(cache_capacity(cache_pages)),
            wal,
            wal_read,
            wal_index: WalIndex::new(meta.page_count, WAL_HEADER_SIZE as u64),
            cache_hits: 0,
            cache_misses: 0,
        };

        // Bootstrap: meta page and an empty catalog root leaf, written
        // straight to the main file before any WAL traffic exists.
        pager.write_main(&meta.to_page())?;
        let mut catalog_root = Page::new(CATALOG_ROOT, PageKind::TableLeaf);
        catalog_root.seal();
        pager.write_main(&catalog_root)?;
        pager.file.sync_all()?;
        Ok(pager)
    }

    /// Open an existing database, running WAL recovery first.
    pub fn open(path: &Path, codec: Box<dyn PageCodec>, cache_pages: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let image_len = PAGE_SIZE + codec.overhead();
        let wp = wal_path(path);

        let (wal, wal_index) = match recovery::recover(&wp, image_len)? {
            Some(result) => {
                let wal = WalWriter::open_after_recovery(
                    &wp,
                    result.header,
                    image_len,
                    result.index.committed_len(),
                )?;
                (wal, result.index)
            }
            None => {
                let wal = WalWriter::create(&wp, PAGE_SIZE as u32, image_len)?;
                (wal, WalIndex::new(0, WAL_HEADER_SIZE as u64))
            }
        };
        let wal_read = File::open(wal.wal_path())?;

        let mut pager = Pager {
            file,
            path: path.to_path_buf(),
            codec,
            image_len,
            meta: Meta::fresh(), // replaced below
            freelist: FreeList::new(),
            freelist_report: None,
            cache: LruCache::new(cache_capacity(cache_pages)),
            wal,
            wal_read,
            wal_index,
            cache_hits: 0,
            cache_misses: 0,
        };

        // The meta page itself may live in the WAL.
        let meta_page = pager.read_page(0, None)?;
        let payload = meta_page
            .cell(0)
            .ok_or_else(|| ZqError::Corrupt("meta page has no payload".into()))?;
        pager.meta = Meta::decode(payload)?;
        if pager.meta.page_size != PAGE_SIZE as u32 {
            return Err(ZqError::Corrupt(format!(
                "unsupported page size {} (built for {})",
                pager.meta.page_size, PAGE_SIZE
            )));
        }

        let (freelist, report) = pager.load_freelist()?;
        pager.freelist = freelist;
        if !report.is_clean() {
            log::warn!(
                "freelist sanitized: out_of_range={} duplicates={}",
                report.out_of_range.len(),
                report.duplicates.len()
            );
            pager.freelist_report = Some(report);
        }
        Ok(pager)
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn page_count(&self) -> u32 {
        self.meta.page_count
    }

    pub fn schema_cookie(&self) -> u32 {
        self.meta.schema_cookie
    }

    pub fn freelist_mut(&mut self) -> &mut FreeList {
        &mut self.freelist
    }

    pub fn freelist_sanitize_report(&self) -> Option<&SanitizeReport> {
        self.freelist_report.as_ref()
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses
    }

    pub fn db_path(&self) -> &Path {
        &self.path
    }

    pub fn wal_size_bytes(&self) -> Result<u64> {
        self.wal.file_size_bytes()
    }

    /// Capture the current committed state as a reader snapshot.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            index: self.wal_index.clone(),
        }
    }

    /// WAL length as of the latest commit.
    pub fn wal_committed_len(&self) -> u64 {
        self.wal_index.committed_len()
    }

    /// Read a page through the WAL overlay: the snapshot's frame if one
    /// exists, else the main file. Checksum-verified either way.
    pub fn read_page(&mut self, page_no: PageId, snapshot: Option<&Snapshot>) -> Result<Page> {
        let index = snapshot.map_or(&self.wal_index, |s| &s.index);
        let version = index.lookup(page_no).unwrap_or(0);
        if let Some(page) = self.cache.get(&(page_no, version)) {
            self.cache_hits += 1;
            return Ok(page.clone());
        }
        self.cache_misses += 1;

        let image = if version != 0 {
            let header = self.wal.header();
            crate::wal::reader::read_frame_image(
                &mut self.wal_read,
                version,
                self.image_len,
                header.salt,
                header.checksum_seed,
            )?
        } else {
            self.read_main_image(page_no)?
        };

        let plain = self.codec.decode(page_no, &image)?;
        if plain.len() != PAGE_SIZE {
            return Err(ZqError::Corrupt(format!(
                "decoded page {} has wrong length {}",
                page_no,
                plain.len()
            )));
        }
        let mut data = [0u8; PAGE_SIZE];
        data.copy_from_slice(&plain);
        let page = Page::from_bytes(data);
        page.verify()?;
        if page.page_no() != page_no {
            return Err(ZqError::Corrupt(format!(
                "page {} stores page number {}",
                page_no,
                page.page_no()
            )));
        }
        self.cache.put((page_no, version), page.clone());
        Ok(page)
    }

    /// Commit a transaction: append all dirty pages (with the new meta page
    /// folded in) as WAL frames, mark the last as the commit frame, fsync,
    /// then publish the new index. Nothing touches the main file.
    pub fn commit(&mut self, mut dirty: Vec<Page>, mut new_meta: Meta) -> Result<()> {
        new_meta.schema_cookie = new_meta.schema_cookie.max(self.meta.schema_cookie);

        // Fold the freelist chain into the dirty set whenever it changed.
        if self.freelist.take_dirty() {
            let (head, chain_pages) = self.build_freelist_chain();
            new_meta.free_list_head = head;
            dirty.retain(|p| !chain_pages.iter().any(|c| c.page_no() == p.page_no()));
            dirty.extend(chain_pages);
        }
        dirty.retain(|p| p.page_no() != 0);
        dirty.push(new_meta.to_page());

        let db_size = new_meta.page_count;
        let mut offsets = Vec::with_capacity(dirty.len());
        let last = dirty.len() - 1;
        for (i, page) in dirty.iter_mut().enumerate() {
            page.seal();
            let image = self.codec.encode(page.page_no(), page.as_bytes());
            let commit_size = if i == last { db_size } else { 0 };
            let offset = self.wal.append(page.page_no(), commit_size, &image)?;
            offsets.push((page.page_no(), offset));
        }
        self.wal.sync()?;

        self.wal_index
            .apply_commit(&offsets, db_size, self.wal.end_offset());
        for (page, &(page_no, offset)) in dirty.iter().zip(&offsets) {
            self.cache.put((page_no, offset), page.clone());
        }
        self.meta = new_meta;
        Ok(())
    }

    /// Transfer WAL-resident pages into the main file and truncate the log.
    /// Callers must hold the writer lock and guarantee no live snapshots.
    pub fn checkpoint(&mut self) -> Result<()> {
        if self.wal_index.is_empty() {
            self.freelist.promote_pending();
            return Ok(());
        }

        let header = self.wal.header();
        let pages: Vec<(PageId, u64)> = self.wal_index.pages().collect();
        for (page_no, offset) in pages {
            let image = crate::wal::reader::read_frame_image(
                &mut self.wal_read,
                offset,
                self.image_len,
                header.salt,
                header.checksum_seed,
            )?;
            self.write_main_image(page_no, &image)?;
        }
        self.file.sync_all()?;

        self.wal.truncate_reset()?;
        self.wal_index.reset(WAL_HEADER_SIZE as u64);
        self.freelist.promote_pending();
        self.cache.clear();
        Ok(())
    }

    // --- Freelist chain (de)serialization ---

    /// Walk the on-disk chain reachable from the meta page.
    fn load_freelist(&mut self) -> Result<(FreeList, SanitizeReport)> {
        let mut ids = Vec::new();
        let mut next = self.meta.free_list_head;
        let mut seen = std::collections::HashSet::new();
        while next != NO_PAGE {
            if !seen.insert(next) {
                log::warn!("freelist chain cycle at page {}, truncating", next);
                break;
            }
            let page = self.read_page(next, None)?;
            if page.kind()? != PageKind::Free {
                return Err(ZqError::Corrupt(format!(
                    "freelist chain member {} is not a free page",
                    next
                )));
            }
            ids.push(next);
            let base = PAGE_HEADER_SIZE;
            let count =
                u32::from_le_bytes(page.data[base..base + 4].try_into().unwrap()) as usize;
            for i in 0..count.min(FREELIST_IDS_PER_PAGE) {
                let off = base + 4 + i * 4;
                ids.push(u32::from_le_bytes(page.data[off..off + 4].try_into().unwrap()));
            }
            next = page.right_sibling();
        }
        Ok(FreeList::from_scan(ids, self.meta.page_count))
    }

    /// Serialize the current freelist into container pages drawn from its
    /// own members. Returns (chain head, container pages to write).
    fn build_freelist_chain(&self) -> (PageId, Vec<Page>) {
        let members = self.freelist.chain_members();
        if members.is_empty() {
            return (NO_PAGE, Vec::new());
        }
        // k containers cover k + k*cap members.
        let k = members.len().div_ceil(1 + FREELIST_IDS_PER_PAGE);
        let (containers, leaves) = members.split_at(k);

        let mut pages = Vec::with_capacity(k);
        for (i, &container_id) in containers.iter().enumerate() {
            let mut page = Page::new(container_id, PageKind::Free);
            let next = containers.get(i + 1).copied().unwrap_or(NO_PAGE);
            page.set_right_sibling(next);
            let slice = leaves
                .iter()
                .skip(i * FREELIST_IDS_PER_PAGE)
                .take(FREELIST_IDS_PER_PAGE)
                .collect::<Vec<_>>();
            let base = PAGE_HEADER_SIZE;
            page.data[base..base + 4].copy_from_slice(&(slice.len() as u32).to_le_bytes());
            for (j, &&id) in slice.iter().enumerate() {
                let off = base + 4 + j * 4;
                page.data[off..off + 4].copy_from_slice(&id.to_le_bytes());
            }
            pages.push(page);
        }
        (containers[0], pages)
    }

    // --- Main-file I/O (encoded images, image_len-sized slots) ---

    fn read_main_image(&mut self, page_no: PageId) -> Result<Vec<u8>> {
        let offset = page_no as u64 * self.image_len as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut image = vec![0u8; self.image_len];
        self.file.read_exact(&mut image)?;
        Ok(image)
    }

    fn write_main_image(&mut self, page_no: PageId, image: &[u8]) -> Result<()> {
        let offset = page_no as u64 * self.image_len as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(image)?;
        Ok(())
    }

    fn write_main(&mut self, page: &Page) -> Result<()> {
        let mut sealed = page.clone();
        sealed.seal();
        let image = self.codec.encode(sealed.page_no(), sealed.as_bytes());
        self.write_main_image(sealed.page_no(), &image)
    }
}

fn cache_capacity(pages: usize) -> NonZeroUsize {
    NonZeroUsize::new(pages).unwrap_or_else(|| {
        NonZeroUsize::new(DEFAULT_CACHE_PAGES).expect("BUG: default cache capacity is nonzero")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::codec::PlainCodec;
    use tempfile::TempDir;

    fn create_pager(dir: &TempDir) -> Pager {
        let path = dir.path().join("test.db");
        Pager::create(&path, Box::new(PlainCodec), 64).unwrap()
    }

    #[test]
    fn create_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        {
            let pager = Pager::create(&path, Box::new(PlainCodec), 64).unwrap();
            assert_eq!(pager.page_count(), 2);
        }
        {
            let mut pager = Pager::open(&path, Box::new(PlainCodec), 64).unwrap();
            assert_eq!(pager.page_count(), 2);
            let root = pager.read_page(CATALOG_ROOT, None).unwrap();
            assert_eq!(root.kind().unwrap(), PageKind::TableLeaf);
        }
    }

    #[test]
    fn commit_then_read_through_wal() {
        let dir = TempDir::new().unwrap();
        let mut pager = create_pager(&dir);

        let mut page = Page::new(2, PageKind::TableLeaf);
        page.insert_cell(b"wal data").unwrap();
        let mut meta = *pager.meta();
        meta.page_count = 3;
        pager.commit(vec![page], meta).unwrap();

        // Page 2 only exists in the WAL; reads must overlay it.
        let page = pager.read_page(2, None).unwrap();
        assert_eq!(page.cell(0), Some(b"wal data".as_slice()));
        assert_eq!(pager.page_count(), 3);
    }

    #[test]
    fn committed_state_survives_reopen_without_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        {
            let mut pager = Pager::create(&path, Box::new(PlainCodec), 64).unwrap();
            let mut page = Page::new(2, PageKind::TableLeaf);
            page.insert_cell(b"durable").unwrap();
            let mut meta = *pager.meta();
            meta.page_count = 3;
            pager.commit(vec![page], meta).unwrap();
            // No checkpoint: the page image exists only in the WAL.
        }
        {
            let mut pager = Pager::open(&path, Box::new(PlainCodec), 64).unwrap();
            assert_eq!(pager.page_count(), 3);
            let page = pager.read_page(2, None).unwrap();
            assert_eq!(page.cell(0), Some(b"durable".as_slice()));
        }
    }

    #[test]
    fn checkpoint_moves_pages_to_main_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        {
            let mut pager = Pager::create(&path, Box::new(PlainCodec), 64).unwrap();
            let mut page = Page::new(2, PageKind::TableLeaf);
            page.insert_cell(b"checkpointed").unwrap();
            let mut meta = *pager.meta();
            meta.page_count = 3;
            pager.commit(vec![page], meta).unwrap();
            pager.checkpoint().unwrap();
            assert_eq!(
                pager.wal_size_bytes().unwrap(),
                WAL_HEADER_SIZE as u64
            );
        }
        {
            let mut pager = Pager::open(&path, Box::new(PlainCodec), 64).unwrap();
            let page = pager.read_page(2, None).unwrap();
            assert_eq!(page.cell(0), Some(b"checkpointed".as_slice()));
        }
    }

    #[test]
    fn snapshot_isolates_reader_from_later_commits() {
        let dir = TempDir::new().unwrap();
        let mut pager = create_pager(&dir);

        let mut page = Page::new(2, PageKind::TableLeaf);
        page.insert_cell(b"v1").unwrap();
        let mut meta = *pager.meta();
        meta.page_count = 3;
        pager.commit(vec![page], meta).unwrap();

        let snapshot = pager.snapshot();

        let mut page = Page::new(2, PageKind::TableLeaf);
        page.insert_cell(b"v2").unwrap();
        let meta = *pager.meta();
        pager.commit(vec![page], meta).unwrap();

        let old = pager.read_page(2, Some(&snapshot)).unwrap();
        assert_eq!(old.cell(0), Some(b"v1".as_slice()));
        let new = pager.read_page(2, None).unwrap();
        assert_eq!(new.cell(0), Some(b"v2".as_slice()));
    }

    #[test]
    fn freelist_round_trips_through_meta_chain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        {
            let mut pager = Pager::create(&path, Box::new(PlainCodec), 64).unwrap();
            // Pretend pages 2..5 were allocated and then freed.
            pager.freelist_mut().free(2);
            pager.freelist_mut().free(3);
            pager.freelist_mut().free(4);
            let mut meta = *pager.meta();
            meta.page_count = 5;
            pager.commit(Vec::new(), meta).unwrap();
        }
        {
            let mut pager = Pager::open(&path, Box::new(PlainCodec), 64).unwrap();
            assert_eq!(pager.freelist_mut().len(), 3);
        }
    }
}
