use std::collections::HashMap;

use crate::error::{Result, ZqError};
use crate::storage::page::{Page, PageId};
use crate::storage::pager::{Meta, Pager};
pub use crate::storage::undo::UndoOp;

/// Write-transaction states. Read-only transactions are a snapshot held by
/// the connection and never enter this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Pending,
    Committing,
    Committed,
    Aborted,
}

/// A write transaction: private dirty-page buffer, speculative meta state,
/// undo log, savepoints. Nothing is visible to other connections until
/// `commit` publishes the WAL frames.
pub struct Transaction {
    state: TxState,
    dirty: HashMap<PageId, Page>,
    /// Speculative page count; published as db_size_after_commit.
    page_count: u32,
    schema_cookie: u32,
    /// Pages taken off the free list; returned there on rollback.
    freelist_taken: Vec<PageId>,
    /// Pages freed by this transaction; reach the free list at commit.
    freed: Vec<PageId>,
    undo: Vec<UndoOp>,
    /// True while the undo log is being replayed: suppresses re-logging.
    applying_undo: bool,
    savepoints: Vec<(String, usize)>,
}

impl Transaction {
    pub fn begin(meta: &Meta) -> Self {
        Transaction {
            state: TxState::Pending,
            dirty: HashMap::new(),
            page_count: meta.page_count,
            schema_cookie: meta.schema_cookie,
            freelist_taken: Vec::new(),
            freed: Vec::new(),
            undo: Vec::new(),
            applying_undo: false,
            savepoints: Vec::new(),
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn dirty_page_count(&self) -> usize {
        self.dirty.len()
    }

    /// Read through the overlay: dirty buffer first, then committed state.
    pub fn read_page(&self, pager: &mut Pager, page_no: PageId) -> Result<Page> {
        if let Some(page) = self.dirty.get(&page_no) {
            return Ok(page.clone());
        }
        pager.read_page(page_no, None)
    }

    pub fn write_page(&mut self, page: Page) {
        self.dirty.insert(page.page_no(), page);
    }

    /// Allocate a page: free list first, else extend the speculative count.
    pub fn allocate_page(&mut self, pager: &mut Pager) -> PageId {
        if let Some(id) = pager.freelist_mut().allocate() {
            self.freelist_taken.push(id);
            id
        } else {
            let id = self.page_count;
            self.page_count += 1;
            id
        }
    }

    pub fn free_page(&mut self, page_no: PageId) {
        self.dirty.remove(&page_no);
        self.freed.push(page_no);
    }

    /// Record that this transaction changed the schema.
    pub fn bump_schema_cookie(&mut self) {
        self.schema_cookie += 1;
    }

    // --- Undo log and savepoints ---

    pub fn push_undo(&mut self, op: UndoOp) {
        if !self.applying_undo {
            self.undo.push(op);
        }
    }

    /// Marker for the start of a statement (or savepoint).
    pub fn undo_mark(&self) -> usize {
        self.undo.len()
    }

    /// Drain undo entries back to a marker, newest first, for replay.
    pub fn drain_undo_to(&mut self, mark: usize) -> Vec<UndoOp> {
        let mut ops = self.undo.split_off(mark);
        ops.reverse();
        ops
    }

    pub fn begin_undo_replay(&mut self) {
        self.applying_undo = true;
    }

    pub fn end_undo_replay(&mut self) {
        self.applying_undo = false;
    }

    pub fn create_savepoint(&mut self, name: &str) {
        self.savepoints
            .push((name.to_string(), self.undo.len()));
    }

    /// Undo-log position of a named savepoint.
    pub fn savepoint_mark(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, mark)| *mark)
            .ok_or_else(|| ZqError::NotFound(format!("no such savepoint: {}", name)))
    }

    /// Drop savepoints created after the one being rolled back to.
    pub fn truncate_savepoints(&mut self, mark: usize) {
        self.savepoints.retain(|(_, m)| *m <= mark);
    }

    // --- Terminal transitions ---

    /// Publish: append dirty pages as WAL frames, fsync, swap in the new
    /// index. The pager never touches the main file here.
    pub fn commit(&mut self, pager: &mut Pager) -> Result<()> {
        if self.state != TxState::Pending {
            return Err(ZqError::Misuse(format!(
                "cannot commit transaction in state {:?}",
                self.state
            )));
        }
        self.state = TxState::Committing;

        for &page_no in &self.freed {
            pager.freelist_mut().free(page_no);
        }
        let mut meta = *pager.meta();
        meta.page_count = self.page_count;
        meta.schema_cookie = self.schema_cookie;

        let dirty: Vec<Page> = self.dirty.drain().map(|(_, p)| p).collect();
        match pager.commit(dirty, meta) {
            Ok(()) => {
                self.state = TxState::Committed;
                self.freed.clear();
                self.freelist_taken.clear();
                self.undo.clear();
                self.savepoints.clear();
                Ok(())
            }
            Err(e) => {
                self.state = TxState::Aborted;
                Err(e)
            }
        }
    }

    /// Discard: dirty pages are dropped, free-list allocations returned.
    pub fn rollback(&mut self, pager: &mut Pager) {
        for &page_no in &self.freelist_taken {
            pager.freelist_mut().restore_available(page_no);
        }
        self.dirty.clear();
        self.freed.clear();
        self.freelist_taken.clear();
        self.undo.clear();
        self.savepoints.clear();
        self.state = TxState::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::codec::PlainCodec;
    use crate::storage::page::PageKind;
    use tempfile::TempDir;

    fn create_pager(dir: &TempDir) -> Pager {
        Pager::create(&dir.path().join("test.db"), Box::new(PlainCodec), 64).unwrap()
    }

    #[test]
    fn commit_publishes_dirty_pages() {
        let dir = TempDir::new().unwrap();
        let mut pager = create_pager(&dir);

        let mut tx = Transaction::begin(pager.meta());
        let page_no = tx.allocate_page(&mut pager);
        let mut page = Page::new(page_no, PageKind::TableLeaf);
        page.insert_cell(b"tx data").unwrap();
        tx.write_page(page);
        assert_eq!(tx.dirty_page_count(), 1);

        tx.commit(&mut pager).unwrap();
        assert_eq!(tx.state(), TxState::Committed);

        let read = pager.read_page(page_no, None).unwrap();
        assert_eq!(read.cell(0), Some(b"tx data".as_slice()));
        assert_eq!(pager.page_count(), page_no + 1);
    }

    #[test]
    fn rollback_discards_and_restores_freelist() {
        let dir = TempDir::new().unwrap();
        let mut pager = create_pager(&dir);

        // Seed a free page, then let a transaction take it and roll back.
        pager.freelist_mut().free(9);
        pager.freelist_mut().promote_pending();

        let mut tx = Transaction::begin(pager.meta());
        let taken = tx.allocate_page(&mut pager);
        assert_eq!(taken, 9);
        tx.write_page(Page::new(taken, PageKind::TableLeaf));
        tx.rollback(&mut pager);
        assert_eq!(tx.state(), TxState::Aborted);
        assert_eq!(tx.dirty_page_count(), 0);

        // The free page is allocatable again.
        assert_eq!(pager.freelist_mut().allocate(), Some(9));
    }

    #[test]
    fn commit_twice_is_misuse() {
        let dir = TempDir::new().unwrap();
        let mut pager = create_pager(&dir);
        let mut tx = Transaction::begin(pager.meta());
        tx.commit(&mut pager).unwrap();
        assert!(matches!(tx.commit(&mut pager), Err(ZqError::Misuse(_))));
    }

    #[test]
    fn savepoint_marks_and_drain() {
        let dir = TempDir::new().unwrap();
        let mut pager = create_pager(&dir);
        let mut tx = Transaction::begin(pager.meta());

        tx.push_undo(UndoOp::Insert {
            table: "t".into(),
            rowid: 1,
        });
        tx.create_savepoint("sp");
        tx.push_undo(UndoOp::Insert {
            table: "t".into(),
            rowid: 2,
        });
        tx.push_undo(UndoOp::Insert {
            table: "t".into(),
            rowid: 3,
        });

        let mark = tx.savepoint_mark("sp").unwrap();
        let ops = tx.drain_undo_to(mark);
        assert_eq!(ops.len(), 2);
        // Newest first for replay.
        assert!(matches!(&ops[0], UndoOp::Insert { rowid: 3, .. }));
        assert_eq!(tx.undo_mark(), 1);
        assert!(tx.savepoint_mark("missing").is_err());
        tx.rollback(&mut pager);
    }
}
