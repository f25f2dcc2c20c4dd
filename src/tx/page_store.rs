use crate::error::{Result, ZqError};
use crate::storage::page::{Page, PageId, PageKind};
use crate::storage::page_store::PageStore;
use crate::storage::pager::{Pager, Snapshot};
use crate::tx::transaction::Transaction;

/// A `PageStore` backed by a write transaction's dirty-page buffer.
///
/// Reads check the dirty buffer first and fall through to the committed
/// state; writes stay private to the transaction; allocation and freeing
/// are tracked so rollback can put everything back.
pub struct TxPageStore<'a> {
    tx: Transaction,
    pager: &'a mut Pager,
}

impl<'a> TxPageStore<'a> {
    pub fn new(tx: Transaction, pager: &'a mut Pager) -> Self {
        TxPageStore { tx, pager }
    }

    /// Consume this store and return the transaction (put-back into the
    /// connection between statements).
    pub fn into_tx(self) -> Transaction {
        self.tx
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn tx_mut(&mut self) -> &mut Transaction {
        &mut self.tx
    }
}

impl PageStore for TxPageStore<'_> {
    fn read_page(&mut self, page_no: PageId) -> Result<Page> {
        self.tx.read_page(self.pager, page_no)
    }

    fn write_page(&mut self, page: &Page) -> Result<()> {
        self.tx.write_page(page.clone());
        Ok(())
    }

    fn allocate_page(&mut self, kind: PageKind) -> Result<Page> {
        let page_no = self.tx.allocate_page(self.pager);
        let page = Page::new(page_no, kind);
        self.tx.write_page(page.clone());
        Ok(page)
    }

    fn free_page(&mut self, page_no: PageId) {
        self.tx.free_page(page_no);
    }

    fn page_count(&self) -> u32 {
        self.tx.page_count()
    }

    fn log_undo(&mut self, op: crate::storage::undo::UndoOp) {
        self.tx.push_undo(op);
    }

    fn bump_schema_cookie(&mut self) {
        self.tx.bump_schema_cookie();
    }
}

/// A `PageStore` serving a read transaction: every page comes through the
/// WAL-index snapshot captured at begin time, and writes are refused.
pub struct ReadStore<'a> {
    pager: &'a mut Pager,
    snapshot: Snapshot,
}

impl<'a> ReadStore<'a> {
    pub fn new(pager: &'a mut Pager, snapshot: Snapshot) -> Self {
        ReadStore { pager, snapshot }
    }
}

impl PageStore for ReadStore<'_> {
    fn read_page(&mut self, page_no: PageId) -> Result<Page> {
        self.pager.read_page(page_no, Some(&self.snapshot))
    }

    fn write_page(&mut self, page: &Page) -> Result<()> {
        Err(ZqError::Misuse(format!(
            "write to page {} in a read-only transaction",
            page.page_no()
        )))
    }

    fn allocate_page(&mut self, _kind: PageKind) -> Result<Page> {
        Err(ZqError::Misuse(
            "page allocation in a read-only transaction".into(),
        ))
    }

    fn free_page(&mut self, _page_no: PageId) {}

    fn page_count(&self) -> u32 {
        self.snapshot.db_size().max(self.pager.page_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::codec::PlainCodec;
    use tempfile::TempDir;

    #[test]
    fn dirty_reads_see_own_writes() {
        let dir = TempDir::new().unwrap();
        let mut pager =
            Pager::create(&dir.path().join("test.db"), Box::new(PlainCodec), 64).unwrap();
        let tx = Transaction::begin(pager.meta());
        let mut store = TxPageStore::new(tx, &mut pager);

        let mut page = store.allocate_page(PageKind::TableLeaf).unwrap();
        let page_no = page.page_no();
        page.insert_cell(b"dirty").unwrap();
        store.write_page(&page).unwrap();

        let read = store.read_page(page_no).unwrap();
        assert_eq!(read.cell(0), Some(b"dirty".as_slice()));

        // Nothing published yet: committed state has no such page.
        let mut tx = store.into_tx();
        assert!(pager.read_page(page_no, None).is_err());
        tx.rollback(&mut pager);
    }
}
