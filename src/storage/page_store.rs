use crate::error::Result;
use crate::storage::page::{Page, PageId, PageKind};
use crate::storage::undo::UndoOp;

/// Page access seam between the B-tree / table layers and whatever is
/// actually serving pages: the pager directly for read paths, or a
/// transaction's dirty-page overlay for write paths.
pub trait PageStore {
    fn read_page(&mut self, page_no: PageId) -> Result<Page>;

    fn write_page(&mut self, page: &Page) -> Result<()>;

    /// Allocate a page of the given kind, preferring the free list.
    fn allocate_page(&mut self, kind: PageKind) -> Result<Page>;

    /// Return a page to the free list. Content is not wiped.
    fn free_page(&mut self, page_no: PageId);

    /// Logical number of pages in the database (including page 0).
    fn page_count(&self) -> u32;

    /// Record a reverse operation for statement rollback. Stores without a
    /// transaction (read paths, unit fixtures) drop the entry.
    fn log_undo(&mut self, _op: UndoOp) {}

    /// Note a schema change so cached plans can detect staleness. Only the
    /// transaction overlay propagates this into the meta page.
    fn bump_schema_cookie(&mut self) {}
}
