pub mod page_store;
pub mod transaction;

use crate::error::Result;
use crate::schema::catalog::SystemCatalog;
use crate::storage::table::Table;
use crate::tx::page_store::TxPageStore;
use crate::tx::transaction::UndoOp;

/// Replay drained undo entries (newest first) against the transaction's
/// overlay, restoring the row state from before the failed statement or
/// back to a savepoint. Replay itself is not re-logged.
pub fn apply_undo(
    store: &mut TxPageStore<'_>,
    catalog: &SystemCatalog,
    ops: Vec<UndoOp>,
) -> Result<()> {
    store.tx_mut().begin_undo_replay();
    let result = replay(store, catalog, ops);
    store.tx_mut().end_undo_replay();
    result
}

fn replay(
    store: &mut TxPageStore<'_>,
    catalog: &SystemCatalog,
    ops: Vec<UndoOp>,
) -> Result<()> {
    for op in ops {
        match op {
            UndoOp::Insert { table, rowid } => {
                let mut t = Table::load(store, catalog, &table)?;
                t.delete_row(store, rowid)?;
                // The undone insert still consumed its row-id: keep the
                // high-water mark so the id is never reassigned.
                t.def.next_rowid = t.def.next_rowid.max(rowid + 1);
                t.persist_counters(store, catalog)?;
            }
            UndoOp::Delete { table, rowid, row } => {
                let mut t = Table::load(store, catalog, &table)?;
                t.insert_row_with_id(store, rowid, row)?;
                t.persist_counters(store, catalog)?;
            }
            UndoOp::Update {
                table,
                rowid,
                old_row,
            } => {
                let mut t = Table::load(store, catalog, &table)?;
                t.update_row(store, rowid, old_row)?;
                t.persist_counters(store, catalog)?;
            }
        }
    }
    Ok(())
}
