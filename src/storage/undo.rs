use crate::types::Value;

/// One reverse operation in a transaction's undo log. Applying an entry
/// restores the row state from before the corresponding forward operation.
#[derive(Debug, Clone)]
pub enum UndoOp {
    /// Forward op was an insert; undo deletes the row.
    Insert { table: String, rowid: u64 },
    /// Forward op was a delete; undo re-creates the row.
    Delete {
        table: String,
        rowid: u64,
        row: Vec<Value>,
    },
    /// Forward op was an update; undo writes the old row back.
    Update {
        table: String,
        rowid: u64,
        old_row: Vec<Value>,
    },
}
