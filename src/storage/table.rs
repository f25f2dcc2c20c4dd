/// Table objects: the storage engine's view of one table.
///
/// A `Table` couples a deep-cloned schema with the primary B-tree and the
/// table's secondary indexes, all resolved from the catalog by name. Rows
/// are keyed by row-id; mutation goes primary-first, then through the index
/// manager. Constraint evaluation that needs the expression evaluator
/// (DEFAULT, CHECK) happens in the executor before rows reach this layer;
/// NOT NULL and affinity are enforced here.
use crate::btree::cursor::BTreeCursor;
use crate::btree::key_encoding::{decode_rowid, encode_rowid};
use crate::btree::ops::BTree;
use crate::error::{Result, ZqError};
use crate::index;
use crate::schema::catalog::{SystemCatalog, TableDef};
use crate::schema::index::IndexDef;
use crate::storage::overflow;
use crate::storage::page_store::PageStore;
use crate::storage::row::{decode_row, encode_row};
use crate::types::Value;

pub struct Table {
    pub def: TableDef,
    pub indexes: Vec<IndexDef>,
}

impl Table {
    /// Materialize a table from the catalog. Definitions are deep clones;
    /// nothing here aliases catalog state.
    pub fn load(
        store: &mut impl PageStore,
        catalog: &SystemCatalog,
        name: &str,
    ) -> Result<Table> {
        let def = catalog.expect_table(store, name)?;
        let indexes = catalog.indexes_for_table(store, name)?;
        Ok(Table { def, indexes })
    }

    fn tree(&self) -> BTree {
        BTree::open(self.def.root)
    }

    /// Affinity coercion for a full row; length-checked.
    fn coerce_row(&self, values: Vec<Value>) -> Result<Vec<Value>> {
        if values.len() != self.def.columns.len() {
            return Err(ZqError::Type(format!(
                "table {} expects {} columns, got {}",
                self.def.name,
                self.def.columns.len(),
                values.len()
            )));
        }
        let mut out = Vec::with_capacity(values.len());
        for (col, value) in self.def.columns.iter().zip(values) {
            out.push(col.data_type.coerce(value)?);
        }
        Ok(out)
    }

    fn check_not_null(&self, row: &[Value]) -> Result<()> {
        for (col, value) in self.def.columns.iter().zip(row) {
            if value.is_null() && !col.is_nullable {
                return Err(ZqError::Constraint(format!(
                    "NOT NULL constraint failed: {}.{}",
                    self.def.name, col.name
                )));
            }
        }
        Ok(())
    }

    /// Affinity coercion plus NOT NULL enforcement for a full row.
    fn prepare_row(&self, values: Vec<Value>) -> Result<Vec<Value>> {
        let row = self.coerce_row(values)?;
        self.check_not_null(&row)?;
        Ok(row)
    }

    /// Reject unique-index violations before any page is touched, so a
    /// failed insert or update leaves no partial state behind. NULL key
    /// components exempt a row from the check.
    fn check_unique(
        &self,
        store: &mut impl PageStore,
        row: &[Value],
        exclude_rowid: Option<u64>,
    ) -> Result<()> {
        for def in &self.indexes {
            if !def.unique {
                continue;
            }
            let key = index::key_from_row(def, &self.def, row)?;
            if key.has_null() {
                continue;
            }
            let existing = index::IndexHandle::new(def.clone()).lookup_exact(store, &key)?;
            if existing.iter().any(|&r| Some(r) != exclude_rowid) {
                return Err(ZqError::Constraint(format!(
                    "UNIQUE constraint failed: index {}",
                    def.name
                )));
            }
        }
        Ok(())
    }

    /// Insert a row, returning the assigned row-id.
    ///
    /// An INTEGER PRIMARY KEY column aliases the row-id: an explicit value
    /// there becomes the row-id, a NULL there gets the next monotonic id
    /// written back into the column.
    pub fn insert_row(&mut self, store: &mut impl PageStore, values: Vec<Value>) -> Result<u64> {
        let mut row = self.coerce_row(values)?;

        let rowid = match self.def.rowid_alias() {
            Some(idx) => match &row[idx] {
                Value::Integer(v) if *v > 0 => *v as u64,
                Value::Integer(v) => {
                    return Err(ZqError::Constraint(format!(
                        "row-id {} out of range for {}",
                        v, self.def.name
                    )))
                }
                Value::Null => {
                    let id = self.def.next_rowid;
                    row[idx] = Value::Integer(id as i64);
                    id
                }
                other => {
                    return Err(ZqError::Type(format!(
                        "INTEGER PRIMARY KEY requires an integer, got {}",
                        other
                    )))
                }
            },
            None => self.def.next_rowid,
        };

        let row = self.prepare_row(row)?;
        let key = encode_rowid(rowid);
        let tree = self.tree();
        if tree.search(store, &key)?.is_some() {
            return Err(ZqError::Constraint(format!(
                "PRIMARY KEY constraint failed: {} row {}",
                self.def.name, rowid
            )));
        }
        self.check_unique(store, &row, None)?;

        let stored = overflow::store_payload(store, &encode_row(&row))?;
        tree.insert(store, &key, &stored)?;
        index::apply_row_change(store, &self.indexes, &self.def, None, Some(&row), rowid)?;

        self.def.next_rowid = self.def.next_rowid.max(rowid + 1);
        self.def.row_count += 1;
        Ok(rowid)
    }

    /// Raw insert at a known row-id: the undo path re-creating a deleted
    /// row. Skips alias extraction; the row already carries its values.
    pub fn insert_row_with_id(
        &mut self,
        store: &mut impl PageStore,
        rowid: u64,
        values: Vec<Value>,
    ) -> Result<()> {
        let row = self.prepare_row(values)?;
        let key = encode_rowid(rowid);
        let tree = self.tree();
        if tree.search(store, &key)?.is_some() {
            return Err(ZqError::Constraint(format!(
                "PRIMARY KEY constraint failed: {} row {}",
                self.def.name, rowid
            )));
        }
        self.check_unique(store, &row, None)?;
        let stored = overflow::store_payload(store, &encode_row(&row))?;
        tree.insert(store, &key, &stored)?;
        index::apply_row_change(store, &self.indexes, &self.def, None, Some(&row), rowid)?;
        self.def.next_rowid = self.def.next_rowid.max(rowid + 1);
        self.def.row_count += 1;
        Ok(())
    }

    /// Replace a row in place, updating only the indexes whose keys change.
    pub fn update_row(
        &mut self,
        store: &mut impl PageStore,
        rowid: u64,
        values: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let row = self.prepare_row(values)?;
        self.check_unique(store, &row, Some(rowid))?;
        let key = encode_rowid(rowid);
        let tree = self.tree();
        let old_stored = tree.search(store, &key)?.ok_or_else(|| {
            ZqError::NotFound(format!("row {} not in table {}", rowid, self.def.name))
        })?;
        let old_row = decode_row(&overflow::load_payload(store, &old_stored)?)?;

        overflow::free_payload(store, &old_stored)?;
        let stored = overflow::store_payload(store, &encode_row(&row))?;
        tree.insert(store, &key, &stored)?;
        index::apply_row_change(
            store,
            &self.indexes,
            &self.def,
            Some(&old_row),
            Some(&row),
            rowid,
        )?;
        Ok(old_row)
    }

    /// Delete a row, returning its former contents (for the undo log).
    pub fn delete_row(&mut self, store: &mut impl PageStore, rowid: u64) -> Result<Vec<Value>> {
        let key = encode_rowid(rowid);
        let tree = self.tree();
        let stored = tree.search(store, &key)?.ok_or_else(|| {
            ZqError::NotFound(format!("row {} not in table {}", rowid, self.def.name))
        })?;
        let row = decode_row(&overflow::load_payload(store, &stored)?)?;

        overflow::free_payload(store, &stored)?;
        tree.delete(store, &key)?;
        index::apply_row_change(store, &self.indexes, &self.def, Some(&row), None, rowid)?;
        self.def.row_count = self.def.row_count.saturating_sub(1);
        Ok(row)
    }

    /// Fetch one row by row-id.
    pub fn get_row(
        &self,
        store: &mut impl PageStore,
        rowid: u64,
    ) -> Result<Option<Vec<Value>>> {
        match self.tree().search(store, &encode_rowid(rowid))? {
            Some(stored) => {
                let payload = overflow::load_payload(store, &stored)?;
                Ok(Some(decode_row(&payload)?))
            }
            None => Ok(None),
        }
    }

    /// Open a cursor over the whole table, or from a starting row-id.
    pub fn scan(&self, store: &mut impl PageStore, from: Option<u64>) -> Result<TableCursor> {
        let tree = self.tree();
        let cursor = match from {
            Some(rowid) => BTreeCursor::seek(&tree, store, &encode_rowid(rowid))?,
            None => BTreeCursor::first(&tree, store)?,
        };
        Ok(TableCursor { cursor })
    }

    /// Write advanced counters (row-id high water, row-count estimate) back
    /// to the catalog. Called once per mutating statement, inside the same
    /// transaction.
    pub fn persist_counters(
        &self,
        store: &mut impl PageStore,
        catalog: &SystemCatalog,
    ) -> Result<()> {
        catalog.update_table(store, &self.def)
    }
}

/// Cursor yielding (row-id, decoded row) pairs in row-id order.
pub struct TableCursor {
    cursor: BTreeCursor,
}

impl TableCursor {
    pub fn next(&mut self, store: &mut impl PageStore) -> Result<Option<(u64, Vec<Value>)>> {
        match self.cursor.current(store)? {
            Some((key, stored)) => {
                let rowid = decode_rowid(&key);
                let payload = overflow::load_payload(store, &stored)?;
                let row = decode_row(&payload)?;
                self.cursor.advance(store)?;
                Ok(Some((rowid, row)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::column::ColumnDef;
    use crate::schema::index::IndexKind;
    use crate::storage::page::{Page, PageKind};
    use crate::storage::page_store::mem::MemStore;
    use crate::storage::pager::CATALOG_ROOT;
    use crate::types::DataType;

    fn setup() -> (MemStore, SystemCatalog) {
        let mut store = MemStore::new();
        store
            .write_page(&Page::new(CATALOG_ROOT, PageKind::TableLeaf))
            .unwrap();
        let catalog = SystemCatalog::new();
        let root = BTree::create(&mut store, PageKind::TableLeaf)
            .unwrap()
            .root_page();
        catalog
            .create_table(
                &mut store,
                &TableDef {
                    name: "users".into(),
                    columns: vec![
                        ColumnDef::new("id", DataType::Integer).primary_key(),
                        ColumnDef::new("name", DataType::Text).not_null(),
                        ColumnDef::new("bio", DataType::Text),
                    ],
                    root,
                    next_rowid: 1,
                    row_count: 0,
                },
            )
            .unwrap();
        (store, catalog)
    }

    fn row(id: Option<i64>, name: &str) -> Vec<Value> {
        vec![
            id.map_or(Value::Null, Value::Integer),
            Value::Text(name.into()),
            Value::Null,
        ]
    }

    #[test]
    fn insert_assigns_monotonic_rowids() {
        let (mut store, catalog) = setup();
        let mut table = Table::load(&mut store, &catalog, "users").unwrap();
        assert_eq!(table.insert_row(&mut store, row(None, "a")).unwrap(), 1);
        assert_eq!(table.insert_row(&mut store, row(None, "b")).unwrap(), 2);
        assert_eq!(table.insert_row(&mut store, row(Some(10), "c")).unwrap(), 10);
        assert_eq!(table.insert_row(&mut store, row(None, "d")).unwrap(), 11);

        // The alias column reflects the assigned id.
        let fetched = table.get_row(&mut store, 2).unwrap().unwrap();
        assert_eq!(fetched[0], Value::Integer(2));
        assert_eq!(fetched[1], Value::Text("b".into()));
    }

    #[test]
    fn duplicate_rowid_rejected() {
        let (mut store, catalog) = setup();
        let mut table = Table::load(&mut store, &catalog, "users").unwrap();
        table.insert_row(&mut store, row(Some(5), "a")).unwrap();
        assert!(matches!(
            table.insert_row(&mut store, row(Some(5), "b")),
            Err(ZqError::Constraint(_))
        ));
    }

    #[test]
    fn not_null_enforced() {
        let (mut store, catalog) = setup();
        let mut table = Table::load(&mut store, &catalog, "users").unwrap();
        let bad = vec![Value::Null, Value::Null, Value::Null];
        assert!(matches!(
            table.insert_row(&mut store, bad),
            Err(ZqError::Constraint(_))
        ));
    }

    #[test]
    fn update_and_delete_round_trip() {
        let (mut store, catalog) = setup();
        let mut table = Table::load(&mut store, &catalog, "users").unwrap();
        let id = table.insert_row(&mut store, row(None, "before")).unwrap();

        let old = table
            .update_row(&mut store, id, row(Some(id as i64), "after"))
            .unwrap();
        assert_eq!(old[1], Value::Text("before".into()));
        let now = table.get_row(&mut store, id).unwrap().unwrap();
        assert_eq!(now[1], Value::Text("after".into()));

        let removed = table.delete_row(&mut store, id).unwrap();
        assert_eq!(removed[1], Value::Text("after".into()));
        assert!(table.get_row(&mut store, id).unwrap().is_none());
    }

    #[test]
    fn scan_in_rowid_order() {
        let (mut store, catalog) = setup();
        let mut table = Table::load(&mut store, &catalog, "users").unwrap();
        for (id, name) in [(3, "c"), (1, "a"), (2, "b")] {
            table.insert_row(&mut store, row(Some(id), name)).unwrap();
        }
        let mut cursor = table.scan(&mut store, None).unwrap();
        let mut seen = Vec::new();
        while let Some((rowid, _)) = cursor.next(&mut store).unwrap() {
            seen.push(rowid);
        }
        assert_eq!(seen, vec![1, 2, 3]);

        let mut cursor = table.scan(&mut store, Some(2)).unwrap();
        let (first, _) = cursor.next(&mut store).unwrap().unwrap();
        assert_eq!(first, 2);
    }

    #[test]
    fn large_row_spills_and_survives() {
        let (mut store, catalog) = setup();
        let mut table = Table::load(&mut store, &catalog, "users").unwrap();
        let big = "x".repeat(3 * crate::storage::page::PAGE_SIZE);
        let id = table
            .insert_row(
                &mut store,
                vec![Value::Null, Value::Text("big".into()), Value::Text(big.clone())],
            )
            .unwrap();
        let fetched = table.get_row(&mut store, id).unwrap().unwrap();
        assert_eq!(fetched[2], Value::Text(big));

        table.delete_row(&mut store, id).unwrap();
        assert!(table.get_row(&mut store, id).unwrap().is_none());
    }

    #[test]
    fn secondary_index_maintained_through_mutations() {
        let (mut store, catalog) = setup();
        let ix_root = index::IndexHandle::allocate(&mut store, IndexKind::Ordered).unwrap();
        catalog
            .create_index(
                &mut store,
                &IndexDef {
                    name: "ix_name".into(),
                    table: "users".into(),
                    columns: vec!["name".into()],
                    kind: IndexKind::Ordered,
                    unique: false,
                    root: ix_root,
                },
            )
            .unwrap();
        let mut table = Table::load(&mut store, &catalog, "users").unwrap();
        let id = table.insert_row(&mut store, row(None, "alice")).unwrap();

        let handle = index::IndexHandle::new(table.indexes[0].clone());
        let key = index::CompositeKey::new(vec![Value::Text("alice".into())]);
        assert_eq!(handle.lookup_exact(&mut store, &key).unwrap(), vec![id]);

        table
            .update_row(&mut store, id, row(Some(id as i64), "bob"))
            .unwrap();
        assert!(handle.lookup_exact(&mut store, &key).unwrap().is_empty());
        let bob = index::CompositeKey::new(vec![Value::Text("bob".into())]);
        assert_eq!(handle.lookup_exact(&mut store, &bob).unwrap(), vec![id]);

        table.delete_row(&mut store, id).unwrap();
        assert!(handle.lookup_exact(&mut store, &bob).unwrap().is_empty());
    }
}
