/// System catalog: the reserved table holding one row per user table and
/// index.
///
/// The catalog is a B-tree rooted at the fixed catalog page, keyed by
///   "t:<name>" -> serialized TableDef
///   "i:<name>" -> serialized IndexDef
///
/// Root pages never move (the B-tree pins roots across splits), so catalog
/// rows are rewritten only when the definition itself changes: DDL, row-id
/// high-water advance, and row-count estimate updates.
use crate::btree::ops::BTree;
use crate::error::{Result, ZqError};
use crate::schema::column::ColumnDef;
use crate::schema::index::IndexDef;
use crate::storage::page::PageId;
use crate::storage::page_store::PageStore;
use crate::storage::pager::CATALOG_ROOT;
use crate::types::DataType;

/// Table definition.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub root: PageId,
    /// Next row-id to assign; monotonic, never reused.
    pub next_rowid: u64,
    /// Planner's row-count estimate, maintained on mutation.
    pub row_count: u64,
}

impl TableDef {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Index of the INTEGER PRIMARY KEY column aliasing the row-id, if any.
    pub fn rowid_alias(&self) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.is_primary_key && c.data_type == DataType::Integer)
    }

    /// A declared non-INTEGER primary key column (enforced via a unique
    /// index instead of the row-id).
    pub fn non_alias_primary_key(&self) -> Option<usize> {
        let alias = self.rowid_alias();
        self.columns
            .iter()
            .position(|c| c.is_primary_key)
            .filter(|idx| Some(*idx) != alias)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let name_bytes = self.name.as_bytes();
        buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(name_bytes);
        buf.extend_from_slice(&self.root.to_le_bytes());
        buf.extend_from_slice(&self.next_rowid.to_le_bytes());
        buf.extend_from_slice(&self.row_count.to_le_bytes());
        buf.extend_from_slice(&(self.columns.len() as u16).to_le_bytes());
        for col in &self.columns {
            let col_bytes = col.serialize();
            buf.extend_from_slice(&(col_bytes.len() as u16).to_le_bytes());
            buf.extend_from_slice(&col_bytes);
        }
        buf
    }

    pub fn deserialize(data: &[u8]) -> Option<TableDef> {
        let mut offset = 0;
        if data.len() < 2 {
            return None;
        }
        let name_len = u16::from_le_bytes(data[0..2].try_into().unwrap()) as usize;
        offset += 2;
        let name = String::from_utf8(data.get(offset..offset + name_len)?.to_vec()).ok()?;
        offset += name_len;

        let root = u32::from_le_bytes(data.get(offset..offset + 4)?.try_into().unwrap());
        offset += 4;
        let next_rowid = u64::from_le_bytes(data.get(offset..offset + 8)?.try_into().unwrap());
        offset += 8;
        let row_count = u64::from_le_bytes(data.get(offset..offset + 8)?.try_into().unwrap());
        offset += 8;

        let col_count = u16::from_le_bytes(data.get(offset..offset + 2)?.try_into().unwrap());
        offset += 2;
        let mut columns = Vec::with_capacity(col_count as usize);
        for _ in 0..col_count {
            let len =
                u16::from_le_bytes(data.get(offset..offset + 2)?.try_into().unwrap()) as usize;
            offset += 2;
            let (col, _) = ColumnDef::deserialize(data.get(offset..offset + len)?)?;
            columns.push(col);
            offset += len;
        }
        Some(TableDef {
            name,
            columns,
            root,
            next_rowid,
            row_count,
        })
    }
}

fn table_key(name: &str) -> Vec<u8> {
    let mut key = b"t:".to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

fn index_key(name: &str) -> Vec<u8> {
    let mut key = b"i:".to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

/// Handle over the catalog B-tree. Stateless: every operation reads through
/// the store, so transactions see their own uncommitted DDL via the overlay.
pub struct SystemCatalog {
    tree: BTree,
}

impl SystemCatalog {
    pub fn new() -> Self {
        SystemCatalog {
            tree: BTree::open(CATALOG_ROOT),
        }
    }

    // --- Tables ---

    pub fn create_table(&self, store: &mut impl PageStore, def: &TableDef) -> Result<()> {
        let key = table_key(&def.name);
        if self.tree.search(store, &key)?.is_some() {
            return Err(ZqError::Constraint(format!(
                "table {} already exists",
                def.name
            )));
        }
        self.tree.insert(store, &key, &def.serialize())
    }

    pub fn get_table(&self, store: &mut impl PageStore, name: &str) -> Result<Option<TableDef>> {
        match self.tree.search(store, &table_key(name))? {
            Some(bytes) => TableDef::deserialize(&bytes)
                .map(Some)
                .ok_or_else(|| ZqError::Corrupt(format!("catalog row for table {} is malformed", name))),
            None => Ok(None),
        }
    }

    /// Resolve a table or fail with NotFound.
    pub fn expect_table(&self, store: &mut impl PageStore, name: &str) -> Result<TableDef> {
        self.get_table(store, name)?
            .ok_or_else(|| ZqError::NotFound(format!("no such table: {}", name)))
    }

    pub fn update_table(&self, store: &mut impl PageStore, def: &TableDef) -> Result<()> {
        self.tree
            .insert(store, &table_key(&def.name), &def.serialize())
    }

    pub fn drop_table(&self, store: &mut impl PageStore, name: &str) -> Result<bool> {
        self.tree.delete(store, &table_key(name))
    }

    pub fn list_tables(&self, store: &mut impl PageStore) -> Result<Vec<TableDef>> {
        let mut tables = Vec::new();
        self.tree.scan(store, |k, v| {
            if k.starts_with(b"t:") {
                let def = TableDef::deserialize(v)
                    .ok_or_else(|| ZqError::Corrupt("malformed catalog table row".into()))?;
                tables.push(def);
            }
            Ok(true)
        })?;
        Ok(tables)
    }

    // --- Indexes ---

    pub fn create_index(&self, store: &mut impl PageStore, def: &IndexDef) -> Result<()> {
        let key = index_key(&def.name);
        if self.tree.search(store, &key)?.is_some() {
            return Err(ZqError::Constraint(format!(
                "index {} already exists",
                def.name
            )));
        }
        self.tree.insert(store, &key, &def.serialize())
    }

    pub fn get_index(&self, store: &mut impl PageStore, name: &str) -> Result<Option<IndexDef>> {
        match self.tree.search(store, &index_key(name))? {
            Some(bytes) => IndexDef::deserialize(&bytes)
                .map(Some)
                .ok_or_else(|| ZqError::Corrupt(format!("catalog row for index {} is malformed", name))),
            None => Ok(None),
        }
    }

    pub fn drop_index(&self, store: &mut impl PageStore, name: &str) -> Result<bool> {
        self.tree.delete(store, &index_key(name))
    }

    pub fn indexes_for_table(
        &self,
        store: &mut impl PageStore,
        table: &str,
    ) -> Result<Vec<IndexDef>> {
        let mut indexes = Vec::new();
        self.tree.scan(store, |k, v| {
            if k.starts_with(b"i:") {
                let def = IndexDef::deserialize(v)
                    .ok_or_else(|| ZqError::Corrupt("malformed catalog index row".into()))?;
                if def.table == table {
                    indexes.push(def);
                }
            }
            Ok(true)
        })?;
        Ok(indexes)
    }
}

impl Default for SystemCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{Page, PageKind};
    use crate::storage::page_store::mem::MemStore;

    fn setup() -> (MemStore, SystemCatalog) {
        let mut store = MemStore::new();
        // Seed the fixed catalog root page, as Pager::create does.
        store
            .write_page(&Page::new(CATALOG_ROOT, PageKind::TableLeaf))
            .unwrap();
        (store, SystemCatalog::new())
    }

    fn users_def() -> TableDef {
        TableDef {
            name: "users".into(),
            columns: vec![
                ColumnDef::new("id", DataType::Integer).primary_key(),
                ColumnDef::new("name", DataType::Text),
            ],
            root: 5,
            next_rowid: 1,
            row_count: 0,
        }
    }

    #[test]
    fn create_get_drop_table() {
        let (mut store, catalog) = setup();
        catalog.create_table(&mut store, &users_def()).unwrap();

        let def = catalog.get_table(&mut store, "users").unwrap().unwrap();
        assert_eq!(def.root, 5);
        assert_eq!(def.columns.len(), 2);
        assert_eq!(def.rowid_alias(), Some(0));

        assert!(matches!(
            catalog.create_table(&mut store, &users_def()),
            Err(ZqError::Constraint(_))
        ));

        assert!(catalog.drop_table(&mut store, "users").unwrap());
        assert!(catalog.get_table(&mut store, "users").unwrap().is_none());
    }

    #[test]
    fn expect_table_not_found() {
        let (mut store, catalog) = setup();
        assert!(matches!(
            catalog.expect_table(&mut store, "missing"),
            Err(ZqError::NotFound(_))
        ));
    }

    #[test]
    fn indexes_filtered_by_table() {
        let (mut store, catalog) = setup();
        for (name, table) in [("ix_a", "users"), ("ix_b", "orders"), ("ix_c", "users")] {
            catalog
                .create_index(
                    &mut store,
                    &IndexDef {
                        name: name.into(),
                        table: table.into(),
                        columns: vec!["col".into()],
                        kind: crate::schema::index::IndexKind::Ordered,
                        unique: false,
                        root: 9,
                    },
                )
                .unwrap();
        }
        let found = catalog.indexes_for_table(&mut store, "users").unwrap();
        let names: Vec<_> = found.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["ix_a", "ix_c"]);
    }

    #[test]
    fn rowid_advance_persists() {
        let (mut store, catalog) = setup();
        catalog.create_table(&mut store, &users_def()).unwrap();
        let mut def = catalog.expect_table(&mut store, "users").unwrap();
        def.next_rowid = 42;
        def.row_count = 41;
        catalog.update_table(&mut store, &def).unwrap();
        let back = catalog.expect_table(&mut store, "users").unwrap();
        assert_eq!(back.next_rowid, 42);
        assert_eq!(back.row_count, 41);
    }
}
