/// Index manager: dispatches lookups and mutations to the structure behind
/// each logical index.
///
/// Ordered (and unique) indexes are B-trees keyed by the encoded column
/// tuple with a row-id tiebreak; hash indexes are bucket-directory pages.
/// On row mutation the storage engine hands over (old_row, new_row, rowid)
/// and only indexes whose columns actually changed are touched.
use xxhash_rust::xxh3::xxh3_64;

pub mod hash;

use crate::btree::cursor::BTreeCursor;
use crate::btree::key_encoding::{encode_index_key, encode_rowid, encode_values};
use crate::btree::ops::BTree;
use crate::error::{Result, ZqError};
use crate::index::hash::HashIndex;
use crate::schema::catalog::TableDef;
use crate::schema::index::{IndexDef, IndexKind};
use crate::storage::page::PageKind;
use crate::storage::page_store::PageStore;
use crate::types::Value;

/// An index key tuple with its encoding and a cached 64-bit hash, so
/// composite equality checks can short-circuit on the hash.
pub struct CompositeKey {
    pub values: Vec<Value>,
    pub encoded: Vec<u8>,
    pub hash: u64,
}

impl CompositeKey {
    pub fn new(values: Vec<Value>) -> Self {
        let encoded = encode_values(&values);
        let hash = xxh3_64(&encoded);
        CompositeKey {
            values,
            encoded,
            hash,
        }
    }

    pub fn has_null(&self) -> bool {
        self.values.iter().any(Value::is_null)
    }
}

/// Extract an index's key tuple from a full table row.
pub fn key_from_row(def: &IndexDef, table: &TableDef, row: &[Value]) -> Result<CompositeKey> {
    let mut values = Vec::with_capacity(def.columns.len());
    for col in &def.columns {
        let idx = table.column_index(col).ok_or_else(|| {
            ZqError::Corrupt(format!(
                "index {} references unknown column {}",
                def.name, col
            ))
        })?;
        values.push(row[idx].clone());
    }
    Ok(CompositeKey::new(values))
}

/// Runtime handle over one index definition.
pub struct IndexHandle {
    pub def: IndexDef,
}

impl IndexHandle {
    pub fn new(def: IndexDef) -> Self {
        IndexHandle { def }
    }

    /// Allocate the root structure for a new index.
    pub fn allocate(store: &mut impl PageStore, kind: IndexKind) -> Result<u32> {
        match kind {
            IndexKind::Ordered => Ok(BTree::create(store, PageKind::IndexLeaf)?.root_page()),
            IndexKind::Hash => Ok(HashIndex::create(store)?.root_page()),
        }
    }

    /// Insert the entry for a row, enforcing uniqueness for unique indexes
    /// (NULL components exempt a key from the uniqueness check).
    pub fn insert_entry(
        &self,
        store: &mut impl PageStore,
        key: &CompositeKey,
        rowid: u64,
    ) -> Result<()> {
        if self.def.unique && !key.has_null() {
            let existing = self.lookup_exact(store, key)?;
            if existing.iter().any(|&r| r != rowid) {
                return Err(ZqError::Constraint(format!(
                    "UNIQUE constraint failed: index {}",
                    self.def.name
                )));
            }
        }
        match self.def.kind {
            IndexKind::Ordered => {
                let tree = BTree::open(self.def.root);
                tree.insert(
                    store,
                    &encode_index_key(&key.values, rowid),
                    &encode_rowid(rowid),
                )
            }
            IndexKind::Hash => {
                HashIndex::open(self.def.root).insert(store, &key.encoded, rowid)
            }
        }
    }

    /// Remove the entry for a row.
    pub fn delete_entry(
        &self,
        store: &mut impl PageStore,
        key: &CompositeKey,
        rowid: u64,
    ) -> Result<bool> {
        match self.def.kind {
            IndexKind::Ordered => {
                BTree::open(self.def.root).delete(store, &encode_index_key(&key.values, rowid))
            }
            IndexKind::Hash => HashIndex::open(self.def.root).remove(store, &key.encoded, rowid),
        }
    }

    /// Exact-match lookup: all row-ids whose key tuple equals the probe.
    pub fn lookup_exact(
        &self,
        store: &mut impl PageStore,
        key: &CompositeKey,
    ) -> Result<Vec<u64>> {
        match self.def.kind {
            IndexKind::Ordered => {
                let tree = BTree::open(self.def.root);
                let mut rowids = Vec::new();
                let mut cursor = BTreeCursor::seek(&tree, store, &key.encoded)?;
                while let Some((k, v)) = cursor.current(store)? {
                    if !BTreeCursor::key_has_prefix(&k, &key.encoded) {
                        break;
                    }
                    // Exact tuple match: prefix plus the 8-byte rowid tail.
                    if k.len() == key.encoded.len() + 8 {
                        let tail = v
                            .get(0..8)
                            .and_then(|b| <[u8; 8]>::try_from(b).ok())
                            .ok_or_else(|| {
                                ZqError::Corrupt("index entry value truncated".into())
                            })?;
                        rowids.push(u64::from_be_bytes(tail));
                    }
                    cursor.advance(store)?;
                }
                Ok(rowids)
            }
            IndexKind::Hash => {
                HashIndex::open(self.def.root).lookup_hashed(store, key.hash, &key.encoded)
            }
        }
    }

    /// Free the index's pages (DROP INDEX, DROP TABLE).
    pub fn destroy(&self, store: &mut impl PageStore) -> Result<()> {
        match self.def.kind {
            IndexKind::Ordered => BTree::open(self.def.root).destroy(store),
            IndexKind::Hash => HashIndex::open(self.def.root).destroy(store),
        }
    }
}

/// Apply a row mutation to every index of the table, skipping indexes whose
/// key tuple did not change.
pub fn apply_row_change(
    store: &mut impl PageStore,
    indexes: &[IndexDef],
    table: &TableDef,
    old_row: Option<&[Value]>,
    new_row: Option<&[Value]>,
    rowid: u64,
) -> Result<()> {
    for def in indexes {
        let handle = IndexHandle::new(def.clone());
        let old_key = old_row.map(|r| key_from_row(def, table, r)).transpose()?;
        let new_key = new_row.map(|r| key_from_row(def, table, r)).transpose()?;
        match (&old_key, &new_key) {
            (Some(old), Some(new)) if old.hash == new.hash && old.encoded == new.encoded => {
                // Untouched columns: nothing to do for this index.
            }
            _ => {
                if let Some(old) = &old_key {
                    handle.delete_entry(store, old, rowid)?;
                }
                if let Some(new) = &new_key {
                    handle.insert_entry(store, new, rowid)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::column::ColumnDef;
    use crate::storage::page_store::mem::MemStore;
    use crate::types::DataType;

    fn table() -> TableDef {
        TableDef {
            name: "t".into(),
            columns: vec![
                ColumnDef::new("id", DataType::Integer).primary_key(),
                ColumnDef::new("name", DataType::Text),
                ColumnDef::new("score", DataType::Integer),
            ],
            root: 99,
            next_rowid: 1,
            row_count: 0,
        }
    }

    fn ordered_index(store: &mut MemStore, unique: bool, columns: Vec<String>) -> IndexHandle {
        let root = IndexHandle::allocate(store, IndexKind::Ordered).unwrap();
        IndexHandle::new(IndexDef {
            name: "ix".into(),
            table: "t".into(),
            columns,
            kind: IndexKind::Ordered,
            unique,
            root,
        })
    }

    #[test]
    fn ordered_duplicates_allowed_when_not_unique() {
        let mut store = MemStore::new();
        let handle = ordered_index(&mut store, false, vec!["name".into()]);
        let key = CompositeKey::new(vec![Value::Text("a".into())]);
        handle.insert_entry(&mut store, &key, 1).unwrap();
        handle.insert_entry(&mut store, &key, 2).unwrap();
        let mut found = handle.lookup_exact(&mut store, &key).unwrap();
        found.sort_unstable();
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn unique_index_rejects_duplicate() {
        let mut store = MemStore::new();
        let handle = ordered_index(&mut store, true, vec!["name".into()]);
        let key = CompositeKey::new(vec![Value::Text("a".into())]);
        handle.insert_entry(&mut store, &key, 1).unwrap();
        assert!(matches!(
            handle.insert_entry(&mut store, &key, 2),
            Err(ZqError::Constraint(_))
        ));
    }

    #[test]
    fn unique_index_allows_duplicate_nulls() {
        let mut store = MemStore::new();
        let handle = ordered_index(&mut store, true, vec!["name".into()]);
        let key = CompositeKey::new(vec![Value::Null]);
        handle.insert_entry(&mut store, &key, 1).unwrap();
        handle.insert_entry(&mut store, &key, 2).unwrap();
    }

    #[test]
    fn composite_key_prefix_does_not_match_exact() {
        let mut store = MemStore::new();
        let handle = ordered_index(&mut store, false, vec!["name".into(), "score".into()]);
        let ab = CompositeKey::new(vec![Value::Text("a".into()), Value::Integer(1)]);
        handle.insert_entry(&mut store, &ab, 1).unwrap();
        // Probing the one-column prefix must not report an exact match.
        let a_only = CompositeKey::new(vec![Value::Text("a".into())]);
        assert!(handle.lookup_exact(&mut store, &a_only).unwrap().is_empty());
        assert_eq!(handle.lookup_exact(&mut store, &ab).unwrap(), vec![1]);
    }

    #[test]
    fn change_application_skips_untouched_index() {
        let mut store = MemStore::new();
        let t = table();
        let name_ix = ordered_index(&mut store, false, vec!["name".into()]);
        let defs = vec![name_ix.def.clone()];

        let old = vec![
            Value::Integer(1),
            Value::Text("alice".into()),
            Value::Integer(10),
        ];
        let new = vec![
            Value::Integer(1),
            Value::Text("alice".into()),
            Value::Integer(20),
        ];
        apply_row_change(&mut store, &defs, &t, None, Some(&old), 7).unwrap();
        // Score-only change: the name index keeps its single entry.
        apply_row_change(&mut store, &defs, &t, Some(&old), Some(&new), 7).unwrap();
        let key = CompositeKey::new(vec![Value::Text("alice".into())]);
        assert_eq!(name_ix.lookup_exact(&mut store, &key).unwrap(), vec![7]);

        apply_row_change(&mut store, &defs, &t, Some(&new), None, 7).unwrap();
        assert!(name_ix.lookup_exact(&mut store, &key).unwrap().is_empty());
    }
}
