use super::*;
use crate::storage::page_store::mem::MemStore;

fn setup() -> (MemStore, BTree) {
    let mut store = MemStore::new();
    let tree = BTree::create(&mut store, PageKind::TableLeaf).unwrap();
    (store, tree)
}

fn key(i: u32) -> Vec<u8> {
    format!("key{:06}", i).into_bytes()
}

fn value(i: u32) -> Vec<u8> {
    format!("value-{}", i).into_bytes()
}

#[test]
fn insert_and_search_single_leaf() {
    let (mut store, tree) = setup();
    tree.insert(&mut store, b"b", b"2").unwrap();
    tree.insert(&mut store, b"a", b"1").unwrap();

    assert_eq!(tree.search(&mut store, b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(tree.search(&mut store, b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(tree.search(&mut store, b"c").unwrap(), None);
}

#[test]
fn insert_replaces_on_equal_key() {
    let (mut store, tree) = setup();
    tree.insert(&mut store, b"k", b"old").unwrap();
    tree.insert(&mut store, b"k", b"new").unwrap();
    assert_eq!(tree.search(&mut store, b"k").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn root_page_is_pinned_across_splits() {
    let (mut store, tree) = setup();
    let root = tree.root_page();
    for i in 0..2000u32 {
        tree.insert(&mut store, &key(i), &value(i)).unwrap();
    }
    assert_eq!(tree.root_page(), root);
    let page = store.read_page(root).unwrap();
    assert!(page.kind().unwrap().is_interior());
    for i in (0..2000).step_by(97) {
        assert_eq!(tree.search(&mut store, &key(i)).unwrap(), Some(value(i)));
    }
}

#[test]
fn scan_yields_sorted_keys_after_random_inserts() {
    let (mut store, tree) = setup();
    use rand::prelude::*;
    let mut rng = StdRng::seed_from_u64(7);
    let mut keys: Vec<u32> = (0..1500).collect();
    keys.shuffle(&mut rng);
    for &i in &keys {
        tree.insert(&mut store, &key(i), &value(i)).unwrap();
    }

    let mut seen = Vec::new();
    tree.scan(&mut store, |k, _| {
        seen.push(k.to_vec());
        Ok(true)
    })
    .unwrap();
    assert_eq!(seen.len(), 1500);
    for w in seen.windows(2) {
        assert!(w[0] < w[1], "scan out of order");
    }
}

#[test]
fn delete_from_single_leaf() {
    let (mut store, tree) = setup();
    tree.insert(&mut store, b"a", b"1").unwrap();
    tree.insert(&mut store, b"b", b"2").unwrap();
    assert!(tree.delete(&mut store, b"a").unwrap());
    assert!(!tree.delete(&mut store, b"a").unwrap());
    assert_eq!(tree.search(&mut store, b"a").unwrap(), None);
    assert_eq!(tree.search(&mut store, b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn delete_everything_collapses_tree() {
    let (mut store, tree) = setup();
    for i in 0..1200u32 {
        tree.insert(&mut store, &key(i), &value(i)).unwrap();
    }
    for i in 0..1200u32 {
        assert!(tree.delete(&mut store, &key(i)).unwrap(), "missing {}", i);
    }
    for i in 0..1200u32 {
        assert_eq!(tree.search(&mut store, &key(i)).unwrap(), None);
    }
    // All entries gone: a full scan sees nothing.
    let mut n = 0;
    tree.scan(&mut store, |_, _| {
        n += 1;
        Ok(true)
    })
    .unwrap();
    assert_eq!(n, 0);
}

#[test]
fn interleaved_insert_delete_random() {
    let (mut store, tree) = setup();
    use rand::prelude::*;
    let mut rng = StdRng::seed_from_u64(42);
    let mut model = std::collections::BTreeMap::new();

    for _ in 0..5000 {
        let i = rng.gen_range(0..600u32);
        if rng.gen_bool(0.6) {
            tree.insert(&mut store, &key(i), &value(i)).unwrap();
            model.insert(key(i), value(i));
        } else {
            let deleted = tree.delete(&mut store, &key(i)).unwrap();
            assert_eq!(deleted, model.remove(&key(i)).is_some());
        }
    }

    let mut seen = Vec::new();
    tree.scan(&mut store, |k, v| {
        seen.push((k.to_vec(), v.to_vec()));
        Ok(true)
    })
    .unwrap();
    let expected: Vec<_> = model.into_iter().collect();
    assert_eq!(seen, expected);
}

#[test]
fn node_fill_invariant_holds() {
    // Repeatedly cross the split/merge thresholds on the same key range,
    // then check every non-root node is at least half full.
    let (mut store, tree) = setup();
    for round in 0..3 {
        for i in 0..800u32 {
            tree.insert(&mut store, &key(i), &value(i)).unwrap();
        }
        for i in (0..800u32).step_by(2) {
            tree.delete(&mut store, &key(i)).unwrap();
        }
        if round < 2 {
            for i in (0..800u32).step_by(2) {
                tree.insert(&mut store, &key(i), &value(i)).unwrap();
            }
        }
    }

    // Walk the whole tree checking fill.
    fn walk(store: &mut MemStore, page_no: PageId, is_root: bool, checked: &mut usize) {
        let page = store.read_page(page_no).unwrap();
        let kind = page.kind().unwrap();
        if !is_root {
            assert!(
                !is_underflow(&page),
                "page {} below minimum fill: {} bytes",
                page_no,
                page.live_bytes()
            );
        }
        *checked += 1;
        if kind.is_interior() {
            for i in 0..page.cell_count() {
                walk(store, interior_child(&page, i).unwrap(), false, checked);
            }
            walk(store, page.right_sibling(), false, checked);
        }
    }
    let mut checked = 0;
    walk(&mut store, tree.root_page(), true, &mut checked);
    assert!(checked > 3, "expected a multi-node tree");
}

#[test]
fn destroy_frees_all_pages() {
    let (mut store, tree) = setup();
    for i in 0..1000u32 {
        tree.insert(&mut store, &key(i), &value(i)).unwrap();
    }
    let live_before = store.live_pages();
    assert!(live_before > 1);
    tree.destroy(&mut store).unwrap();
    assert_eq!(store.live_pages(), 0);
}

#[test]
fn oversized_entry_rejected() {
    let (mut store, tree) = setup();
    let huge = vec![0u8; PAGE_SIZE];
    assert!(matches!(
        tree.insert(&mut store, b"k", &huge),
        Err(ZqError::Constraint(_))
    ));
}

#[test]
fn leaf_chain_connects_all_leaves() {
    let (mut store, tree) = setup();
    for i in 0..1000u32 {
        tree.insert(&mut store, &key(i), &value(i)).unwrap();
    }
    // Count entries reachable through the chain from the leftmost leaf.
    let mut count = 0;
    tree.scan(&mut store, |_, _| {
        count += 1;
        Ok(true)
    })
    .unwrap();
    assert_eq!(count, 1000);
}
