//! Integration tests for the persistent backends

use tempfile::TempDir;

use quokka::datastore::{create_datastore, DataStore, DbType};
use quokka::slice::DataSlice;

fn reopen(db_type: DbType, name: &str, path: &str) -> Box<dyn DataStore> {
    let mut store = create_datastore(db_type).unwrap();
    store.open(name, path).unwrap();
    store
}

#[test]
fn test_btree_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap();

    {
        let store = reopen(DbType::BTree, "persist", path);
        store.put(b"durable", b"value").unwrap();
        store.sync().unwrap();
    }

    let store = reopen(DbType::BTree, "persist", path);
    let mut value = DataSlice::new();
    store.get(b"durable", &mut value).unwrap();
    assert_eq!(value.as_slice(), b"value");
}

#[test]
fn test_lsm_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap();

    {
        let store = reopen(DbType::Lsm, "persist", path);
        store.put(b"durable", b"value").unwrap();
        store.sync().unwrap();
    }

    let store = reopen(DbType::Lsm, "persist", path);
    let mut value = DataSlice::new();
    store.get(b"durable", &mut value).unwrap();
    assert_eq!(value.as_slice(), b"value");
}

#[test]
fn test_put_packed_through_the_contract() {
    let dir = TempDir::new().unwrap();
    let store = reopen(DbType::Lsm, "packed", dir.path().to_str().unwrap());

    let packed_keys = b"k1k2k3";
    let packed_vals = b"aabbbb";
    store
        .put_packed(3, packed_keys, &[2, 2, 2], packed_vals, &[2, 4, 0])
        .unwrap();

    assert_eq!(store.length(b"k1"), Some(2));
    assert_eq!(store.length(b"k2"), Some(4));
    assert_eq!(store.length(b"k3"), Some(0));

    let mut value = DataSlice::new();
    store.get(b"k2", &mut value).unwrap();
    assert_eq!(value.as_slice(), b"bbbb");
}

#[test]
fn test_erase_on_get_on_persistent_backend() {
    let dir = TempDir::new().unwrap();
    let mut store = create_datastore(DbType::BTree).unwrap();
    store.set_erase_on_get(true);
    store
        .open("consume", dir.path().to_str().unwrap())
        .unwrap();

    store.put(b"ticket", b"once").unwrap();
    let mut value = DataSlice::new();
    store.get(b"ticket", &mut value).unwrap();
    assert_eq!(value.as_slice(), b"once");
    assert!(!store.exists(b"ticket"));
}

#[test]
fn test_open_creates_intermediate_directories() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("a/b/c");
    let store = reopen(DbType::Lsm, "deep", nested.to_str().unwrap());
    store.put(b"k", b"v").unwrap();
    assert!(nested.join("deep").exists());
}

#[test]
fn test_list_keyvals_batches_drain_in_order() {
    let dir = TempDir::new().unwrap();
    let store = reopen(DbType::BTree, "walk", dir.path().to_str().unwrap());
    for i in 0..10 {
        let key = format!("key-{i}");
        store.put(key.as_bytes(), b"v").unwrap();
    }

    // walk in pages of 3, resuming strictly after the previous last key
    let mut seen = Vec::new();
    let mut start: Vec<u8> = Vec::new();
    loop {
        let mut page = Vec::new();
        store.list_keyvals(3, &start, b"", &mut page).unwrap();
        if page.is_empty() {
            break;
        }
        start = page.last().unwrap().0.to_vec();
        seen.extend(page.into_iter().map(|(k, _)| k.to_vec()));
    }
    let expected: Vec<Vec<u8>> = (0..10).map(|i| format!("key-{i}").into_bytes()).collect();
    assert_eq!(seen, expected);
}
