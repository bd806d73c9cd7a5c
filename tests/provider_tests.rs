//! Integration tests for the provider registry and configuration

use serde_json::json;
use tempfile::TempDir;

use quokka::config;
use quokka::datastore::DbType;
use quokka::error::KvError;
use quokka::provider::{DbConfig, Provider};
use quokka::slice::DataSlice;

#[test]
fn test_config_with_map_and_lsm() {
    let dir = TempDir::new().unwrap();
    let provider = Provider::with_config(json!({
        "databases": [
            { "name": "M", "type": "map" },
            { "name": "L", "type": "ldb", "path": dir.path().to_str().unwrap() }
        ]
    }))
    .unwrap();

    assert_eq!(provider.count_databases(), 2);
    let names: Vec<String> = provider
        .list_databases(16)
        .into_iter()
        .map(|(n, _)| n)
        .collect();
    assert_eq!(names, vec!["L".to_string(), "M".to_string()]);

    // both databases answer through the storage contract
    let m = provider
        .find_by_id(provider.find_by_name("M").unwrap())
        .unwrap();
    m.put(b"k", b"v").unwrap();
    let mut value = DataSlice::new();
    m.get(b"k", &mut value).unwrap();
    assert_eq!(value.as_slice(), b"v");

    let l = provider
        .find_by_id(provider.find_by_name("L").unwrap())
        .unwrap();
    l.put(b"k", b"w").unwrap();
    assert_eq!(l.length(b"k"), Some(1));
}

#[test]
fn test_effective_config_carries_ids() {
    let provider = Provider::with_config(json!({
        "databases": [ { "name": "only", "type": "map" } ]
    }))
    .unwrap();

    let effective = provider.config();
    let id = effective["databases"][0][config::DATABASE_ID_KEY]
        .as_u64()
        .unwrap();
    assert_eq!(provider.find_by_name("only").unwrap(), id);

    // the emitted string parses back to the same document
    let reparsed: serde_json::Value =
        serde_json::from_str(&provider.config_string()).unwrap();
    assert_eq!(reparsed, effective);
}

#[test]
fn test_config_validation_reports_single_reason() {
    let err = Provider::with_config(json!({
        "databases": [ { "name": "x", "type": 17 } ]
    }))
    .unwrap_err();
    match err {
        KvError::Config(reason) => assert!(reason.contains("type")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_comparator_resolution_failure() {
    let err = Provider::with_config(json!({
        "comparators": [ { "name": "no_such_symbol_here", "library": "" } ]
    }))
    .unwrap_err();
    assert_eq!(err, KvError::ComparisonFunction);
}

#[test]
fn test_registered_comparator_orders_database() {
    unsafe extern "C" fn backwards(
        a: *const u8,
        alen: usize,
        b: *const u8,
        blen: usize,
    ) -> i32 {
        let a = std::slice::from_raw_parts(a, alen);
        let b = std::slice::from_raw_parts(b, blen);
        match b.cmp(a) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        }
    }

    let provider = Provider::new();
    provider.add_comparator("backwards", backwards).unwrap();
    let id = provider
        .attach_database(&DbConfig::new("r", DbType::Map).comparator("backwards"))
        .unwrap();
    let db = provider.find_by_id(id).unwrap();

    for k in ["a", "b", "c"] {
        db.put(k.as_bytes(), b"v").unwrap();
    }
    let mut keys = Vec::new();
    db.list_keys(10, b"", b"", &mut keys).unwrap();
    let keys: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
    assert_eq!(keys, vec![&b"c"[..], &b"b"[..], &b"a"[..]]);
}

#[test]
fn test_btree_database_from_config() {
    let dir = TempDir::new().unwrap();
    let provider = Provider::with_config(json!({
        "databases": [
            { "name": "tree", "type": "bdb", "path": dir.path().to_str().unwrap(),
              "no_overwrite": true }
        ]
    }))
    .unwrap();

    let db = provider
        .find_by_id(provider.find_by_name("tree").unwrap())
        .unwrap();
    db.put(b"x", b"1").unwrap();
    assert_eq!(db.put(b"x", b"2"), Err(KvError::KeyExists));
    assert!(db.no_overwrite());
}
