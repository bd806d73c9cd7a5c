//! End-to-end tests of the RPC surface over the in-process transport

mod test_utils;

use serde_json::json;

use quokka::error::KvError;

fn map_harness() -> test_utils::Harness {
    test_utils::harness(
        "local://rpc",
        json!({ "databases": [ { "name": "A", "type": "map" } ] }),
    )
}

#[tokio::test]
async fn test_open_put_get_list() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();

    h.client.put(db, b"apple", b"red").await.unwrap();
    h.client.put(db, b"banana", b"yellow").await.unwrap();

    assert_eq!(h.client.get(db, b"apple", 64).await.unwrap(), b"red");

    let keys = h.client.list_keys(db, 10, b"", b"").await.unwrap();
    assert_eq!(keys, vec![b"apple".to_vec(), b"banana".to_vec()]);
}

#[tokio::test]
async fn test_open_unknown_name() {
    let h = map_harness();
    assert_eq!(h.client.open("missing").await, Err(KvError::DatabaseName));
}

#[tokio::test]
async fn test_unknown_provider_and_database() {
    let h = map_harness();
    let transport = std::sync::Arc::new(quokka::transport::LocalClientTransport::new(
        h.exchange.clone(),
        "local://rpc",
        "local://rpc#other",
    ));
    let wrong_provider = quokka::client::Client::new(transport, 9);
    assert_eq!(
        wrong_provider.count_databases().await,
        Err(KvError::UnknownProvider)
    );

    assert_eq!(
        h.client.put(12345, b"k", b"v").await,
        Err(KvError::UnknownDatabase)
    );
}

#[tokio::test]
async fn test_count_and_list_databases() {
    let h = test_utils::harness(
        "local://rpc",
        json!({ "databases": [
            { "name": "M", "type": "map" },
            { "name": "N", "type": "null" }
        ] }),
    );
    assert_eq!(h.client.count_databases().await.unwrap(), 2);
    let listed = h.client.list_databases(10).await.unwrap();
    let names: Vec<&str> = listed.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["M", "N"]);
}

#[tokio::test]
async fn test_no_overwrite_round_trip() {
    let h = test_utils::harness(
        "local://rpc",
        json!({ "databases": [
            { "name": "A", "type": "map", "no_overwrite": true }
        ] }),
    );
    let db = h.client.open("A").await.unwrap();

    h.client.put(db, b"x", b"1").await.unwrap();
    assert_eq!(h.client.put(db, b"x", b"2").await, Err(KvError::KeyExists));
    assert_eq!(h.client.get(db, b"x", 16).await.unwrap(), b"1");
}

#[tokio::test]
async fn test_get_size_reporting() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();
    h.client.put(db, b"k", b"a-long-value").await.unwrap();

    assert_eq!(h.client.get(db, b"k", 4).await, Err(KvError::Size));
    assert_eq!(h.client.get(db, b"missing", 4).await, Err(KvError::UnknownKey));
}

#[tokio::test]
async fn test_put_multi_then_get_multi() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();

    let keys: Vec<&[u8]> = vec![b"k1", b"k2", b"k3"];
    let vals: Vec<&[u8]> = vec![b"v-one", b"v-two", b"v-three"];
    h.client.put_multi(db, &keys, &vals).await.unwrap();

    let results = h
        .client
        .get_multi(db, &keys, &[16, 16, 16])
        .await
        .unwrap();
    for (result, expected) in results.iter().zip(&vals) {
        assert_eq!(result.0 as usize, expected.len());
        assert_eq!(result.1.as_deref().unwrap(), *expected);
    }
}

#[tokio::test]
async fn test_get_multi_oversize_entry() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();
    h.client.put(db, b"k0", b"hello").await.unwrap();
    h.client.put(db, b"k1", b"hi").await.unwrap();

    // allowances [3, 10]: the first value does not fit, so its size
    // comes back as 0 and nothing is transferred for it; the second is
    // still delivered at the next packed offset
    let results = h
        .client
        .get_multi(db, &[b"k0", b"k1"], &[3, 10])
        .await
        .unwrap();
    assert_eq!(results[0].0, 0);
    assert!(results[0].1.is_none());
    assert_eq!(results[1].0, 2);
    assert_eq!(results[1].1.as_deref().unwrap(), b"hi");
}

#[tokio::test]
async fn test_put_packed_then_get_packed() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();

    let keys: Vec<&[u8]> = vec![b"a", b"bb", b"ccc"];
    let vals: Vec<&[u8]> = vec![b"1", b"22", b"333"];
    h.client.put_packed(db, &keys, &vals).await.unwrap();

    let packed = h
        .client
        .get_packed(db, &[b"a", b"bb", b"zz", b"ccc"], 64)
        .await
        .unwrap();
    assert_eq!(packed.num_delivered, 3);
    assert!(!packed.truncated);
    assert_eq!(packed.values[0].as_deref().unwrap(), b"1");
    assert_eq!(packed.values[1].as_deref().unwrap(), b"22");
    assert!(packed.values[2].is_none()); // missing key
    assert_eq!(packed.values[3].as_deref().unwrap(), b"333");
}

#[tokio::test]
async fn test_get_packed_respects_buffer_budget() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();
    h.client.put(db, b"k1", b"aaaa").await.unwrap();
    h.client.put(db, b"k2", b"bbbb").await.unwrap();
    h.client.put(db, b"k3", b"cccc").await.unwrap();

    // room for two values only
    let packed = h
        .client
        .get_packed(db, &[b"k1", b"k2", b"k3"], 9)
        .await
        .unwrap();
    assert!(packed.truncated);
    assert_eq!(packed.num_delivered, 2);
    let delivered: usize = packed
        .values
        .iter()
        .flatten()
        .map(|v| v.len())
        .sum();
    assert!(delivered <= 9);
}

#[tokio::test]
async fn test_bulk_put_and_bulk_get() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();

    let value = vec![42u8; 2000];
    h.client.bulk_put(db, b"big", &value).await.unwrap();
    assert_eq!(h.client.bulk_get(db, b"big", 4096).await.unwrap(), value);

    assert_eq!(
        h.client.bulk_get(db, b"big", 100).await,
        Err(KvError::Size)
    );
    assert_eq!(
        h.client.bulk_get(db, b"nope", 100).await,
        Err(KvError::UnknownKey)
    );
}

#[tokio::test]
async fn test_length_and_exists_batches() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();
    h.client.put(db, b"one", b"1").await.unwrap();
    h.client.put(db, b"three", b"333").await.unwrap();

    assert_eq!(h.client.length(db, b"three").await.unwrap(), 3);
    assert_eq!(
        h.client.length(db, b"two").await,
        Err(KvError::UnknownKey)
    );

    let keys: Vec<&[u8]> = vec![b"one", b"two", b"three"];
    assert_eq!(
        h.client.length_multi(db, &keys).await.unwrap(),
        vec![1, 0, 3]
    );
    assert_eq!(
        h.client.length_packed(db, &keys).await.unwrap(),
        vec![1, 0, 3]
    );

    assert!(h.client.exists(db, b"one").await.unwrap());
    assert!(!h.client.exists(db, b"two").await.unwrap());
    assert_eq!(
        h.client.exists_multi(db, &keys).await.unwrap(),
        vec![true, false, true]
    );
}

#[tokio::test]
async fn test_exists_multi_bitset_past_one_byte() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();

    let names: Vec<String> = (0..12).map(|i| format!("key-{i:02}")).collect();
    for (i, name) in names.iter().enumerate() {
        if i % 3 == 0 {
            h.client.put(db, name.as_bytes(), b"v").await.unwrap();
        }
    }
    let keys: Vec<&[u8]> = names.iter().map(|n| n.as_bytes()).collect();
    let flags = h.client.exists_multi(db, &keys).await.unwrap();
    for (i, flag) in flags.iter().enumerate() {
        assert_eq!(*flag, i % 3 == 0);
    }
}

#[tokio::test]
async fn test_erase_and_erase_multi() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();
    h.client.put(db, b"k1", b"v").await.unwrap();
    h.client.put(db, b"k2", b"v").await.unwrap();

    h.client.erase(db, b"k1").await.unwrap();
    assert_eq!(h.client.erase(db, b"k1").await, Err(KvError::Erase));
    assert_eq!(
        h.client.get(db, b"k1", 16).await,
        Err(KvError::UnknownKey)
    );

    // absent keys in a batch are not an error
    h.client
        .erase_multi(db, &[b"k1", b"k2"])
        .await
        .unwrap();
    assert!(!h.client.exists(db, b"k2").await.unwrap());
}

#[tokio::test]
async fn test_list_keys_prefix_and_start() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();
    for (k, v) in [("a", "1"), ("ab", "2"), ("ac", "3"), ("b", "4")] {
        h.client.put(db, k.as_bytes(), v.as_bytes()).await.unwrap();
    }

    let keys = h.client.list_keys(db, 10, b"", b"a").await.unwrap();
    assert_eq!(keys, vec![b"a".to_vec(), b"ab".to_vec(), b"ac".to_vec()]);

    let keys = h.client.list_keys(db, 10, b"a", b"a").await.unwrap();
    assert_eq!(keys, vec![b"ab".to_vec(), b"ac".to_vec()]);
}

#[tokio::test]
async fn test_list_keys_self_sizing_retry() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();

    let long_key = vec![b'x'; 400];
    h.client.put(db, &long_key, b"v").await.unwrap();
    h.client.put(db, b"short", b"v").await.unwrap();

    // first pass under-allocates, the retry uses the reported sizes
    let keys = h.client.list_keys(db, 10, b"", b"").await.unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&long_key));
    assert!(keys.contains(&b"short".to_vec()));
}

#[tokio::test]
async fn test_list_keyvals_matches_gets() {
    let h = map_harness();
    let db = h.client.open("A").await.unwrap();
    for (k, v) in [("k1", "v1"), ("k2", "v2"), ("k3", "v3")] {
        h.client.put(db, k.as_bytes(), v.as_bytes()).await.unwrap();
    }

    let pairs = h
        .client
        .list_keyvals(db, 3, b"", b"", &[32; 3], &[32; 3])
        .await
        .unwrap();
    assert_eq!(pairs.len(), 3);
    for (key, value) in &pairs {
        assert_eq!(&h.client.get(db, key, 64).await.unwrap(), value);
    }
}

#[tokio::test]
async fn test_null_backend_over_rpc() {
    let h = test_utils::harness(
        "local://rpc",
        json!({ "databases": [ { "name": "sink", "type": "null" } ] }),
    );
    let db = h.client.open("sink").await.unwrap();

    h.client.put(db, b"k", b"v").await.unwrap();
    assert_eq!(h.client.get(db, b"k", 16).await, Err(KvError::UnknownKey));
    assert!(h.client.list_keys(db, 10, b"", b"").await.unwrap().is_empty());
}
