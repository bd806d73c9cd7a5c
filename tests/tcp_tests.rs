//! End-to-end tests over the TCP transport

use std::sync::Arc;

use serde_json::json;

use quokka::client::Client;
use quokka::error::KvError;
use quokka::protocol::MigrateTarget;
use quokka::provider::Provider;
use quokka::server::Node;
use quokka::transport::{TcpClientTransport, TcpServer};

/// Bind a node on a loopback port and return its address.
async fn spawn_node(config: serde_json::Value) -> (String, Arc<Provider>) {
    let provider = Provider::with_config(config).unwrap();
    let node = Node::new();
    node.add_provider(1, provider.clone()).unwrap();

    let server = TcpServer::bind("tcp://127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(node).await;
    });
    (addr, provider)
}

async fn connect(addr: &str) -> Client {
    let transport = Arc::new(TcpClientTransport::connect(addr).await.unwrap());
    Client::new(transport, 1)
}

#[tokio::test]
async fn test_point_ops_over_tcp() {
    let (addr, _provider) = spawn_node(json!({
        "databases": [ { "name": "A", "type": "map" } ]
    }))
    .await;
    let client = connect(&addr).await;

    let db = client.open("A").await.unwrap();
    client.put(db, b"apple", b"red").await.unwrap();
    assert_eq!(client.get(db, b"apple", 32).await.unwrap(), b"red");
    assert_eq!(client.length(db, b"apple").await.unwrap(), 3);
    assert!(client.exists(db, b"apple").await.unwrap());
    client.erase(db, b"apple").await.unwrap();
    assert_eq!(client.get(db, b"apple", 32).await, Err(KvError::UnknownKey));
}

#[tokio::test]
async fn test_bulk_flows_over_tcp() {
    let (addr, _provider) = spawn_node(json!({
        "databases": [ { "name": "A", "type": "map" } ]
    }))
    .await;
    let client = connect(&addr).await;
    let db = client.open("A").await.unwrap();

    // batched put and get exercise pull and push sub-frames
    let keys: Vec<&[u8]> = vec![b"k1", b"k2"];
    let vals: Vec<&[u8]> = vec![b"first-value", b"second-value"];
    client.put_multi(db, &keys, &vals).await.unwrap();

    let results = client.get_multi(db, &keys, &[64, 64]).await.unwrap();
    assert_eq!(results[0].1.as_deref().unwrap(), b"first-value");
    assert_eq!(results[1].1.as_deref().unwrap(), b"second-value");

    // a value large enough to span several frames would still be one
    // bulk transfer; keep it modest but past the inline sizes
    let big = vec![9u8; 100_000];
    client.bulk_put(db, b"big", &big).await.unwrap();
    assert_eq!(client.bulk_get(db, b"big", 200_000).await.unwrap(), big);

    let listed = client.list_keys(db, 10, b"", b"k").await.unwrap();
    assert_eq!(listed, vec![b"k1".to_vec(), b"k2".to_vec()]);
}

#[tokio::test]
async fn test_migration_between_tcp_nodes() {
    let (src_addr, _p1) = spawn_node(json!({
        "databases": [ { "name": "A", "type": "map" } ]
    }))
    .await;
    let (dst_addr, _p2) = spawn_node(json!({
        "databases": [ { "name": "B", "type": "map" } ]
    }))
    .await;

    let src_client = connect(&src_addr).await;
    let dst_client = connect(&dst_addr).await;
    let src_db = src_client.open("A").await.unwrap();
    let dst_db = dst_client.open("B").await.unwrap();

    for (k, v) in [("m1", "x"), ("m2", "y")] {
        src_client
            .put(src_db, k.as_bytes(), v.as_bytes())
            .await
            .unwrap();
    }

    // the source node dials the destination to forward its puts
    src_client
        .migrate_all_keys(
            src_db,
            MigrateTarget {
                addr: dst_addr.clone(),
                provider_id: 1,
                db_id: dst_db,
            },
            true,
        )
        .await
        .unwrap();

    assert!(src_client
        .list_keys(src_db, 10, b"", b"")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(dst_client.get(dst_db, b"m1", 16).await.unwrap(), b"x");
    assert_eq!(dst_client.get(dst_db, b"m2", 16).await.unwrap(), b"y");
}

#[tokio::test]
async fn test_sequential_requests_share_a_connection() {
    let (addr, _provider) = spawn_node(json!({
        "databases": [ { "name": "A", "type": "map" } ]
    }))
    .await;
    let client = connect(&addr).await;
    let db = client.open("A").await.unwrap();

    for i in 0..50u32 {
        let key = format!("key-{i}");
        client
            .put(db, key.as_bytes(), &i.to_le_bytes())
            .await
            .unwrap();
    }
    for i in 0..50u32 {
        let key = format!("key-{i}");
        assert_eq!(
            client.get(db, key.as_bytes(), 16).await.unwrap(),
            i.to_le_bytes()
        );
    }
}
