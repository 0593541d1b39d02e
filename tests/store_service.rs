//! Integration tests for the store's line-protocol TCP service.
//!
//! Each test spins up a real store service on an ephemeral port and drives it
//! over TCP, either through [`StoreClient`] or, for the cases where the exact
//! wire bytes matter, a raw socket.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use hayloft::{Error, Store, StoreClient, StoreConfig, StoreService};

/// Start a store service over a fresh temp directory with default sizing.
///
/// Returns a connected client, the raw address, and the directory (kept alive
/// so the volume files survive the test body).
async fn start_store() -> (StoreClient, std::net::SocketAddr, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(StoreConfig::new(dir.path())).expect("open store");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(StoreService::new(Arc::new(store)).serve(listener));

    (StoreClient::new(addr.to_string()), addr, dir)
}

/// Send one request line (no payload) and return the response line.
async fn raw_request(addr: std::net::SocketAddr, line: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(format!("{line}\n").as_bytes())
        .await
        .expect("send request");

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader.read_line(&mut response).await.expect("read response");
    response.trim_end().to_string()
}

fn random_payload(rng: &mut StdRng, max: usize) -> Vec<u8> {
    let size = rng.gen_range(max / 2..=max);
    let mut payload = vec![0u8; size];
    rng.fill_bytes(&mut payload);
    payload
}

#[tokio::test]
async fn put_get_delete_round_trip() {
    let (client, _addr, _dir) = start_store().await;
    let mut rng = StdRng::seed_from_u64(1);
    let payload = random_payload(&mut rng, 4096);

    client.put(0, 42, &payload).await.expect("put");
    assert_eq!(client.get(42).await.expect("get"), payload);

    client.delete(42).await.expect("delete");
    match client.get(42).await {
        Err(Error::Remote(token)) => assert_eq!(token, "BadNeedle"),
        other => panic!("expected err BadNeedle after delete, got {other:?}"),
    }

    // The id is gone from the index, so a second delete fails too.
    match client.delete(42).await {
        Err(Error::Remote(token)) => assert_eq!(token, "BadNeedle"),
        other => panic!("expected err BadNeedle on second delete, got {other:?}"),
    }
}

#[tokio::test]
async fn puts_spread_across_volumes_read_back() {
    let (client, _addr, _dir) = start_store().await;
    let mut rng = StdRng::seed_from_u64(2);

    let payloads: Vec<Vec<u8>> = (0..10).map(|_| random_payload(&mut rng, 4096)).collect();
    for (i, payload) in payloads.iter().enumerate() {
        client
            .put(i as u64 % 5, i as u64, payload)
            .await
            .expect("put");
    }
    for (i, payload) in payloads.iter().enumerate() {
        assert_eq!(&client.get(i as u64).await.expect("get"), payload);
    }
}

#[tokio::test]
async fn duplicate_needle_id_is_refused_with_no_fit() {
    let (client, _addr, _dir) = start_store().await;

    client.put(0, 7, &[1u8; 100]).await.expect("first put");
    match client.put(1, 7, &[2u8; 100]).await {
        Err(Error::Remote(token)) => assert_eq!(token, "NoFit"),
        other => panic!("expected err NoFit for duplicate id, got {other:?}"),
    }

    // The original blob is untouched.
    assert_eq!(client.get(7).await.expect("get"), vec![1u8; 100]);
}

#[tokio::test]
async fn oversize_put_is_refused_before_the_payload() {
    let (_client, addr, _dir) = start_store().await;

    // 1 MiB + 1. The response arrives although no payload was ever sent, so
    // the service is not waiting on the body.
    let response = raw_request(addr, "put 0 0 1048577").await;
    assert_eq!(response, "err TooManyBytes");

    // Nothing was stored under the id.
    let response = raw_request(addr, "get 0").await;
    assert_eq!(response, "err BadNeedle");
}

#[tokio::test]
async fn unknown_volume_is_bad_haystack_id() {
    let (_client, addr, _dir) = start_store().await;
    let response = raw_request(addr, "put 9 1 10").await;
    assert_eq!(response, "err BadHaystackId");
}

#[tokio::test]
async fn unknown_commands_and_ids_map_to_protocol_errors() {
    let (_client, addr, _dir) = start_store().await;

    assert_eq!(raw_request(addr, "frobnicate 1").await, "err BadCommand");
    assert_eq!(raw_request(addr, "get notanumber").await, "err BadCommand");
    assert_eq!(raw_request(addr, "get 12345").await, "err BadNeedle");
    assert_eq!(raw_request(addr, "delete 12345").await, "err BadNeedle");
}

#[tokio::test]
async fn index_survives_a_store_restart() {
    let (client, _addr, dir) = start_store().await;
    let mut rng = StdRng::seed_from_u64(3);

    let payloads: Vec<Vec<u8>> = (0..3).map(|_| random_payload(&mut rng, 2048)).collect();
    for (i, payload) in payloads.iter().enumerate() {
        client.put(i as u64, i as u64, payload).await.expect("put");
    }
    client.delete(1).await.expect("delete");

    // Reopen the same directory as a fresh store: the index must come back
    // from the volume scan alone.
    let reopened = Store::open(StoreConfig::new(dir.path())).expect("reopen");
    assert_eq!(reopened.needle_count(), 2);
    assert_eq!(reopened.get(0).expect("get").as_ref(), &payloads[0][..]);
    assert_eq!(reopened.get(2).expect("get").as_ref(), &payloads[2][..]);
    assert!(matches!(reopened.get(1), Err(Error::BadNeedle)));
}

#[tokio::test]
async fn concurrent_clients_do_not_interfere() {
    let (client, _addr, _dir) = start_store().await;

    let mut tasks = Vec::new();
    for worker in 0..4u64 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..8u64 {
                let id = worker * 100 + i;
                let payload = vec![worker as u8 + 1; 256];
                client.put(worker % 5, id, &payload).await.expect("put");
                assert_eq!(client.get(id).await.expect("get"), payload);
            }
        }));
    }
    for task in tasks {
        task.await.expect("worker task");
    }

    // Spot-check cross-worker visibility after the fact.
    assert_eq!(client.get(305).await.expect("get"), vec![4u8; 256]);
}
