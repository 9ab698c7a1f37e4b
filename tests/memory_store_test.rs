//! Store contract tests for the in-memory request store.

use std::time::Duration;

use idempotent_rs::model::{RequestState, Status};
use idempotent_rs::store::{MemoryStore, RequestStore};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_have_exactly_one_winner() {
    let store = MemoryStore::new().with_latency(Duration::from_millis(1), Duration::from_millis(10));

    let handles: Vec<_> = (0..200)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.set("race", RequestState::Started).await })
        })
        .collect();

    let mut won = 0;
    let mut lost = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => won += 1,
            Err(e) if e.is_request_exists() => lost += 1,
            Err(e) => panic!("unexpected store error: {e}"),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(lost, 199);
}

#[tokio::test]
async fn get_returns_none_before_claim() {
    let store = MemoryStore::new();
    assert!(store.get("nothing").await.unwrap().is_none());
}

#[tokio::test]
async fn full_lifecycle_started_then_done() {
    let store = MemoryStore::new();

    store.set("k", RequestState::Started).await.unwrap();
    let started = store.get("k").await.unwrap().unwrap();
    assert_eq!(started.id, "k");
    assert_eq!(started.status(), Status::Started);

    store
        .set("k", RequestState::Done { result: json!(false) })
        .await
        .unwrap();
    let done = store.get("k").await.unwrap().unwrap();
    assert_eq!(done.state, RequestState::Done { result: json!(false) });
    assert_eq!(done.created_at, started.created_at);
    assert!(done.updated_at >= started.updated_at);
}

#[tokio::test]
async fn clones_share_records() {
    let store = MemoryStore::new();
    let other = store.clone();

    store.set("shared", RequestState::Started).await.unwrap();
    let err = other.set("shared", RequestState::Started).await.unwrap_err();
    assert!(err.is_request_exists());
}
