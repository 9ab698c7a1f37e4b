//! In-process request store.
//!
//! A mutex-guarded map provides the create-if-absent atomicity. Optional
//! latency makes it behave like a remote store in tests, and optional
//! expiry mirrors the TTL a persistent backend would enforce.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

use super::RequestStore;
use crate::error::{StoreError, StoreResult};
use crate::model::{Request, RequestState, Status};

#[derive(Debug, Clone)]
struct Entry {
    request: Request,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Cloneable handle to a shared in-memory record map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, Entry>>>,
    latency: Option<(Duration, Duration)>,
    expiry: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by a random duration in `[min, max]`.
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.latency = Some((min, max.max(min)));
        self
    }

    /// Records older than `expiry` become invisible and claimable again.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.lock()
            .map(|records| records.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current record for `id`, without simulated latency.
    pub fn snapshot(&self, id: &str) -> Option<Request> {
        let now = Utc::now();
        self.lock()
            .ok()?
            .get(id)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.request.clone())
    }

    /// Drop expired records. Returns how many were removed.
    pub fn purge_expired(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, e| !e.is_expired(now));
        Ok((before - records.len()) as u64)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.records
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    async fn simulate_latency(&self) {
        if let Some((min, max)) = self.latency {
            let delay = if max > min {
                rand::thread_rng().gen_range(min..=max)
            } else {
                min
            };
            tokio::time::sleep(delay).await;
        }
    }

    fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expiry
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl)
    }

    fn create(&self, id: &str) -> StoreResult<()> {
        let now = Utc::now();
        let mut records = self.lock()?;
        if records.get(id).is_some_and(|e| !e.is_expired(now)) {
            return Err(StoreError::RequestExists(id.to_string()));
        }
        records.insert(
            id.to_string(),
            Entry {
                request: Request {
                    id: id.to_string(),
                    state: RequestState::Started,
                    created_at: now,
                    updated_at: now,
                },
                expires_at: self.expires_at(now),
            },
        );
        Ok(())
    }

    fn finish(&self, id: &str, state: RequestState) -> StoreResult<()> {
        let now = Utc::now();
        let to = state.status();
        let mut records = self.lock()?;
        let entry = records
            .get_mut(id)
            .filter(|e| !e.is_expired(now) && e.request.status().can_transition_to(to))
            .ok_or_else(|| StoreError::InvalidTransition {
                id: id.to_string(),
                to,
            })?;
        entry.request.state = state;
        entry.request.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Request>> {
        self.simulate_latency().await;
        let now = Utc::now();
        Ok(self
            .lock()?
            .get(id)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.request.clone()))
    }

    async fn set(&self, id: &str, params: RequestState) -> StoreResult<()> {
        self.simulate_latency().await;
        match params.status() {
            Status::Started => self.create(id),
            Status::Done | Status::Failed => self.finish(id, params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn second_create_reports_request_exists() {
        let store = MemoryStore::new();
        store.set("a", RequestState::Started).await.unwrap();
        let err = store.set("a", RequestState::Started).await.unwrap_err();
        assert!(err.is_request_exists());
    }

    #[tokio::test]
    async fn create_over_done_record_still_conflicts() {
        let store = MemoryStore::new();
        store.set("a", RequestState::Started).await.unwrap();
        store
            .set("a", RequestState::Done { result: json!(1) })
            .await
            .unwrap();
        let err = store.set("a", RequestState::Started).await.unwrap_err();
        assert!(err.is_request_exists());
        assert_eq!(store.snapshot("a").unwrap().status(), Status::Done);
    }

    #[tokio::test]
    async fn done_never_regresses() {
        let store = MemoryStore::new();
        store.set("a", RequestState::Started).await.unwrap();
        store
            .set("a", RequestState::Done { result: json!("x") })
            .await
            .unwrap();
        let err = store
            .set("a", RequestState::Failed { error: "late".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { to: Status::Failed, .. }));
    }

    #[tokio::test]
    async fn completing_unknown_key_is_invalid() {
        let store = MemoryStore::new();
        let err = store
            .set("missing", RequestState::Done { result: json!(null) })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn expired_records_are_invisible_and_reclaimable() {
        let store = MemoryStore::new().with_expiry(Duration::from_millis(20));
        store.set("a", RequestState::Started).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.is_empty());

        store.set("a", RequestState::Started).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let store = MemoryStore::new().with_expiry(Duration::from_millis(20));
        store.set("old", RequestState::Started).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        store.set("new", RequestState::Started).await.unwrap();

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert!(store.snapshot("new").is_some());
    }
}
