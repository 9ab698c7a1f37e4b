//! Request state store contract and implementations.
//!
//! The coordinator's correctness rests entirely on [`RequestStore::set`]
//! creating a `STARTED` record atomically: of any number of concurrent
//! creates for one key, exactly one succeeds and the rest get
//! [`StoreError::RequestExists`](crate::error::StoreError::RequestExists).

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::model::{Request, RequestState};

/// Atomic key-value record store shared by every caller of a key.
///
/// Implementations must make a completed record visible to every
/// subsequent `get`, from any process, once `set` returns.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Fetch the current record, or `None` if the key has none.
    async fn get(&self, id: &str) -> StoreResult<Option<Request>>;

    /// Create or complete a record.
    ///
    /// - `RequestState::Started` creates the record and must fail with
    ///   `RequestExists` if any live record exists for `id`.
    /// - `Done` / `Failed` move a `STARTED` record to its terminal state and
    ///   fail with `InvalidTransition` otherwise.
    async fn set(&self, id: &str, params: RequestState) -> StoreResult<()>;
}
