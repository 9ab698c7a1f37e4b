//! Request record model.
//!
//! One record exists per idempotency key. It is created `STARTED` by the
//! caller that wins the claim and moves to `DONE` (or `FAILED`) exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A stored idempotency record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// The idempotency key. Immutable.
    pub id: String,

    /// Lifecycle state, carrying the result once done.
    #[serde(flatten)]
    pub state: RequestState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub fn status(&self) -> Status {
        self.state.status()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Record state, also used as the parameters of
/// [`RequestStore::set`](crate::store::RequestStore::set).
///
/// Completion is signalled by the variant alone, so a `Done` result of
/// `null`, `0`, `false` or `""` is as complete as any other value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    /// Claimed; the runner is executing the operation.
    Started,
    /// The operation finished and produced `result`.
    Done { result: serde_json::Value },
    /// The operation failed and the runner recorded it.
    Failed { error: String },
}

impl RequestState {
    pub fn status(&self) -> Status {
        match self {
            RequestState::Started => Status::Started,
            RequestState::Done { .. } => Status::Done,
            RequestState::Failed { .. } => Status::Failed,
        }
    }
}

/// Record status without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Started,
    Done,
    Failed,
}

impl Status {
    /// Can a record move from self to `to`? Only `STARTED` is mutable.
    pub fn can_transition_to(self, to: Status) -> bool {
        matches!(
            (self, to),
            (Status::Started, Status::Done) | (Status::Started, Status::Failed)
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Started => "STARTED",
            Status::Done => "DONE",
            Status::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Status {
    type Err = crate::error::StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(Status::Started),
            "DONE" => Ok(Status::Done),
            "FAILED" => Ok(Status::Failed),
            other => Err(crate::error::StoreError::Backend(format!(
                "unknown request status: {other}"
            ))),
        }
    }
}
