//! Error types for idempotent-rs.

use std::time::Duration;

use thiserror::Error;

use crate::model::Status;

/// Errors raised by a [`RequestStore`](crate::store::RequestStore).
///
/// `RequestExists` is the only variant the coordinator treats as
/// non-fatal: it means another caller already claimed the key.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request already exists: {0}")]
    RequestExists(String),

    #[error("request {id} is not STARTED, cannot transition to {to}")]
    InvalidTransition { id: String, to: Status },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Did the create fail because the key is already claimed?
    pub fn is_request_exists(&self) -> bool {
        matches!(self, StoreError::RequestExists(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("timed out after {waited:?} waiting for request {key}")]
    Timeout { key: String, waited: Duration },

    #[error("request {key} failed: {message}")]
    RequestFailed { key: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The operation's own error, passed through untouched.
    #[error(transparent)]
    Operation(Box<dyn std::error::Error + Send + Sync>),

    #[error("result serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
