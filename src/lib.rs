//! # idempotent-rs
//!
//! At-most-once execution of keyed operations.
//!
//! An [`Idempotent`] coordinator claims an idempotency key through a shared
//! [`RequestStore`]. The caller that wins the claim runs the operation and
//! stores its result; every other caller, in this process or another, polls
//! the store with jittered Fibonacci backoff until the result appears or its
//! deadline passes.

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod store;
pub mod telemetry;
pub mod timeout;

pub use coordinator::{Idempotent, IdempotentConfig, OnFailure};
pub use error::{Error, Result, StoreError};
pub use store::{MemoryStore, PgStore, RequestStore};
