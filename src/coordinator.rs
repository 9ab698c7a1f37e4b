//! Idempotency coordinator: claim a key, or wait for whoever did.
//!
//! The coordinator holds no in-process lock. Exclusivity comes entirely from
//! the store's atomic create, so callers may be tasks in one process or
//! separate processes sharing a store.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, info, trace, warn};

use crate::backoff::BackoffConfig;
use crate::error::{Error, Result, StoreError};
use crate::model::{Request, RequestState};
use crate::store::RequestStore;
use crate::telemetry::execute::{record_path, start_execute_span};
use crate::telemetry::metrics;
use crate::timeout::{DEFAULT_TIMEOUT, TimeoutGuard, parse_duration};

/// What the runner does when its operation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnFailure {
    /// Record nothing. The key stays `STARTED` until the store expires it
    /// and waiters run out their timeout.
    #[default]
    LeaveStarted,
    /// Persist a `FAILED` record so waiters and later callers fail fast
    /// with [`Error::RequestFailed`].
    RecordFailed,
}

impl std::str::FromStr for OnFailure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "leave-started" => Ok(OnFailure::LeaveStarted),
            "record-failed" => Ok(OnFailure::RecordFailed),
            other => Err(Error::Config(format!(
                "unknown failure policy {other:?} (expected leave-started or record-failed)"
            ))),
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct IdempotentConfig {
    /// Deadline for a waiting caller.
    pub timeout: Duration,
    pub backoff: BackoffConfig,
    pub on_failure: OnFailure,
}

impl Default for IdempotentConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            backoff: BackoffConfig::default(),
            on_failure: OnFailure::default(),
        }
    }
}

impl IdempotentConfig {
    /// A zero timeout means "unset" and falls back to [`DEFAULT_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        self
    }

    pub fn with_timeout_ms(self, ms: u64) -> Self {
        self.with_timeout(Duration::from_millis(ms))
    }

    /// Set the timeout from an expression such as `"30s"` or `"1m"`.
    pub fn with_timeout_expr(self, expr: &str) -> Result<Self> {
        Ok(self.with_timeout(parse_duration(expr)?))
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }
}

/// Runs each keyed operation at most once and hands every caller its result.
#[derive(Clone)]
pub struct Idempotent {
    store: Arc<dyn RequestStore>,
    config: IdempotentConfig,
}

impl Idempotent {
    pub fn new(store: Arc<dyn RequestStore>, config: IdempotentConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &IdempotentConfig {
        &self.config
    }

    /// Run `operation` for `key` unless some caller already has.
    ///
    /// The caller that claims `key` runs the operation, stores its result and
    /// returns it. Every other caller polls the store until the result
    /// appears and returns that instead, or fails with [`Error::Timeout`].
    /// The operation's own error reaches only the runner, as
    /// [`Error::Operation`].
    pub async fn execute<T, E, F, Fut>(&self, operation: F, key: &str) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let span = start_execute_span(key);
        let claim_span = span.clone();

        async move {
            match self.store.set(key, RequestState::Started).await {
                Ok(()) => {
                    record_path(&claim_span, "runner");
                    metrics::claims().add(1, &[KeyValue::new("result", "claimed")]);
                    self.run(operation, key).await
                }
                Err(StoreError::RequestExists(_)) => {
                    record_path(&claim_span, "waiter");
                    metrics::claims().add(1, &[KeyValue::new("result", "conflict")]);
                    debug!("key already claimed, waiting for result");
                    self.wait(key).await
                }
                Err(e) => {
                    metrics::claims().add(1, &[KeyValue::new("result", "error")]);
                    warn!(error = %e, "claim failed");
                    Err(e.into())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run<T, E, F, Fut>(&self, operation: F, key: &str) -> Result<T>
    where
        T: Serialize,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let started = Instant::now();
        let outcome = operation().await;
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("outcome", if outcome.is_ok() { "ok" } else { "error" })],
        );

        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                let error: Box<dyn std::error::Error + Send + Sync> = e.into();
                warn!(%error, policy = ?self.config.on_failure, "operation failed");
                self.record_failure(key, error.to_string()).await;
                record_execution("runner", "error");
                return Err(Error::Operation(error));
            }
        };

        let result = match serde_json::to_value(&value) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "operation result is not serializable");
                self.record_failure(key, format!("result serialization error: {e}"))
                    .await;
                record_execution("runner", "error");
                return Err(e.into());
            }
        };
        self.store.set(key, RequestState::Done { result }).await?;
        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            "operation completed"
        );
        record_execution("runner", "ok");
        Ok(value)
    }

    /// Persist `FAILED` when the policy asks for it. Best effort: the
    /// runner's own error is what its caller gets either way.
    async fn record_failure(&self, key: &str, message: String) {
        if self.config.on_failure != OnFailure::RecordFailed {
            return;
        }
        if let Err(e) = self
            .store
            .set(key, RequestState::Failed { error: message })
            .await
        {
            warn!(error = %e, "failed to record FAILED state");
        }
    }

    async fn wait<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let guard = TimeoutGuard::new(self.config.timeout);
        let mut polls = 0u64;

        let outcome = guard.run(self.poll(key, &mut polls)).await;
        metrics::wait_polls().record(polls, &[]);

        match outcome {
            Ok(Ok(value)) => {
                record_execution("waiter", "ok");
                Ok(value)
            }
            Ok(Err(e)) => {
                let label = match e {
                    Error::RequestFailed { .. } => "failed",
                    _ => "error",
                };
                record_execution("waiter", label);
                Err(e)
            }
            Err(_) => {
                warn!(polls, timeout = ?guard.deadline(), "gave up waiting for result");
                record_execution("waiter", "timeout");
                Err(Error::Timeout {
                    key: key.to_string(),
                    waited: guard.deadline(),
                })
            }
        }
    }

    /// Re-read the record until it is terminal. Never returns on its own
    /// while the record stays `STARTED`; the caller bounds it.
    async fn poll<T: DeserializeOwned>(&self, key: &str, polls: &mut u64) -> Result<T> {
        let mut backoff = self.config.backoff.start();
        loop {
            *polls += 1;
            match self.store.get(key).await? {
                Some(Request {
                    state: RequestState::Done { result },
                    ..
                }) => return Ok(serde_json::from_value(result)?),
                Some(Request {
                    state: RequestState::Failed { error },
                    ..
                }) => {
                    return Err(Error::RequestFailed {
                        key: key.to_string(),
                        message: error,
                    });
                }
                Some(_) | None => {}
            }
            let delay = backoff.next_delay();
            trace!(attempt = *polls, delay_us = delay.as_micros() as u64, "result not ready");
            tokio::time::sleep(delay).await;
        }
    }
}

fn record_execution(path: &'static str, outcome: &'static str) {
    metrics::executions().add(
        1,
        &[KeyValue::new("path", path), KeyValue::new("outcome", outcome)],
    );
}
