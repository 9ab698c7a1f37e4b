//! Waiter deadline and duration expressions.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::error::Elapsed;

use crate::error::{Error, Result};

/// Default wait deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Overall deadline for one waiting call, independent of poll delays.
///
/// When the deadline passes the guarded future is dropped, so no further
/// store reads are issued and any pending backoff sleep is cancelled.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    deadline: Duration,
}

impl TimeoutGuard {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Drive `fut` to completion or until the deadline passes.
    pub async fn run<F: Future>(&self, fut: F) -> std::result::Result<F::Output, Elapsed> {
        tokio::time::timeout(self.deadline, fut).await
    }
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

/// A timeout as written in configuration: milliseconds or an expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeoutSetting {
    Millis(u64),
    Expr(String),
}

impl TimeoutSetting {
    pub fn to_duration(&self) -> Result<Duration> {
        match self {
            TimeoutSetting::Millis(ms) => Ok(Duration::from_millis(*ms)),
            TimeoutSetting::Expr(expr) => parse_duration(expr),
        }
    }
}

impl From<u64> for TimeoutSetting {
    fn from(ms: u64) -> Self {
        TimeoutSetting::Millis(ms)
    }
}

impl From<&str> for TimeoutSetting {
    fn from(expr: &str) -> Self {
        TimeoutSetting::Expr(expr.to_string())
    }
}

/// Parse `"1m"`, `"30 s"`, `"1.5h"`, `"250ms"` or a bare millisecond count.
pub fn parse_duration(expr: &str) -> Result<Duration> {
    let expr = expr.trim();
    let split = expr
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(expr.len());
    let (number, unit) = expr.split_at(split);

    if number.is_empty() {
        return Err(Error::Config(format!("invalid duration: {expr:?}")));
    }
    let value: f64 = number
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration: {expr:?}")))?;

    let unit_ms = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
        "d" | "day" | "days" => 86_400_000.0,
        "w" | "week" | "weeks" => 604_800_000.0,
        other => {
            return Err(Error::Config(format!(
                "unknown duration unit {other:?} in {expr:?}"
            )));
        }
    };

    Duration::try_from_secs_f64(value * unit_ms / 1_000.0)
        .map_err(|e| Error::Config(format!("duration out of range: {expr:?}: {e}")))
}
