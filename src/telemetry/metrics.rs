//! Metric instrument factories for idempotent-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider every instrument is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("idempotent-rs")
}

/// Counter: claim attempts.
/// Labels: `result` ("claimed" | "conflict" | "error").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("idempotent.claims")
        .with_description("Number of idempotency key claim attempts")
        .build()
}

/// Counter: finished `execute` calls.
/// Labels: `path` ("runner" | "waiter"), `outcome` ("ok" | "error" | "timeout" | "failed").
pub fn executions() -> Counter<u64> {
    meter()
        .u64_counter("idempotent.executions")
        .with_description("Number of completed execute calls")
        .build()
}

/// Histogram: store reads issued by one waiter before it resolved.
pub fn wait_polls() -> Histogram<u64> {
    meter()
        .u64_histogram("idempotent.wait.polls")
        .with_description("Store reads per waiting call")
        .build()
}

/// Histogram: runner operation duration in milliseconds.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("idempotent.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
