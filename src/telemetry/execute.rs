//! Span helpers for `execute` calls.

use tracing::Span;

/// Start a span covering one `execute` call.
///
/// `idempotent.path` is declared empty and filled by [`record_path`] once
/// the claim decides whether this caller runs or waits.
pub fn start_execute_span(key: &str) -> Span {
    tracing::info_span!(
        "idempotent.execute",
        "idempotent.key" = key,
        "idempotent.path" = tracing::field::Empty,
    )
}

/// Record which side of the claim this caller landed on.
pub fn record_path(span: &Span, path: &'static str) {
    span.record("idempotent.path", path);
}
