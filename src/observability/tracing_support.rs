//! Tracing integration for structured logging and spans.

use std::path::Path;
use tracing::{Level, Span, span};

/// Create a span for a node's worker.
///
/// # Example
///
/// ```rust
/// use mediagraph::observability::span_node;
///
/// let span = span_node("encoder", "async");
/// let _guard = span.enter();
/// // Node processing here...
/// ```
#[inline]
pub fn span_node(node: &str, model: &str) -> Span {
    span!(Level::DEBUG, "node", node = %node, model = %model)
}

/// Enter a node span and return the guard.
pub fn instrument_node(node: &str, model: &str) -> tracing::span::EnteredSpan {
    span_node(node, model).entered()
}

/// Log a node state change.
#[inline]
pub fn trace_state_change(node: &str, from: &str, to: &str) {
    tracing::info!(node = %node, from = %from, to = %to, "node state changed");
}

/// Log a buffer dropped by a backpressure policy.
#[inline]
pub fn trace_drop(node: &str, slot: usize, policy: &str, sequence: u64) {
    tracing::debug!(
        node = %node,
        slot = slot,
        policy = %policy,
        sequence = sequence,
        "buffer dropped"
    );
}

/// Log end-of-stream reaching a node.
#[inline]
pub fn trace_eos(node: &str) {
    tracing::info!(node = %node, "end of stream");
}

/// Log a process failure.
#[inline]
pub fn trace_process_failure(node: &str, consecutive: u64, error: &dyn std::error::Error) {
    tracing::warn!(
        node = %node,
        consecutive = consecutive,
        error = %error,
        "process failed"
    );
}

/// Log a container file being opened.
#[inline]
pub fn trace_file_begin(node: &str, path: &Path) {
    tracing::info!(node = %node, path = %path.display(), "recording file opened");
}

/// Log a container file being finalized.
#[inline]
pub fn trace_file_end(node: &str, path: &Path, records: u64) {
    tracing::info!(
        node = %node,
        path = %path.display(),
        records = records,
        "recording file closed"
    );
}

/// Log a buffer pool leak report.
#[inline]
pub fn trace_pool_leak(pool: &str, outstanding: usize, report: &str) {
    tracing::error!(
        pool = %pool,
        outstanding = outstanding,
        "buffer pool released with outstanding buffers\n{report}"
    );
}
