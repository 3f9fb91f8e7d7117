//! Observability features: metrics and tracing.
//!
//! - **Metrics**: counters, gauges and histograms via `metrics-rs`
//! - **Tracing**: structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `mediagraph_cycles` | Counter | node | Process invocations |
//! | `mediagraph_buffers_dropped` | Counter | node, slot, policy | Backpressure drops |
//! | `mediagraph_process_failures` | Counter | node | Failed process invocations |
//! | `mediagraph_processing_time_ns` | Histogram | node | Time per process cycle |
//! | `mediagraph_queue_depth` | Gauge | node, slot | Buffers waiting per input slot |
//! | `mediagraph_pool_available` | Gauge | pool | Free pool buffers |
//! | `mediagraph_pool_exhausted` | Counter | pool | Acquisitions on an empty pool |
//! | `mediagraph_files_written` | Counter | node | Finalized container files |
//! | `mediagraph_write_errors` | Counter | node | Aborted container files |
//!
//! Without an installed recorder all of these are no-ops. The library never
//! installs a tracing subscriber either; that is left to the application.

mod metrics;
mod tracing_support;

pub use metrics::{
    CycleTimer, NodeMetrics, init_metrics, record_buffer_dropped, record_file_written,
    record_pool_available, record_pool_exhausted, record_queue_depth, record_write_error,
};
pub use tracing_support::{
    instrument_node, span_node, trace_drop, trace_eos, trace_file_begin, trace_file_end,
    trace_pool_leak, trace_process_failure, trace_state_change,
};
