//! Metrics collection using metrics-rs.

use metrics::{Counter, Gauge, Histogram, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const CYCLES: &str = "mediagraph_cycles";
const BUFFERS_DROPPED: &str = "mediagraph_buffers_dropped";
const PROCESS_FAILURES: &str = "mediagraph_process_failures";
const PROCESSING_TIME_NS: &str = "mediagraph_processing_time_ns";
const QUEUE_DEPTH: &str = "mediagraph_queue_depth";
const POOL_AVAILABLE: &str = "mediagraph_pool_available";
const POOL_EXHAUSTED: &str = "mediagraph_pool_exhausted";
const FILES_WRITTEN: &str = "mediagraph_files_written";
const WRITE_ERRORS: &str = "mediagraph_write_errors";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    metrics::describe_counter!(CYCLES, Unit::Count, "Process function invocations");
    metrics::describe_counter!(
        BUFFERS_DROPPED,
        Unit::Count,
        "Buffers discarded by a backpressure policy"
    );
    metrics::describe_counter!(
        PROCESS_FAILURES,
        Unit::Count,
        "Process function invocations that returned an error"
    );
    metrics::describe_histogram!(
        PROCESSING_TIME_NS,
        Unit::Nanoseconds,
        "Time spent in a single process cycle"
    );
    metrics::describe_gauge!(
        QUEUE_DEPTH,
        Unit::Count,
        "Buffers waiting in a node input slot"
    );
    metrics::describe_gauge!(
        POOL_AVAILABLE,
        Unit::Count,
        "Free buffers in a buffer pool"
    );
    metrics::describe_counter!(
        POOL_EXHAUSTED,
        Unit::Count,
        "Acquisitions that found the buffer pool empty"
    );
    metrics::describe_counter!(FILES_WRITTEN, Unit::Count, "Container files finalized");
    metrics::describe_counter!(
        WRITE_ERRORS,
        Unit::Count,
        "Container write failures that aborted a file"
    );
}

/// Record a buffer dropped by a backpressure policy.
#[inline]
pub fn record_buffer_dropped(node: &str, slot: usize, policy: &'static str) {
    counter!(
        BUFFERS_DROPPED,
        "node" => node.to_string(),
        "slot" => slot.to_string(),
        "policy" => policy
    )
    .increment(1);
}

/// Record the depth of a node input slot.
#[inline]
pub fn record_queue_depth(node: &str, slot: usize, depth: usize) {
    gauge!(QUEUE_DEPTH, "node" => node.to_string(), "slot" => slot.to_string()).set(depth as f64);
}

/// Record free buffers in a pool.
#[inline]
pub fn record_pool_available(pool: &str, available: usize) {
    gauge!(POOL_AVAILABLE, "pool" => pool.to_string()).set(available as f64);
}

/// Record an acquisition that found the pool empty.
#[inline]
pub fn record_pool_exhausted(pool: &str) {
    counter!(POOL_EXHAUSTED, "pool" => pool.to_string()).increment(1);
}

/// Record a finalized container file.
#[inline]
pub fn record_file_written(node: &str) {
    counter!(FILES_WRITTEN, "node" => node.to_string()).increment(1);
}

/// Record a container write failure.
#[inline]
pub fn record_write_error(node: &str) {
    counter!(WRITE_ERRORS, "node" => node.to_string()).increment(1);
}

/// Metrics collector for a single node.
///
/// Handles are resolved once at node construction so the per-cycle cost is
/// an atomic increment.
#[derive(Clone)]
pub struct NodeMetrics {
    node: String,
    cycles: Counter,
    failures: Counter,
    processing_time: Histogram,
    depths: Vec<Gauge>,
}

impl NodeMetrics {
    /// Create a collector for a node with `inputs` input slots.
    pub fn new(node: &str, inputs: usize) -> Self {
        Self {
            node: node.to_string(),
            cycles: counter!(CYCLES, "node" => node.to_string()),
            failures: counter!(PROCESS_FAILURES, "node" => node.to_string()),
            processing_time: histogram!(PROCESSING_TIME_NS, "node" => node.to_string()),
            depths: (0..inputs)
                .map(|slot| {
                    gauge!(QUEUE_DEPTH, "node" => node.to_string(), "slot" => slot.to_string())
                })
                .collect(),
        }
    }

    /// Record one process cycle and its duration.
    #[inline]
    pub fn record_cycle(&self, duration: Duration) {
        self.cycles.increment(1);
        self.processing_time.record(duration.as_nanos() as f64);
    }

    /// Record a failed process cycle.
    #[inline]
    pub fn record_failure(&self) {
        self.failures.increment(1);
    }

    /// Record the depth of an input slot.
    #[inline]
    pub fn record_depth(&self, slot: usize, depth: usize) {
        if let Some(gauge) = self.depths.get(slot) {
            gauge.set(depth as f64);
        }
    }

    /// Record a buffer dropped on an input slot.
    #[inline]
    pub fn record_drop(&self, slot: usize, policy: &'static str) {
        record_buffer_dropped(&self.node, slot, policy);
    }

    /// Start a timer that records a cycle when dropped.
    pub fn start_timer(&self) -> CycleTimer<'_> {
        CycleTimer {
            start: Instant::now(),
            metrics: self,
        }
    }

    /// Get the node name.
    pub fn node(&self) -> &str {
        &self.node
    }
}

/// Guard that records a process cycle when dropped.
pub struct CycleTimer<'a> {
    start: Instant,
    metrics: &'a NodeMetrics,
}

impl Drop for CycleTimer<'_> {
    fn drop(&mut self) {
        self.metrics.record_cycle(self.start.elapsed());
    }
}
