//! NullSink: discards buffers and counts them.

use crate::buffer::Buffer;
use crate::element::{Output, Process, ProcessContext};
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A sink that discards all buffers.
///
/// This is useful for:
/// - Benchmarking pipeline throughput
/// - Terminating a branch that nobody consumes
/// - Counting what reaches the end of a chain
///
/// # Example
///
/// ```rust
/// use mediagraph::buffer::Buffer;
/// use mediagraph::element::{Process, ProcessContext};
/// use mediagraph::elements::NullSink;
/// use mediagraph::metadata::Metadata;
///
/// let mut sink = NullSink::new();
/// let counter = sink.counter();
/// let mut ctx = ProcessContext::new("sink", None);
///
/// let buffer = Buffer::from_vec(vec![0; 8], Metadata::from_sequence(0));
/// sink.process(&[Some(buffer)], &mut ctx).unwrap();
///
/// assert_eq!(counter.count(), 1);
/// ```
pub struct NullSink {
    name: String,
    counter: NullCounter,
}

/// Shared view of a [`NullSink`]'s counters.
#[derive(Clone, Default)]
pub struct NullCounter {
    buffers: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
}

impl NullCounter {
    /// Buffers consumed.
    pub fn count(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }

    /// Payload bytes consumed.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl NullSink {
    /// Create a new NullSink.
    pub fn new() -> Self {
        Self::with_name("null_sink")
    }

    /// Create a new NullSink with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counter: NullCounter::default(),
        }
    }

    /// Get a handle to the counters.
    pub fn counter(&self) -> NullCounter {
        self.counter.clone()
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Process for NullSink {
    fn process(&mut self, inputs: &[Option<Buffer>], _ctx: &mut ProcessContext) -> Result<Output> {
        for buffer in inputs.iter().flatten() {
            self.counter.buffers.fetch_add(1, Ordering::Relaxed);
            self.counter
                .bytes
                .fetch_add(buffer.len() as u64, Ordering::Relaxed);
        }
        Ok(Output::none())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
