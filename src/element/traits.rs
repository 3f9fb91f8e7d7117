//! Node implementation traits.

use super::ProcessContext;
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use smallvec::SmallVec;

// ============================================================================
// Output
// ============================================================================

/// Buffers produced by one process cycle, each addressed to an output slot.
///
/// Uses SmallVec to avoid allocation for common cases (1-2 outputs).
///
/// # Example
///
/// ```rust
/// use mediagraph::buffer::Buffer;
/// use mediagraph::element::Output;
/// use mediagraph::metadata::Metadata;
///
/// let video = Buffer::from_vec(vec![0; 16], Metadata::new());
/// let thumb = Buffer::from_vec(vec![0; 4], Metadata::new());
///
/// let output = Output::single(video).and(1, thumb);
/// assert_eq!(output.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Output(SmallVec<[(usize, Buffer); 2]>);

impl Output {
    /// Create an empty output.
    #[inline]
    pub fn none() -> Self {
        Self(SmallVec::new())
    }

    /// Create an output with one buffer on slot 0.
    #[inline]
    pub fn single(buffer: Buffer) -> Self {
        Self::to(0, buffer)
    }

    /// Create an output with one buffer on `slot`.
    #[inline]
    pub fn to(slot: usize, buffer: Buffer) -> Self {
        let mut output = Self::none();
        output.push(slot, buffer);
        output
    }

    /// Add a buffer for `slot`, builder style.
    #[inline]
    pub fn and(mut self, slot: usize, buffer: Buffer) -> Self {
        self.push(slot, buffer);
        self
    }

    /// Add a buffer for `slot`.
    #[inline]
    pub fn push(&mut self, slot: usize, buffer: Buffer) {
        self.0.push((slot, buffer));
    }

    /// Check if nothing was produced.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of produced buffers.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over `(slot, buffer)` pairs.
    pub fn iter(&self) -> std::slice::Iter<'_, (usize, Buffer)> {
        self.0.iter()
    }
}

impl From<Buffer> for Output {
    fn from(buffer: Buffer) -> Self {
        Self::single(buffer)
    }
}

impl From<Option<Buffer>> for Output {
    fn from(buffer: Option<Buffer>) -> Self {
        buffer.map(Self::single).unwrap_or_default()
    }
}

impl IntoIterator for Output {
    type Item = (usize, Buffer);
    type IntoIter = smallvec::IntoIter<[(usize, Buffer); 2]>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Output {
    type Item = &'a (usize, Buffer);
    type IntoIter = std::slice::Iter<'a, (usize, Buffer)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ============================================================================
// Process
// ============================================================================

/// The capability interface every node implementation provides.
///
/// `process` is called with one entry per input slot. Under the queued
/// models an entry is the next buffer of that slot; under the periodic model
/// it is the most recent buffer seen. Any entry may be `None`: a slot whose
/// upstream has not delivered this cycle, an unwired slot, or a slot that
/// has reached end-of-stream. End-of-stream sentinels are consumed by the
/// engine and never appear in `inputs`; [`flush`](Self::flush) is called
/// instead once every input has ended.
///
/// Sources have no inputs and receive an empty slice when driven by a
/// periodic schedule.
pub trait Process: Send + 'static {
    /// Consume one cycle of inputs and produce outputs.
    ///
    /// An error counts as a process failure: no output is produced this
    /// cycle and the node keeps running.
    fn process(&mut self, inputs: &[Option<Buffer>], ctx: &mut ProcessContext) -> Result<Output>;

    /// Called once when the node starts, before any `process` call.
    fn start(&mut self, _ctx: &mut ProcessContext) -> Result<()> {
        Ok(())
    }

    /// Called once after the node has drained and its worker has exited.
    fn stop(&mut self, _ctx: &mut ProcessContext) -> Result<()> {
        Ok(())
    }

    /// Called once when every input slot has reached end-of-stream.
    ///
    /// Returned buffers are emitted before the engine forwards EOS.
    fn flush(&mut self, _ctx: &mut ProcessContext) -> Result<Output> {
        Ok(Output::none())
    }

    /// Apply a runtime control, e.g. `record=start`.
    fn control(&mut self, key: &str, value: &str, _ctx: &mut ProcessContext) -> Result<()> {
        Err(Error::Config(format!(
            "{} does not support control '{key}={value}'",
            self.name()
        )))
    }

    /// Get the name of this implementation (for debugging/logging).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl Process for Box<dyn Process> {
    fn process(&mut self, inputs: &[Option<Buffer>], ctx: &mut ProcessContext) -> Result<Output> {
        (**self).process(inputs, ctx)
    }

    fn start(&mut self, ctx: &mut ProcessContext) -> Result<()> {
        (**self).start(ctx)
    }

    fn stop(&mut self, ctx: &mut ProcessContext) -> Result<()> {
        (**self).stop(ctx)
    }

    fn flush(&mut self, ctx: &mut ProcessContext) -> Result<Output> {
        (**self).flush(ctx)
    }

    fn control(&mut self, key: &str, value: &str, ctx: &mut ProcessContext) -> Result<()> {
        (**self).control(key, value, ctx)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Adapter turning a closure into a [`Process`].
///
/// Created with [`process_fn`].
pub struct FnProcess<F> {
    name: String,
    func: F,
}

/// Wrap a closure as a node implementation.
///
/// # Example
///
/// ```rust
/// use mediagraph::element::{Output, process_fn};
///
/// // Forward the first input unchanged
/// let forward = process_fn("forward", |inputs, _ctx| {
///     Ok(Output::from(inputs[0].clone()))
/// });
/// ```
pub fn process_fn<F>(name: impl Into<String>, func: F) -> FnProcess<F>
where
    F: FnMut(&[Option<Buffer>], &mut ProcessContext) -> Result<Output> + Send + 'static,
{
    FnProcess {
        name: name.into(),
        func,
    }
}

impl<F> Process for FnProcess<F>
where
    F: FnMut(&[Option<Buffer>], &mut ProcessContext) -> Result<Output> + Send + 'static,
{
    fn process(&mut self, inputs: &[Option<Buffer>], ctx: &mut ProcessContext) -> Result<Output> {
        (self.func)(inputs, ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
