//! AppSource element for injecting data from application code.
//!
//! A source node has no inputs, so the usual way to feed it is
//! [`Node::send_input`](crate::pipeline::Node::send_input), which emits the
//! buffer downstream on the caller's thread. When the node runs under the
//! periodic model, buffers pushed through an [`AppSourceHandle`] are
//! released on the next tick instead, which paces a bursty producer to the
//! node's interval.

use crate::buffer::Buffer;
use crate::clock::Timestamp;
use crate::element::{Output, Process, ProcessContext};
use crate::error::Result;
use crate::metadata::MediaType;

/// A producer driven by application code.
///
/// # Example
///
/// ```rust
/// use mediagraph::buffer::Buffer;
/// use mediagraph::elements::AppSource;
/// use mediagraph::metadata::Metadata;
///
/// let (source, handle) = AppSource::new();
/// handle.push(Buffer::from_vec(vec![1, 2, 3], Metadata::from_sequence(0)));
/// handle.end_stream();
/// assert_eq!(handle.pending(), 2);
/// # drop(source);
/// ```
pub struct AppSource {
    name: String,
    receiver: kanal::Receiver<(usize, Buffer)>,
    produced: u64,
}

/// Handle for pushing data into an [`AppSource`].
///
/// This handle can be cloned and sent to other threads.
#[derive(Clone)]
pub struct AppSourceHandle {
    sender: kanal::Sender<(usize, Buffer)>,
}

impl AppSource {
    /// Create a source and its handle.
    pub fn new() -> (Self, AppSourceHandle) {
        let (sender, receiver) = kanal::unbounded();
        let source = Self {
            name: "app_source".to_string(),
            receiver,
            produced: 0,
        };
        (source, AppSourceHandle { sender })
    }

    /// Set a custom name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Buffers released so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl Process for AppSource {
    fn process(&mut self, _inputs: &[Option<Buffer>], _ctx: &mut ProcessContext) -> Result<Output> {
        let mut output = Output::none();
        while let Ok(Some((slot, buffer))) = self.receiver.try_recv() {
            output.push(slot, buffer);
        }
        self.produced += output.len() as u64;
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl AppSourceHandle {
    /// Queue a buffer for output slot 0.
    pub fn push(&self, buffer: Buffer) {
        self.push_to(0, buffer);
    }

    /// Queue a buffer for `slot`.
    pub fn push_to(&self, slot: usize, buffer: Buffer) {
        if self.sender.send((slot, buffer)).is_err() {
            tracing::debug!(slot = slot, "app source gone, buffer discarded");
        }
    }

    /// Queue an end-of-stream sentinel on slot 0.
    pub fn end_stream(&self) {
        self.push(Buffer::eos(MediaType::Generic, Timestamp::ZERO));
    }

    /// Buffers waiting for the next tick.
    pub fn pending(&self) -> usize {
        self.sender.len()
    }
}
