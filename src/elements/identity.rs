//! Identity element with an inspection callback.
//!
//! Forwards input slot `i` to output slot `i` unchanged.

use crate::buffer::Buffer;
use crate::element::{Output, Process, ProcessContext};
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callback type for buffer inspection.
pub type BufferCallback = Box<dyn Fn(usize, &Buffer) + Send + Sync>;

/// A pass-through element that optionally inspects every buffer.
///
/// # Example
///
/// ```rust
/// use mediagraph::elements::Identity;
///
/// let identity = Identity::new().on_buffer(|slot, buf| {
///     println!("slot {slot}: seq={}, len={}", buf.metadata().sequence, buf.len());
/// });
/// assert_eq!(identity.count(), 0);
/// ```
pub struct Identity {
    name: String,
    callback: Option<BufferCallback>,
    count: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
}

impl Identity {
    /// Create a new identity element.
    pub fn new() -> Self {
        Self {
            name: "identity".to_string(),
            callback: None,
            count: Arc::new(AtomicU64::new(0)),
            bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Set a custom name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Call `callback` for every forwarded buffer.
    pub fn on_buffer<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, &Buffer) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Buffers forwarded so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Payload bytes forwarded so far.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Shared counter of forwarded buffers, readable after the element has
    /// moved into a node.
    pub fn counter(&self) -> Arc<AtomicU64> {
        self.count.clone()
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl Process for Identity {
    fn process(&mut self, inputs: &[Option<Buffer>], _ctx: &mut ProcessContext) -> Result<Output> {
        let mut output = Output::none();
        for (slot, buffer) in inputs.iter().enumerate() {
            if let Some(buffer) = buffer {
                if let Some(callback) = &self.callback {
                    callback(slot, buffer);
                }
                self.count.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);
                output.push(slot, buffer.clone());
            }
        }
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use std::sync::Mutex;

    #[test]
    fn test_identity_forwards_per_slot() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let mut identity = Identity::new().on_buffer(move |slot, buf| {
            log.lock().unwrap().push((slot, buf.metadata().sequence));
        });
        let mut ctx = ProcessContext::new("id", None);

        let a = Buffer::from_vec(vec![1, 2, 3], Metadata::from_sequence(1));
        let b = Buffer::from_vec(vec![4], Metadata::from_sequence(2));
        let out = identity
            .process(&[Some(a.clone()), None, Some(b)], &mut ctx)
            .unwrap();

        let slots: Vec<usize> = out.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(slots, vec![0, 2]);
        // Forwarding shares the storage
        assert!(out.iter().next().unwrap().1.ptr_eq(&a));
        assert_eq!(*seen.lock().unwrap(), vec![(0, 1), (2, 2)]);
        assert_eq!(identity.count(), 2);
        assert_eq!(identity.bytes(), 4);
    }
}
