//! CollectSink: keeps every buffer it receives for the application.

use crate::buffer::Buffer;
use crate::element::{Output, Process, ProcessContext};
use crate::error::Result;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct Shared {
    received: Mutex<Vec<(usize, Buffer)>>,
    arrived: Condvar,
}

/// A sink that stores received buffers, tagged with their input slot.
///
/// An optional per-cycle delay turns it into a slow consumer, which is how
/// backpressure behaviour is exercised.
///
/// # Example
///
/// ```rust
/// use mediagraph::elements::CollectSink;
/// use std::time::Duration;
///
/// let (sink, handle) = CollectSink::new();
/// let sink = sink.with_delay(Duration::from_millis(5));
/// assert!(handle.is_empty());
/// # drop(sink);
/// ```
pub struct CollectSink {
    name: String,
    shared: Arc<Shared>,
    delay: Option<Duration>,
}

/// Read side of a [`CollectSink`].
#[derive(Clone)]
pub struct CollectHandle {
    shared: Arc<Shared>,
}

impl CollectSink {
    /// Create a sink and the handle that reads it.
    pub fn new() -> (Self, CollectHandle) {
        let shared = Arc::new(Shared {
            received: Mutex::new(Vec::new()),
            arrived: Condvar::new(),
        });
        let sink = Self {
            name: "collect".to_string(),
            shared: shared.clone(),
            delay: None,
        };
        (sink, CollectHandle { shared })
    }

    /// Sleep this long in every cycle.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set a custom name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Process for CollectSink {
    fn process(&mut self, inputs: &[Option<Buffer>], _ctx: &mut ProcessContext) -> Result<Output> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let mut received = self.shared.received.lock().unwrap();
        for (slot, buffer) in inputs.iter().enumerate() {
            if let Some(buffer) = buffer {
                received.push((slot, buffer.clone()));
            }
        }
        self.shared.arrived.notify_all();
        Ok(Output::none())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl CollectHandle {
    /// Number of buffers received.
    pub fn len(&self) -> usize {
        self.shared.received.lock().unwrap().len()
    }

    /// Check if nothing was received.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of every received buffer, in arrival order.
    pub fn buffers(&self) -> Vec<Buffer> {
        self.shared
            .received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, buffer)| buffer.clone())
            .collect()
    }

    /// Received buffers of one input slot.
    pub fn buffers_on(&self, slot: usize) -> Vec<Buffer> {
        self.shared
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == slot)
            .map(|(_, buffer)| buffer.clone())
            .collect()
    }

    /// Sequence numbers of every received buffer, in arrival order.
    pub fn sequences(&self) -> Vec<u64> {
        self.shared
            .received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, buffer)| buffer.metadata().sequence)
            .collect()
    }

    /// Drop everything received so far.
    pub fn clear(&self) {
        self.shared.received.lock().unwrap().clear();
    }

    /// Wait until at least `count` buffers arrived.
    ///
    /// Returns `false` on timeout.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut received = self.shared.received.lock().unwrap();
        while received.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            received = self.shared.arrived.wait_timeout(received, remaining).unwrap().0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;

    #[test]
    fn test_collect_and_wait() {
        let (mut sink, handle) = CollectSink::new();
        let waiter = {
            let handle = handle.clone();
            std::thread::spawn(move || handle.wait_for(2, Duration::from_secs(1)))
        };

        let mut ctx = ProcessContext::new("collect", None);
        let a = Buffer::from_vec(vec![1], Metadata::from_sequence(10));
        let b = Buffer::from_vec(vec![2], Metadata::from_sequence(11));
        sink.process(&[Some(a), Some(b)], &mut ctx).unwrap();

        assert!(waiter.join().unwrap());
        assert_eq!(handle.sequences(), vec![10, 11]);
        assert_eq!(handle.buffers_on(1).len(), 1);
        assert!(!handle.wait_for(3, Duration::from_millis(10)));
    }
}
