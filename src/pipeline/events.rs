//! Event side channel.
//!
//! Events travel independently of buffers: end-of-stream at sinks, process
//! failures, muxer file boundaries and write errors, and custom application
//! events. The channel is an unbounded MPMC queue with blocking receive, so
//! posting an event never stalls the data path.

use super::NodeState;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Events emitted by nodes while the graph runs.
#[derive(Debug, Clone)]
pub enum Event {
    /// A node changed lifecycle state.
    StateChanged {
        /// Node name.
        node: String,
        /// Previous state.
        from: NodeState,
        /// New state.
        to: NodeState,
    },

    /// End of stream reached a sink.
    Eos {
        /// The sink that finished.
        node: String,
    },

    /// A runtime error that is not tied to a single process cycle.
    Error {
        /// The node where the error occurred (if known).
        node: Option<String>,
        /// The error message.
        message: String,
    },

    /// A node's process function keeps failing.
    ///
    /// Posted every time the consecutive failure count reaches a multiple of
    /// the node's failure threshold.
    ProcessFailure {
        /// The failing node.
        node: String,
        /// Consecutive failures so far.
        consecutive: u64,
        /// Message of the latest failure.
        message: String,
    },

    /// A muxer opened a new file.
    FileBegin {
        /// The muxing node.
        node: String,
        /// Path of the new file.
        path: PathBuf,
    },

    /// A muxer finalized a file.
    FileEnd {
        /// The muxing node.
        node: String,
        /// Path of the finished file.
        path: PathBuf,
        /// Stream time covered by the file.
        duration: Duration,
        /// Number of media records written.
        records: u64,
    },

    /// A muxer failed to write and aborted its file.
    StreamError {
        /// The muxing node.
        node: String,
        /// The file that was being written, if one was open.
        path: Option<PathBuf>,
        /// The error message.
        message: String,
    },

    /// Custom application event.
    Custom {
        /// The posting node.
        node: String,
        /// Event name.
        name: String,
        /// Event payload.
        payload: String,
    },
}

impl Event {
    /// Node the event originates from, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            Event::StateChanged { node, .. }
            | Event::Eos { node }
            | Event::ProcessFailure { node, .. }
            | Event::FileBegin { node, .. }
            | Event::FileEnd { node, .. }
            | Event::StreamError { node, .. }
            | Event::Custom { node, .. } => Some(node),
            Event::Error { node, .. } => node.as_deref(),
        }
    }

    /// Check if this is an end-of-stream event for `node`.
    pub fn is_eos_of(&self, node: &str) -> bool {
        matches!(self, Event::Eos { node: n } if n == node)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::StateChanged { node, from, to } => {
                write!(f, "{node}: {from} -> {to}")
            }
            Event::Eos { node } => write!(f, "EOS at {node}"),
            Event::Error { node, message } => {
                if let Some(n) = node {
                    write!(f, "Error in {n}: {message}")
                } else {
                    write!(f, "Error: {message}")
                }
            }
            Event::ProcessFailure {
                node,
                consecutive,
                message,
            } => write!(f, "{node} failed {consecutive} times in a row: {message}"),
            Event::FileBegin { node, path } => {
                write!(f, "{node} opened {}", path.display())
            }
            Event::FileEnd {
                node,
                path,
                duration,
                records,
            } => write!(
                f,
                "{node} closed {} ({records} records, {duration:?})",
                path.display()
            ),
            Event::StreamError {
                node,
                path,
                message,
            } => match path {
                Some(p) => write!(f, "{node} failed writing {}: {message}", p.display()),
                None => write!(f, "{node} stream error: {message}"),
            },
            Event::Custom {
                node,
                name,
                payload,
            } => write!(f, "{node} custom event '{name}' ({payload})"),
        }
    }
}

// ============================================================================
// Channel
// ============================================================================

/// An event queue with its sending and receiving ends.
///
/// # Example
///
/// ```rust
/// use mediagraph::pipeline::{Event, EventChannel};
/// use std::time::Duration;
///
/// let channel = EventChannel::new();
/// channel.sender().send(Event::Eos { node: "sink".into() });
///
/// let event = channel.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
/// assert!(event.is_eos_of("sink"));
/// ```
#[derive(Clone)]
pub struct EventChannel {
    sender: EventSender,
    receiver: EventReceiver,
}

impl EventChannel {
    /// Create a new unbounded event channel.
    pub fn new() -> Self {
        let (sender, receiver) = kanal::unbounded();
        Self {
            sender: EventSender { sender },
            receiver: EventReceiver { receiver },
        }
    }

    /// Get a sending end.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Get a receiving end.
    ///
    /// Receivers share one queue: each event is delivered to exactly one of
    /// them.
    pub fn receiver(&self) -> EventReceiver {
        self.receiver.clone()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending end of an [`EventChannel`].
#[derive(Clone)]
pub struct EventSender {
    sender: kanal::Sender<Event>,
}

impl EventSender {
    /// Send an event.
    ///
    /// Never blocks. Events sent after every receiver is gone are dropped.
    pub fn send(&self, event: Event) {
        tracing::trace!(event = %event, "event posted");
        let _ = self.sender.send(event);
    }

    /// Send an error event.
    pub fn send_error(&self, node: Option<&str>, message: impl Into<String>) {
        self.send(Event::Error {
            node: node.map(str::to_string),
            message: message.into(),
        });
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender").finish_non_exhaustive()
    }
}

/// Receiving end of an [`EventChannel`].
#[derive(Clone)]
pub struct EventReceiver {
    receiver: kanal::Receiver<Event>,
}

impl EventReceiver {
    /// Block until the next event.
    ///
    /// Returns `None` once every sender is gone.
    pub fn recv(&self) -> Option<Event> {
        self.receiver.recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&self) -> Option<Event> {
        self.receiver.try_recv().ok().flatten()
    }

    /// Wait up to `timeout` for an event matching `predicate`.
    ///
    /// Non-matching events received meanwhile are consumed and discarded.
    pub fn wait_for<F>(&self, mut predicate: F, timeout: Duration) -> Option<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let event = self.recv_timeout(remaining)?;
            if predicate(&event) {
                return Some(event);
            }
        }
    }

    /// Wait up to `timeout` for end-of-stream at `node`.
    pub fn wait_eos(&self, node: &str, timeout: Duration) -> bool {
        self.wait_for(|event| event.is_eos_of(node), timeout)
            .is_some()
    }

    /// Take every event currently queued.
    pub fn drain(&self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if no event is queued.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReceiver")
            .field("queued", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_event_send_recv() {
        let channel = EventChannel::new();
        let receiver = channel.receiver();

        channel.sender().send(Event::Eos {
            node: "sink".into(),
        });

        let event = receiver.recv().unwrap();
        assert!(event.is_eos_of("sink"));
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_recv_timeout_expires() {
        let channel = EventChannel::new();
        let start = Instant::now();
        assert!(
            channel
                .receiver()
                .recv_timeout(Duration::from_millis(20))
                .is_none()
        );
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_wait_for_skips_other_events() {
        let channel = EventChannel::new();
        let sender = channel.sender();

        let producer = thread::spawn(move || {
            sender.send_error(Some("enc"), "glitch");
            sender.send(Event::Custom {
                node: "enc".into(),
                name: "tick".into(),
                payload: String::new(),
            });
            sender.send(Event::Eos {
                node: "mux".into(),
            });
        });

        let receiver = channel.receiver();
        assert!(receiver.wait_eos("mux", Duration::from_secs(1)));
        producer.join().unwrap();
        assert!(receiver.is_empty());
    }

    #[test]
    fn test_drain() {
        let channel = EventChannel::new();
        for i in 0..3 {
            channel.sender().send(Event::Custom {
                node: "src".into(),
                name: format!("e{i}"),
                payload: String::new(),
            });
        }
        let events = channel.receiver().drain();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].node(), Some("src"));
    }

    #[test]
    fn test_event_display() {
        let event = Event::Error {
            node: Some("node1".into()),
            message: "test error".into(),
        };
        assert_eq!(event.to_string(), "Error in node1: test error");

        let event = Event::StateChanged {
            node: "enc".into(),
            from: NodeState::Running,
            to: NodeState::Draining,
        };
        assert_eq!(event.to_string(), "enc: running -> draining");
    }
}
