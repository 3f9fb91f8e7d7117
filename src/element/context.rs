//! Process runtime context.
//!
//! The context gives a node implementation access to its identity and the
//! event side channel while it runs.

use crate::pipeline::{Event, EventSender};

/// Runtime context for a node's process function.
///
/// One context lives alongside each node's implementation and is passed to
/// every [`Process`](super::Process) callback.
#[derive(Clone)]
pub struct ProcessContext {
    /// Name of the node.
    node: String,
    /// Event channel, if the node is attached to one.
    events: Option<EventSender>,
    /// Number of completed process cycles.
    cycle: u64,
}

impl ProcessContext {
    /// Create a new context.
    pub fn new(node: impl Into<String>, events: Option<EventSender>) -> Self {
        Self {
            node: node.into(),
            events,
            cycle: 0,
        }
    }

    /// Get the node's name.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Number of process cycles completed before the current one.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub(crate) fn advance_cycle(&mut self) {
        self.cycle += 1;
    }

    /// Get the event sender, if one is configured.
    pub fn events(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }

    /// Post an event on the node's event channel.
    ///
    /// Dropped silently when the node has no channel.
    pub fn post(&self, event: Event) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    /// Post a [`Event::Custom`] tagged with this node's name.
    pub fn post_custom(&self, name: impl Into<String>, payload: impl Into<String>) {
        self.post(Event::Custom {
            node: self.node.clone(),
            name: name.into(),
            payload: payload.into(),
        });
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("node", &self.node)
            .field("has_events", &self.events.is_some())
            .field("cycle", &self.cycle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::EventChannel;
    use std::time::Duration;

    #[test]
    fn test_context_creation() {
        let ctx = ProcessContext::new("enc", None);
        assert_eq!(ctx.node(), "enc");
        assert_eq!(ctx.cycle(), 0);
        assert!(ctx.events().is_none());
        // Posting without a channel is a no-op
        ctx.post_custom("ignored", "");
    }

    #[test]
    fn test_post_custom() {
        let channel = EventChannel::new();
        let mut ctx = ProcessContext::new("detector", Some(channel.sender()));
        ctx.advance_cycle();
        ctx.post_custom("motion", "zone=3");

        let event = channel
            .receiver()
            .recv_timeout(Duration::from_millis(100))
            .unwrap();
        match event {
            Event::Custom {
                node,
                name,
                payload,
            } => {
                assert_eq!(node, "detector");
                assert_eq!(name, "motion");
                assert_eq!(payload, "zone=3");
            }
            other => panic!("unexpected event {other}"),
        }
        assert_eq!(ctx.cycle(), 1);
    }
}
