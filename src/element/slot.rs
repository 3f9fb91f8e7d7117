//! Slot abstraction for node inputs and outputs.
//!
//! Slots are the connection points of nodes. Each node has an ordered list of
//! input and output slots; edges connect an output slot of one node to an
//! input slot of another. Every input slot owns a bounded queue whose
//! overflow behaviour is chosen by its [`BackpressurePolicy`].

use crate::error::{Error, Result};
use crate::metadata::MediaType;
use std::fmt;
use std::str::FromStr;

/// Default capacity of an input slot queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Direction of a slot (input or output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotDirection {
    /// An input slot (receives buffers from upstream).
    Input,
    /// An output slot (sends buffers downstream).
    Output,
}

impl fmt::Display for SlotDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlotDirection::Input => "input",
            SlotDirection::Output => "output",
        })
    }
}

/// What happens when a buffer arrives at a full input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackpressurePolicy {
    /// The producer waits for room.
    #[default]
    Blocking,
    /// The oldest queued buffer is discarded.
    DropFront,
    /// The arriving buffer is discarded.
    DropCurrent,
}

impl BackpressurePolicy {
    /// Configuration name of the policy.
    pub fn name(&self) -> &'static str {
        match self {
            BackpressurePolicy::Blocking => "blocking",
            BackpressurePolicy::DropFront => "drop-front",
            BackpressurePolicy::DropCurrent => "drop-current",
        }
    }
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackpressurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "blocking" | "block" => Ok(BackpressurePolicy::Blocking),
            "drop-front" | "drop-oldest" => Ok(BackpressurePolicy::DropFront),
            "drop-current" | "drop-newest" => Ok(BackpressurePolicy::DropCurrent),
            other => Err(Error::Config(format!("unknown backpressure policy '{other}'"))),
        }
    }
}

/// Description of one input slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    /// Slot name, used in logs and DOT output.
    pub name: String,
    /// Logical stream carried by the slot.
    pub media_type: MediaType,
    /// Queue capacity.
    pub capacity: usize,
    /// Overflow policy.
    pub policy: BackpressurePolicy,
}

impl SlotSpec {
    /// Create a slot with default capacity and blocking policy.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            media_type: MediaType::Generic,
            capacity: DEFAULT_QUEUE_CAPACITY,
            policy: BackpressurePolicy::Blocking,
        }
    }

    /// Set the media type.
    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    /// Set the queue capacity (at least one).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set the overflow policy.
    pub fn with_policy(mut self, policy: BackpressurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "drop-front".parse::<BackpressurePolicy>().unwrap(),
            BackpressurePolicy::DropFront
        );
        assert_eq!(
            "DROP_CURRENT".parse::<BackpressurePolicy>().unwrap(),
            BackpressurePolicy::DropCurrent
        );
        assert_eq!(
            "blocking".parse::<BackpressurePolicy>().unwrap(),
            BackpressurePolicy::Blocking
        );
        assert!("sometimes".parse::<BackpressurePolicy>().is_err());
    }

    #[test]
    fn test_policy_name_round_trips() {
        for policy in [
            BackpressurePolicy::Blocking,
            BackpressurePolicy::DropFront,
            BackpressurePolicy::DropCurrent,
        ] {
            assert_eq!(policy.name().parse::<BackpressurePolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn test_slot_spec_builder() {
        let spec = SlotSpec::new("video")
            .with_media_type(MediaType::Video)
            .with_capacity(0)
            .with_policy(BackpressurePolicy::DropFront);
        assert_eq!(spec.capacity, 1);
        assert_eq!(spec.media_type, MediaType::Video);
        assert_eq!(spec.policy, BackpressurePolicy::DropFront);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(SlotDirection::Input.to_string(), "input");
        assert_eq!(SlotDirection::Output.to_string(), "output");
    }
}
