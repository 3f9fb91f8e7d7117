//! Pipeline construction and execution.
//!
//! This module provides the dataflow engine:
//!
//! - [`Node`]: a stage with input/output slots, a scheduling model and a
//!   [`Process`](crate::element::Process) implementation
//! - [`SlotQueue`]: the bounded multi-slot input queue every threaded node
//!   uses, with the backpressure policies
//! - [`Graph`]: named nodes with cycle-checked wiring and ordered start/stop
//! - [`EventChannel`]: the side channel for EOS, failures and file events
//! - [`NodeFactory`]: construct nodes from a kind and a configuration string
//!
//! # Example
//!
//! ```rust
//! use mediagraph::buffer::Buffer;
//! use mediagraph::clock::Timestamp;
//! use mediagraph::metadata::{MediaType, Metadata};
//! use mediagraph::pipeline::{Graph, NodeFactory};
//! use std::time::Duration;
//!
//! let factory = NodeFactory::with_builtins();
//! let mut graph = Graph::new();
//! let src = graph.add_from_factory(&factory, "src", "app_source", "")?;
//! graph.add_from_factory(&factory, "filter", "identity", "queue=5 policy=drop-front")?;
//! graph.add_from_factory(&factory, "sink", "null_sink", "")?;
//! graph.connect("src", 0, "filter", 0)?;
//! graph.connect("filter", 0, "sink", 0)?;
//!
//! let events = graph.event_receiver();
//! graph.start()?;
//! for i in 0..10 {
//!     src.send_input(Buffer::from_vec(vec![0; 64], Metadata::from_sequence(i)), 0)?;
//! }
//! src.send_input(Buffer::eos(MediaType::Generic, Timestamp::ZERO), 0)?;
//!
//! assert!(events.wait_eos("sink", Duration::from_secs(5)));
//! graph.stop()?;
//! # Ok::<(), mediagraph::error::Error>(())
//! ```

mod config;
mod events;
mod factory;
mod graph;
mod node;
mod queue;

pub use config::{
    DEFAULT_FAILURE_THRESHOLD, EngineOptions, NodeConfig, PropertyValue, SchedulingModel,
};
pub use events::{Event, EventChannel, EventReceiver, EventSender};
pub use factory::{NodeConstructor, NodeFactory};
pub use graph::{EdgeInfo, Graph};
pub use node::{Node, NodeBuilder, NodeState, NodeStats};
pub use queue::{PushOutcome, SlotQueue, SlotStats};
