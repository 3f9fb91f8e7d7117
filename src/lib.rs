//! # mediagraph
//!
//! A dataflow engine for media pipelines: a graph of processing nodes that
//! exchange reference-counted buffers across configurable concurrency
//! models.
//!
//! ## Features
//!
//! - **Shared buffers**: fan-out clones the reference, never the storage
//! - **Bounded pools**: fixed-capacity buffer pools with FIFO reuse and
//!   leak attribution
//! - **Three scheduling models**: inline, queued worker, periodic worker
//! - **Backpressure policies**: block, drop oldest, drop newest
//! - **Dynamic wiring**: edges can be added and removed while data flows
//! - **Recording**: a muxing node with file rotation, manual splits and
//!   pre-record lookback
//!
//! ## Quick Start
//!
//! ```rust
//! use mediagraph::prelude::*;
//! use std::time::Duration;
//!
//! let mut graph = Graph::new();
//! let src = graph.add_node(
//!     graph.node_builder("src", AppSource::new().0).outputs(1).build(),
//! )?;
//! let (sink, collected) = CollectSink::new();
//! graph.add_node(
//!     graph
//!         .node_builder("sink", sink)
//!         .input(SlotSpec::new("in"))
//!         .model(SchedulingModel::AsyncCommon)
//!         .build(),
//! )?;
//! graph.connect("src", 0, "sink", 0)?;
//!
//! graph.start()?;
//! src.send_input(Buffer::from_vec(vec![1, 2, 3], Metadata::from_sequence(0)), 0)?;
//! assert!(collected.wait_for(1, Duration::from_secs(5)));
//! graph.stop()?;
//! # Ok::<(), mediagraph::error::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod clock;
pub mod element;
pub mod elements;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod observability;
pub mod pipeline;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::Buffer;
    pub use crate::clock::{MonotonicClock, Timestamp};
    pub use crate::element::{BackpressurePolicy, Output, Process, ProcessContext, SlotSpec, process_fn};
    pub use crate::elements::{AppSource, CollectSink, Identity, NullSink};
    pub use crate::error::{Error, Result};
    pub use crate::memory::{AcquirePolicy, BufferPool};
    pub use crate::metadata::{BufferFlags, MediaType, Metadata};
    pub use crate::pipeline::{
        Event, EventChannel, Graph, Node, NodeBuilder, NodeFactory, NodeState, SchedulingModel,
    };
}

pub use error::{Error, Result};
