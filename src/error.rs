//! Error types for mediagraph.
//!
//! Construction and wiring problems are returned synchronously. Data-path
//! failures (a node's process function failing, a muxer losing its file)
//! travel over the [`EventChannel`](crate::pipeline::EventChannel) instead,
//! so they never block the buffers behind them.

use crate::element::SlotDirection;
use crate::pipeline::NodeState;
use thiserror::Error;

/// Result type alias using mediagraph's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mediagraph operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid node or graph configuration (bad option, incompatible
    /// scheduling model, duplicate name, cycle).
    #[error("configuration error: {0}")]
    Config(String),

    /// A slot index that does not exist on the node.
    #[error("invalid {direction} slot {index} on node '{node}' ({count} available)")]
    InvalidSlot {
        /// Node the slot was looked up on.
        node: String,
        /// Input or output side.
        direction: SlotDirection,
        /// Requested index.
        index: usize,
        /// Number of slots the node actually has.
        count: usize,
    },

    /// Buffer pool is exhausted and its policy does not block.
    #[error("buffer pool '{pool}' exhausted: all {capacity} buffers are outstanding")]
    OutOfBuffers {
        /// Pool name.
        pool: String,
        /// Pool capacity.
        capacity: usize,
    },

    /// A pool acquisition asked for more bytes than a pool buffer holds.
    #[error("requested {requested} bytes but pool buffers hold {buffer_size}")]
    BufferTooLarge {
        /// Requested size in bytes.
        requested: usize,
        /// Fixed buffer size of the pool.
        buffer_size: usize,
    },

    /// Operation needs a running node.
    #[error("node '{node}' is not running (state: {state})")]
    NotRunning {
        /// Node name.
        node: String,
        /// State the node was in.
        state: NodeState,
    },

    /// Lifecycle operation not allowed in the current state.
    #[error("invalid state for node '{node}': {message}")]
    InvalidState {
        /// Node name.
        node: String,
        /// What went wrong.
        message: String,
    },

    /// A node's process function failed.
    #[error("process failure in node '{node}': {message}")]
    Process {
        /// Node name.
        node: String,
        /// Failure description.
        message: String,
    },

    /// Generic failure raised by a node implementation.
    #[error("element error: {0}")]
    Element(String),

    /// Recording was disabled by an earlier write failure.
    #[error("recording is disabled after a write failure; resume writing first")]
    WritingDisabled,

    /// A buffer pool was shut down while buffers were still referenced.
    #[error("buffer pool '{pool}' still has {outstanding} outstanding buffers:\n{report}")]
    ResourceLeak {
        /// Pool name.
        pool: String,
        /// Number of buffers still checked out.
        outstanding: usize,
        /// Attribution dump of the outstanding buffers.
        report: String,
    },

    /// No node with that name exists in the graph.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error was raised while constructing or wiring the graph.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::InvalidSlot { .. } | Error::NodeNotFound(_)
        )
    }
}
