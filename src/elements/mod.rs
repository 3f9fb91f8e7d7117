//! Built-in node implementations.
//!
//! ## Sources
//! - [`AppSource`]: Injects buffers from application code
//!
//! ## Sinks
//! - [`NullSink`]: Discards all buffers (useful for benchmarking)
//! - [`CollectSink`]: Keeps received buffers for inspection
//! - [`MuxingNode`](mux::MuxingNode): Records video and audio into rotating files
//!
//! ## Transforms
//! - [`Identity`]: Passes buffers unchanged, with an optional callback

mod collect;
mod identity;
pub mod mux;
mod null;
mod source;

pub use collect::{CollectHandle, CollectSink};
pub use identity::{BufferCallback, Identity};
pub use null::{NullCounter, NullSink};
pub use source::{AppSource, AppSourceHandle};
