//! Node implementation interface.
//!
//! - [`Process`]: the capability interface (`process`, `start`, `stop`,
//!   `flush`, `control`) every node implementation provides
//! - [`Output`]: buffers produced by a cycle, addressed by output slot
//! - [`ProcessContext`]: node identity and event channel access
//! - [`SlotSpec`] / [`BackpressurePolicy`]: input slot description
//!
//! # Design
//!
//! Implementations are plain synchronous code. The pipeline decides which
//! thread runs them and when: inline on the caller, on a dedicated worker
//! whenever every wired input has a buffer, or on a fixed tick. This keeps
//! implementations simple while the engine owns queuing and backpressure.
//!
//! # Example
//!
//! ```rust
//! use mediagraph::buffer::Buffer;
//! use mediagraph::element::{Output, Process, ProcessContext};
//! use mediagraph::error::Result;
//!
//! /// Drops every other buffer.
//! struct Decimate {
//!     keep: bool,
//! }
//!
//! impl Process for Decimate {
//!     fn process(&mut self, inputs: &[Option<Buffer>], _ctx: &mut ProcessContext) -> Result<Output> {
//!         self.keep = !self.keep;
//!         match (&inputs[0], self.keep) {
//!             (Some(buffer), true) => Ok(Output::single(buffer.clone())),
//!             _ => Ok(Output::none()),
//!         }
//!     }
//! }
//! ```

mod context;
mod slot;
mod traits;

pub use context::ProcessContext;
pub use slot::{BackpressurePolicy, DEFAULT_QUEUE_CAPACITY, SlotDirection, SlotSpec};
pub use traits::{FnProcess, Output, Process, process_fn};
