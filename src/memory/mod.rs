//! Memory management for mediagraph.
//!
//! - [`BufferPool`]: bounded pool of preallocated, fixed-size buffers
//! - [`PooledBuffer`]: writable buffer fresh from a pool, converted into a
//!   shareable [`Buffer`](crate::buffer::Buffer) with `into_buffer`
//! - [`PoolDump`]: free/outstanding report with per-buffer attribution

mod buffer_pool;

pub use buffer_pool::{
    AcquirePolicy, BufferPool, OutstandingBuffer, PoolDump, PoolSlot, PoolStats, PooledBuffer,
};
