//! Fixed-capacity buffer pool with leak attribution.
//!
//! The pool pre-allocates `capacity` buffers of `buffer_size` bytes at
//! construction and hands them out on demand:
//!
//! - When exhausted, [`AcquirePolicy::Block`] waits for a release while
//!   [`AcquirePolicy::Fail`] returns [`Error::OutOfBuffers`]
//! - Release is implicit: a slot goes back to the tail of the free list when
//!   the last [`Buffer`] referencing it is dropped (FIFO reuse)
//! - Every outstanding buffer remembers the call site that acquired it and
//!   the last node that held it, see [`BufferPool::dump_info`]
//!
//! # Example
//!
//! ```rust
//! use mediagraph::memory::{AcquirePolicy, BufferPool};
//!
//! let pool = BufferPool::new("frames", 1024, 4, AcquirePolicy::Fail);
//!
//! let mut pooled = pool.acquire(5).unwrap();
//! pooled.data_mut().copy_from_slice(b"hello");
//! let buffer = pooled.into_buffer();
//! assert_eq!(pool.stats().in_use, 1);
//!
//! // Returned to the pool with the last reference
//! drop(buffer);
//! assert_eq!(pool.stats().in_use, 0);
//! ```

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::observability::{record_pool_available, record_pool_exhausted, trace_pool_leak};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

// ============================================================================
// Policy and statistics
// ============================================================================

/// What [`BufferPool::acquire`] does when every buffer is checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquirePolicy {
    /// Wait until a buffer is released.
    #[default]
    Block,
    /// Fail immediately with [`Error::OutOfBuffers`].
    Fail,
}

/// Statistics about pool usage.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total buffers in the pool.
    pub capacity: usize,
    /// Currently available buffers.
    pub available: usize,
    /// Currently checked-out buffers.
    pub in_use: usize,
    /// Total number of acquisitions.
    pub acquisitions: u64,
    /// Acquisitions that had to wait for a buffer.
    pub waits: u64,
    /// Acquisitions that found the pool empty.
    pub exhausted: u64,
}

// ============================================================================
// Shared pool state
// ============================================================================

/// Attribution of one checked-out buffer.
struct Checkout {
    location: &'static Location<'static>,
    holder: Option<String>,
    acquired_at: Instant,
}

struct PoolState {
    /// Free storage, reused from the front and returned at the back.
    free: VecDeque<(usize, Box<[u8]>)>,
    outstanding: HashMap<usize, Checkout>,
}

/// State shared by the pool and every slot it handed out.
struct PoolInner {
    name: String,
    buffer_size: usize,
    capacity: usize,
    state: Mutex<PoolState>,
    released: Condvar,
    acquisitions: AtomicU64,
    waits: AtomicU64,
    exhausted: AtomicU64,
}

impl PoolInner {
    fn release(&self, index: usize, data: Box<[u8]>) {
        let available = {
            let mut state = self.state.lock().unwrap();
            state.outstanding.remove(&index);
            state.free.push_back((index, data));
            state.free.len()
        };
        record_pool_available(&self.name, available);
        self.released.notify_all();
    }
}

// ============================================================================
// PoolSlot
// ============================================================================

/// Storage of one pool buffer.
///
/// Owned by exactly one [`PooledBuffer`] or [`Buffer`]; hands the storage
/// back to the pool when dropped. The pool's shared state outlives the
/// [`BufferPool`] handle, so storage is never freed while referenced.
pub struct PoolSlot {
    index: usize,
    data: Option<Box<[u8]>>,
    pool: Arc<PoolInner>,
}

impl PoolSlot {
    pub(crate) fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// Record the node currently holding this buffer.
    pub(crate) fn set_holder(&self, holder: &str) {
        let mut state = self.pool.state.lock().unwrap();
        if let Some(checkout) = state.outstanding.get_mut(&self.index)
            && checkout.holder.as_deref() != Some(holder)
        {
            checkout.holder = Some(holder.to_string());
        }
    }

    /// Name of the owning pool.
    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(self.index, data);
        }
    }
}

impl fmt::Debug for PoolSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSlot")
            .field("pool", &self.pool.name)
            .field("index", &self.index)
            .finish()
    }
}

// ============================================================================
// PooledBuffer
// ============================================================================

/// A writable buffer freshly acquired from a pool.
///
/// Fill it, set its metadata, then call [`into_buffer`](Self::into_buffer) to
/// share it downstream. Dropping it unconverted returns the storage at once.
pub struct PooledBuffer {
    slot: PoolSlot,
    len: usize,
    metadata: Metadata,
}

impl PooledBuffer {
    /// Get the valid bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.slot.data()[..self.len]
    }

    /// Get the valid bytes mutably.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.slot.data_mut()[..len]
    }

    /// Get the current length of valid data.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the buffer capacity (fixed pool buffer size).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slot.data().len()
    }

    /// Set the length of valid data.
    ///
    /// # Panics
    ///
    /// Panics if `len > capacity()`.
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.capacity(), "length exceeds buffer capacity");
        self.len = len;
    }

    /// Get a reference to the metadata.
    #[inline]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Get a mutable reference to the metadata.
    #[inline]
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Convert into a shareable [`Buffer`].
    ///
    /// The buffer stays accounted to the pool; its storage returns to the
    /// free list when the last clone is dropped.
    pub fn into_buffer(self) -> Buffer {
        Buffer::from_pool_slot(self.slot, self.len, self.metadata)
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("pool", &self.slot.pool.name)
            .field("index", &self.slot.index)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// One checked-out buffer in a [`PoolDump`].
#[derive(Debug, Clone)]
pub struct OutstandingBuffer {
    /// Slot index within the pool.
    pub index: usize,
    /// Source location of the `acquire` call.
    pub acquired_at: String,
    /// Last node that held the buffer, if any node did.
    pub holder: Option<String>,
    /// Time since acquisition.
    pub age: Duration,
}

/// Snapshot returned by [`BufferPool::dump_info`].
#[derive(Debug, Clone)]
pub struct PoolDump {
    /// Pool name.
    pub pool: String,
    /// Total buffers.
    pub capacity: usize,
    /// Free buffers.
    pub free: usize,
    /// Checked-out buffers, oldest first.
    pub outstanding: Vec<OutstandingBuffer>,
}

impl fmt::Display for PoolDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pool '{}': {} free, {} outstanding (capacity {})",
            self.pool,
            self.free,
            self.outstanding.len(),
            self.capacity
        )?;
        for buffer in &self.outstanding {
            write!(
                f,
                "  #{} acquired at {} ({:?} ago)",
                buffer.index, buffer.acquired_at, buffer.age
            )?;
            if let Some(holder) = &buffer.holder {
                write!(f, ", held by '{holder}'")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ============================================================================
// BufferPool
// ============================================================================

#[derive(Clone, Copy)]
enum Wait {
    Never,
    Forever,
    Until(Instant),
}

/// A bounded set of preallocated, equally sized buffers.
///
/// At most `capacity` buffers are checked out at any time. Dropping the pool
/// while buffers are still referenced does not free their storage; the leak
/// is reported through `tracing` with the same attribution as
/// [`dump_info`](Self::dump_info). Use [`shutdown`](Self::shutdown) to wait
/// for outstanding buffers and get the leak as an error instead.
pub struct BufferPool {
    inner: Arc<PoolInner>,
    policy: AcquirePolicy,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of `buffer_size` bytes.
    ///
    /// A pool with zero capacity can never hand out a buffer: every acquire
    /// fails at once, even under [`AcquirePolicy::Block`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use mediagraph::memory::{AcquirePolicy, BufferPool};
    ///
    /// // Pool for 720p YUV420 frames
    /// let frame_size = 1280 * 720 * 3 / 2;
    /// let pool = BufferPool::new("camera", frame_size, 8, AcquirePolicy::Block);
    /// assert_eq!(pool.stats().available, 8);
    /// ```
    pub fn new(name: &str, buffer_size: usize, capacity: usize, policy: AcquirePolicy) -> Arc<Self> {
        if capacity == 0 {
            tracing::warn!(pool = %name, "buffer pool created with zero capacity");
        }
        let free = (0..capacity)
            .map(|index| (index, vec![0u8; buffer_size].into_boxed_slice()))
            .collect();

        Arc::new(Self {
            inner: Arc::new(PoolInner {
                name: name.to_string(),
                buffer_size,
                capacity,
                state: Mutex::new(PoolState {
                    free,
                    outstanding: HashMap::with_capacity(capacity),
                }),
                released: Condvar::new(),
                acquisitions: AtomicU64::new(0),
                waits: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
            }),
            policy,
        })
    }

    /// Acquire a buffer with `size` valid bytes.
    ///
    /// Blocks or fails with [`Error::OutOfBuffers`] when the pool is
    /// exhausted, according to the pool's [`AcquirePolicy`].
    #[track_caller]
    pub fn acquire(&self, size: usize) -> Result<PooledBuffer> {
        let location = Location::caller();
        let wait = match self.policy {
            AcquirePolicy::Block => Wait::Forever,
            AcquirePolicy::Fail => Wait::Never,
        };
        self.checkout(size, location, wait)?
            .ok_or_else(|| Error::OutOfBuffers {
                pool: self.inner.name.clone(),
                capacity: self.inner.capacity,
            })
    }

    /// Acquire without blocking, regardless of policy.
    ///
    /// Returns `None` if the pool is exhausted or `size` is too large.
    #[track_caller]
    pub fn try_acquire(&self, size: usize) -> Option<PooledBuffer> {
        self.checkout(size, Location::caller(), Wait::Never)
            .ok()
            .flatten()
    }

    /// Acquire, waiting at most `timeout` for a release.
    ///
    /// Returns `Ok(None)` if the timeout expires first.
    #[track_caller]
    pub fn acquire_timeout(&self, size: usize, timeout: Duration) -> Result<Option<PooledBuffer>> {
        self.checkout(size, Location::caller(), Wait::Until(Instant::now() + timeout))
    }

    fn checkout(
        &self,
        size: usize,
        location: &'static Location<'static>,
        wait: Wait,
    ) -> Result<Option<PooledBuffer>> {
        if size > self.inner.buffer_size {
            return Err(Error::BufferTooLarge {
                requested: size,
                buffer_size: self.inner.buffer_size,
            });
        }

        // No release can ever arrive
        let wait = if self.inner.capacity == 0 {
            Wait::Never
        } else {
            wait
        };

        let mut state = self.inner.state.lock().unwrap();
        let mut waited = false;
        let (index, data) = loop {
            if let Some(entry) = state.free.pop_front() {
                break entry;
            }
            if !waited {
                waited = true;
                self.inner.exhausted.fetch_add(1, Ordering::Relaxed);
                record_pool_exhausted(&self.inner.name);
            }
            match wait {
                Wait::Never => return Ok(None),
                Wait::Forever => {
                    state = self.inner.released.wait(state).unwrap();
                }
                Wait::Until(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    state = self.inner.released.wait_timeout(state, remaining).unwrap().0;
                }
            }
        };

        state.outstanding.insert(
            index,
            Checkout {
                location,
                holder: None,
                acquired_at: Instant::now(),
            },
        );
        let available = state.free.len();
        drop(state);

        self.inner.acquisitions.fetch_add(1, Ordering::Relaxed);
        if waited {
            self.inner.waits.fetch_add(1, Ordering::Relaxed);
        }
        record_pool_available(&self.inner.name, available);

        Ok(Some(PooledBuffer {
            slot: PoolSlot {
                index,
                data: Some(data),
                pool: self.inner.clone(),
            },
            len: size,
            metadata: Metadata::new(),
        }))
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        let available = self.inner.state.lock().unwrap().free.len();
        PoolStats {
            capacity: self.inner.capacity,
            available,
            in_use: self.inner.capacity - available,
            acquisitions: self.inner.acquisitions.load(Ordering::Relaxed),
            waits: self.inner.waits.load(Ordering::Relaxed),
            exhausted: self.inner.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Snapshot free and outstanding buffers with their attribution.
    pub fn dump_info(&self) -> PoolDump {
        let state = self.inner.state.lock().unwrap();
        let mut outstanding: Vec<OutstandingBuffer> = state
            .outstanding
            .iter()
            .map(|(&index, checkout)| OutstandingBuffer {
                index,
                acquired_at: checkout.location.to_string(),
                holder: checkout.holder.clone(),
                age: checkout.acquired_at.elapsed(),
            })
            .collect();
        outstanding.sort_by(|a, b| b.age.cmp(&a.age).then(a.index.cmp(&b.index)));

        PoolDump {
            pool: self.inner.name.clone(),
            capacity: self.inner.capacity,
            free: state.free.len(),
            outstanding,
        }
    }

    /// Wait up to `timeout` for every buffer to come back.
    ///
    /// Fails with [`Error::ResourceLeak`] carrying the attribution dump if
    /// buffers are still referenced when the timeout expires.
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock().unwrap();
        while !state.outstanding.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                drop(state);
                let dump = self.dump_info();
                return Err(Error::ResourceLeak {
                    pool: dump.pool.clone(),
                    outstanding: dump.outstanding.len(),
                    report: dump.to_string(),
                });
            }
            state = self.inner.released.wait_timeout(state, remaining).unwrap().0;
        }
        Ok(())
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Size of every buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Total number of buffers.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// The exhaustion policy.
    pub fn policy(&self) -> AcquirePolicy {
        self.policy
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let dump = self.dump_info();
        if !dump.outstanding.is_empty() {
            trace_pool_leak(&dump.pool, dump.outstanding.len(), &dump.to_string());
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.inner.name)
            .field("buffer_size", &self.inner.buffer_size)
            .field("capacity", &self.inner.capacity)
            .field("policy", &self.policy)
            .finish()
    }
}
