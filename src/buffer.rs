//! Reference-counted media buffers.

use crate::clock::Timestamp;
use crate::memory::PoolSlot;
use crate::metadata::{BufferFlags, MediaType, Metadata};
use std::sync::Arc;

/// Backing storage of a buffer.
enum Storage {
    /// Heap allocation, freed with the last reference.
    Heap(Box<[u8]>),
    /// Slot of a [`BufferPool`](crate::memory::BufferPool), returned to the
    /// pool's free list with the last reference.
    Pooled(PoolSlot),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Heap(data) => data,
            Storage::Pooled(slot) => slot.data(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Storage::Heap(data) => data,
            Storage::Pooled(slot) => slot.data_mut(),
        }
    }
}

struct BufferInner {
    storage: Storage,
    len: usize,
    metadata: Metadata,
}

/// A reference-counted chunk of media data with metadata.
///
/// Buffers are cheap to clone: only the reference count is incremented, the
/// data is never copied. Once a buffer is shared it is immutable; the
/// `try_*_mut` accessors only succeed while the caller holds the single
/// reference. Fan-out therefore duplicates references, never storage.
///
/// # Example
///
/// ```rust
/// use mediagraph::buffer::Buffer;
/// use mediagraph::metadata::Metadata;
///
/// let buffer = Buffer::from_vec(vec![1, 2, 3], Metadata::from_sequence(0));
///
/// // Clone is O(1) - just an Arc increment
/// let shared = buffer.clone();
/// assert_eq!(buffer.ref_count(), 2);
/// assert!(buffer.ptr_eq(&shared));
/// ```
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    /// Create a heap-backed buffer owning `data`.
    pub fn from_vec(data: Vec<u8>, metadata: Metadata) -> Self {
        let len = data.len();
        Self::with_storage(Storage::Heap(data.into_boxed_slice()), len, metadata)
    }

    /// Create a heap-backed buffer by copying `data`.
    pub fn from_bytes(data: &[u8], metadata: Metadata) -> Self {
        Self::from_vec(data.to_vec(), metadata)
    }

    /// Create a zero-size buffer carrying only metadata.
    pub fn empty(metadata: Metadata) -> Self {
        Self::from_vec(Vec::new(), metadata)
    }

    /// Create the end-of-stream sentinel for a stream.
    pub fn eos(media_type: MediaType, pts: Timestamp) -> Self {
        Self::empty(
            Metadata::of(media_type)
                .with_pts(pts)
                .with_flags(BufferFlags::EOS),
        )
    }

    pub(crate) fn from_pool_slot(slot: PoolSlot, len: usize, metadata: Metadata) -> Self {
        Self::with_storage(Storage::Pooled(slot), len, metadata)
    }

    fn with_storage(storage: Storage, len: usize, metadata: Metadata) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                storage,
                len,
                metadata,
            }),
        }
    }

    /// Get a reference to the buffer's metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    /// Get mutable metadata, only while this is the sole reference.
    pub fn try_metadata_mut(&mut self) -> Option<&mut Metadata> {
        Arc::get_mut(&mut self.inner).map(|inner| &mut inner.metadata)
    }

    /// Get the valid bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner.storage.as_slice()[..self.inner.len]
    }

    /// Get the valid bytes mutably, only while this is the sole reference.
    pub fn try_data_mut(&mut self) -> Option<&mut [u8]> {
        Arc::get_mut(&mut self.inner).map(|inner| {
            let len = inner.len;
            &mut inner.storage.as_mut_slice()[..len]
        })
    }

    /// Length of the valid data.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Check if the buffer holds no data.
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Size of the underlying storage.
    pub fn capacity(&self) -> usize {
        self.inner.storage.as_slice().len()
    }

    /// Presentation timestamp.
    pub fn pts(&self) -> Timestamp {
        self.inner.metadata.pts
    }

    /// Media type tag.
    pub fn media_type(&self) -> MediaType {
        self.inner.metadata.media_type
    }

    /// Buffer flags.
    pub fn flags(&self) -> BufferFlags {
        self.inner.metadata.flags
    }

    /// Check if this is the end-of-stream sentinel.
    pub fn is_eos(&self) -> bool {
        self.inner.metadata.is_eos()
    }

    /// Check if this is a key frame.
    pub fn is_key_frame(&self) -> bool {
        self.inner.metadata.is_key_frame()
    }

    /// Number of live references to this buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Check whether two handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Check if the storage belongs to a buffer pool.
    pub fn is_pooled(&self) -> bool {
        matches!(self.inner.storage, Storage::Pooled(_))
    }

    /// Record `holder` as the last owner of a pooled buffer.
    ///
    /// Shows up in [`BufferPool::dump_info`](crate::memory::BufferPool::dump_info)
    /// so leaked buffers can be traced to the node sitting on them. No-op for
    /// heap buffers.
    pub fn mark_holder(&self, holder: &str) {
        if let Storage::Pooled(slot) = &self.inner.storage {
            slot.set_holder(holder);
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("metadata", &self.inner.metadata)
            .field("pooled", &self.is_pooled())
            .field("refs", &self.ref_count())
            .finish()
    }
}
