//! Buffer metadata types.

use crate::clock::Timestamp;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Logical stream a buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MediaType {
    /// Video frames.
    Video,
    /// Audio frames.
    Audio,
    /// Anything else.
    #[default]
    Generic,
}

impl MediaType {
    /// Returns the name of this media type.
    pub fn name(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Generic => "generic",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitmask of buffer properties.
///
/// The low 16 bits are reserved for the engine; applications can use
/// [`BufferFlags::user`] to allocate bits in the upper half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Buffer is a key (intra) frame and a valid splice point.
    pub const KEY_FRAME: Self = Self(1 << 0);
    /// Buffer is the end-of-stream sentinel.
    pub const EOS: Self = Self(1 << 1);
    /// Buffer follows a gap in the stream.
    pub const DISCONT: Self = Self(1 << 2);
    /// Buffer content is known to be damaged.
    pub const CORRUPTED: Self = Self(1 << 3);

    /// Application-defined flag `n` (0..16).
    ///
    /// # Panics
    ///
    /// Panics if `n >= 16`.
    pub const fn user(n: u32) -> Self {
        assert!(n < 16, "user flag index out of range");
        Self(1 << (16 + n))
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Check whether all bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Check if no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Metadata associated with a buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Presentation timestamp.
    pub pts: Timestamp,

    /// Monotonic sequence number within a stream.
    pub sequence: u64,

    /// Logical stream this buffer belongs to.
    pub media_type: MediaType,

    /// Buffer flags.
    pub flags: BufferFlags,
}

impl Metadata {
    /// Create new metadata with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create metadata for a media type.
    pub fn of(media_type: MediaType) -> Self {
        Self {
            media_type,
            ..Default::default()
        }
    }

    /// Create metadata with a sequence number.
    pub fn from_sequence(sequence: u64) -> Self {
        Self {
            sequence,
            ..Default::default()
        }
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: Timestamp) -> Self {
        self.pts = pts;
        self
    }

    /// Set the sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Set the media type.
    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    /// Add flags.
    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    /// Mark as a key frame.
    pub fn key_frame(self) -> Self {
        self.with_flags(BufferFlags::KEY_FRAME)
    }

    /// Mark as end-of-stream.
    pub fn with_eos(self) -> Self {
        self.with_flags(BufferFlags::EOS)
    }

    /// Check for the key frame flag.
    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(BufferFlags::KEY_FRAME)
    }

    /// Check for the end-of-stream flag.
    pub fn is_eos(&self) -> bool {
        self.flags.contains(BufferFlags::EOS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_insert_remove() {
        let mut flags = BufferFlags::NONE;
        assert!(flags.is_empty());

        flags.insert(BufferFlags::KEY_FRAME);
        flags |= BufferFlags::user(3);
        assert!(flags.contains(BufferFlags::KEY_FRAME));
        assert!(flags.contains(BufferFlags::user(3)));
        assert!(!flags.contains(BufferFlags::EOS));

        flags.remove(BufferFlags::KEY_FRAME);
        assert!(!flags.contains(BufferFlags::KEY_FRAME));
        assert_eq!(flags.bits(), 1 << 19);
    }

    #[test]
    #[should_panic(expected = "user flag index out of range")]
    fn test_user_flag_out_of_range() {
        let _ = BufferFlags::user(16);
    }

    #[test]
    fn test_metadata_builders() {
        let meta = Metadata::of(MediaType::Video)
            .with_pts(Timestamp::from_millis(40))
            .with_sequence(7)
            .key_frame();

        assert_eq!(meta.media_type, MediaType::Video);
        assert_eq!(meta.pts.millis(), 40);
        assert_eq!(meta.sequence, 7);
        assert!(meta.is_key_frame());
        assert!(!meta.is_eos());
    }
}
