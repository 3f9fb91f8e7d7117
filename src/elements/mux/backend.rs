//! Container backends for the muxing node.
//!
//! The muxing node owns file rotation, pre-recording and error policy; a
//! [`MuxBackend`] only knows how to put interleaved buffers into one file.
//! [`FramedFileBackend`] is the built-in container: a small header followed
//! by length-prefixed records.
//!
//! # Framed file layout
//!
//! ```text
//! header:  "MGFR" | version u8
//! record:  kind u8 | flags u32 LE | pts u64 LE (µs) | len u32 LE | payload
//! ```
//!
//! `kind` is 0 (generic), 1 (video), 2 (audio) or 0xFF for the end-of-stream
//! record written when a file is finalized. A file without the trailing EOS
//! record was aborted.

use crate::buffer::Buffer;
use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::metadata::{BufferFlags, MediaType};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// File magic of the framed container.
pub const FRAMED_MAGIC: &[u8; 4] = b"MGFR";
/// Current framed container version.
pub const FRAMED_VERSION: u8 = 1;

const KIND_GENERIC: u8 = 0;
const KIND_VIDEO: u8 = 1;
const KIND_AUDIO: u8 = 2;
const KIND_EOS: u8 = 0xFF;
const RECORD_HEADER_LEN: usize = 1 + 4 + 8 + 4;

/// Writes interleaved buffers into one container file at a time.
pub trait MuxBackend: Send + 'static {
    /// Create `path` and write the container header.
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Append one buffer to the open file.
    fn write(&mut self, buffer: &Buffer) -> Result<()>;

    /// Write the end-of-stream marker and close the file.
    fn finish(&mut self) -> Result<()>;

    /// Close the open file without finalizing it.
    fn abort(&mut self);

    /// Whether a file is open.
    fn is_open(&self) -> bool;
}

impl MuxBackend for Box<dyn MuxBackend> {
    fn open(&mut self, path: &Path) -> Result<()> {
        (**self).open(path)
    }

    fn write(&mut self, buffer: &Buffer) -> Result<()> {
        (**self).write(buffer)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }

    fn abort(&mut self) {
        (**self).abort()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

// ============================================================================
// Framed file backend
// ============================================================================

/// Length-prefixed record container on the local filesystem.
#[derive(Default)]
pub struct FramedFileBackend {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    scratch: BytesMut,
}

impl FramedFileBackend {
    /// Create a backend with no file open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the open file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::NotConnected, "no file open")))
    }

    fn put_record(&mut self, kind: u8, flags: BufferFlags, pts: Timestamp, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len()).map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "record payload exceeds 4 GiB",
            ))
        })?;
        self.scratch.clear();
        self.scratch.reserve(RECORD_HEADER_LEN + payload.len());
        self.scratch.put_u8(kind);
        self.scratch.put_u32_le(flags.bits());
        self.scratch.put_u64_le(pts.micros());
        self.scratch.put_u32_le(len);
        self.scratch.put_slice(payload);

        let record = self.scratch.split().freeze();
        self.writer()?.write_all(&record)?;
        Ok(())
    }
}

impl MuxBackend for FramedFileBackend {
    fn open(&mut self, path: &Path) -> Result<()> {
        if self.writer.is_some() {
            self.abort();
        }
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(FRAMED_MAGIC)?;
        writer.write_all(&[FRAMED_VERSION])?;
        self.writer = Some(writer);
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    fn write(&mut self, buffer: &Buffer) -> Result<()> {
        let kind = match buffer.media_type() {
            MediaType::Generic => KIND_GENERIC,
            MediaType::Video => KIND_VIDEO,
            MediaType::Audio => KIND_AUDIO,
        };
        self.put_record(kind, buffer.flags(), buffer.pts(), buffer.as_bytes())
    }

    fn finish(&mut self) -> Result<()> {
        self.put_record(KIND_EOS, BufferFlags::EOS, Timestamp::ZERO, &[])?;
        let mut writer = self.writer.take().ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::NotConnected, "no file open"))
        })?;
        self.path = None;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(path) = self.path.take() {
            tracing::debug!(path = %path.display(), "framed file abandoned");
        }
        // Dropping the writer may try to flush; the file is unusable either way
        self.writer = None;
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

// ============================================================================
// Reading
// ============================================================================

/// One record read back from a framed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedRecord {
    /// Media type of the record (`Generic` for the EOS record).
    pub media_type: MediaType,
    /// Buffer flags.
    pub flags: BufferFlags,
    /// Presentation timestamp.
    pub pts: Timestamp,
    /// Record payload.
    pub payload: Bytes,
}

impl FramedRecord {
    /// Whether this is the end-of-stream record.
    pub fn is_eos(&self) -> bool {
        self.flags.contains(BufferFlags::EOS)
    }

    /// Whether this record is a video key frame.
    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(BufferFlags::KEY_FRAME)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, message.into()))
}

/// Read every record of a framed file, the EOS record included.
///
/// # Errors
///
/// Fails on I/O errors, a bad header or a truncated record.
pub fn read_framed_file(path: impl AsRef<Path>) -> Result<Vec<FramedRecord>> {
    let mut data = Bytes::from(fs::read(path.as_ref())?);
    if data.len() < FRAMED_MAGIC.len() + 1 || &data[..4] != FRAMED_MAGIC {
        return Err(invalid("not a framed media file"));
    }
    data.advance(4);
    let version = data.get_u8();
    if version != FRAMED_VERSION {
        return Err(invalid(format!("unsupported framed version {version}")));
    }

    let mut records = Vec::new();
    while data.has_remaining() {
        if data.remaining() < RECORD_HEADER_LEN {
            return Err(invalid("truncated record header"));
        }
        let kind = data.get_u8();
        let flags = BufferFlags::from_bits(data.get_u32_le());
        let pts = Timestamp::from_micros(data.get_u64_le());
        let len = data.get_u32_le() as usize;
        if data.remaining() < len {
            return Err(invalid("truncated record payload"));
        }
        let payload = data.split_to(len);

        let media_type = match kind {
            KIND_VIDEO => MediaType::Video,
            KIND_AUDIO => MediaType::Audio,
            KIND_GENERIC | KIND_EOS => MediaType::Generic,
            other => return Err(invalid(format!("unknown record kind {other:#04x}"))),
        };
        records.push(FramedRecord {
            media_type,
            flags,
            pts,
            payload,
        });
    }
    Ok(records)
}
