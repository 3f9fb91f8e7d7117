//! Recording: the muxing node and its collaborators.
//!
//! - [`MuxingNode`] / [`MuxerHandle`]: two-input recording sink with file
//!   rotation, manual splits and pre-record lookback
//! - [`MuxBackend`]: container writer interface; [`FramedFileBackend`] is
//!   the built-in length-prefixed container
//! - [`FileNamer`]: path template or injected naming callback
//! - [`LookbackRing`]: time-bounded history used for pre-recording

mod backend;
mod muxer;
mod naming;
mod prerecord;

pub use backend::{
    FRAMED_MAGIC, FRAMED_VERSION, FramedFileBackend, FramedRecord, MuxBackend, read_framed_file,
};
pub use muxer::{
    AUDIO_SLOT, MuxerConfig, MuxerHandle, MuxerStats, MuxingNode, PrerecordMode, VIDEO_SLOT,
};
pub use naming::{FileNameContext, FileNamer, NamingCallback, PathTemplate};
pub use prerecord::LookbackRing;
