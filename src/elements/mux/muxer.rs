//! The muxing node: recording control, rotation and pre-record.
//!
//! [`MuxingNode`] is a two-input sink (video on slot 0, audio on slot 1).
//! Every buffer goes into the [`LookbackRing`] first; while recording,
//! buffers are also written through the [`MuxBackend`]. Recording is driven
//! from any thread through a [`MuxerHandle`] or, for factory-built muxers,
//! through string controls on the node.
//!
//! Buffers are classified by their media type tag: `Audio` is audio,
//! everything else is treated as video.
//!
//! # Files
//!
//! A file always starts at a video key frame. When recording starts and the
//! ring holds a key frame, the file opens at once with the ring content from
//! that key frame on; otherwise it opens at the next key frame. Rotation is
//! checked at key frames only: a pending manual split wins, then the file
//! duration limit. A write error aborts the file, posts `StreamError` and
//! disables writing until [`MuxerHandle::resume_writing`].

use super::backend::MuxBackend;
use super::naming::{FileNameContext, FileNamer, PathTemplate};
use super::prerecord::LookbackRing;
use crate::buffer::Buffer;
use crate::clock::Timestamp;
use crate::element::{BackpressurePolicy, Output, Process, ProcessContext, SlotSpec};
use crate::error::{Error, Result};
use crate::metadata::MediaType;
use crate::observability::{record_file_written, record_write_error, trace_file_begin, trace_file_end};
use crate::pipeline::{Event, EventSender, NodeConfig};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Input slot carrying video.
pub const VIDEO_SLOT: usize = 0;
/// Input slot carrying audio.
pub const AUDIO_SLOT: usize = 1;

// ============================================================================
// Configuration
// ============================================================================

/// Which new files start with the pre-record window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrerecordMode {
    /// Only the first file of each recording session.
    #[default]
    FirstFileOnly,
    /// The first file of a session and every file opened by a manual split.
    EverySplit,
    /// Every file, including duration rotations.
    Always,
}

impl PrerecordMode {
    /// Configuration name of the mode.
    pub fn name(&self) -> &'static str {
        match self {
            PrerecordMode::FirstFileOnly => "first",
            PrerecordMode::EverySplit => "every-split",
            PrerecordMode::Always => "always",
        }
    }
}

impl fmt::Display for PrerecordMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PrerecordMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "first" | "first-file" | "first-file-only" | "single-shot" => {
                Ok(PrerecordMode::FirstFileOnly)
            }
            "every-split" | "split" => Ok(PrerecordMode::EverySplit),
            "always" => Ok(PrerecordMode::Always),
            other => Err(Error::Config(format!("unknown prerecord mode '{other}'"))),
        }
    }
}

/// Muxer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxerConfig {
    /// Output path template.
    pub template: PathTemplate,
    /// Pre-record window; zero keeps only the newest buffers.
    pub prerecord: Duration,
    /// When the pre-record window is written.
    pub prerecord_mode: PrerecordMode,
    /// Rotate files after this much stream time.
    pub file_duration: Option<Duration>,
    /// Start recording as soon as the node starts.
    pub autostart: bool,
    /// Capacity of each input slot.
    pub queue_capacity: usize,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            template: PathTemplate::default(),
            prerecord: Duration::ZERO,
            prerecord_mode: PrerecordMode::default(),
            file_duration: None,
            autostart: false,
            queue_capacity: 32,
        }
    }
}

impl MuxerConfig {
    /// Read muxer keys from a node configuration.
    ///
    /// Recognized keys: `location` (or `dir`), `prefix`, `extension`,
    /// `timestamp` (chrono format), `index-digits`, `prerecord-ms`,
    /// `prerecord-mode`, `file-duration-ms` (0 disables rotation),
    /// `autostart`.
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        let mut out = Self::default();
        if let Some(dir) = config.get_str("location").or_else(|| config.get_str("dir")) {
            out.template.dir = PathBuf::from(dir);
        }
        if let Some(prefix) = config.get_str("prefix") {
            out.template.prefix = prefix;
        }
        if let Some(ext) = config.get_str("extension") {
            out.template.extension = ext.trim_start_matches('.').to_string();
        }
        if let Some(format) = config.get_str("timestamp") {
            out.template = out.template.with_timestamp(format)?;
        }
        if let Some(digits) = config.get_u64("index-digits")? {
            out.template.index_digits = digits as usize;
        }
        if let Some(window) = config.get_millis("prerecord-ms")? {
            out.prerecord = window;
        }
        if let Some(mode) = config.get_str("prerecord-mode") {
            out.prerecord_mode = mode.parse()?;
        }
        if let Some(limit) = config.get_millis("file-duration-ms")? {
            out.file_duration = (!limit.is_zero()).then_some(limit);
        }
        if let Some(autostart) = config.get_bool("autostart")? {
            out.autostart = autostart;
        }
        Ok(out)
    }
}

/// Counters of a muxing node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxerStats {
    /// Files opened.
    pub files_opened: u64,
    /// Files finalized.
    pub files_completed: u64,
    /// Media records written.
    pub records_written: u64,
    /// Payload bytes written.
    pub bytes_written: u64,
    /// Write failures.
    pub write_errors: u64,
    /// Buffers seen while recording but not written (before the first key
    /// frame, or audio older than the file start).
    pub withheld: u64,
}

// ============================================================================
// Recorder
// ============================================================================

struct OpenFile {
    path: PathBuf,
    start: Timestamp,
    last: Timestamp,
    records: u64,
    limit: Option<Duration>,
    manual: bool,
    /// Stop recording instead of rotating when the limit is reached.
    clip: bool,
}

impl OpenFile {
    fn limit_reached(&self, pts: Timestamp) -> bool {
        self.limit.is_some_and(|limit| pts.span_since(self.start) >= limit)
    }
}

/// What the next opened file should look like.
#[derive(Clone, Copy)]
struct Pending {
    limit: Option<Duration>,
    manual: bool,
    clip: bool,
    prerecord: bool,
}

struct Recorder {
    node: String,
    events: Option<EventSender>,
    backend: Box<dyn MuxBackend>,
    namer: FileNamer,
    ring: LookbackRing,
    mode: PrerecordMode,
    file_limit: Option<Duration>,
    recording: bool,
    disabled: bool,
    file: Option<OpenFile>,
    /// Set while recording with no file open.
    next: Option<Pending>,
    /// Manual split to apply at the next key frame.
    split: Option<Duration>,
    file_index: u64,
    stats: MuxerStats,
}

impl Recorder {
    fn post(&self, event: Event) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.disabled {
            return Err(Error::WritingDisabled);
        }
        if self.recording {
            return Ok(());
        }
        self.recording = true;
        tracing::info!(node = %self.node, "recording started");
        self.begin(Pending {
            limit: self.file_limit,
            manual: false,
            clip: false,
            prerecord: true,
        });
        Ok(())
    }

    /// Open from the ring if it holds a key frame, else wait for one.
    fn begin(&mut self, pending: Pending) {
        if pending.prerecord
            && let Some(snapshot) = self.ring.snapshot_from_key_frame()
        {
            self.open(pending, &snapshot);
        } else {
            self.next = Some(pending);
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.recording = false;
        self.next = None;
        self.split = None;
        self.close_file()
    }

    fn request_split(&mut self, length: Duration) -> Result<()> {
        if self.disabled {
            return Err(Error::WritingDisabled);
        }
        if !self.recording {
            // Idle: record one clip of the requested length
            self.recording = true;
            tracing::info!(node = %self.node, length = ?length, "recording clip");
            self.begin(Pending {
                limit: Some(length),
                manual: true,
                clip: true,
                prerecord: self.mode != PrerecordMode::FirstFileOnly,
            });
        } else if let Some(next) = &mut self.next {
            next.limit = Some(length);
            next.manual = true;
        } else {
            self.split = Some(length);
        }
        Ok(())
    }

    fn set_file_limit(&mut self, limit: Option<Duration>) {
        self.file_limit = limit;
        if let Some(file) = &mut self.file
            && !file.manual
        {
            file.limit = limit;
        }
        if let Some(next) = &mut self.next
            && !next.manual
        {
            next.limit = limit;
        }
    }

    fn on_buffer(&mut self, buffer: &Buffer) {
        if buffer.is_eos() {
            return;
        }
        self.ring.push(buffer.clone());
        if !self.recording || self.disabled {
            return;
        }

        let is_video = buffer.media_type() != MediaType::Audio;
        let pts = buffer.pts();

        if self.file.is_none() {
            match self.next {
                Some(pending) if is_video && buffer.is_key_frame() => {
                    self.next = None;
                    if pending.prerecord
                        && let Some(snapshot) = self.ring.snapshot_from_key_frame()
                    {
                        self.open(pending, &snapshot);
                    } else {
                        self.open(pending, std::slice::from_ref(buffer));
                    }
                }
                _ => self.stats.withheld += 1,
            }
            return;
        }

        if is_video {
            let (clip_done, rotate_manual, rotate_limit) = match &self.file {
                Some(file) => {
                    let key = buffer.is_key_frame();
                    (
                        file.clip && file.limit_reached(pts),
                        key && self.split.is_some(),
                        key && !file.clip && file.limit_reached(pts),
                    )
                }
                None => (false, false, false),
            };

            if clip_done {
                tracing::info!(node = %self.node, "clip complete");
                // Errors were already reported as events
                let _ = self.stop();
                return;
            }
            if rotate_manual || rotate_limit {
                let pending = if let Some(length) = self.split.take() {
                    Pending {
                        limit: Some(length),
                        manual: true,
                        clip: false,
                        prerecord: self.mode != PrerecordMode::FirstFileOnly,
                    }
                } else {
                    Pending {
                        limit: self.file_limit,
                        manual: false,
                        clip: false,
                        prerecord: self.mode == PrerecordMode::Always,
                    }
                };
                self.rotate(pending, buffer);
                return;
            }
        } else if self.file.as_ref().is_some_and(|f| pts < f.start) {
            self.stats.withheld += 1;
            return;
        }

        self.write(buffer);
    }

    fn rotate(&mut self, pending: Pending, trigger: &Buffer) {
        if self.close_file().is_err() || self.disabled {
            return;
        }
        if pending.prerecord
            && let Some(snapshot) = self.ring.snapshot_from_key_frame()
        {
            self.open(pending, &snapshot);
        } else {
            self.open(pending, std::slice::from_ref(trigger));
        }
    }

    /// Open a new file and write `initial` into it.
    fn open(&mut self, pending: Pending, initial: &[Buffer]) {
        let Some(first) = initial.first() else {
            self.next = Some(pending);
            return;
        };
        let path = self.namer.next_path(&FileNameContext {
            index: self.file_index,
            manual_split: pending.manual,
        });
        self.file_index += 1;

        if let Err(err) = self.backend.open(&path) {
            self.fail(Some(path), err);
            return;
        }
        self.stats.files_opened += 1;
        trace_file_begin(&self.node, &path);
        self.post(Event::FileBegin {
            node: self.node.clone(),
            path: path.clone(),
        });
        self.file = Some(OpenFile {
            path,
            start: first.pts(),
            last: first.pts(),
            records: 0,
            limit: pending.limit,
            manual: pending.manual,
            clip: pending.clip,
        });

        for buffer in initial {
            if !self.write(buffer) {
                return;
            }
        }
    }

    fn write(&mut self, buffer: &Buffer) -> bool {
        let Some(file) = &mut self.file else {
            return false;
        };
        match self.backend.write(buffer) {
            Ok(()) => {
                file.records += 1;
                file.last = file.last.max(buffer.pts());
                self.stats.records_written += 1;
                self.stats.bytes_written += buffer.len() as u64;
                true
            }
            Err(err) => {
                let path = self.file.take().map(|f| f.path);
                self.fail(path, err);
                false
            }
        }
    }

    fn close_file(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        if let Err(err) = self.backend.finish() {
            let message = err.to_string();
            self.fail(Some(file.path), err);
            return Err(Error::Element(message));
        }

        self.stats.files_completed += 1;
        record_file_written(&self.node);
        trace_file_end(&self.node, &file.path, file.records);
        self.post(Event::FileEnd {
            node: self.node.clone(),
            duration: file.last.span_since(file.start),
            path: file.path,
            records: file.records,
        });
        Ok(())
    }

    /// Abort the open file and disable writing.
    fn fail(&mut self, path: Option<PathBuf>, err: Error) {
        self.backend.abort();
        self.file = None;
        self.next = None;
        self.split = None;
        self.recording = false;
        self.disabled = true;
        self.stats.write_errors += 1;
        record_write_error(&self.node);
        tracing::error!(
            node = %self.node,
            path = ?path.as_deref().map(Path::display),
            error = %err,
            "write failed, recording disabled"
        );
        self.post(Event::StreamError {
            node: self.node.clone(),
            path,
            message: err.to_string(),
        });
    }
}

// ============================================================================
// Node and handle
// ============================================================================

/// Control handle of a [`MuxingNode`].
///
/// Cloneable and usable from any thread while the node runs.
#[derive(Clone)]
pub struct MuxerHandle {
    recorder: Arc<Mutex<Recorder>>,
}

impl MuxerHandle {
    fn lock(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap()
    }

    /// Start recording.
    ///
    /// Fails with [`Error::WritingDisabled`] after a write error until
    /// [`resume_writing`](Self::resume_writing) is called.
    pub fn start(&self) -> Result<()> {
        self.lock().start()
    }

    /// Stop recording and finalize the open file.
    pub fn stop(&self) -> Result<()> {
        self.lock().stop()
    }

    /// Split at the next key frame; the new file lasts `length`.
    ///
    /// While idle this records a single clip of `length` and then stops.
    pub fn request_manual_split(&self, length: Duration) -> Result<()> {
        self.lock().request_split(length)
    }

    /// Rotate files after `limit` of stream time; `None` disables rotation.
    pub fn set_file_duration_limit(&self, limit: Option<Duration>) {
        self.lock().set_file_limit(limit);
    }

    /// Name future files with `callback` instead of the path template.
    pub fn set_file_naming_callback<F>(&self, callback: F)
    where
        F: FnMut(&FileNameContext) -> PathBuf + Send + 'static,
    {
        self.lock().namer = FileNamer::Custom(Box::new(callback));
    }

    /// Change the pre-record window.
    pub fn set_prerecord_window(&self, window: Duration) {
        self.lock().ring.set_window(window);
    }

    /// Re-enable writing after a write error. Recording stays stopped.
    pub fn resume_writing(&self) {
        let mut recorder = self.lock();
        if recorder.disabled {
            tracing::info!(node = %recorder.node, "writing re-enabled");
        }
        recorder.disabled = false;
    }

    /// Whether recording is active (a file is open or about to open).
    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    /// Whether a write error disabled writing.
    pub fn is_writing_disabled(&self) -> bool {
        self.lock().disabled
    }

    /// Path of the open file.
    pub fn current_file(&self) -> Option<PathBuf> {
        self.lock().file.as_ref().map(|f| f.path.clone())
    }

    /// Oldest and newest timestamps in the pre-record ring.
    pub fn prerecord_span(&self) -> Option<(Timestamp, Timestamp)> {
        let recorder = self.lock();
        recorder.ring.oldest_pts().zip(recorder.ring.newest_pts())
    }

    /// Snapshot the counters.
    pub fn stats(&self) -> MuxerStats {
        self.lock().stats.clone()
    }
}

/// A sink writing interleaved video and audio into rotating files.
///
/// # Example
///
/// ```rust
/// use mediagraph::elements::mux::{FramedFileBackend, MuxerConfig, MuxingNode};
/// use mediagraph::pipeline::{NodeBuilder, SchedulingModel};
/// use std::time::Duration;
///
/// let config = MuxerConfig {
///     prerecord: Duration::from_secs(5),
///     ..MuxerConfig::default()
/// };
/// let (muxer, handle) = MuxingNode::new(config, FramedFileBackend::new());
/// let node = NodeBuilder::new("mux", muxer)
///     .inputs(MuxingNode::input_slots(32))
///     .model(SchedulingModel::AsyncCommon)
///     .build();
///
/// assert!(!handle.is_recording());
/// # drop(node);
/// ```
pub struct MuxingNode {
    recorder: Arc<Mutex<Recorder>>,
    autostart: bool,
}

impl MuxingNode {
    /// Create a muxing node and its control handle.
    pub fn new(config: MuxerConfig, backend: impl MuxBackend) -> (Self, MuxerHandle) {
        let recorder = Arc::new(Mutex::new(Recorder {
            node: "muxer".to_string(),
            events: None,
            backend: Box::new(backend),
            namer: FileNamer::Template(config.template),
            ring: LookbackRing::new(config.prerecord),
            mode: config.prerecord_mode,
            file_limit: config.file_duration,
            recording: false,
            disabled: false,
            file: None,
            next: None,
            split: None,
            file_index: 0,
            stats: MuxerStats::default(),
        }));
        let node = Self {
            recorder: recorder.clone(),
            autostart: config.autostart,
        };
        (node, MuxerHandle { recorder })
    }

    /// The video and audio input slots, each holding `capacity` buffers.
    pub fn input_slots(capacity: usize) -> Vec<SlotSpec> {
        vec![
            SlotSpec::new("video")
                .with_media_type(MediaType::Video)
                .with_capacity(capacity)
                .with_policy(BackpressurePolicy::Blocking),
            SlotSpec::new("audio")
                .with_media_type(MediaType::Audio)
                .with_capacity(capacity)
                .with_policy(BackpressurePolicy::Blocking),
        ]
    }

    /// Get a control handle.
    pub fn handle(&self) -> MuxerHandle {
        MuxerHandle {
            recorder: self.recorder.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap()
    }
}

impl Process for MuxingNode {
    fn start(&mut self, ctx: &mut ProcessContext) -> Result<()> {
        let mut recorder = self.lock();
        recorder.node = ctx.node().to_string();
        recorder.events = ctx.events().cloned();
        if self.autostart {
            recorder.start()?;
        }
        Ok(())
    }

    fn process(&mut self, inputs: &[Option<Buffer>], _ctx: &mut ProcessContext) -> Result<Output> {
        let mut present: smallvec::SmallVec<[&Buffer; 2]> = inputs.iter().flatten().collect();
        // Interleave by timestamp; video first on ties
        present.sort_by_key(|b| (b.pts(), b.media_type() == MediaType::Audio));

        let mut recorder = self.lock();
        for buffer in present {
            recorder.on_buffer(buffer);
        }
        Ok(Output::none())
    }

    fn flush(&mut self, _ctx: &mut ProcessContext) -> Result<Output> {
        self.lock().stop()?;
        Ok(Output::none())
    }

    fn stop(&mut self, _ctx: &mut ProcessContext) -> Result<()> {
        self.lock().stop()
    }

    fn control(&mut self, key: &str, value: &str, _ctx: &mut ProcessContext) -> Result<()> {
        let mut recorder = self.lock();
        match key {
            "record" => match value {
                "start" => recorder.start(),
                "stop" => recorder.stop(),
                other => Err(Error::Config(format!("record expects start|stop, got '{other}'"))),
            },
            "split" => {
                let ms: u64 = value
                    .parse()
                    .map_err(|_| Error::Config(format!("split expects milliseconds, got '{value}'")))?;
                recorder.request_split(Duration::from_millis(ms))
            }
            "file-duration-ms" => {
                let ms: u64 = value.parse().map_err(|_| {
                    Error::Config(format!("file-duration-ms expects milliseconds, got '{value}'"))
                })?;
                recorder.set_file_limit((ms > 0).then(|| Duration::from_millis(ms)));
                Ok(())
            }
            "resume" if value == "true" => {
                recorder.disabled = false;
                Ok(())
            }
            _ => Err(Error::Config(format!(
                "muxer does not support control '{key}={value}'"
            ))),
        }
    }

    fn name(&self) -> &str {
        "muxer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::mux::{FramedFileBackend, read_framed_file};
    use crate::metadata::Metadata;

    fn video(pts_ms: u64, key: bool) -> Buffer {
        let mut meta = Metadata::of(MediaType::Video).with_pts(Timestamp::from_millis(pts_ms));
        if key {
            meta = meta.key_frame();
        }
        Buffer::from_vec(vec![1; 8], meta)
    }

    fn audio(pts_ms: u64) -> Buffer {
        Buffer::from_vec(
            vec![2; 4],
            Metadata::of(MediaType::Audio).with_pts(Timestamp::from_millis(pts_ms)),
        )
    }

    fn muxer(dir: &Path, config: MuxerConfig) -> (MuxingNode, MuxerHandle, ProcessContext) {
        let config = MuxerConfig {
            template: PathTemplate {
                dir: dir.to_path_buf(),
                ..PathTemplate::default()
            },
            ..config
        };
        let (node, handle) = MuxingNode::new(config, FramedFileBackend::new());
        (node, handle, ProcessContext::new("mux", None))
    }

    fn feed(node: &mut MuxingNode, ctx: &mut ProcessContext, buffers: &[Buffer]) {
        for b in buffers {
            node.process(&[Some(b.clone()), None], ctx).unwrap();
        }
    }

    #[test]
    fn test_waits_for_key_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (mut node, handle, mut ctx) = muxer(dir.path(), MuxerConfig::default());
        node.start(&mut ctx).unwrap();
        handle.start().unwrap();

        feed(&mut node, &mut ctx, &[video(0, false), audio(10), video(33, false)]);
        assert!(handle.current_file().is_none());
        assert_eq!(handle.stats().withheld, 3);

        feed(&mut node, &mut ctx, &[video(66, true), audio(70), video(100, false)]);
        let path = handle.current_file().unwrap();
        handle.stop().unwrap();

        let records = read_framed_file(&path).unwrap();
        let pts: Vec<u64> = records.iter().map(|r| r.pts.millis()).collect();
        assert_eq!(pts, vec![66, 70, 100, 0]);
        assert!(records[0].is_key_frame());
        assert!(records.last().unwrap().is_eos());
    }

    #[test]
    fn test_rotation_at_key_frames() {
        let dir = tempfile::tempdir().unwrap();
        let config = MuxerConfig {
            file_duration: Some(Duration::from_millis(1000)),
            ..MuxerConfig::default()
        };
        let (mut node, handle, mut ctx) = muxer(dir.path(), config);
        node.start(&mut ctx).unwrap();
        handle.start().unwrap();

        // Key frame every 600ms, frames every 100ms
        let frames: Vec<Buffer> = (0..=30).map(|i| video(i * 100, i % 6 == 0)).collect();
        feed(&mut node, &mut ctx, &frames);
        handle.stop().unwrap();

        // Files start at 0, 1200, 2400 (first key frame past the limit)
        let stats = handle.stats();
        assert_eq!(stats.files_completed, 3);
        let first = read_framed_file(dir.path().join("record_0000.mgf")).unwrap();
        assert_eq!(first.len(), 12 + 1);
        let second = read_framed_file(dir.path().join("record_0001.mgf")).unwrap();
        assert_eq!(second[0].pts, Timestamp::from_millis(1200));
    }

    #[test]
    fn test_control_strings() {
        let dir = tempfile::tempdir().unwrap();
        let (mut node, handle, mut ctx) = muxer(dir.path(), MuxerConfig::default());
        node.control("record", "start", &mut ctx).unwrap();
        assert!(handle.is_recording());
        node.control("file-duration-ms", "500", &mut ctx).unwrap();
        node.control("record", "stop", &mut ctx).unwrap();
        assert!(!handle.is_recording());
        assert!(node.control("record", "pause", &mut ctx).is_err());
        assert!(node.control("bitrate", "1", &mut ctx).unwrap_err().is_configuration());
    }

    #[test]
    fn test_config_parsing() {
        let cfg = NodeConfig::parse(
            "location=/tmp/rec prefix=cam extension=.ts prerecord-ms=5000 \
             prerecord-mode=always file-duration-ms=0 autostart=true",
        )
        .unwrap();
        let muxer = MuxerConfig::from_config(&cfg).unwrap();
        assert_eq!(muxer.template.dir, PathBuf::from("/tmp/rec"));
        assert_eq!(muxer.template.extension, "ts");
        assert_eq!(muxer.prerecord, Duration::from_secs(5));
        assert_eq!(muxer.prerecord_mode, PrerecordMode::Always);
        assert_eq!(muxer.file_duration, None);
        assert!(muxer.autostart);

        let bad = NodeConfig::parse("prerecord-mode=sometimes").unwrap();
        assert!(MuxerConfig::from_config(&bad).is_err());

        let bad = NodeConfig::parse("timestamp=%Q").unwrap();
        assert!(matches!(MuxerConfig::from_config(&bad), Err(Error::Config(_))));
        let good = NodeConfig::parse("timestamp='%Y%m%d-%H%M%S'").unwrap();
        let muxer = MuxerConfig::from_config(&good).unwrap();
        assert_eq!(muxer.template.timestamp.as_deref(), Some("%Y%m%d-%H%M%S"));
    }
}
