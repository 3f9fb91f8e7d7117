//! Integration tests for the muxing node: pre-record lookback, rotation,
//! manual splits and write failures, driven through a running node.

use mediagraph::buffer::Buffer;
use mediagraph::clock::Timestamp;
use mediagraph::elements::mux::{
    AUDIO_SLOT, FileNameContext, FramedFileBackend, MuxBackend, MuxerConfig, MuxerHandle,
    MuxingNode, PathTemplate, PrerecordMode, VIDEO_SLOT, read_framed_file,
};
use mediagraph::error::{Error, Result};
use mediagraph::metadata::{MediaType, Metadata};
use mediagraph::elements::AppSource;
use mediagraph::pipeline::{
    Event, EventChannel, EventReceiver, Graph, Node, NodeBuilder, NodeFactory, SchedulingModel,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Log to the test output when `RUST_LOG` is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Video frame `i` of a 30 fps stream with a key frame every second.
fn frame(i: u64) -> Buffer {
    let mut meta =
        Metadata::of(MediaType::Video).with_pts(Timestamp::from_micros(i * 1_000_000 / 30));
    if i % 30 == 0 {
        meta = meta.key_frame();
    }
    Buffer::from_vec(vec![0xAB; 64], meta.with_sequence(i))
}

fn audio(pts_ms: u64) -> Buffer {
    Buffer::from_vec(
        vec![0x11; 16],
        Metadata::of(MediaType::Audio).with_pts(Timestamp::from_millis(pts_ms)),
    )
}

fn feed_video(node: &Node, frames: impl IntoIterator<Item = u64>) {
    for i in frames {
        node.send_input(frame(i), VIDEO_SLOT).unwrap();
    }
}

fn recorder(
    dir: &Path,
    config: MuxerConfig,
    backend: impl MuxBackend,
) -> (Node, MuxerHandle, EventReceiver) {
    let config = MuxerConfig {
        template: PathTemplate {
            dir: dir.to_path_buf(),
            ..PathTemplate::default()
        },
        ..config
    };
    init_tracing();
    mediagraph::observability::init_metrics();
    let (muxer, handle) = MuxingNode::new(config, backend);
    let channel = EventChannel::new();
    let node = NodeBuilder::new("recorder", muxer)
        .inputs(MuxingNode::input_slots(32))
        .model(SchedulingModel::Synchronous)
        .events(channel.sender())
        .build();
    node.start().unwrap();
    (node, handle, channel.receiver())
}

fn file_paths(events: &[Event]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut begun = Vec::new();
    let mut ended = Vec::new();
    for event in events {
        match event {
            Event::FileBegin { path, .. } => begun.push(path.clone()),
            Event::FileEnd { path, .. } => ended.push(path.clone()),
            _ => {}
        }
    }
    (begun, ended)
}

/// Name regular files `file_<n>` and manual splits `clip_<n>`.
fn split_aware_names(handle: &MuxerHandle, dir: &Path) {
    let dir = dir.to_path_buf();
    handle.set_file_naming_callback(move |ctx: &FileNameContext| {
        let kind = if ctx.manual_split { "clip" } else { "file" };
        dir.join(format!("{kind}_{}.mgf", ctx.index))
    });
}

// ============================================================================
// Pre-record
// ============================================================================

/// Starting with a full lookback ring writes from a key frame at least the
/// window length before the trigger.
#[test]
fn test_prerecord_starts_at_key_frame_before_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let config = MuxerConfig {
        prerecord: Duration::from_secs(5),
        ..MuxerConfig::default()
    };
    let (node, handle, _events) = recorder(dir.path(), config, FramedFileBackend::new());

    // Seven seconds of video with 50 Hz audio, interleaved by timestamp
    for i in 0..=210u64 {
        let video = frame(i);
        let video_ms = video.pts().millis();
        node.send_input(video, VIDEO_SLOT).unwrap();
        let audio_from = if i == 0 { 0 } else { (i - 1) * 1000 / 30 + 1 };
        for ms in (audio_from..=video_ms).filter(|ms| ms % 20 == 0) {
            node.send_input(audio(ms), AUDIO_SLOT).unwrap();
        }
    }

    let trigger = Timestamp::from_secs(7);
    assert_eq!(handle.prerecord_span().unwrap().1, trigger);
    handle.start().unwrap();
    let path = handle.current_file().unwrap();
    feed_video(&node, 211..=240);
    node.stop().unwrap();

    let records = read_framed_file(&path).unwrap();
    let first = &records[0];
    assert!(first.is_key_frame());
    assert_eq!(first.media_type, MediaType::Video);
    assert!(first.pts <= trigger.saturating_sub(Duration::from_secs(5)));
    assert_eq!(first.pts, Timestamp::from_secs(2));

    let media: Vec<_> = records.iter().filter(|r| !r.is_eos()).collect();
    assert!(media.windows(2).all(|w| w[0].pts <= w[1].pts));
    assert!(media.iter().any(|r| r.media_type == MediaType::Audio));
    assert!(records.last().unwrap().is_eos());
}

/// The lookback ring never spans more than its window.
#[test]
fn test_prerecord_ring_stays_within_window() {
    let dir = tempfile::tempdir().unwrap();
    let window = Duration::from_millis(1500);
    let config = MuxerConfig {
        prerecord: window,
        ..MuxerConfig::default()
    };
    let (node, handle, _events) = recorder(dir.path(), config, FramedFileBackend::new());

    for i in 0..300 {
        node.send_input(frame(i), VIDEO_SLOT).unwrap();
        if i % 3 == 0 {
            node.send_input(audio(i * 1000 / 30), AUDIO_SLOT).unwrap();
        }
        let (oldest, newest) = handle.prerecord_span().unwrap();
        assert!(newest.span_since(oldest) <= window);
    }

    handle.set_prerecord_window(Duration::from_millis(500));
    node.send_input(frame(300), VIDEO_SLOT).unwrap();
    let (oldest, newest) = handle.prerecord_span().unwrap();
    assert!(newest.span_since(oldest) <= Duration::from_millis(500));
    node.stop().unwrap();
}

// ============================================================================
// Rotation
// ============================================================================

/// A factory-built muxer rotates at the first key frame past the limit.
#[test]
fn test_rotation_by_duration() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let channel = EventChannel::new();
    let factory = NodeFactory::with_builtins();
    let config = format!(
        "mode=sync location='{}' file-duration-ms=1000 autostart=true",
        dir.path().display()
    );
    let node = factory
        .create("cam0", "muxer", &config, Some(channel.sender()))
        .unwrap();
    node.start().unwrap();

    feed_video(&node, 0..=150);
    node.stop().unwrap();

    let events = channel.receiver().drain();
    let (begun, ended) = file_paths(&events);
    assert_eq!(begun.len(), 6);
    assert_eq!(begun, ended);
    assert_eq!(begun[0], dir.path().join("record_0000.mgf"));
    assert_eq!(begun[5], dir.path().join("record_0005.mgf"));

    let full: Vec<(Duration, u64)> = events
        .iter()
        .filter_map(|e| match e {
            Event::FileEnd {
                node,
                duration,
                records,
                ..
            } if node == "cam0" => Some((*duration, *records)),
            _ => None,
        })
        .collect();
    for (duration, records) in &full[..5] {
        assert_eq!(*records, 30);
        assert!(*duration < Duration::from_secs(1));
    }
    assert_eq!(full[5].1, 1);

    for path in &begun {
        let records = read_framed_file(path).unwrap();
        assert!(records[0].is_key_frame());
        assert!(records.last().unwrap().is_eos());
    }
}

// ============================================================================
// Manual split
// ============================================================================

/// A split while idle records a single clip, including the lookback.
#[test]
fn test_manual_split_while_idle_records_clip() {
    let dir = tempfile::tempdir().unwrap();
    let config = MuxerConfig {
        prerecord: Duration::from_secs(2),
        prerecord_mode: PrerecordMode::EverySplit,
        ..MuxerConfig::default()
    };
    let (node, handle, events) = recorder(dir.path(), config, FramedFileBackend::new());
    split_aware_names(&handle, dir.path());

    feed_video(&node, 0..=90);
    handle.request_manual_split(Duration::from_secs(1)).unwrap();
    assert!(handle.is_recording());
    let clip = handle.current_file().unwrap();
    assert_eq!(clip, dir.path().join("clip_0.mgf"));

    feed_video(&node, 91..=120);
    assert!(!handle.is_recording());
    assert!(handle.current_file().is_none());

    let records = read_framed_file(&clip).unwrap();
    assert_eq!(records[0].pts, Timestamp::from_secs(1));
    assert!(records.last().unwrap().is_eos());
    let stats = handle.stats();
    assert_eq!(stats.files_opened, 1);
    assert_eq!(stats.files_completed, 1);

    let (begun, ended) = file_paths(&events.drain());
    assert_eq!(begun, vec![clip.clone()]);
    assert_eq!(ended, vec![clip]);
    node.stop().unwrap();
}

/// A split while recording starts a limited file at the next key frame,
/// after which regular files resume.
#[test]
fn test_manual_split_while_recording() {
    let dir = tempfile::tempdir().unwrap();
    let (node, handle, events) =
        recorder(dir.path(), MuxerConfig::default(), FramedFileBackend::new());
    split_aware_names(&handle, dir.path());

    handle.start().unwrap();
    feed_video(&node, 0..=40);
    handle.request_manual_split(Duration::from_millis(500)).unwrap();
    feed_video(&node, 41..=120);
    handle.stop().unwrap();

    let (begun, _) = file_paths(&events.drain());
    assert_eq!(
        begun,
        vec![
            dir.path().join("file_0.mgf"),
            dir.path().join("clip_1.mgf"),
            dir.path().join("file_2.mgf"),
        ]
    );

    let starts: Vec<Timestamp> = begun
        .iter()
        .map(|p| read_framed_file(p).unwrap()[0].pts)
        .collect();
    assert_eq!(
        starts,
        vec![
            Timestamp::ZERO,
            Timestamp::from_secs(2),
            Timestamp::from_secs(3)
        ]
    );
    node.stop().unwrap();
}

// ============================================================================
// Queued recording in a graph
// ============================================================================

/// A queued muxer fed by separate video and audio sources interleaves both
/// streams and finalizes the file when both upstreams end.
#[test]
fn test_queued_muxer_finalizes_on_upstream_eos() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut graph = Graph::new();
    for name in ["camera", "mic"] {
        let source = graph.node_builder(name, AppSource::new().0).outputs(1).build();
        graph.add_node(source).unwrap();
    }

    let config = MuxerConfig {
        template: PathTemplate {
            dir: dir.path().to_path_buf(),
            ..PathTemplate::default()
        },
        autostart: true,
        ..MuxerConfig::default()
    };
    let (muxer, handle) = MuxingNode::new(config, FramedFileBackend::new());
    let recorder = graph
        .node_builder("recorder", muxer)
        .inputs(MuxingNode::input_slots(8))
        .model(SchedulingModel::AsyncCommon)
        .build();
    graph.add_node(recorder).unwrap();
    graph.connect("camera", 0, "recorder", VIDEO_SLOT).unwrap();
    graph.connect("mic", 0, "recorder", AUDIO_SLOT).unwrap();

    let events = graph.event_receiver();
    graph.start().unwrap();
    let camera = graph.node("camera").unwrap().clone();
    let mic = graph.node("mic").unwrap().clone();
    for i in 0..90 {
        camera.send_input(frame(i), 0).unwrap();
        mic.send_input(audio(i * 1000 / 30), 0).unwrap();
    }
    assert!(graph.node("recorder").unwrap().wait_idle(Duration::from_secs(10)));
    let path = handle.current_file().unwrap();
    assert_eq!(path, dir.path().join("record_0000.mgf"));
    camera.send_input(Buffer::eos(MediaType::Video, Timestamp::ZERO), 0).unwrap();
    mic.send_input(Buffer::eos(MediaType::Audio, Timestamp::ZERO), 0).unwrap();

    // Upstream EOS alone closes the file; the node is still running
    assert!(events.wait_eos("recorder", Duration::from_secs(10)));
    assert!(!handle.is_recording());
    assert!(handle.current_file().is_none());
    let stats = handle.stats();
    assert_eq!(stats.files_opened, 1);
    assert_eq!(stats.files_completed, 1);

    let records = read_framed_file(&path).unwrap();
    assert_eq!(records.len(), 181);
    assert!(records.last().unwrap().is_eos());
    let media = &records[..180];
    assert_eq!(media.iter().filter(|r| r.media_type == MediaType::Video).count(), 90);
    assert_eq!(media.iter().filter(|r| r.media_type == MediaType::Audio).count(), 90);
    assert!(media[0].is_key_frame());

    graph.stop().unwrap();
}

// ============================================================================
// Write failures
// ============================================================================

/// Framed files whose writes fail on demand.
struct FlakyBackend {
    inner: FramedFileBackend,
    broken: Arc<AtomicBool>,
}

impl MuxBackend for FlakyBackend {
    fn open(&mut self, path: &Path) -> Result<()> {
        self.inner.open(path)
    }

    fn write(&mut self, buffer: &Buffer) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Io(io::Error::other("disk full")));
        }
        self.inner.write(buffer)
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.finish()
    }

    fn abort(&mut self) {
        self.inner.abort();
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

/// A write error aborts the file, disables writing and reports the failure;
/// writing resumes only when re-enabled.
#[test]
fn test_write_error_disables_writing() {
    let dir = tempfile::tempdir().unwrap();
    let broken = Arc::new(AtomicBool::new(false));
    let backend = FlakyBackend {
        inner: FramedFileBackend::new(),
        broken: broken.clone(),
    };
    let (node, handle, events) = recorder(dir.path(), MuxerConfig::default(), backend);

    handle.start().unwrap();
    feed_video(&node, 0..10);
    let failed_path = handle.current_file().unwrap();

    broken.store(true, Ordering::SeqCst);
    feed_video(&node, 10..12);
    assert!(handle.is_writing_disabled());
    assert!(!handle.is_recording());
    assert!(matches!(handle.start(), Err(Error::WritingDisabled)));

    let error = events
        .drain()
        .into_iter()
        .find_map(|e| match e {
            Event::StreamError { path, message, .. } => Some((path, message)),
            _ => None,
        })
        .unwrap();
    assert_eq!(error.0, Some(failed_path.clone()));
    assert!(error.1.contains("disk full"));

    // The aborted file keeps what was written and has no end marker
    let partial = read_framed_file(&failed_path).unwrap();
    assert_eq!(partial.len(), 10);
    assert!(!partial.iter().any(|r| r.is_eos()));

    broken.store(false, Ordering::SeqCst);
    handle.resume_writing();
    handle.start().unwrap();
    feed_video(&node, 12..=60);
    handle.stop().unwrap();

    let stats = handle.stats();
    assert_eq!(stats.write_errors, 1);
    assert_eq!(stats.files_opened, 2);
    assert_eq!(stats.files_completed, 1);
    node.stop().unwrap();
}
