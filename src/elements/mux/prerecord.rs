//! Pre-record lookback ring.
//!
//! The ring keeps the last `window` of audio and video regardless of
//! whether a file is open. Retention is by timestamp span, not by count:
//! after every push, buffers older than `newest - window` are evicted from
//! the front of both streams.

use crate::buffer::Buffer;
use crate::clock::Timestamp;
use crate::metadata::MediaType;
use std::collections::VecDeque;
use std::time::Duration;

/// Time-bounded history of recent buffers.
#[derive(Debug)]
pub struct LookbackRing {
    window: Duration,
    video: VecDeque<Buffer>,
    audio: VecDeque<Buffer>,
    newest: Option<Timestamp>,
}

impl LookbackRing {
    /// Create an empty ring retaining `window` of stream time.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            video: VecDeque::new(),
            audio: VecDeque::new(),
            newest: None,
        }
    }

    /// Retention window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Change the retention window, evicting at once if it shrank.
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
        self.evict();
    }

    /// Append a buffer and evict whatever fell out of the window.
    ///
    /// Audio goes to the audio stream; video and generic buffers to the
    /// video stream. EOS sentinels are ignored.
    pub fn push(&mut self, buffer: Buffer) {
        if buffer.is_eos() {
            return;
        }
        let pts = buffer.pts();
        self.newest = Some(self.newest.map_or(pts, |n| n.max(pts)));
        match buffer.media_type() {
            MediaType::Audio => self.audio.push_back(buffer),
            MediaType::Video | MediaType::Generic => self.video.push_back(buffer),
        }
        self.evict();
    }

    fn evict(&mut self) {
        let Some(newest) = self.newest else {
            return;
        };
        let cutoff = newest.saturating_sub(self.window);
        for stream in [&mut self.video, &mut self.audio] {
            while stream.front().is_some_and(|b| b.pts() < cutoff) {
                stream.pop_front();
            }
        }
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.video.clear();
        self.audio.clear();
        self.newest = None;
    }

    /// Number of retained buffers.
    pub fn len(&self) -> usize {
        self.video.len() + self.audio.len()
    }

    /// Check if the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty()
    }

    /// Oldest retained timestamp across both streams.
    pub fn oldest_pts(&self) -> Option<Timestamp> {
        let v = self.video.front().map(Buffer::pts);
        let a = self.audio.front().map(Buffer::pts);
        match (v, a) {
            (Some(v), Some(a)) => Some(v.min(a)),
            (v, a) => v.or(a),
        }
    }

    /// Newest retained timestamp across both streams.
    pub fn newest_pts(&self) -> Option<Timestamp> {
        if self.is_empty() { None } else { self.newest }
    }

    /// Span between the oldest and newest retained buffer.
    pub fn span(&self) -> Duration {
        match (self.oldest_pts(), self.newest_pts()) {
            (Some(oldest), Some(newest)) => newest.span_since(oldest),
            _ => Duration::ZERO,
        }
    }

    /// Whether a retained video key frame exists.
    pub fn has_key_frame(&self) -> bool {
        self.video.iter().any(Buffer::is_key_frame)
    }

    /// Retained content from the best video key frame on, merged by pts.
    ///
    /// The start point is the oldest key frame not older than the oldest
    /// retained audio frame, so both streams are present from the first
    /// record on. If every key frame predates the audio, the newest key
    /// frame is used. Audio older than the start point is left out.
    /// Returns `None` without a retained key frame.
    pub fn snapshot_from_key_frame(&self) -> Option<Vec<Buffer>> {
        let oldest_audio = self.audio.front().map(Buffer::pts);
        let mut keys = self
            .video
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_key_frame());

        let start = match oldest_audio {
            Some(audio_start) => keys
                .clone()
                .find(|(_, b)| b.pts() >= audio_start)
                .or_else(|| keys.next_back()),
            None => keys.next(),
        }
        .map(|(i, _)| i)?;

        let start_pts = self.video[start].pts();
        let mut video = self.video.iter().skip(start).peekable();
        let mut audio = self
            .audio
            .iter()
            .filter(|b| b.pts() >= start_pts)
            .peekable();

        let mut merged = Vec::with_capacity(self.len());
        loop {
            let take_video = match (video.peek(), audio.peek()) {
                (Some(v), Some(a)) => v.pts() <= a.pts(),
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_video { video.next() } else { audio.next() };
            merged.extend(next.cloned());
        }
        Some(merged)
    }
}
