//! Receiver status flags and liveness counters
//!
//! A single shared struct carries everything that is read outside the
//! control thread: the coarse status flags, the reported video size, and
//! the timestamp of the last buffer observed at the video sink. Streaming
//! threads write `last_frame_time` through a pad probe; the watchdog and
//! the public getters read it. All fields use atomic operations.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::time::Duration;

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

pub struct ReceiverStats {
    streaming: AtomicBool,
    decoding: AtomicBool,
    recording: AtomicBool,

    video_width: AtomicI32,
    video_height: AtomicI32,

    /// Unix microseconds of the last buffer seen at the video sink.
    last_frame_time: AtomicU64,

    /// Buffers that reached the video sink.
    frames_rendered: AtomicU64,

    /// Total payload bytes that reached the video sink.
    bytes_rendered: AtomicU64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self {
            streaming: AtomicBool::new(false),
            decoding: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            video_width: AtomicI32::new(0),
            video_height: AtomicI32::new(0),
            last_frame_time: AtomicU64::new(now_micros()),
            frames_rendered: AtomicU64::new(0),
            bytes_rendered: AtomicU64::new(0),
        }
    }

    /// Record a buffer arriving at the video sink. Called from streaming
    /// threads; relaxed ordering is enough, the watchdog tolerates a tick
    /// of slack.
    pub fn note_frame(&self, size: usize) {
        self.last_frame_time.store(now_micros(), Ordering::Relaxed);
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
        self.bytes_rendered
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Reset the frame clock, e.g. when a decoding branch attaches, so a
    /// fresh branch is not immediately judged stalled.
    pub fn reset_frame_clock(&self) {
        self.last_frame_time.store(now_micros(), Ordering::Relaxed);
    }

    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last = self.last_frame_time.load(Ordering::Relaxed);
        let elapsed = now_micros().saturating_sub(last);
        elapsed > threshold.as_micros() as u64
    }

    pub fn set_streaming(&self, value: bool) {
        self.streaming.store(value, Ordering::Relaxed);
    }

    pub fn set_decoding(&self, value: bool) {
        self.decoding.store(value, Ordering::Relaxed);
    }

    pub fn set_recording(&self, value: bool) {
        self.recording.store(value, Ordering::Relaxed);
    }

    pub fn set_video_size(&self, width: i32, height: i32) {
        self.video_width.store(width, Ordering::Relaxed);
        self.video_height.store(height, Ordering::Relaxed);
    }

    pub fn streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    pub fn decoding(&self) -> bool {
        self.decoding.load(Ordering::Relaxed)
    }

    pub fn recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    pub fn video_size(&self) -> Option<(i32, i32)> {
        let w = self.video_width.load(Ordering::Relaxed);
        let h = self.video_height.load(Ordering::Relaxed);
        if w > 0 && h > 0 {
            Some((w, h))
        } else {
            None
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn bytes_rendered(&self) -> u64 {
        self.bytes_rendered.load(Ordering::Relaxed)
    }
}

impl Default for ReceiverStats {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReceiverStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "streaming={} decoding={} recording={} frames={} bytes={}",
            self.streaming(),
            self.decoding(),
            self.recording(),
            self.frames_rendered(),
            self.bytes_rendered()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counters() {
        let stats = ReceiverStats::new();

        stats.note_frame(1000);
        stats.note_frame(2000);
        stats.note_frame(1500);

        assert_eq!(stats.frames_rendered(), 3);
        assert_eq!(stats.bytes_rendered(), 4500);
    }

    #[test]
    fn test_stall_detection() {
        let stats = ReceiverStats::new();

        stats.note_frame(1000);
        assert!(!stats.is_stalled(Duration::from_secs(1)));

        std::thread::sleep(Duration::from_millis(150));
        assert!(stats.is_stalled(Duration::from_millis(100)));

        // A fresh frame clears the stall
        stats.note_frame(1000);
        assert!(!stats.is_stalled(Duration::from_millis(100)));
    }

    #[test]
    fn test_video_size() {
        let stats = ReceiverStats::new();
        assert_eq!(stats.video_size(), None);

        stats.set_video_size(1280, 720);
        assert_eq!(stats.video_size(), Some((1280, 720)));
    }
}
