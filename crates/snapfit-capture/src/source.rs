//! Frame sources and camera stream ownership.
//!
//! The pipeline never talks to a real camera API directly; it consumes a
//! [`FrameSource`] (live pixels + dimensions) and a [`CameraStream`] (track
//! lifecycle). Holding the two apart keeps the ownership rule enforceable:
//! at most one live stream, and switching stops every track of the previous
//! stream before the next one is attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("stream has ended")]
    StreamEnded,
    #[error("frame read failed: {0}")]
    ReadFailed(String),
}

/// A single decoded video frame, row-major RGB (`width * height * 3` bytes).
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// RGB value at (x, y). Callers must stay in bounds.
    pub(crate) fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Live pixel source with readable dimensions.
///
/// Dimensions may legitimately read 0x0 mid camera-switch; callers skip the
/// cycle rather than propagate degenerate geometry.
pub trait FrameSource: Send {
    fn dimensions(&self) -> (u32, u32);
    fn read_frame(&mut self) -> Result<Frame, SourceError>;
}

/// Lifecycle state of one media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

/// One track of a camera stream. State is shared so monitors can observe
/// the transition to `Ended` after ownership has moved on.
#[derive(Debug, Clone)]
pub struct StreamTrack {
    label: String,
    live: Arc<AtomicBool>,
}

impl StreamTrack {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> TrackState {
        if self.live.load(Ordering::SeqCst) {
            TrackState::Live
        } else {
            TrackState::Ended
        }
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// A camera stream: a labelled set of tracks owned by exactly one holder.
#[derive(Debug)]
pub struct CameraStream {
    device: String,
    tracks: Vec<StreamTrack>,
}

impl CameraStream {
    pub fn new(device: impl Into<String>, tracks: Vec<StreamTrack>) -> Self {
        Self {
            device: device.into(),
            tracks,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.state() == TrackState::Live)
    }

    /// Stop every track. Idempotent.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
        tracing::debug!(device = %self.device, tracks = self.tracks.len(), "stream stopped");
    }

    /// Observer handle that outlives this stream's ownership.
    pub fn monitor(&self) -> StreamMonitor {
        StreamMonitor {
            tracks: self.tracks.clone(),
        }
    }
}

/// Read-only view of a stream's track states.
#[derive(Debug, Clone)]
pub struct StreamMonitor {
    tracks: Vec<StreamTrack>,
}

impl StreamMonitor {
    pub fn all_ended(&self) -> bool {
        self.tracks.iter().all(|t| t.state() == TrackState::Ended)
    }

    pub fn any_live(&self) -> bool {
        self.tracks.iter().any(|t| t.state() == TrackState::Live)
    }
}

/// Enforces the single-live-stream rule across camera switches.
#[derive(Debug, Default)]
pub struct StreamOwner {
    active: Option<CameraStream>,
}

impl StreamOwner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&CameraStream> {
        self.active.as_ref()
    }

    /// Attach `next`, stopping all tracks of the previous stream first.
    /// Both streams being held open at once is the leak this prevents.
    pub fn switch(&mut self, next: CameraStream) {
        if let Some(prev) = self.active.take() {
            tracing::info!(from = %prev.device(), to = %next.device(), "switching camera stream");
            prev.stop_all();
        }
        self.active = Some(next);
    }

    /// Stop and drop the active stream, if any.
    pub fn release(&mut self) {
        if let Some(stream) = self.active.take() {
            stream.stop_all();
        }
    }
}

impl Drop for StreamOwner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Deterministic in-memory frame source for tests and diagnostics.
///
/// Serves a solid-color frame at settable dimensions; `resize` models a
/// camera switch, including the transient 0x0 window a real device exposes.
#[derive(Debug)]
pub struct FakeSource {
    width: u32,
    height: u32,
    fill: [u8; 3],
}

impl FakeSource {
    pub fn new(width: u32, height: u32, fill: [u8; 3]) -> Self {
        Self {
            width,
            height,
            fill,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }
}

impl FrameSource for FakeSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if self.width == 0 || self.height == 0 {
            return Err(SourceError::ReadFailed("source has zero dimensions".into()));
        }
        let pixels = self.width as usize * self.height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&self.fill);
        }
        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(device: &str, n: usize) -> CameraStream {
        let tracks = (0..n)
            .map(|i| StreamTrack::new(format!("{device}-track{i}")))
            .collect();
        CameraStream::new(device, tracks)
    }

    #[test]
    fn test_new_stream_is_live() {
        let s = stream("/dev/video0", 2);
        assert!(s.is_live());
        assert!(s.monitor().any_live());
    }

    #[test]
    fn test_stop_all_ends_every_track() {
        let s = stream("/dev/video0", 3);
        let monitor = s.monitor();
        s.stop_all();
        assert!(monitor.all_ended());
        assert!(!s.is_live());
    }

    #[test]
    fn test_switch_ends_old_before_new_is_active() {
        let mut owner = StreamOwner::new();
        let first = stream("/dev/video0", 2);
        let first_monitor = first.monitor();
        owner.switch(first);
        assert!(owner.active().unwrap().is_live());

        let second = stream("/dev/video2", 2);
        let second_monitor = second.monitor();
        owner.switch(second);

        // Old stream fully ended, new stream live — never both held open.
        assert!(first_monitor.all_ended());
        assert!(second_monitor.any_live());
        assert_eq!(owner.active().unwrap().device(), "/dev/video2");
    }

    #[test]
    fn test_release_stops_active_stream() {
        let mut owner = StreamOwner::new();
        let s = stream("/dev/video0", 1);
        let monitor = s.monitor();
        owner.switch(s);
        owner.release();
        assert!(monitor.all_ended());
        assert!(owner.active().is_none());
    }

    #[test]
    fn test_owner_drop_stops_stream() {
        let s = stream("/dev/video0", 2);
        let monitor = s.monitor();
        {
            let mut owner = StreamOwner::new();
            owner.switch(s);
        }
        assert!(monitor.all_ended());
    }

    #[test]
    fn test_fake_source_serves_frames() {
        let mut src = FakeSource::new(4, 2, [10, 20, 30]);
        let frame = src.read_frame().unwrap();
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        assert_eq!(frame.pixel(3, 1), [10, 20, 30]);
    }

    #[test]
    fn test_fake_source_zero_dimensions_fail() {
        let mut src = FakeSource::new(640, 480, [0, 0, 0]);
        src.resize(0, 0);
        assert!(src.read_frame().is_err());
        assert_eq!(src.dimensions(), (0, 0));
    }
}
