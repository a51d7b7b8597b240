//! Capture session: owns the source, the stream, the detector, and the
//! surface on one dedicated thread.
//!
//! The thread interleaves detection ticks with capture requests, which
//! keeps every canvas touch on a single writer. Closing the session cancels
//! the detection loop first and releases the camera stream only after the
//! loop has stopped, so no detection callback can fire against a torn-down
//! source.

use crate::source::{CameraStream, FrameSource, SourceError};
use crate::surface::{CaptureSurface, SurfaceError, CAPTURE_QUALITY};
use snapfit_core::compress::Compressor;
use snapfit_core::detect::FaceDetector;
use snapfit_core::geometry::{compute_contain, GeometryError};
use snapfit_core::landmarks::LandmarkSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};

/// Pause between detection ticks (~30 fps).
const DETECT_TICK: Duration = Duration::from_millis(33);

/// When compression fails, the unprocessed capture is still usable as long
/// as it stays under this multiple of the budget.
const FALLBACK_CAP_FACTOR: f64 = 2.0;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("source: {0}")]
    Source(#[from] SourceError),
    #[error("surface: {0}")]
    Surface(#[from] SurfaceError),
    #[error("geometry: {0}")]
    Geometry(#[from] GeometryError),
    #[error("capture is {0:.2} MB and compression failed; over the fallback cap")]
    OverFallbackCap(f64),
    #[error("session closed")]
    Closed,
}

/// Final artifact of a capture: encoded JPEG plus how it was produced.
#[derive(Debug, Clone)]
pub struct CapturedPhoto {
    pub jpeg: Vec<u8>,
    pub quality: f32,
    pub size_mb: f64,
    /// Whether a landmark overlay was baked into the capture.
    pub overlay_drawn: bool,
    /// `false` means the budget compressor failed and this is the raw
    /// capture-quality encode (degraded but functional).
    pub compressed: bool,
}

enum SessionRequest {
    TakePhoto {
        include_overlay: bool,
        reply: oneshot::Sender<Result<CapturedPhoto, CaptureError>>,
    },
}

/// Clone-free handle to the capture thread.
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
    cancel: Arc<AtomicBool>,
    landmarks: watch::Receiver<Option<LandmarkSet>>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl SessionHandle {
    /// Render the current frame (plus overlay if requested and available),
    /// encode it, and compress it to the session's budget.
    pub async fn take_photo(&self, include_overlay: bool) -> Result<CapturedPhoto, CaptureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::TakePhoto {
                include_overlay,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CaptureError::Closed)?;
        reply_rx.await.map_err(|_| CaptureError::Closed)?
    }

    /// Latest landmark set published by the detection loop, source-space.
    pub fn latest_landmarks(&self) -> Option<LandmarkSet> {
        self.landmarks.borrow().clone()
    }

    /// Watch channel of detection results, for UIs that track the overlay.
    pub fn landmarks_watch(&self) -> watch::Receiver<Option<LandmarkSet>> {
        self.landmarks.clone()
    }

    /// Cancel the detection loop, wait for the thread to stop, and release
    /// the camera stream.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn a capture session on a dedicated OS thread.
///
/// Fails fast if the destination surface cannot be created.
pub fn spawn_session(
    source: Box<dyn FrameSource>,
    stream: CameraStream,
    detector: Option<Box<dyn FaceDetector>>,
    surface_width: u32,
    surface_height: u32,
    compressor: Compressor,
) -> Result<SessionHandle, CaptureError> {
    let surface = CaptureSurface::new(surface_width, surface_height)?;

    let (tx, rx) = mpsc::channel::<SessionRequest>(4);
    let (landmarks_tx, landmarks_rx) = watch::channel(None);
    let cancel = Arc::new(AtomicBool::new(false));

    let worker = Worker {
        source,
        stream,
        detector,
        surface,
        compressor,
        latest: None,
        landmarks_tx,
        detector_warned: false,
    };

    let cancel_flag = cancel.clone();
    let join = std::thread::Builder::new()
        .name("snapfit-capture".into())
        .spawn(move || worker.run(rx, cancel_flag))
        .map_err(|e| CaptureError::Source(SourceError::ReadFailed(e.to_string())))?;

    Ok(SessionHandle {
        tx,
        cancel,
        landmarks: landmarks_rx,
        join: Some(join),
    })
}

struct Worker {
    source: Box<dyn FrameSource>,
    stream: CameraStream,
    detector: Option<Box<dyn FaceDetector>>,
    surface: CaptureSurface,
    compressor: Compressor,
    /// Landmarks from the most recent detection tick, held only for the
    /// next capture.
    latest: Option<LandmarkSet>,
    landmarks_tx: watch::Sender<Option<LandmarkSet>>,
    detector_warned: bool,
}

impl Worker {
    fn run(mut self, mut rx: mpsc::Receiver<SessionRequest>, cancel: Arc<AtomicBool>) {
        tracing::info!(device = %self.stream.device(), "capture session started");
        while !cancel.load(Ordering::SeqCst) {
            match rx.try_recv() {
                Ok(SessionRequest::TakePhoto {
                    include_overlay,
                    reply,
                }) => {
                    let result = self.take_photo(include_overlay);
                    let _ = reply.send(result);
                }
                Err(TryRecvError::Empty) => {
                    self.detect_tick();
                    std::thread::sleep(DETECT_TICK);
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        // The detection loop is stopped; only now is the stream released.
        self.stream.stop_all();
        tracing::info!(device = %self.stream.device(), "capture session closed");
    }

    /// One detection cycle. Every failure here is non-fatal: the cycle is
    /// skipped and retried on the next tick.
    fn detect_tick(&mut self) {
        let Some(detector) = self.detector.as_mut() else {
            return;
        };

        let (src_w, src_h) = self.source.dimensions();
        if compute_contain(
            src_w as f32,
            src_h as f32,
            self.surface.width() as f32,
            self.surface.height() as f32,
        )
        .is_err()
        {
            // Unsynchronized dimensions mid camera-switch.
            tracing::debug!(src_w, src_h, "invalid geometry, skipping detection cycle");
            return;
        }

        let frame = match self.source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "frame read failed, skipping detection cycle");
                return;
            }
        };

        match detector.detect(&frame.data, frame.width, frame.height) {
            Ok(sets) => {
                self.latest = sets.into_iter().next();
                let _ = self.landmarks_tx.send(self.latest.clone());
            }
            Err(e) => {
                if !self.detector_warned {
                    tracing::warn!(error = %e, "detector unavailable; capture continues without landmarks");
                    self.detector_warned = true;
                }
                self.latest = None;
                let _ = self.landmarks_tx.send(None);
            }
        }
    }

    fn take_photo(&mut self, include_overlay: bool) -> Result<CapturedPhoto, CaptureError> {
        let frame = self.source.read_frame()?;
        // One transform per capture cycle, shared by render and overlay.
        let transform = compute_contain(
            frame.width as f32,
            frame.height as f32,
            self.surface.width() as f32,
            self.surface.height() as f32,
        )?;

        let mut pass = self.surface.begin_render();
        pass.draw_frame(&frame, &transform)?;

        let mut overlay_drawn = false;
        if include_overlay {
            if let Some(set) = &self.latest {
                if !set.is_empty() {
                    pass.draw_overlay(&set.project(&transform));
                    overlay_drawn = true;
                }
            }
        }
        pass.finish();

        let raw = self.surface.to_jpeg(CAPTURE_QUALITY)?;

        match self.compressor.compress(&raw) {
            Ok(fit) => {
                if !fit.reached_budget {
                    tracing::warn!(
                        size_mb = fit.size_mb,
                        quality = fit.quality,
                        "budget not reached, shipping floor-quality capture"
                    );
                }
                Ok(CapturedPhoto {
                    jpeg: fit.data,
                    quality: fit.quality,
                    size_mb: fit.size_mb,
                    overlay_drawn,
                    compressed: true,
                })
            }
            Err(e) => {
                // Degrade to the unprocessed capture rather than blocking
                // the user, as long as it stays under the fallback cap.
                let raw_mb = raw.len() as f64 / BYTES_PER_MB;
                tracing::warn!(error = %e, raw_mb, "compression failed, falling back to raw capture");
                if raw_mb <= self.compressor.budget_mb() * FALLBACK_CAP_FACTOR {
                    Ok(CapturedPhoto {
                        jpeg: raw,
                        quality: CAPTURE_QUALITY,
                        size_mb: raw_mb,
                        overlay_drawn,
                        compressed: false,
                    })
                } else {
                    Err(CaptureError::OverFallbackCap(raw_mb))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FakeSource, StreamTrack};
    use snapfit_core::detect::DetectError;
    use snapfit_core::landmarks::{FaceBox, Point};

    struct FakeDetector {
        fail: bool,
    }

    impl FaceDetector for FakeDetector {
        fn detect(
            &mut self,
            _rgb: &[u8],
            width: u32,
            height: u32,
        ) -> Result<Vec<LandmarkSet>, DetectError> {
            if self.fail {
                return Err(DetectError::Unavailable("model missing".into()));
            }
            Ok(vec![LandmarkSet {
                nose: vec![Point {
                    x: width as f32 / 2.0,
                    y: height as f32 / 2.0,
                }],
                bounds: Some(FaceBox {
                    x: width as f32 / 4.0,
                    y: height as f32 / 4.0,
                    width: width as f32 / 2.0,
                    height: height as f32 / 2.0,
                }),
                confidence: Some(0.9),
                ..Default::default()
            }])
        }
    }

    fn test_stream() -> CameraStream {
        CameraStream::new(
            "/dev/fake0",
            vec![StreamTrack::new("video"), StreamTrack::new("meta")],
        )
    }

    async fn wait_for_landmarks(handle: &SessionHandle) {
        for _ in 0..100 {
            if handle.latest_landmarks().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("detection loop never published landmarks");
    }

    #[tokio::test]
    async fn test_capture_with_overlay() {
        let handle = spawn_session(
            Box::new(FakeSource::new(1920, 1080, [90, 90, 90])),
            test_stream(),
            Some(Box::new(FakeDetector { fail: false })),
            500,
            500,
            Compressor::new(),
        )
        .unwrap();

        wait_for_landmarks(&handle).await;
        let photo = handle.take_photo(true).await.unwrap();
        assert_eq!(&photo.jpeg[0..2], &[0xFF, 0xD8]);
        assert!(photo.overlay_drawn);
        assert!(photo.compressed);
        assert!(photo.size_mb <= 5.0);
        handle.close();
    }

    #[tokio::test]
    async fn test_close_releases_stream_after_detection_stops() {
        let stream = test_stream();
        let monitor = stream.monitor();
        let handle = spawn_session(
            Box::new(FakeSource::new(640, 480, [0, 0, 0])),
            stream,
            Some(Box::new(FakeDetector { fail: false })),
            320,
            240,
            Compressor::new(),
        )
        .unwrap();

        assert!(monitor.any_live());
        handle.close();
        assert!(monitor.all_ended());
    }

    #[tokio::test]
    async fn test_detector_failure_is_non_fatal() {
        let handle = spawn_session(
            Box::new(FakeSource::new(1280, 720, [50, 60, 70])),
            test_stream(),
            Some(Box::new(FakeDetector { fail: true })),
            400,
            400,
            Compressor::new(),
        )
        .unwrap();

        // Give the loop time to hit the failing detector.
        tokio::time::sleep(Duration::from_millis(80)).await;
        let photo = handle.take_photo(true).await.unwrap();
        assert!(!photo.overlay_drawn);
        assert_eq!(&photo.jpeg[0..2], &[0xFF, 0xD8]);
        handle.close();
    }

    #[tokio::test]
    async fn test_capture_without_detector() {
        let handle = spawn_session(
            Box::new(FakeSource::new(800, 600, [10, 20, 30])),
            test_stream(),
            None,
            400,
            300,
            Compressor::new(),
        )
        .unwrap();

        let photo = handle.take_photo(false).await.unwrap();
        assert!(!photo.overlay_drawn);
        assert!(handle.latest_landmarks().is_none());
        handle.close();
    }

    #[test]
    fn test_zero_surface_fails_spawn() {
        let result = spawn_session(
            Box::new(FakeSource::new(640, 480, [0, 0, 0])),
            test_stream(),
            None,
            0,
            500,
            Compressor::new(),
        );
        assert!(matches!(
            result,
            Err(CaptureError::Surface(SurfaceError::ContextUnavailable(_)))
        ));
    }
}
