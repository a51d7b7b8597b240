//! Pluggable face detection interface.
//!
//! snapfit consumes detections, it does not produce them. A detector backend
//! (ONNX, a remote service, or a test stub) implements [`FaceDetector`] and
//! reports landmark sets in the coordinate space of the frame it was given.

use crate::landmarks::LandmarkSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("detector backend unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Face detection backend over a row-major RGB frame.
///
/// Returned sets are ordered by confidence, best first. An empty vector is a
/// valid result (no face in frame) and is not an error.
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<LandmarkSet>, DetectError>;
}
