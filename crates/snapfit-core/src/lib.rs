//! snapfit-core — pure pipeline algorithms for photo capture.
//!
//! Contain-fit geometry shared by rendering and overlay, face landmark
//! projection, and the size-budget adaptive compressor.

pub mod compress;
pub mod detect;
pub mod geometry;
pub mod landmarks;

pub use compress::{CompressError, Compressor, FitOutcome};
pub use detect::{DetectError, FaceDetector};
pub use geometry::{compute_contain, ContainTransform, GeometryError};
pub use landmarks::{FaceBox, Feature, LandmarkSet, Point};
