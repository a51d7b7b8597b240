//! Face landmark sets and their projection into capture space.
//!
//! Detectors report coordinates in source-video pixel space. Before drawing
//! an overlay the whole set is re-projected through the same
//! [`ContainTransform`](crate::geometry::ContainTransform) the renderer used
//! for the frame, so overlay and captured pixels stay aligned.

use crate::geometry::ContainTransform;
use serde::{Deserialize, Serialize};

/// A 2D point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Axis-aligned face bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Named facial feature group, used for overlay color-coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Jaw,
    LeftEye,
    RightEye,
    LeftBrow,
    RightBrow,
    Nose,
    Mouth,
}

/// Named groups of detected facial feature points plus a bounding box,
/// all in the coordinate space of the frame the detector ran on.
///
/// Each detection cycle produces a fresh set; sets are consumed by one
/// overlay/draw step and then discarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub jaw: Vec<Point>,
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
    pub left_brow: Vec<Point>,
    pub right_brow: Vec<Point>,
    pub nose: Vec<Point>,
    pub mouth: Vec<Point>,
    pub bounds: Option<FaceBox>,
    /// Detection confidence score, if the detector reports one.
    pub confidence: Option<f32>,
}

impl LandmarkSet {
    /// True when the set carries no points and no bounding box.
    /// Degenerate sets short-circuit overlay drawing.
    pub fn is_empty(&self) -> bool {
        self.groups().all(|(_, pts)| pts.is_empty()) && self.bounds.is_none()
    }

    /// Iterate the feature groups in drawing order (jaw first, so the
    /// coarser outline sits under the finer features).
    pub fn groups(&self) -> impl Iterator<Item = (Feature, &[Point])> {
        [
            (Feature::Jaw, self.jaw.as_slice()),
            (Feature::LeftEye, self.left_eye.as_slice()),
            (Feature::RightEye, self.right_eye.as_slice()),
            (Feature::LeftBrow, self.left_brow.as_slice()),
            (Feature::RightBrow, self.right_brow.as_slice()),
            (Feature::Nose, self.nose.as_slice()),
            (Feature::Mouth, self.mouth.as_slice()),
        ]
        .into_iter()
    }

    /// Re-express every point and the bounding box in destination space.
    ///
    /// The transform must be the exact value the renderer used for the same
    /// frame — recomputing it independently is how overlays drift.
    pub fn project(&self, transform: &ContainTransform) -> LandmarkSet {
        let map = |pts: &[Point]| -> Vec<Point> {
            pts.iter()
                .map(|p| {
                    let (x, y) = transform.project(p.x, p.y);
                    Point { x, y }
                })
                .collect()
        };

        LandmarkSet {
            jaw: map(&self.jaw),
            left_eye: map(&self.left_eye),
            right_eye: map(&self.right_eye),
            left_brow: map(&self.left_brow),
            right_brow: map(&self.right_brow),
            nose: map(&self.nose),
            mouth: map(&self.mouth),
            bounds: self.bounds.map(|b| {
                let (x, y) = transform.project(b.x, b.y);
                FaceBox {
                    x,
                    y,
                    width: b.width * transform.scale,
                    height: b.height * transform.scale,
                }
            }),
            confidence: self.confidence,
        }
    }
}
