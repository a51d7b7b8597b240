//! snapfit-capture — camera-facing half of the pipeline.
//!
//! Frame sources and stream ownership, the letterboxed capture surface, and
//! the session thread that ties source, detector, surface, and compressor
//! together.

pub mod session;
pub mod source;
pub mod surface;

pub use session::{spawn_session, CaptureError, CapturedPhoto, SessionHandle};
pub use source::{
    CameraStream, FakeSource, Frame, FrameSource, SourceError, StreamMonitor, StreamOwner,
    StreamTrack, TrackState,
};
pub use surface::{CaptureSurface, RenderPass, SurfaceError, CAPTURE_QUALITY};
