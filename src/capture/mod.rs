pub mod bridge;
pub mod frame;
pub mod session;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use bridge::{BridgeStats, CaptureBridge, ReadOutcome};
pub use frame::FrameBuffer;
pub use session::{Capture, CaptureSession, FrameSink};
pub use synthetic::SyntheticSession;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Session;
