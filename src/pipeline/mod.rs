pub mod drop_policy;
pub mod queue;

pub use drop_policy::{fullness_percent, DropPolicy, SEVERITY_SCHEDULE};
pub use queue::{Discarded, FrameQueue, Pop, Wait};
