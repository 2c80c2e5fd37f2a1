pub mod job;
pub mod pause;
pub mod session;
pub mod subscription;

pub use job::{CaptureJob, JobKind};
pub use pause::PauseInterval;
pub use session::{
    CaptureRegion, CaptureSession, CaptureSettings, PerformanceStats, Quality, SessionState,
};
pub use subscription::{Caller, SubscriptionTier};
