pub mod backend;
pub mod coordinator;
pub mod entitlement;
mod locks;
pub mod state;
pub mod worker;

pub use backend::{Artifact, CaptureBackend, SimulatedBackend};
pub use coordinator::{CaptureCoordinator, LifecycleTimings, RecoveryReport};
pub use entitlement::EntitlementDecision;
pub use worker::CaptureWorker;
