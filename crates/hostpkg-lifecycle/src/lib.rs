//! Install / upgrade / uninstall state machine over the package repository.

mod cancel;
mod orchestrator;
mod request;

pub use cancel::{CancelFlag, CancelState};
pub use orchestrator::LifecycleOrchestrator;
pub use request::{LifecycleAction, LifecycleOutcome, LifecycleRequest};
