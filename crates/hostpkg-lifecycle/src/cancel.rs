use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use hostpkg_core::{PackageError, Result};

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const SHUT_DOWN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    Running,
    Cancelled,
    ShutDown,
}

/// Shared signal checked by the orchestrator between coarse steps.
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    state: Arc<AtomicU8>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.store(CANCELLED, Ordering::SeqCst);
    }

    pub fn shut_down(&self) {
        self.state.store(SHUT_DOWN, Ordering::SeqCst);
    }

    pub fn state(&self) -> CancelState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => CancelState::Running,
            CANCELLED => CancelState::Cancelled,
            _ => CancelState::ShutDown,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == CancelState::Cancelled
    }

    pub(crate) fn check(&self, stage: &str) -> Result<()> {
        if self.state() == CancelState::Running {
            return Ok(());
        }
        tracing::info!(stage, state = ?self.state(), "lifecycle request interrupted");
        Err(PackageError::Cancelled {
            stage: stage.to_string(),
        })
    }
}
