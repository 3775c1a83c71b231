use std::cmp::Ordering;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::trace::TraceStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Success,
    SuccessAndReboot,
    Failed,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::SuccessAndReboot => "SuccessAndReboot",
            Self::Failed => "Failed",
        }
    }

    pub fn exit_code(self) -> i64 {
        match self {
            Self::Success => 0,
            Self::SuccessAndReboot => 3010,
            Self::Failed => 1,
        }
    }

    pub fn is_success(self) -> bool {
        !matches!(self, Self::Failed)
    }

    pub fn requires_reboot(self) -> bool {
        matches!(self, Self::SuccessAndReboot)
    }
}

/// What an installer action reports back: a status plus the sub-steps it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOutput {
    pub status: ResultStatus,
    pub steps: Vec<TraceStep>,
    pub message: Option<String>,
}

impl PluginOutput {
    pub fn new(status: ResultStatus) -> Self {
        Self {
            status,
            steps: Vec::new(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_step(mut self, step: TraceStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn describe(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("installer returned {}", self.status.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionTransition {
    Upgrade,
    Downgrade,
    Reinstall,
    Change,
}

impl VersionTransition {
    /// Versions that do not parse as semver are compared only for equality.
    pub fn classify(from: &str, to: &str) -> Self {
        if from == to {
            return Self::Reinstall;
        }
        match (Version::parse(from), Version::parse(to)) {
            (Ok(from), Ok(to)) => match to.cmp(&from) {
                Ordering::Greater => Self::Upgrade,
                Ordering::Less => Self::Downgrade,
                Ordering::Equal => Self::Reinstall,
            },
            _ => Self::Change,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
            Self::Reinstall => "reinstall",
            Self::Change => "change",
        }
    }
}
