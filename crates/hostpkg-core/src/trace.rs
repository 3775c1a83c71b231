use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{PackageError, Result};

pub trait Clock: Send + Sync {
    fn now_unix_nanos(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or_default()
    }
}

/// One recorded sub-operation. `timing` is the absolute start time in unix
/// nanoseconds; reporters rebase it onto the operation start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub operation: String,
    pub exitcode: i64,
    pub timing: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub info: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceStep {
    pub fn new(operation: impl Into<String>, exitcode: i64, timing: i64) -> Self {
        Self {
            operation: operation.into(),
            exitcode,
            timing,
            info: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionId(usize);

/// A trace carried across a reboot: the original start time plus every step
/// recorded before the host went down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSnapshot {
    pub started_at: i64,
    pub steps: Vec<TraceStep>,
}

impl TraceSnapshot {
    pub fn from_json_slice(input: &[u8]) -> Result<Self> {
        serde_json::from_slice(input).map_err(|err| PackageError::decode(err.to_string()))
    }

    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| PackageError::decode(err.to_string()))
    }
}

/// Ordered step trace for a single lifecycle request.
pub struct Tracer {
    clock: Arc<dyn Clock>,
    started_at: i64,
    steps: Vec<TraceStep>,
}

impl Tracer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now_unix_nanos();
        Self {
            clock,
            started_at,
            steps: Vec::new(),
        }
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    pub fn now(&self) -> i64 {
        self.clock.now_unix_nanos()
    }

    pub fn begin_section(&mut self, operation: impl Into<String>) -> SectionId {
        let step = TraceStep::new(operation, 0, self.now());
        self.steps.push(step);
        SectionId(self.steps.len() - 1)
    }

    pub fn append_info(&mut self, section: SectionId, info: impl Into<String>) {
        if let Some(step) = self.steps.get_mut(section.0) {
            step.info.push(info.into());
        }
    }

    pub fn end(&mut self, section: SectionId, exitcode: i64) {
        if let Some(step) = self.steps.get_mut(section.0) {
            step.exitcode = exitcode;
        }
    }

    pub fn fail(&mut self, section: SectionId, error: impl ToString) {
        if let Some(step) = self.steps.get_mut(section.0) {
            step.exitcode = 1;
            step.error = Some(error.to_string());
        }
    }

    pub fn extend(&mut self, steps: impl IntoIterator<Item = TraceStep>) {
        self.steps.extend(steps);
    }

    pub fn snapshot(&self) -> TraceSnapshot {
        TraceSnapshot {
            started_at: self.started_at,
            steps: self.steps.clone(),
        }
    }

    /// Continues an interrupted trace: the snapshot's start time wins and its
    /// steps go before anything recorded so far. Section ids handed out
    /// before the call no longer point at their steps.
    pub fn restore(&mut self, snapshot: TraceSnapshot) {
        self.started_at = snapshot.started_at;
        let recent = std::mem::replace(&mut self.steps, snapshot.steps);
        self.steps.extend(recent);
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<TraceStep> {
        self.steps
    }
}
