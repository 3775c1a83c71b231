use std::collections::BTreeMap;

use hostpkg_core::{ResultStatus, TraceStep};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Install,
    Upgrade,
    Uninstall,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "Install",
            Self::Upgrade => "Upgrade",
            Self::Uninstall => "Uninstall",
        }
    }
}

/// Outcome of one lifecycle request, consumed by a [`crate::Reporter`].
/// `timing` is the operation start in unix nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageResult {
    pub package_name: String,
    pub version: String,
    pub previous_version: Option<String>,
    pub operation: Operation,
    pub status: ResultStatus,
    pub timing: i64,
    pub trace: Vec<TraceStep>,
}

impl PackageResult {
    pub fn exit_code(&self) -> i64 {
        self.status.exit_code()
    }
}

/// Wire shape sent to the package service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub package_name: String,
    pub package_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_package_version: Option<String>,
    pub operation: String,
    pub overall_timing: i64,
    pub result: i64,
    pub attributes: BTreeMap<String, String>,
    pub steps: Vec<ResultStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultStep {
    pub action: String,
    pub result: i64,
    /// Milliseconds since the operation started.
    pub timing: i64,
}
