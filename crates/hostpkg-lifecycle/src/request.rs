use hostpkg_core::{PackageError, ResultStatus};
use hostpkg_registry::{PackageResult, LATEST_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Install,
    Upgrade,
    Uninstall,
}

impl LifecycleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Uninstall => "uninstall",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleRequest {
    pub action: LifecycleAction,
    pub package_name: String,
    /// `None` asks the package service for the latest version.
    pub version: Option<String>,
    pub configuration: Option<String>,
}

impl LifecycleRequest {
    pub fn new(action: LifecycleAction, package_name: impl Into<String>) -> Self {
        Self {
            action,
            package_name: package_name.into(),
            version: None,
            configuration: None,
        }
    }

    pub fn install(package_name: impl Into<String>) -> Self {
        Self::new(LifecycleAction::Install, package_name)
    }

    pub fn upgrade(package_name: impl Into<String>) -> Self {
        Self::new(LifecycleAction::Upgrade, package_name)
    }

    pub fn uninstall(package_name: impl Into<String>) -> Self {
        Self::new(LifecycleAction::Uninstall, package_name)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }

    pub fn requested_version(&self) -> &str {
        self.version.as_deref().unwrap_or(LATEST_VERSION)
    }
}

/// What a completed (reported or not) lifecycle request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleOutcome {
    pub result: PackageResult,
    pub status: ResultStatus,
    pub error: Option<PackageError>,
    /// Reporting is telemetry; a failure here never changes `status`.
    pub report_error: Option<PackageError>,
}

impl LifecycleOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn requires_reboot(&self) -> bool {
        self.status.requires_reboot()
    }
}
