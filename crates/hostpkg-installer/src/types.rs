use anyhow::{anyhow, Result};

/// Persisted lifecycle state of one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    NotInstalled,
    Installing,
    Installed,
    Upgrading,
    Uninstalling,
    RollingBack,
    Failed,
}

impl InstallState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Upgrading => "upgrading",
            Self::Uninstalling => "uninstalling",
            Self::RollingBack => "rolling_back",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "not_installed" => Ok(Self::NotInstalled),
            "installing" => Ok(Self::Installing),
            "installed" => Ok(Self::Installed),
            "upgrading" => Ok(Self::Upgrading),
            "uninstalling" => Ok(Self::Uninstalling),
            "rolling_back" => Ok(Self::RollingBack),
            "failed" => Ok(Self::Failed),
            _ => Err(anyhow!("invalid install state: {value}")),
        }
    }

    /// A lifecycle operation was in flight when this state was written.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::Installing | Self::Upgrading | Self::Uninstalling | Self::RollingBack
        )
    }
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data carried alongside the state between operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateData {
    /// Rollback target while an upgrade is in flight.
    pub previous_version: Option<String>,
    pub reboot_pending: bool,
}

/// What the repository knows about one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageState {
    pub state: InstallState,
    pub version: String,
    pub data: StateData,
}

impl PackageState {
    pub fn not_installed() -> Self {
        Self {
            state: InstallState::NotInstalled,
            version: String::new(),
            data: StateData::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageStateRecord {
    pub name: String,
    pub version: String,
    pub state: InstallState,
    pub data: StateData,
    pub updated_at_unix: u64,
}

impl From<PackageStateRecord> for PackageState {
    fn from(record: PackageStateRecord) -> Self {
        Self {
            state: record.state,
            version: record.version,
            data: record.data,
        }
    }
}
