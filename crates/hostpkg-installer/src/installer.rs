use std::path::PathBuf;

use hostpkg_core::{PluginOutput, Result};

/// Package-specific lifecycle actions. Each call runs to completion and
/// reports its own status; the caller decides what a failure means.
pub trait Installer: Send {
    fn install(&self) -> PluginOutput;
    fn uninstall(&self) -> PluginOutput;
    fn validate(&self) -> PluginOutput;
    fn package_name(&self) -> &str;
    fn version(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerRequest {
    pub package_name: String,
    pub manifest_ref: String,
    pub version: String,
    /// Opaque per-request configuration (JSON in practice), passed through.
    pub configuration: Option<String>,
    pub payload_dir: PathBuf,
}

pub trait InstallerFactory: Send + Sync {
    fn create(&self, request: InstallerRequest) -> Result<Box<dyn Installer>>;
}
