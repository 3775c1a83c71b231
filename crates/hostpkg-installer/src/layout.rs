use anyhow::{Context, Result};
use hostpkg_core::escape_path_component;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk layout of the agent's package repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixLayout {
    prefix: PathBuf,
}

impl PrefixLayout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.prefix.join("packages")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.prefix.join("state")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.prefix.join("cache")
    }

    pub fn manifest_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("manifests")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.cache_dir().join("downloads")
    }

    /// Cross-process lock markers, one per locked package.
    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir().join("locks")
    }

    /// Traces of operations waiting on a reboot.
    pub fn traces_dir(&self) -> PathBuf {
        self.state_dir().join("traces")
    }

    pub fn installed_state_dir(&self) -> PathBuf {
        self.state_dir().join("packages")
    }

    pub fn package_root(&self, name: &str) -> PathBuf {
        self.packages_dir().join(escape_path_component(name))
    }

    pub fn package_dir(&self, name: &str, version: &str) -> PathBuf {
        self.package_root(name).join(escape_path_component(version))
    }

    /// Verbatim copy of the artifact a version was installed from.
    pub fn artifact_dir(&self, name: &str, version: &str) -> PathBuf {
        self.package_dir(name, version).join("artifact")
    }

    /// Unpacked artifact contents; installer scripts run from here.
    pub fn payload_dir(&self, name: &str, version: &str) -> PathBuf {
        self.package_dir(name, version).join("payload")
    }

    pub fn artifact_digest_path(&self, name: &str, version: &str) -> PathBuf {
        self.package_dir(name, version).join("artifact.sha256")
    }

    pub fn state_path(&self, name: &str) -> PathBuf {
        self.installed_state_dir()
            .join(format!("{}.state", escape_path_component(name)))
    }

    pub fn trace_path(&self, name: &str) -> PathBuf {
        self.traces_dir()
            .join(format!("{}.json", escape_path_component(name)))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.packages_dir(),
            self.state_dir(),
            self.installed_state_dir(),
            self.locks_dir(),
            self.traces_dir(),
            self.cache_dir(),
            self.manifest_cache_dir(),
            self.downloads_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_agent_prefix() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows agent prefix")?;
        return Ok(PathBuf::from(app_data).join("Hostpkg"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve agent prefix")?;
    Ok(PathBuf::from(home).join(".hostpkg"))
}
