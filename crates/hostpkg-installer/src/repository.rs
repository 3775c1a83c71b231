use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use hostpkg_core::{PackageError, Result, TraceSnapshot};
use sha2::{Digest, Sha256};

use crate::fs_utils::{ArchiveKind, FileSystem};
use crate::installer::{Installer, InstallerFactory, InstallerRequest};
use crate::locks::PackageLocks;
use crate::state::{
    read_package_state, read_trace_snapshot, remove_package_state, remove_trace_snapshot,
    write_package_state, write_trace_snapshot,
};
use crate::{InstallState, PackageState, PackageStateRecord, PrefixLayout, StateData};

/// The authoritative on-host record of every package.
///
/// State mutation is only valid while the caller holds the package lock
/// obtained from [`Repository::lock_package`].
pub trait Repository: Send + Sync {
    /// Last known-good version, or an empty string when nothing is installed.
    fn get_installed_version(&self, package_name: &str) -> Result<String>;
    fn get_install_state(&self, package_name: &str) -> Result<PackageState>;
    fn set_install_state(
        &self,
        package_name: &str,
        version: &str,
        state: InstallState,
        data: StateData,
    ) -> Result<()>;
    /// Fails with `Validation` when the version's artifacts are missing or
    /// do not match the digest recorded at intake.
    fn validate_package(&self, package_name: &str, version: &str) -> Result<()>;
    fn add_package(&self, package_name: &str, version: &str, artifact: &Path) -> Result<()>;
    fn remove_package(&self, package_name: &str, version: &str) -> Result<()>;
    fn get_installer(
        &self,
        package_name: &str,
        manifest_ref: &str,
        configuration: Option<&str>,
        version: &str,
    ) -> Result<Box<dyn Installer>>;
    /// Keeps the trace of an operation waiting on a reboot so the resumed
    /// request can report the whole operation. Requires the package lock.
    fn save_trace(&self, package_name: &str, snapshot: &TraceSnapshot) -> Result<()>;
    fn load_trace(&self, package_name: &str) -> Result<Option<TraceSnapshot>>;
    /// Requires the package lock; clearing an absent trace is not an error.
    fn clear_trace(&self, package_name: &str) -> Result<()>;
    /// Fails with `AlreadyLocked` when any holder, in this process or
    /// another one sharing the repository, has the package.
    fn lock_package(&self, package_name: &str, holder: &str) -> Result<()>;
    fn unlock_package(&self, package_name: &str);
}

pub struct LocalRepository {
    layout: PrefixLayout,
    fs: Arc<dyn FileSystem>,
    factory: Arc<dyn InstallerFactory>,
    locks: PackageLocks,
}

impl LocalRepository {
    pub fn new(
        layout: PrefixLayout,
        fs: Arc<dyn FileSystem>,
        factory: Arc<dyn InstallerFactory>,
    ) -> Self {
        let locks = PackageLocks::with_marker_dir(layout.locks_dir());
        Self {
            layout,
            fs,
            factory,
            locks,
        }
    }

    pub fn is_locked(&self, package_name: &str) -> bool {
        self.locks.is_locked(package_name)
    }

    fn require_lock(&self, package_name: &str) -> Result<()> {
        if self.locks.is_locked(package_name) {
            return Ok(());
        }
        Err(PackageError::storage(format!(
            "refusing to change state of '{package_name}' without holding its lock"
        )))
    }

    fn intake(&self, package_name: &str, version: &str, artifact: &Path) -> anyhow::Result<()> {
        let file_name = artifact
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("artifact path has no file name: {}", artifact.display()))?;

        let artifact_dir = self.layout.artifact_dir(package_name, version);
        let payload_dir = self.layout.payload_dir(package_name, version);
        let stored = artifact_dir.join(file_name);

        self.fs.make_dir(&artifact_dir)?;
        self.fs.copy_file(artifact, &stored)?;
        let digest = sha256_file(&stored)?;
        if ArchiveKind::from_path(&stored).is_some() {
            self.fs.uncompress(&stored, &payload_dir)?;
        } else {
            self.fs.copy_file(&stored, &payload_dir.join(file_name))?;
        }
        // Written last so an interrupted intake never validates.
        self.fs.write_file(
            &self.layout.artifact_digest_path(package_name, version),
            format!("{digest}  {file_name}\n").as_bytes(),
        )
    }
}

impl Repository for LocalRepository {
    fn get_installed_version(&self, package_name: &str) -> Result<String> {
        let current = self.get_install_state(package_name)?;
        let version = match current.state {
            InstallState::NotInstalled | InstallState::Installing => String::new(),
            InstallState::Upgrading | InstallState::RollingBack => {
                current.data.previous_version.unwrap_or(current.version)
            }
            InstallState::Installed | InstallState::Uninstalling | InstallState::Failed => {
                current.version
            }
        };
        Ok(version)
    }

    fn get_install_state(&self, package_name: &str) -> Result<PackageState> {
        match read_package_state(&self.layout, package_name) {
            Ok(Some(record)) => Ok(record.into()),
            Ok(None) => Ok(PackageState::not_installed()),
            Err(err) => {
                let path = self.layout.state_path(package_name);
                if path.is_file() {
                    // Unreadable contents: surface as an inconsistent package.
                    tracing::warn!(
                        package = package_name,
                        error = %format!("{err:#}"),
                        "package state record is corrupt"
                    );
                    return Ok(PackageState {
                        state: InstallState::Failed,
                        version: String::new(),
                        data: StateData::default(),
                    });
                }
                Err(PackageError::storage(format!("{err:#}")))
            }
        }
    }

    fn set_install_state(
        &self,
        package_name: &str,
        version: &str,
        state: InstallState,
        data: StateData,
    ) -> Result<()> {
        self.require_lock(package_name)?;
        if state == InstallState::NotInstalled {
            remove_package_state(&self.layout, package_name)
                .map_err(|err| PackageError::storage(format!("{err:#}")))?;
        } else {
            let record = PackageStateRecord {
                name: package_name.to_string(),
                version: version.to_string(),
                state,
                data,
                updated_at_unix: current_unix_timestamp(),
            };
            write_package_state(&self.layout, &record)
                .map_err(|err| PackageError::storage(format!("{err:#}")))?;
        }
        tracing::info!(package = package_name, version, state = %state, "install state changed");
        Ok(())
    }

    fn validate_package(&self, package_name: &str, version: &str) -> Result<()> {
        let invalid = |message: String| PackageError::Validation {
            name: package_name.to_string(),
            version: version.to_string(),
            message,
        };

        let digest_path = self.layout.artifact_digest_path(package_name, version);
        let raw = match fs::read_to_string(&digest_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(invalid("no artifact recorded for this version".to_string()));
            }
            Err(err) => {
                return Err(PackageError::storage(format!(
                    "failed to read {}: {err}",
                    digest_path.display()
                )));
            }
        };
        let Some((expected, file_name)) = raw.trim().split_once("  ") else {
            return Err(invalid(format!(
                "malformed artifact record: {}",
                digest_path.display()
            )));
        };

        let stored = self
            .layout
            .artifact_dir(package_name, version)
            .join(file_name);
        if !stored.is_file() {
            return Err(invalid(format!("artifact missing: {}", stored.display())));
        }
        if !self.layout.payload_dir(package_name, version).is_dir() {
            return Err(invalid("unpacked payload is missing".to_string()));
        }
        let actual = sha256_file(&stored).map_err(|err| invalid(format!("{err:#}")))?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(invalid(format!(
                "artifact digest mismatch: expected {expected}, got {actual}"
            )));
        }
        Ok(())
    }

    fn add_package(&self, package_name: &str, version: &str, artifact: &Path) -> Result<()> {
        let package_dir = self.layout.package_dir(package_name, version);
        self.fs
            .remove_all(&package_dir)
            .map_err(|err| PackageError::storage(format!("{err:#}")))?;

        if let Err(err) = self.intake(package_name, version, artifact) {
            if let Err(cleanup) = self.fs.remove_all(&package_dir) {
                tracing::warn!(
                    package = package_name,
                    version,
                    error = %format!("{cleanup:#}"),
                    "failed to clean up partial package intake"
                );
            }
            return Err(PackageError::storage(format!(
                "failed to add {package_name} {version}: {err:#}"
            )));
        }
        tracing::debug!(package = package_name, version, "package artifacts stored");
        Ok(())
    }

    fn remove_package(&self, package_name: &str, version: &str) -> Result<()> {
        self.fs
            .remove_all(&self.layout.package_dir(package_name, version))
            .map_err(|err| PackageError::storage(format!("{err:#}")))
    }

    fn get_installer(
        &self,
        package_name: &str,
        manifest_ref: &str,
        configuration: Option<&str>,
        version: &str,
    ) -> Result<Box<dyn Installer>> {
        self.factory.create(InstallerRequest {
            package_name: package_name.to_string(),
            manifest_ref: manifest_ref.to_string(),
            version: version.to_string(),
            configuration: configuration.map(str::to_string),
            payload_dir: self.layout.payload_dir(package_name, version),
        })
    }

    fn save_trace(&self, package_name: &str, snapshot: &TraceSnapshot) -> Result<()> {
        self.require_lock(package_name)?;
        write_trace_snapshot(&self.layout, package_name, snapshot)
            .map_err(|err| PackageError::storage(format!("{err:#}")))?;
        tracing::debug!(
            package = package_name,
            steps = snapshot.steps.len(),
            "trace saved for resume"
        );
        Ok(())
    }

    fn load_trace(&self, package_name: &str) -> Result<Option<TraceSnapshot>> {
        read_trace_snapshot(&self.layout, package_name)
            .map_err(|err| PackageError::storage(format!("{err:#}")))
    }

    fn clear_trace(&self, package_name: &str) -> Result<()> {
        self.require_lock(package_name)?;
        remove_trace_snapshot(&self.layout, package_name)
            .map(|_| ())
            .map_err(|err| PackageError::storage(format!("{err:#}")))
    }

    fn lock_package(&self, package_name: &str, holder: &str) -> Result<()> {
        self.locks.try_lock(package_name, holder)?;
        tracing::debug!(package = package_name, holder, "package locked");
        Ok(())
    }

    fn unlock_package(&self, package_name: &str) {
        if self.locks.unlock(package_name) {
            tracing::debug!(package = package_name, "package unlocked");
        } else {
            tracing::warn!(
                package = package_name,
                "unlock requested for a package that was not locked"
            );
        }
    }
}

pub(crate) fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
