use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use hostpkg_core::{escape_path_component, PackageError, Result};

/// Table of package locks. Acquisition never waits: a held name fails fast
/// with `AlreadyLocked`.
///
/// With a marker directory every lock is also claimed as a
/// `<name>.lock` file created with `create_new`, so separate processes
/// sharing one prefix exclude each other. The in-process table answers
/// contention between threads without touching the filesystem.
#[derive(Debug, Default)]
pub struct PackageLocks {
    held: Mutex<HashMap<String, String>>,
    marker_dir: Option<PathBuf>,
}

impl PackageLocks {
    /// Process-local locks only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marker_dir(marker_dir: impl Into<PathBuf>) -> Self {
        Self {
            held: Mutex::default(),
            marker_dir: Some(marker_dir.into()),
        }
    }

    pub fn marker_path(&self, name: &str) -> Option<PathBuf> {
        self.marker_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.lock", escape_path_component(name))))
    }

    pub fn try_lock(&self, name: &str, holder: &str) -> Result<()> {
        let mut held = self.table();
        if let Some(current) = held.get(name) {
            return Err(PackageError::AlreadyLocked {
                name: name.to_string(),
                holder: current.clone(),
            });
        }
        if let Some(marker) = self.marker_path(name) {
            claim_marker(&marker, name, holder)?;
        }
        held.insert(name.to_string(), holder.to_string());
        Ok(())
    }

    /// Returns whether this table held the name. Markers claimed by other
    /// processes are never removed.
    pub fn unlock(&self, name: &str) -> bool {
        let mut held = self.table();
        if held.remove(name).is_none() {
            return false;
        }
        if let Some(marker) = self.marker_path(name) {
            match fs::remove_file(&marker) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(
                        package = name,
                        path = %marker.display(),
                        "lock marker vanished while held"
                    );
                }
                Err(err) => tracing::warn!(
                    package = name,
                    path = %marker.display(),
                    error = %err,
                    "failed to remove lock marker"
                ),
            }
        }
        true
    }

    /// Current holder, whether this process or another one sharing the
    /// marker directory.
    pub fn holder(&self, name: &str) -> Option<String> {
        if let Some(holder) = self.table().get(name) {
            return Some(holder.clone());
        }
        self.marker_path(name)
            .and_then(|marker| read_marker_holder(&marker))
    }

    /// Whether this table holds the name and, with markers, its marker is
    /// still on disk.
    pub fn is_locked(&self, name: &str) -> bool {
        if !self.table().contains_key(name) {
            return false;
        }
        self.marker_path(name)
            .map_or(true, |marker| marker.is_file())
    }

    // The table holds no invariants a panicking holder could break.
    fn table(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn claim_marker(path: &Path, name: &str, holder: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            PackageError::storage(format!("failed to create {}: {err}", parent.display()))
        })?;
    }

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Err(PackageError::AlreadyLocked {
                name: name.to_string(),
                holder: read_marker_holder(path)
                    .unwrap_or_else(|| "another process".to_string()),
            });
        }
        Err(err) => {
            return Err(PackageError::storage(format!(
                "failed to claim lock marker {}: {err}",
                path.display()
            )));
        }
    };

    if let Err(err) = file.write_all(format!("{holder}\n").as_bytes()) {
        let _ = fs::remove_file(path);
        return Err(PackageError::storage(format!(
            "failed to write lock marker {}: {err}",
            path.display()
        )));
    }
    Ok(())
}

fn read_marker_holder(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let holder = raw.lines().next()?.trim();
    (!holder.is_empty()).then(|| holder.to_string())
}
