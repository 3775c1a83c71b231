use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hostpkg_core::{escape_path_component, PackageError, Result};

/// Last-seen manifest bytes per (package, version). Last write wins per key.
pub trait ManifestCache: Send + Sync {
    fn read_manifest(&self, package: &str, version: &str) -> Result<Vec<u8>>;
    fn write_manifest(&self, package_arn: &str, version: &str, manifest: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FsManifestCache {
    root: PathBuf,
}

impl FsManifestCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self, package: &str, version: &str) -> PathBuf {
        self.root
            .join(escape_path_component(package))
            .join(format!("{}.json", escape_path_component(version)))
    }
}

impl ManifestCache for FsManifestCache {
    fn read_manifest(&self, package: &str, version: &str) -> Result<Vec<u8>> {
        let path = self.manifest_path(package, version);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(PackageError::not_found(
                format!("cached manifest for {package} {version}"),
            )),
            Err(err) => Err(PackageError::storage(format!(
                "failed reading cached manifest {}: {err}",
                path.display()
            ))),
        }
    }

    fn write_manifest(&self, package_arn: &str, version: &str, manifest: &[u8]) -> Result<()> {
        let path = self.manifest_path(package_arn, version);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                PackageError::storage(format!(
                    "failed creating manifest cache dir {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let part_path = path.with_extension("json.part");
        fs::write(&part_path, manifest).map_err(|err| {
            PackageError::storage(format!(
                "failed writing manifest cache file {}: {err}",
                part_path.display()
            ))
        })?;
        fs::rename(&part_path, &path).map_err(|err| {
            let _ = fs::remove_file(&part_path);
            PackageError::storage(format!(
                "failed moving manifest into cache {}: {err}",
                path.display()
            ))
        })
    }
}
