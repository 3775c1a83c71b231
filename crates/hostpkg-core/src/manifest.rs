use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PackageError, Result};
use crate::selector::{match_selector_key, Selector};

/// Wildcard key accepted at every selector level.
pub const ANY_SELECTOR: &str = "_any";

/// platform -> platform version -> architecture -> package info
pub type PlatformSelectors = BTreeMap<String, BTreeMap<String, BTreeMap<String, PackageInfo>>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub package_arn: String,
    pub version: String,
    #[serde(default)]
    pub packages: PlatformSelectors,
    #[serde(default)]
    pub files: BTreeMap<String, File>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageInfo {
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub download_location: String,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

impl Manifest {
    pub fn from_json_slice(input: &[u8]) -> Result<Self> {
        let manifest: Self =
            serde_json::from_slice(input).map_err(|err| PackageError::decode(err.to_string()))?;
        manifest.validate_shape()?;
        Ok(manifest)
    }

    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| PackageError::decode(err.to_string()))
    }

    /// Hex sha256 over the canonical serialisation. Maps are ordered, so two
    /// manifests with the same content always share a digest.
    pub fn content_digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    pub fn same_content(&self, other: &Manifest) -> bool {
        self.content_digest() == other.content_digest()
    }

    /// Cascades platform, then platform version, then architecture. Each level
    /// prefers an exact key over `_any`; there is no backtracking across levels.
    pub fn select_package(&self, selector: &Selector) -> Result<&PackageInfo> {
        let no_match = || PackageError::NoMatchingPlatform {
            platform: selector.platform.clone(),
            platform_version: selector.platform_version.clone(),
            architecture: selector.architecture.clone(),
        };

        let versions = match_selector_key(&selector.platform, &self.packages)
            .and_then(|key| self.packages.get(key))
            .ok_or_else(no_match)?;
        let architectures = match_selector_key(&selector.platform_version, versions)
            .and_then(|key| versions.get(key))
            .ok_or_else(no_match)?;
        match_selector_key(&selector.architecture, architectures)
            .and_then(|key| architectures.get(key))
            .ok_or_else(no_match)
    }

    pub fn resolve_file(&self, selector: &Selector) -> Result<&File> {
        let info = self.select_package(selector)?;
        self.files
            .get(&info.file)
            .ok_or_else(|| PackageError::MissingFileEntry {
                file: info.file.clone(),
            })
    }

    fn validate_shape(&self) -> Result<()> {
        if self.package_arn.trim().is_empty() {
            return Err(PackageError::decode("manifest packageArn must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(PackageError::decode(format!(
                "manifest '{}' version must not be empty",
                self.package_arn
            )));
        }

        if self.packages.is_empty() {
            return Err(PackageError::decode(format!(
                "manifest '{}' has no platform selectors",
                self.package_arn
            )));
        }
        for (platform, versions) in &self.packages {
            if versions.is_empty() {
                return Err(PackageError::decode(format!(
                    "platform '{platform}' has no platform version selectors"
                )));
            }
            for (platform_version, architectures) in versions {
                if architectures.is_empty() {
                    return Err(PackageError::decode(format!(
                        "platform '{platform}' version '{platform_version}' has no architecture selectors"
                    )));
                }
                for (architecture, info) in architectures {
                    if info.file.trim().is_empty() {
                        return Err(PackageError::decode(format!(
                            "selector {platform}/{platform_version}/{architecture} names an empty file"
                        )));
                    }
                }
            }
        }

        for (name, file) in &self.files {
            if file.download_location.trim().is_empty() {
                return Err(PackageError::decode(format!(
                    "file '{name}' has an empty downloadLocation"
                )));
            }
        }

        Ok(())
    }
}
