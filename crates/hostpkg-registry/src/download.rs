use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use hostpkg_core::{PackageError, Result};
use sha2::{Digest, Sha256};

/// Transfers an artifact and verifies it against the manifest checksums.
pub trait ArtifactDownloader: Send + Sync {
    fn download(&self, source_url: &str, checksums: &BTreeMap<String, String>) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct HttpArtifactDownloader {
    download_dir: PathBuf,
    client: reqwest::blocking::Client,
}

impl HttpArtifactDownloader {
    pub fn new(download_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PackageError::transport(format!("failed to build http client: {err}")))?;
        Ok(Self {
            download_dir: download_dir.into(),
            client,
        })
    }
}

impl ArtifactDownloader for HttpArtifactDownloader {
    fn download(&self, source_url: &str, checksums: &BTreeMap<String, String>) -> Result<PathBuf> {
        let expected = expected_sha256(checksums)?;
        let file_name = file_name_from_url(source_url)?;
        let destination = self.download_dir.join(&expected).join(&file_name);
        if destination.exists() && sha256_file(&destination)? == expected {
            tracing::debug!(
                url = source_url,
                path = %destination.display(),
                "artifact already downloaded"
            );
            return Ok(destination);
        }

        let parent = self.download_dir.join(&expected);
        fs::create_dir_all(&parent).map_err(|err| {
            PackageError::storage(format!(
                "failed to create download dir {}: {err}",
                parent.display()
            ))
        })?;

        let part_path = parent.join(format!("{file_name}.part"));
        let result = self.fetch_into(source_url, &part_path);
        let actual = match result {
            Ok(actual) => actual,
            Err(err) => {
                let _ = fs::remove_file(&part_path);
                return Err(err);
            }
        };

        if actual != expected {
            let _ = fs::remove_file(&part_path);
            return Err(PackageError::transport(format!(
                "failed to download installation package reliably, {source_url}: sha256 mismatch (expected {expected}, got {actual})"
            )));
        }

        fs::rename(&part_path, &destination).map_err(|err| {
            PackageError::storage(format!(
                "failed to move downloaded artifact to {}: {err}",
                destination.display()
            ))
        })?;
        tracing::info!(url = source_url, path = %destination.display(), "artifact downloaded");
        Ok(destination)
    }
}

impl HttpArtifactDownloader {
    fn fetch_into(&self, source_url: &str, part_path: &Path) -> Result<String> {
        let mut response = self
            .client
            .get(source_url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|err| {
                PackageError::transport(format!(
                    "failed to download installation package reliably, {source_url}, {err}"
                ))
            })?;

        let file = fs::File::create(part_path).map_err(|err| {
            PackageError::storage(format!("failed to create {}: {err}", part_path.display()))
        })?;
        let mut writer = HashingWriter {
            inner: file,
            hasher: Sha256::new(),
        };
        response.copy_to(&mut writer).map_err(|err| {
            PackageError::transport(format!(
                "failed to download installation package reliably, {source_url}, {err}"
            ))
        })?;
        writer.flush().map_err(|err| {
            PackageError::storage(format!("failed to flush {}: {err}", part_path.display()))
        })?;
        Ok(hex::encode(writer.hasher.finalize()))
    }
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn expected_sha256(checksums: &BTreeMap<String, String>) -> Result<String> {
    checksums
        .iter()
        .find(|(algorithm, _)| algorithm.eq_ignore_ascii_case("sha256"))
        .map(|(_, digest)| digest.trim().to_ascii_lowercase())
        .filter(|digest| digest.len() == 64 && digest.chars().all(|ch| ch.is_ascii_hexdigit()))
        .ok_or_else(|| {
            PackageError::transport("artifact has no valid sha256 checksum; refusing to download")
        })
}

pub(crate) fn file_name_from_url(source_url: &str) -> Result<String> {
    let without_query = source_url
        .split(['?', '#'])
        .next()
        .unwrap_or(source_url);
    let name = without_query
        .rsplit('/')
        .next()
        .map(str::trim)
        .unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return Err(PackageError::transport(format!(
            "cannot derive artifact file name from URL '{source_url}'"
        )));
    }
    Ok(name.to_string())
}

pub(crate) fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|err| {
        PackageError::storage(format!("failed to open {}: {err}", path.display()))
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|err| {
        PackageError::storage(format!("failed to hash {}: {err}", path.display()))
    })?;
    Ok(hex::encode(hasher.finalize()))
}
