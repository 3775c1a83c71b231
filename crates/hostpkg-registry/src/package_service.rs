use std::time::Duration;

use hostpkg_core::{PackageError, Result};
use serde::{Deserialize, Serialize};

use crate::result::ResultRecord;

/// Remote package service boundary.
pub trait PackageService: Send + Sync {
    fn service_name(&self) -> &str;

    /// Raw manifest bytes for `version`; the service resolves `latest` itself.
    fn get_manifest(&self, package_name: &str, version: &str) -> Result<Vec<u8>>;

    fn put_result(&self, record: &ResultRecord) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetManifestRequest<'a> {
    package_name: &'a str,
    package_version: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetManifestResponse {
    manifest: String,
}

/// JSON-over-HTTPS client for the package service.
#[derive(Debug, Clone)]
pub struct HttpPackageService {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpPackageService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hostpkg/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| PackageError::transport(format!("failed to build http client: {err}")))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoint)
    }
}

impl PackageService for HttpPackageService {
    fn service_name(&self) -> &str {
        "http"
    }

    fn get_manifest(&self, package_name: &str, version: &str) -> Result<Vec<u8>> {
        let url = self.url("manifests");
        tracing::debug!(package = package_name, version, %url, "requesting manifest");
        let response = self
            .client
            .post(&url)
            .json(&GetManifestRequest {
                package_name,
                package_version: version,
            })
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|err| {
                PackageError::transport(format!("failed to retrieve manifest: {err}"))
            })?;
        let body: GetManifestResponse = response.json().map_err(|err| {
            PackageError::transport(format!("failed to read manifest response: {err}"))
        })?;
        Ok(body.manifest.into_bytes())
    }

    fn put_result(&self, record: &ResultRecord) -> Result<()> {
        let url = self.url("results");
        self.client
            .post(&url)
            .json(record)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|err| PackageError::transport(format!("failed to report results: {err}")))?;
        Ok(())
    }
}
