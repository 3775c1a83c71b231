mod download;
mod manifest_cache;
mod package_service;
mod reporter;
mod resolver;
mod result;

pub use download::{ArtifactDownloader, HttpArtifactDownloader};
pub use manifest_cache::{FsManifestCache, ManifestCache};
pub use package_service::{HttpPackageService, PackageService};
pub use reporter::{Reporter, ResultReporter};
pub use resolver::{ManifestResolver, PackageResolver, ResolvedManifest};
pub use result::{Operation, PackageResult, ResultRecord, ResultStep};

/// Version token the remote service resolves to the newest published manifest.
pub const LATEST_VERSION: &str = "latest";

#[cfg(test)]
mod tests;
