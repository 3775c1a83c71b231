use std::path::PathBuf;
use std::sync::Arc;

use hostpkg_core::{EnvironmentCollector, File, Manifest, PackageError, Result, Selector, Tracer};

use crate::download::ArtifactDownloader;
use crate::manifest_cache::ManifestCache;
use crate::package_service::PackageService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedManifest {
    pub manifest: Manifest,
    /// The freshly fetched manifest matches what was cached for the same
    /// identity. Callers may use it to skip redundant work, nothing more.
    pub unchanged_since_cache: bool,
}

/// Manifest and artifact source consumed by the lifecycle orchestrator.
pub trait PackageResolver: Send + Sync {
    fn resolve_manifest(
        &self,
        tracer: &mut Tracer,
        package_name: &str,
        version: &str,
    ) -> Result<ResolvedManifest>;

    fn download_artifact(
        &self,
        tracer: &mut Tracer,
        package: &str,
        version: &str,
    ) -> Result<PathBuf>;
}

pub struct ManifestResolver {
    service: Arc<dyn PackageService>,
    cache: Arc<dyn ManifestCache>,
    collector: Arc<dyn EnvironmentCollector>,
    downloader: Arc<dyn ArtifactDownloader>,
}

impl ManifestResolver {
    pub fn new(
        service: Arc<dyn PackageService>,
        cache: Arc<dyn ManifestCache>,
        collector: Arc<dyn EnvironmentCollector>,
        downloader: Arc<dyn ArtifactDownloader>,
    ) -> Self {
        Self {
            service,
            cache,
            collector,
            downloader,
        }
    }

    /// Cache-only read; absent and corrupt entries are both `NotFound`.
    pub fn read_cached_manifest(&self, package: &str, version: &str) -> Result<Manifest> {
        let bytes = self.cache.read_manifest(package, version)?;
        Manifest::from_json_slice(&bytes).map_err(|err| {
            tracing::warn!(package, version, error = %err, "ignoring corrupt cached manifest");
            PackageError::not_found(format!("valid cached manifest for {package} {version}"))
        })
    }

    pub fn resolve_file(&self, manifest: &Manifest) -> Result<File> {
        let facts = self.collector.collect()?;
        let selector = Selector::from(&facts);
        let file = manifest.resolve_file(&selector)?;
        tracing::debug!(
            package = %manifest.package_arn,
            version = %manifest.version,
            platform = %selector.platform,
            platform_version = %selector.platform_version,
            architecture = %selector.architecture,
            location = %file.download_location,
            "resolved manifest file"
        );
        Ok(file.clone())
    }

    fn fetch_manifest(&self, package_name: &str, version: &str) -> Result<ResolvedManifest> {
        let bytes = self.service.get_manifest(package_name, version)?;
        let manifest = Manifest::from_json_slice(&bytes)?;

        // Identity is only known after parsing, so the comparison and the
        // write both key on (packageArn, resolved version).
        let unchanged_since_cache = self
            .read_cached_manifest(&manifest.package_arn, &manifest.version)
            .map(|cached| cached.same_content(&manifest))
            .unwrap_or(false);

        self.cache
            .write_manifest(&manifest.package_arn, &manifest.version, &bytes)?;

        Ok(ResolvedManifest {
            manifest,
            unchanged_since_cache,
        })
    }
}

impl PackageResolver for ManifestResolver {
    fn resolve_manifest(
        &self,
        tracer: &mut Tracer,
        package_name: &str,
        version: &str,
    ) -> Result<ResolvedManifest> {
        let section = tracer.begin_section(format!("resolve manifest {package_name} {version}"));
        match self.fetch_manifest(package_name, version) {
            Ok(resolved) => {
                if resolved.unchanged_since_cache {
                    tracer.append_info(section, "manifest unchanged since last fetch");
                }
                tracer.end(section, 0);
                tracing::info!(
                    service = self.service.service_name(),
                    package = package_name,
                    requested = version,
                    resolved = %resolved.manifest.version,
                    unchanged = resolved.unchanged_since_cache,
                    "manifest resolved"
                );
                Ok(resolved)
            }
            Err(err) => {
                tracer.fail(section, &err);
                Err(err)
            }
        }
    }

    fn download_artifact(
        &self,
        tracer: &mut Tracer,
        package: &str,
        version: &str,
    ) -> Result<PathBuf> {
        let section = tracer.begin_section("download artifact");
        let result = (|| -> Result<PathBuf> {
            let manifest = match self.read_cached_manifest(package, version) {
                Ok(manifest) => manifest,
                Err(err) => {
                    tracer.append_info(
                        section,
                        format!("error when reading the manifest from cache {err}"),
                    );
                    self.fetch_manifest(package, version)?.manifest
                }
            };
            let file = self.resolve_file(&manifest)?;
            self.downloader
                .download(&file.download_location, &file.checksums)
        })();

        match &result {
            Ok(path) => {
                tracer.append_info(section, path.display().to_string());
                tracer.end(section, 0);
            }
            Err(err) => tracer.fail(section, err),
        }
        result
    }
}
