use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use hostpkg_core::{
    Clock, EnvironmentCollector, EnvironmentFacts, Infrastructure, OperatingSystem, PackageError,
    ResultStatus, StaticEnvironment, TraceStep, Tracer,
};

use super::*;
use crate::download::file_name_from_url;

const MANIFEST_V1: &str = r#"{
  "packageArn": "arn:aws:ssm:us-east-1::package/Agent",
  "version": "0.0.1",
  "packages": {
    "linux": { "_any": { "amd64": { "file": "agent.tar.gz" } } }
  },
  "files": {
    "agent.tar.gz": {
      "downloadLocation": "https://example.test/agent-0.0.1.tar.gz",
      "checksums": { "sha256": "abc" }
    }
  }
}"#;

const MANIFEST_V1_REORDERED: &str = r#"{
  "files": {
    "agent.tar.gz": {
      "checksums": { "sha256": "abc" },
      "downloadLocation": "https://example.test/agent-0.0.1.tar.gz"
    }
  },
  "version": "0.0.1",
  "packages": {
    "linux": { "_any": { "amd64": { "file": "agent.tar.gz" } } }
  },
  "packageArn": "arn:aws:ssm:us-east-1::package/Agent"
}"#;

#[derive(Default)]
struct FakeService {
    manifests: Mutex<Vec<Result<String, PackageError>>>,
    requests: Mutex<Vec<(String, String)>>,
    results: Mutex<Vec<ResultRecord>>,
    fail_put: bool,
}

impl FakeService {
    fn serving(responses: Vec<Result<String, PackageError>>) -> Self {
        Self {
            manifests: Mutex::new(responses),
            ..Self::default()
        }
    }
}

impl PackageService for FakeService {
    fn service_name(&self) -> &str {
        "fake"
    }

    fn get_manifest(&self, package_name: &str, version: &str) -> hostpkg_core::Result<Vec<u8>> {
        self.requests
            .lock()
            .expect("lock")
            .push((package_name.to_string(), version.to_string()));
        let mut manifests = self.manifests.lock().expect("lock");
        if manifests.is_empty() {
            return Err(PackageError::transport("no scripted manifest"));
        }
        manifests.remove(0).map(String::into_bytes)
    }

    fn put_result(&self, record: &ResultRecord) -> hostpkg_core::Result<()> {
        if self.fail_put {
            return Err(PackageError::transport("service unavailable"));
        }
        self.results.lock().expect("lock").push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeDownloader {
    calls: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl ArtifactDownloader for FakeDownloader {
    fn download(
        &self,
        source_url: &str,
        checksums: &BTreeMap<String, String>,
    ) -> hostpkg_core::Result<PathBuf> {
        self.calls
            .lock()
            .expect("lock")
            .push((source_url.to_string(), checksums.clone()));
        Ok(PathBuf::from("/downloads").join(file_name_from_url(source_url)?))
    }
}

struct FailingCollector;

impl EnvironmentCollector for FailingCollector {
    fn collect(&self) -> hostpkg_core::Result<EnvironmentFacts> {
        Err(PackageError::storage("metadata endpoint unreachable"))
    }
}

struct FixedClock(AtomicI64);

impl Clock for FixedClock {
    fn now_unix_nanos(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn linux_amd64() -> EnvironmentFacts {
    EnvironmentFacts {
        operating_system: OperatingSystem {
            platform: "linux".to_string(),
            platform_version: "22.04".to_string(),
            architecture: "amd64".to_string(),
        },
        infrastructure: Infrastructure {
            instance_id: "i-0123".to_string(),
            instance_type: "m5.large".to_string(),
            region: "us-east-1".to_string(),
            availability_zone: "us-east-1a".to_string(),
        },
    }
}

fn tracer() -> Tracer {
    Tracer::new(Arc::new(FixedClock(AtomicI64::new(0))))
}

struct Harness {
    _root: tempfile::TempDir,
    cache: Arc<FsManifestCache>,
    service: Arc<FakeService>,
    downloader: Arc<FakeDownloader>,
    resolver: ManifestResolver,
}

fn harness(responses: Vec<Result<String, PackageError>>) -> Harness {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = Arc::new(FsManifestCache::new(root.path().join("manifests")));
    let service = Arc::new(FakeService::serving(responses));
    let downloader = Arc::new(FakeDownloader::default());
    let resolver = ManifestResolver::new(
        service.clone(),
        cache.clone(),
        Arc::new(StaticEnvironment::new(linux_amd64())),
        downloader.clone(),
    );
    Harness {
        _root: root,
        cache,
        service,
        downloader,
        resolver,
    }
}

#[test]
fn cache_read_of_unwritten_key_is_not_found() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = FsManifestCache::new(root.path());
    let err = cache
        .read_manifest("Agent", "1.0.0")
        .expect_err("must miss");
    assert!(matches!(err, PackageError::NotFound { .. }));
}

#[test]
fn cache_is_last_write_wins_per_key() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = FsManifestCache::new(root.path());
    cache
        .write_manifest("arn:pkg/Agent", "1.0.0", b"first")
        .expect("must write");
    cache
        .write_manifest("arn:pkg/Agent", "1.0.0", b"second")
        .expect("must overwrite");
    cache
        .write_manifest("arn:pkg/Agent", "1.0.1", b"other")
        .expect("must write");

    assert_eq!(
        cache.read_manifest("arn:pkg/Agent", "1.0.0").expect("read"),
        b"second"
    );
    assert_eq!(
        cache.read_manifest("arn:pkg/Agent", "1.0.1").expect("read"),
        b"other"
    );
}

#[test]
fn cache_paths_stay_inside_the_root() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = FsManifestCache::new(root.path());
    let path = cache.manifest_path("../escape", "..");
    assert!(path.starts_with(root.path()));
    assert_eq!(
        path.file_name().and_then(|name| name.to_str()),
        Some("%2E..json")
    );
}

#[test]
fn resolve_manifest_first_fetch_is_not_unchanged_and_populates_cache() {
    let h = harness(vec![Ok(MANIFEST_V1.to_string())]);
    let mut tracer = tracer();

    let resolved = h
        .resolver
        .resolve_manifest(&mut tracer, "Agent", "latest")
        .expect("must resolve");
    assert_eq!(resolved.manifest.version, "0.0.1");
    assert!(!resolved.unchanged_since_cache);
    assert_eq!(
        h.service.requests.lock().expect("lock").as_slice(),
        &[("Agent".to_string(), "latest".to_string())]
    );

    let cached = h
        .cache
        .read_manifest("arn:aws:ssm:us-east-1::package/Agent", "0.0.1")
        .expect("must be cached");
    assert_eq!(cached, MANIFEST_V1.as_bytes());
    assert_eq!(tracer.steps().len(), 1);
    assert_eq!(tracer.steps()[0].exitcode, 0);
}

#[test]
fn resolving_same_manifest_twice_reports_unchanged() {
    let h = harness(vec![
        Ok(MANIFEST_V1.to_string()),
        Ok(MANIFEST_V1_REORDERED.to_string()),
    ]);
    let mut tracer = tracer();

    h.resolver
        .resolve_manifest(&mut tracer, "Agent", "0.0.1")
        .expect("first resolve");
    let second = h
        .resolver
        .resolve_manifest(&mut tracer, "Agent", "0.0.1")
        .expect("second resolve");
    assert!(second.unchanged_since_cache);
    assert_eq!(
        tracer.steps()[1].info,
        vec!["manifest unchanged since last fetch"]
    );
}

#[test]
fn changed_manifest_is_detected_and_overwrites_cache() {
    let changed = MANIFEST_V1.replace("\"abc\"", "\"def\"");
    let h = harness(vec![Ok(MANIFEST_V1.to_string()), Ok(changed.clone())]);
    let mut tracer = tracer();

    h.resolver
        .resolve_manifest(&mut tracer, "Agent", "0.0.1")
        .expect("first resolve");
    let second = h
        .resolver
        .resolve_manifest(&mut tracer, "Agent", "0.0.1")
        .expect("second resolve");
    assert!(!second.unchanged_since_cache);
    let cached = h
        .cache
        .read_manifest("arn:aws:ssm:us-east-1::package/Agent", "0.0.1")
        .expect("cached");
    assert_eq!(cached, changed.as_bytes());
}

#[test]
fn malformed_remote_manifest_is_decode_error_and_not_cached() {
    let h = harness(vec![Ok("{ not json".to_string())]);
    let mut tracer = tracer();
    let err = h
        .resolver
        .resolve_manifest(&mut tracer, "Agent", "latest")
        .expect_err("must fail");
    assert!(matches!(err, PackageError::Decode { .. }));
    assert!(!h.cache.root().exists());
    assert_eq!(tracer.steps()[0].exitcode, 1);
}

#[test]
fn transport_failure_is_returned_verbatim() {
    let h = harness(vec![Err(PackageError::transport("connection reset"))]);
    let err = h
        .resolver
        .resolve_manifest(&mut tracer(), "Agent", "latest")
        .expect_err("must fail");
    assert_eq!(err, PackageError::transport("connection reset"));
}

#[test]
fn corrupt_cache_entry_reads_as_not_found() {
    let h = harness(Vec::new());
    h.cache
        .write_manifest("Agent", "0.0.1", b"garbage")
        .expect("write");
    let err = h
        .resolver
        .read_cached_manifest("Agent", "0.0.1")
        .expect_err("must fail");
    assert!(matches!(err, PackageError::NotFound { .. }));
}

#[test]
fn resolve_file_uses_collected_environment() {
    let h = harness(Vec::new());
    let manifest = hostpkg_core::Manifest::from_json_slice(MANIFEST_V1.as_bytes()).expect("parse");
    let file = h.resolver.resolve_file(&manifest).expect("must resolve");
    assert_eq!(
        file.download_location,
        "https://example.test/agent-0.0.1.tar.gz"
    );
}

#[test]
fn download_artifact_prefers_cached_manifest() {
    let h = harness(Vec::new());
    h.cache
        .write_manifest("Agent", "0.0.1", MANIFEST_V1.as_bytes())
        .expect("write");

    let path = h
        .resolver
        .download_artifact(&mut tracer(), "Agent", "0.0.1")
        .expect("must download");
    assert_eq!(path, PathBuf::from("/downloads/agent-0.0.1.tar.gz"));
    assert!(h.service.requests.lock().expect("lock").is_empty());

    let calls = h.downloader.calls.lock().expect("lock");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.get("sha256").map(String::as_str), Some("abc"));
}

#[test]
fn download_artifact_fetches_manifest_on_cache_miss() {
    let h = harness(vec![Ok(MANIFEST_V1.to_string())]);
    let mut tracer = tracer();
    h.resolver
        .download_artifact(&mut tracer, "Agent", "0.0.1")
        .expect("must download");
    assert_eq!(h.service.requests.lock().expect("lock").len(), 1);
    assert!(tracer.steps()[0]
        .info
        .iter()
        .any(|info| info.starts_with("error when reading the manifest from cache")));
}

#[test]
fn download_artifact_fails_without_platform_match() {
    let h = harness(Vec::new());
    let windows_only = MANIFEST_V1.replace("\"linux\"", "\"windows\"");
    h.cache
        .write_manifest("Agent", "0.0.1", windows_only.as_bytes())
        .expect("write");
    let err = h
        .resolver
        .download_artifact(&mut tracer(), "Agent", "0.0.1")
        .expect_err("must fail");
    assert!(matches!(err, PackageError::NoMatchingPlatform { .. }));
    assert!(h.downloader.calls.lock().expect("lock").is_empty());
}

fn sample_result() -> PackageResult {
    let mut step = TraceStep::new("install", 0, 1_000_000_000 + 250_000_000);
    step.info.push("ran install.sh".to_string());
    PackageResult {
        package_name: "Agent".to_string(),
        version: "0.0.2".to_string(),
        previous_version: Some("0.0.1".to_string()),
        operation: Operation::Upgrade,
        status: ResultStatus::Success,
        timing: 1_000_000_000,
        trace: vec![
            TraceStep::new("resolve manifest", 0, 1_000_000_000),
            step,
        ],
    }
}

#[test]
fn reporter_rebases_step_timings_to_milliseconds() {
    let service = Arc::new(FakeService::default());
    let reporter = ResultReporter::new(
        service.clone(),
        Arc::new(StaticEnvironment::new(linux_amd64())),
        Arc::new(FixedClock(AtomicI64::new(3_500_000_000))),
    );

    reporter.report(&sample_result()).expect("must report");
    let results = service.results.lock().expect("lock");
    let record = &results[0];
    assert_eq!(record.package_name, "Agent");
    assert_eq!(record.previous_package_version.as_deref(), Some("0.0.1"));
    assert_eq!(record.operation, "Upgrade");
    assert_eq!(record.result, 0);
    assert_eq!(record.overall_timing, 2_500);
    assert_eq!(
        record.steps,
        vec![
            ResultStep {
                action: "resolve manifest".to_string(),
                result: 0,
                timing: 0,
            },
            ResultStep {
                action: "install".to_string(),
                result: 0,
                timing: 250,
            },
        ]
    );
    assert_eq!(record.attributes["platformName"], "linux");
    assert_eq!(record.attributes["instanceID"], "i-0123");
    assert_eq!(record.attributes["availabilityZone"], "us-east-1a");
}

#[test]
fn reporter_degrades_to_empty_attributes_when_collection_fails() {
    let service = Arc::new(FakeService::default());
    let reporter = ResultReporter::new(
        service.clone(),
        Arc::new(FailingCollector),
        Arc::new(FixedClock(AtomicI64::new(1_000_000_000))),
    );
    let mut result = sample_result();
    result.previous_version = Some(String::new());

    let record = reporter.compose(&result);
    assert!(record.previous_package_version.is_none());
    assert_eq!(record.attributes["region"], "");
}

#[test]
fn reporter_surfaces_service_failures() {
    let service = Arc::new(FakeService {
        fail_put: true,
        ..FakeService::default()
    });
    let reporter = ResultReporter::new(
        service,
        Arc::new(StaticEnvironment::new(linux_amd64())),
        Arc::new(FixedClock(AtomicI64::new(0))),
    );
    let err = reporter.report(&sample_result()).expect_err("must fail");
    assert!(matches!(err, PackageError::Transport { .. }));
}

#[test]
fn result_record_uses_service_field_names() {
    let record = ResultRecord {
        package_name: "Agent".to_string(),
        package_version: "1.0.0".to_string(),
        previous_package_version: None,
        operation: "Install".to_string(),
        overall_timing: 12,
        result: 0,
        attributes: BTreeMap::new(),
        steps: Vec::new(),
    };
    let encoded = serde_json::to_string(&record).expect("encode");
    assert!(encoded.contains("\"packageVersion\":\"1.0.0\""));
    assert!(encoded.contains("\"overallTiming\":12"));
    assert!(!encoded.contains("previousPackageVersion"));
}

#[test]
fn file_name_is_derived_from_url_path() {
    assert_eq!(
        file_name_from_url("https://example.test/a/agent.zip?sig=1").expect("name"),
        "agent.zip"
    );
    assert!(file_name_from_url("https://example.test/").is_err());
}
