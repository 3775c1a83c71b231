use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::*;

const SAMPLE_MANIFEST: &str = r#"{
  "packageArn": "arn:aws:ssm:::package/Agent",
  "version": "1.2.0",
  "packages": {
    "linux": {
      "_any": {
        "amd64": { "file": "agent-linux-amd64.tar.gz" },
        "_any": { "file": "agent-linux-any.tar.gz" }
      },
      "22.04": {
        "arm64": { "file": "agent-jammy-arm64.tar.gz" }
      }
    },
    "_any": {
      "_any": {
        "_any": { "file": "agent-generic.zip" }
      }
    }
  },
  "files": {
    "agent-linux-amd64.tar.gz": {
      "downloadLocation": "https://example.test/agent-linux-amd64.tar.gz",
      "checksums": { "sha256": "aaa" }
    },
    "agent-linux-any.tar.gz": {
      "downloadLocation": "https://example.test/agent-linux-any.tar.gz",
      "checksums": { "sha256": "bbb" }
    },
    "agent-jammy-arm64.tar.gz": {
      "downloadLocation": "https://example.test/agent-jammy-arm64.tar.gz",
      "checksums": { "sha256": "ccc" }
    },
    "agent-generic.zip": {
      "downloadLocation": "https://example.test/agent-generic.zip",
      "checksums": { "sha256": "ddd" }
    }
  }
}"#;

fn sample_manifest() -> Manifest {
    Manifest::from_json_slice(SAMPLE_MANIFEST.as_bytes()).expect("manifest should parse")
}

#[test]
fn parse_manifest_wire_shape() {
    let manifest = sample_manifest();
    assert_eq!(manifest.package_arn, "arn:aws:ssm:::package/Agent");
    assert_eq!(manifest.version, "1.2.0");
    assert_eq!(manifest.packages.len(), 2);
    assert_eq!(
        manifest.files["agent-linux-amd64.tar.gz"].checksums["sha256"],
        "aaa"
    );
}

#[test]
fn manifest_serialises_with_wire_field_names() {
    let encoded = String::from_utf8(sample_manifest().to_json_vec().expect("must encode"))
        .expect("utf8");
    assert!(encoded.contains("\"packageArn\""));
    assert!(encoded.contains("\"downloadLocation\""));
    assert!(!encoded.contains("package_arn"));
}

#[test]
fn malformed_manifest_is_decode_error() {
    let err = Manifest::from_json_slice(b"{\"packageArn\": ").expect_err("must reject");
    assert!(matches!(err, PackageError::Decode { .. }));
}

#[test]
fn manifest_missing_selector_level_is_rejected_at_parse_time() {
    let raw = r#"{
      "packageArn": "pkg",
      "version": "1.0.0",
      "packages": { "linux": { "_any": { "file": "x" } } },
      "files": {}
    }"#;
    let err = Manifest::from_json_slice(raw.as_bytes()).expect_err("must reject");
    assert!(matches!(err, PackageError::Decode { .. }), "unexpected: {err}");
}

#[test]
fn manifest_with_empty_selector_level_is_rejected() {
    let raw = r#"{
      "packageArn": "pkg",
      "version": "1.0.0",
      "packages": { "linux": { "_any": {} } },
      "files": {}
    }"#;
    let err = Manifest::from_json_slice(raw.as_bytes()).expect_err("must reject");
    assert!(err.to_string().contains("no architecture selectors"));
}

#[test]
fn manifest_with_empty_arn_is_rejected() {
    let raw = r#"{ "packageArn": " ", "version": "1.0.0" }"#;
    let err = Manifest::from_json_slice(raw.as_bytes()).expect_err("must reject");
    assert!(err.to_string().contains("packageArn"));
}

#[test]
fn manifest_without_platform_selectors_is_rejected() {
    for raw in [
        r#"{ "packageArn": "pkg", "version": "1.0.0", "files": {} }"#,
        r#"{ "packageArn": "pkg", "version": "1.0.0", "packages": {}, "files": {} }"#,
    ] {
        let err = Manifest::from_json_slice(raw.as_bytes()).expect_err("must reject");
        assert!(matches!(err, PackageError::Decode { .. }), "unexpected: {err}");
        assert!(err.to_string().contains("no platform selectors"));
    }
}

#[test]
fn exact_selector_keys_win_over_wildcards() {
    let manifest = sample_manifest();
    let file = manifest
        .resolve_file(&Selector::new("linux", "20.04", "amd64"))
        .expect("must resolve");
    assert_eq!(
        file.download_location,
        "https://example.test/agent-linux-amd64.tar.gz"
    );

    let file = manifest
        .resolve_file(&Selector::new("linux", "22.04", "arm64"))
        .expect("must resolve");
    assert_eq!(
        file.download_location,
        "https://example.test/agent-jammy-arm64.tar.gz"
    );
}

#[test]
fn wildcard_is_used_when_no_exact_key_exists() {
    let manifest = sample_manifest();
    let info = manifest
        .select_package(&Selector::new("linux", "20.04", "arm64"))
        .expect("must resolve");
    assert_eq!(info.file, "agent-linux-any.tar.gz");

    let info = manifest
        .select_package(&Selector::new("windows", "10", "amd64"))
        .expect("must resolve");
    assert_eq!(info.file, "agent-generic.zip");
}

#[test]
fn selector_levels_do_not_backtrack() {
    // linux/22.04 matches exactly, so the linux/_any branch is never consulted
    // even though it would cover amd64.
    let manifest = sample_manifest();
    let err = manifest
        .select_package(&Selector::new("linux", "22.04", "amd64"))
        .expect_err("must not backtrack");
    assert_eq!(
        err,
        PackageError::NoMatchingPlatform {
            platform: "linux".to_string(),
            platform_version: "22.04".to_string(),
            architecture: "amd64".to_string(),
        }
    );
}

#[test]
fn no_platform_match_without_wildcard() {
    let raw = r#"{
      "packageArn": "pkg",
      "version": "1.0.0",
      "packages": { "linux": { "_any": { "amd64": { "file": "a" } } } },
      "files": { "a": { "downloadLocation": "https://example.test/a", "checksums": {} } }
    }"#;
    let manifest = Manifest::from_json_slice(raw.as_bytes()).expect("must parse");
    let err = manifest
        .resolve_file(&Selector::new("windows", "10", "amd64"))
        .expect_err("must fail");
    assert!(matches!(err, PackageError::NoMatchingPlatform { .. }));
}

#[test]
fn selected_file_missing_from_table_is_missing_file_entry() {
    let raw = r#"{
      "packageArn": "pkg",
      "version": "1.0.0",
      "packages": { "_any": { "_any": { "_any": { "file": "ghost.zip" } } } },
      "files": {}
    }"#;
    let manifest = Manifest::from_json_slice(raw.as_bytes()).expect("must parse");
    let err = manifest
        .resolve_file(&Selector::new("linux", "1", "amd64"))
        .expect_err("must fail");
    assert_eq!(
        err,
        PackageError::MissingFileEntry {
            file: "ghost.zip".to_string()
        }
    );
}

#[test]
fn selector_is_built_from_environment_facts() {
    let facts = EnvironmentFacts {
        operating_system: OperatingSystem {
            platform: "linux".to_string(),
            platform_version: "22.04".to_string(),
            architecture: "arm64".to_string(),
        },
        infrastructure: Infrastructure::default(),
    };
    assert_eq!(Selector::from(&facts), Selector::new("linux", "22.04", "arm64"));
}

#[test]
fn content_digest_ignores_key_order() {
    let reordered = r#"{
      "version": "1.0.0",
      "packages": { "_any": { "_any": { "_any": { "file": "a" } } } },
      "files": {
        "b": { "checksums": { "sha256": "2" }, "downloadLocation": "https://example.test/b" },
        "a": { "downloadLocation": "https://example.test/a", "checksums": { "sha256": "1" } }
      },
      "packageArn": "pkg"
    }"#;
    let ordered = r#"{
      "packageArn": "pkg",
      "version": "1.0.0",
      "packages": { "_any": { "_any": { "_any": { "file": "a" } } } },
      "files": {
        "a": { "downloadLocation": "https://example.test/a", "checksums": { "sha256": "1" } },
        "b": { "downloadLocation": "https://example.test/b", "checksums": { "sha256": "2" } }
      }
    }"#;
    let left = Manifest::from_json_slice(reordered.as_bytes()).expect("must parse");
    let right = Manifest::from_json_slice(ordered.as_bytes()).expect("must parse");
    assert!(left.same_content(&right));

    let mut changed = right.clone();
    changed.version = "1.0.1".to_string();
    assert!(!left.same_content(&changed));
}

#[test]
fn version_transition_classification() {
    assert_eq!(
        VersionTransition::classify("0.0.1", "0.0.2"),
        VersionTransition::Upgrade
    );
    assert_eq!(
        VersionTransition::classify("1.4.0", "1.2.9"),
        VersionTransition::Downgrade
    );
    assert_eq!(
        VersionTransition::classify("1.0", "1.0"),
        VersionTransition::Reinstall
    );
    assert_eq!(
        VersionTransition::classify("2024-01", "2024-02"),
        VersionTransition::Change
    );
}

#[test]
fn result_status_exit_codes() {
    assert_eq!(ResultStatus::Success.exit_code(), 0);
    assert_eq!(ResultStatus::SuccessAndReboot.exit_code(), 3010);
    assert!(ResultStatus::SuccessAndReboot.is_success());
    assert!(ResultStatus::SuccessAndReboot.requires_reboot());
    assert!(!ResultStatus::Failed.is_success());
}

struct StepClock(AtomicI64);

impl Clock for StepClock {
    fn now_unix_nanos(&self) -> i64 {
        self.0.fetch_add(1_000_000, Ordering::SeqCst)
    }
}

#[test]
fn tracer_records_sections_in_order() {
    let mut tracer = Tracer::new(Arc::new(StepClock(AtomicI64::new(5_000_000))));
    assert_eq!(tracer.started_at(), 5_000_000);

    let resolve = tracer.begin_section("resolve manifest");
    tracer.append_info(resolve, "manifest unchanged");
    tracer.end(resolve, 0);
    let install = tracer.begin_section("install");
    tracer.fail(install, "exit status 2");

    let steps = tracer.into_steps();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].operation, "resolve manifest");
    assert_eq!(steps[0].timing, 6_000_000);
    assert_eq!(steps[0].info, vec!["manifest unchanged"]);
    assert_eq!(steps[1].exitcode, 1);
    assert_eq!(steps[1].error.as_deref(), Some("exit status 2"));
}

#[test]
fn pre_mutation_classification() {
    assert!(PackageError::transport("timeout").is_pre_mutation());
    assert!(PackageError::AlreadyLocked {
        name: "a".to_string(),
        holder: "install".to_string()
    }
    .is_pre_mutation());
    assert!(!PackageError::storage("disk full").is_pre_mutation());
}

#[test]
fn path_components_are_escaped() {
    assert_eq!(escape_path_component("arn:aws/pkg"), "arn%3Aaws%2Fpkg");
    assert_eq!(escape_path_component(".."), "%2E.");
    assert_eq!(escape_path_component("1.2.0"), "1.2.0");
    assert_eq!(escape_path_component(""), "%");
}

#[test]
fn restored_trace_keeps_original_start_and_earlier_steps_first() {
    let clock = Arc::new(StepClock(AtomicI64::new(1_000_000)));
    let mut before_reboot = Tracer::new(clock.clone());
    let install = before_reboot.begin_section("install agent 1.0.0");
    before_reboot.end(install, 3010);
    let snapshot = TraceSnapshot::from_json_slice(
        &before_reboot.snapshot().to_json_vec().expect("must encode"),
    )
    .expect("must decode");

    let mut resumed = Tracer::new(clock);
    let resolve = resumed.begin_section("resolve manifest");
    resumed.end(resolve, 0);
    resumed.restore(snapshot);

    assert_eq!(resumed.started_at(), 1_000_000);
    let operations: Vec<_> = resumed
        .steps()
        .iter()
        .map(|step| step.operation.as_str())
        .collect();
    assert_eq!(operations, vec!["install agent 1.0.0", "resolve manifest"]);
    assert_eq!(resumed.steps()[0].exitcode, 3010);
}
