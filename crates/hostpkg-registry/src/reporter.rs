use std::collections::BTreeMap;
use std::sync::Arc;

use hostpkg_core::{Clock, EnvironmentCollector, EnvironmentFacts, Result};

use crate::package_service::PackageService;
use crate::result::{PackageResult, ResultRecord, ResultStep};

const NANOS_PER_MILLI: i64 = 1_000_000;

pub trait Reporter: Send + Sync {
    fn report(&self, result: &PackageResult) -> Result<()>;
}

pub struct ResultReporter {
    service: Arc<dyn PackageService>,
    collector: Arc<dyn EnvironmentCollector>,
    clock: Arc<dyn Clock>,
}

impl ResultReporter {
    pub fn new(
        service: Arc<dyn PackageService>,
        collector: Arc<dyn EnvironmentCollector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            service,
            collector,
            clock,
        }
    }

    pub fn compose(&self, result: &PackageResult) -> ResultRecord {
        let facts = self.collector.collect().unwrap_or_else(|err| {
            tracing::warn!(
                error = %err,
                "environment collection failed; reporting without attributes"
            );
            EnvironmentFacts::default()
        });

        let steps = result
            .trace
            .iter()
            .map(|step| ResultStep {
                action: step.operation.clone(),
                result: step.exitcode,
                timing: (step.timing - result.timing) / NANOS_PER_MILLI,
            })
            .collect();

        ResultRecord {
            package_name: result.package_name.clone(),
            package_version: result.version.clone(),
            previous_package_version: result
                .previous_version
                .clone()
                .filter(|version| !version.is_empty()),
            operation: result.operation.as_str().to_string(),
            overall_timing: (self.clock.now_unix_nanos() - result.timing) / NANOS_PER_MILLI,
            result: result.exit_code(),
            attributes: result_attributes(&facts),
            steps,
        }
    }
}

impl Reporter for ResultReporter {
    fn report(&self, result: &PackageResult) -> Result<()> {
        let record = self.compose(result);
        self.service.put_result(&record)?;
        tracing::debug!(
            package = %record.package_name,
            version = %record.package_version,
            result = record.result,
            "result reported"
        );
        Ok(())
    }
}

fn result_attributes(facts: &EnvironmentFacts) -> BTreeMap<String, String> {
    let os = &facts.operating_system;
    let infra = &facts.infrastructure;
    [
        ("platformName", &os.platform),
        ("platformVersion", &os.platform_version),
        ("architecture", &os.architecture),
        ("instanceID", &infra.instance_id),
        ("instanceType", &infra.instance_type),
        ("region", &infra.region),
        ("availabilityZone", &infra.availability_zone),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.clone()))
    .collect()
}
