use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hostpkg_core::EnvironmentFacts;
use hostpkg_installer::default_agent_prefix;
use serde::Deserialize;

pub(crate) const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct AgentConfig {
    pub prefix: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub request_timeout_secs: u64,
    pub log_filter: String,
    pub environment: EnvironmentOverrides,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            endpoint: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            environment: EnvironmentOverrides::default(),
        }
    }
}

/// Host facts that replace the detected values when set. Useful for hosts
/// whose reported platform differs from what the manifest publisher targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct EnvironmentOverrides {
    pub platform: Option<String>,
    pub platform_version: Option<String>,
    pub architecture: Option<String>,
    pub instance_id: Option<String>,
    pub instance_type: Option<String>,
    pub region: Option<String>,
    pub availability_zone: Option<String>,
}

impl EnvironmentOverrides {
    pub(crate) fn apply(&self, mut facts: EnvironmentFacts) -> EnvironmentFacts {
        let os = &mut facts.operating_system;
        override_field(&mut os.platform, &self.platform);
        override_field(&mut os.platform_version, &self.platform_version);
        override_field(&mut os.architecture, &self.architecture);
        let infra = &mut facts.infrastructure;
        override_field(&mut infra.instance_id, &self.instance_id);
        override_field(&mut infra.instance_type, &self.instance_type);
        override_field(&mut infra.region, &self.region);
        override_field(&mut infra.availability_zone, &self.availability_zone);
        facts
    }
}

fn override_field(target: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

impl AgentConfig {
    /// Reads `explicit` when given (it must exist), otherwise
    /// `<prefix>/config.toml` if present, otherwise defaults.
    pub(crate) fn load(explicit: Option<&Path>, prefix: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let prefix = match prefix {
                    Some(prefix) => prefix.to_path_buf(),
                    None => default_agent_prefix()?,
                };
                let candidate = prefix.join(CONFIG_FILE_NAME);
                if !candidate.exists() {
                    return Ok(Self::default());
                }
                candidate
            }
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("failed parsing config: {}", path.display()))
    }

    pub(crate) fn parse(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        if config.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        Ok(config)
    }

    /// Command-line flags win over the file.
    pub(crate) fn with_overrides(
        mut self,
        prefix: Option<PathBuf>,
        endpoint: Option<String>,
    ) -> Self {
        if prefix.is_some() {
            self.prefix = prefix;
        }
        if endpoint.is_some() {
            self.endpoint = endpoint;
        }
        self
    }

    pub(crate) fn resolved_prefix(&self) -> Result<PathBuf> {
        match &self.prefix {
            Some(prefix) => Ok(prefix.clone()),
            None => default_agent_prefix(),
        }
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub(crate) fn environment_facts(&self) -> EnvironmentFacts {
        self.environment.apply(EnvironmentFacts::from_host())
    }
}
