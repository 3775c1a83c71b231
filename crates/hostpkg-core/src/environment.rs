use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingSystem {
    pub platform: String,
    pub platform_version: String,
    pub architecture: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infrastructure {
    pub instance_id: String,
    pub instance_type: String,
    pub region: String,
    pub availability_zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentFacts {
    pub operating_system: OperatingSystem,
    pub infrastructure: Infrastructure,
}

impl EnvironmentFacts {
    /// Facts derivable from the compiled target alone. Platform version and
    /// infrastructure identity are left empty for the caller to fill in.
    pub fn from_host() -> Self {
        Self {
            operating_system: OperatingSystem {
                platform: host_platform().to_string(),
                platform_version: String::new(),
                architecture: host_architecture().to_string(),
            },
            infrastructure: Infrastructure::default(),
        }
    }
}

pub trait EnvironmentCollector: Send + Sync {
    fn collect(&self) -> Result<EnvironmentFacts>;
}

/// Collector that hands out a fixed set of facts.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    facts: EnvironmentFacts,
}

impl StaticEnvironment {
    pub fn new(facts: EnvironmentFacts) -> Self {
        Self { facts }
    }
}

impl EnvironmentCollector for StaticEnvironment {
    fn collect(&self) -> Result<EnvironmentFacts> {
        Ok(self.facts.clone())
    }
}

fn host_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        other => other,
    }
}
