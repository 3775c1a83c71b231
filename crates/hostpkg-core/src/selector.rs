use std::collections::BTreeMap;

use crate::environment::EnvironmentFacts;
use crate::manifest::ANY_SELECTOR;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub platform: String,
    pub platform_version: String,
    pub architecture: String,
}

impl Selector {
    pub fn new(
        platform: impl Into<String>,
        platform_version: impl Into<String>,
        architecture: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            platform_version: platform_version.into(),
            architecture: architecture.into(),
        }
    }
}

impl From<&EnvironmentFacts> for Selector {
    fn from(facts: &EnvironmentFacts) -> Self {
        Self::new(
            facts.operating_system.platform.as_str(),
            facts.operating_system.platform_version.as_str(),
            facts.operating_system.architecture.as_str(),
        )
    }
}

/// Picks the map key to use for `key`: the exact key when present, else `_any`.
pub fn match_selector_key<'a, V>(
    key: &'a str,
    candidates: &BTreeMap<String, V>,
) -> Option<&'a str> {
    if candidates.contains_key(key) {
        Some(key)
    } else if candidates.contains_key(ANY_SELECTOR) {
        Some(ANY_SELECTOR)
    } else {
        None
    }
}
