mod environment;
mod error;
mod manifest;
mod paths;
mod selector;
mod status;
mod trace;

pub use environment::{
    EnvironmentCollector, EnvironmentFacts, Infrastructure, OperatingSystem, StaticEnvironment,
};
pub use error::{PackageError, Result};
pub use manifest::{File, Manifest, PackageInfo, PlatformSelectors, ANY_SELECTOR};
pub use paths::escape_path_component;
pub use selector::{match_selector_key, Selector};
pub use status::{PluginOutput, ResultStatus, VersionTransition};
pub use trace::{Clock, SectionId, SystemClock, TraceSnapshot, TraceStep, Tracer};

#[cfg(test)]
mod tests;
