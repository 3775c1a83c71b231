//! Local package repository: on-disk layout, install state records,
//! per-package locks and the installer contract.

mod fs_utils;
mod installer;
mod layout;
mod locks;
mod repository;
mod script;
mod state;
mod types;

pub use fs_utils::{ArchiveKind, FileSystem, LocalFileSystem};
pub use installer::{Installer, InstallerFactory, InstallerRequest};
pub use layout::{default_agent_prefix, PrefixLayout};
pub use locks::PackageLocks;
pub use repository::{LocalRepository, Repository};
pub use script::{
    classify_exit, ScriptAction, ScriptInstaller, ScriptInstallerFactory, REBOOT_EXIT_CODES,
};
pub use state::{
    read_package_state, read_trace_snapshot, remove_package_state, remove_trace_snapshot,
    write_package_state, write_trace_snapshot,
};
pub use types::{InstallState, PackageState, PackageStateRecord, StateData};
