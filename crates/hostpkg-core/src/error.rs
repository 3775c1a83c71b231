//! Error taxonomy shared by every lifecycle component.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PackageError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageError {
    #[error("failed to decode manifest: {message}")]
    Decode { message: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error(
        "no manifest entry for platform: {platform}, version {platform_version}, architecture {architecture}"
    )]
    NoMatchingPlatform {
        platform: String,
        platform_version: String,
        architecture: String,
    },

    #[error("manifest selects file '{file}' which is missing from the file table")]
    MissingFileEntry { file: String },

    #[error("package '{name}' is locked by another operation ({holder})")]
    AlreadyLocked { name: String, holder: String },

    #[error("package '{name}' version {version} failed validation: {message}")]
    Validation {
        name: String,
        version: String,
        message: String,
    },

    #[error("{action} of {name} {version} failed: {message}")]
    InstallerFailure {
        name: String,
        version: String,
        action: String,
        message: String,
    },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("rollback of {name} to {previous_version} failed: {rollback}; original failure: {original}")]
    RollbackFailure {
        name: String,
        previous_version: String,
        original: Box<PackageError>,
        rollback: Box<PackageError>,
    },

    #[error("operation cancelled before {stage}")]
    Cancelled { stage: String },

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl PackageError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Errors of this class are raised before the package state is touched.
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. }
                | Self::NotFound { .. }
                | Self::NoMatchingPlatform { .. }
                | Self::MissingFileEntry { .. }
                | Self::AlreadyLocked { .. }
                | Self::Transport { .. }
                | Self::Cancelled { .. }
        )
    }
}
