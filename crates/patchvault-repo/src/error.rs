//! Error types for repository operations

use patchvault_core::CoreError;
use thiserror::Error;

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Format error: {message}")]
    Format { message: String },

    #[error("Cannot read patch archive: {message}")]
    ArchiveRead { message: String },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to locate update path to {target}, latest available is {latest}")]
    ChainIncomplete { target: String, latest: String },

    #[error("Bundle error: {message}")]
    BundleIo {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl RepoError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        RepoError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        RepoError::NotFound {
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        RepoError::Format {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        RepoError::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_io(message: impl Into<String>, source: std::io::Error) -> Self {
        RepoError::Storage {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn bundle(message: impl Into<String>) -> Self {
        RepoError::BundleIo {
            message: message.into(),
            source: None,
        }
    }

    pub fn bundle_io(message: impl Into<String>, source: std::io::Error) -> Self {
        RepoError::BundleIo {
            message: message.into(),
            source: Some(source),
        }
    }
}

impl From<CoreError> for RepoError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Manifest { message } => RepoError::Format { message },
            CoreError::Archive { message } => RepoError::ArchiveRead { message },
            CoreError::EntryNotFound { entry } => RepoError::ArchiveRead {
                message: format!("missing archive entry {entry}"),
            },
            CoreError::Io(e) => RepoError::storage_io("archive I/O failed", e),
        }
    }
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;
