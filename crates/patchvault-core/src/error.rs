//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid patch manifest: {message}")]
    Manifest { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Entry not found in archive: {entry}")]
    EntryNotFound { entry: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn manifest(message: impl Into<String>) -> Self {
        CoreError::Manifest {
            message: message.into(),
        }
    }

    pub fn archive(message: impl Into<String>) -> Self {
        CoreError::Archive {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
