use std::io::Error as IOError;
use std::path::PathBuf;

use thiserror::Error;

use crate::cloud_storage::error::DirectoryError;

#[derive(Error, Debug)]
#[error("failed hashing {path}: {source}")]
pub struct HashError {
    pub path: PathBuf,
    #[source]
    pub source: IOError,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerSelectionError {
    #[error("no upload server is available in any zone")]
    NoServerAvailable,
}

/// A failed step of one upload task, classified for the retry policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),

    #[error("authentication rejected: {0}")]
    Unauthorized(String),
}

impl UploadError {
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::Transient(format!("transfer timed out after {after:?}"))
    }
}

impl From<DirectoryError> for UploadError {
    fn from(error: DirectoryError) -> Self {
        if error.is_unauthorized() {
            Self::Unauthorized(error.to_string())
        } else if error.is_transient() {
            Self::Transient(error.to_string())
        } else {
            Self::Fatal(error.to_string())
        }
    }
}

impl From<ServerSelectionError> for UploadError {
    fn from(error: ServerSelectionError) -> Self {
        Self::Fatal(error.to_string())
    }
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("failed writing history to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: IOError,
    },

    #[error("failed serializing history: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    IOError(#[from] IOError),
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;

    #[test]
    fn file_missing_at_upload_is_fatal_for_the_task() {
        let error = UploadError::from(DirectoryError::IOError(ErrorKind::NotFound.into()));
        assert!(matches!(error, UploadError::Fatal(_)));

        let error = UploadError::from(DirectoryError::IOError(ErrorKind::ConnectionReset.into()));
        assert!(matches!(error, UploadError::Transient(_)));
    }
}
