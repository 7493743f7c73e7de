use std::io::Error as IOError;

use thiserror::Error;
use tokio::task::JoinError;

use crate::cloud_storage::error::DirectoryError;
use crate::uploader::error::{HistoryError, ReportError};
use crate::utils::error::{ConfigError, DiscoveryError};

pub type Result<T> = core::result::Result<T, UploaderError>;

/// Failures that end the whole run
#[derive(Error, Debug)]
pub enum UploaderError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("server directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("no upload server is reachable in any zone")]
    NoServerAvailable,

    #[error("authentication rejected, run aborted: {0}")]
    Authentication(String),

    #[error("history error: {0}")]
    History(#[from] HistoryError),

    #[error("report error: {0}")]
    Report(#[from] ReportError),

    #[error("io error: {0}")]
    IOError(#[from] IOError),

    #[error("tokio join error: {0}")]
    TokioJoinError(#[from] JoinError),

    #[error("unexpected error: {0}")]
    UnexpectedError(#[source] color_eyre::Report),
}
