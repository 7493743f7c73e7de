use std::io::Error as IOError;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed reading config {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("config {path} is not a valid config document: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no home config directory could be determined")]
    NoConfigDir,
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("found more than {limit} files below {path}, raise recurse_max or narrow the path")]
    TooManyFiles { path: PathBuf, limit: usize },

    #[error("io error while listing {path}: {source}")]
    IOError {
        path: PathBuf,
        #[source]
        source: IOError,
    },
}

impl DiscoveryError {
    pub fn io(path: impl Into<PathBuf>, source: IOError) -> Self {
        Self::IOError {
            path: path.into(),
            source,
        }
    }
}
