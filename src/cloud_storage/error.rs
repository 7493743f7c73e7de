use std::io::ErrorKind;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("io error while streaming file: {0}")]
    IOError(#[from] std::io::Error),

    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("request rejected with status `{status}`")]
    Rejected { status: String },

    #[error("response is missing `{0}`")]
    MissingField(&'static str),

    #[error("invalid response body: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

impl DirectoryError {
    /// Failures expected to clear up on their own
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            // the local file went missing or became unreadable after hashing
            Self::IOError(e) => !matches!(
                e.kind(),
                ErrorKind::NotFound
                    | ErrorKind::PermissionDenied
                    | ErrorKind::InvalidInput
                    | ErrorKind::InvalidData
            ),
            Self::HttpStatus { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
            Self::Rejected { status } => status.contains("rateLimit"),
            Self::MissingField(_) | Self::InvalidResponse(_) => false,
        }
    }

    /// Credential problems, handled by the configured auth failure policy
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => {
                *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
            }
            Self::Rejected { status } => {
                let status = status.to_ascii_lowercase();
                status.contains("auth") || status.contains("token")
            }
            _ => false,
        }
    }
}
