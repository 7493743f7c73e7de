use log::debug;
use reqwest::Response;
use serde::{de::DeserializeOwned, Deserialize};

use crate::cloud_storage::error::DirectoryError;

const STATUS_OK: &str = "ok";

/// Every gofile JSON answer is wrapped in `{ "status": ..., "data": ... }`
#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Check the http status, then unwrap the envelope into `T`
pub async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<T, DirectoryError> {
    let status = response.status();
    let url = response.url().path().to_string();
    let body = response.text().await?;
    debug!("Response from {url}: status={status} body={body}");

    if !status.is_success() {
        return Err(DirectoryError::HttpStatus { status, body });
    }
    parse_envelope(&body)
}

pub fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T, DirectoryError> {
    let envelope: Envelope = serde_json::from_str(body)?;
    if envelope.status != STATUS_OK {
        return Err(DirectoryError::Rejected {
            status: envelope.status,
        });
    }
    if envelope.data.is_null() {
        return Err(DirectoryError::MissingField("data"));
    }
    Ok(serde_json::from_value(envelope.data)?)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Id {
        id: String,
    }

    #[test]
    fn ok_envelope_yields_data() {
        let parsed: Id = parse_envelope(r#"{"status":"ok","data":{"id":"abc"}}"#).unwrap();
        assert_eq!(parsed, Id { id: "abc".into() });
    }

    #[test]
    fn error_status_is_rejected_even_with_data() {
        let err = parse_envelope::<Id>(r#"{"status":"error-rateLimit","data":{}}"#).unwrap_err();
        assert!(matches!(err, DirectoryError::Rejected { ref status } if status == "error-rateLimit"));
        assert!(err.is_transient());
    }

    #[test]
    fn missing_data_is_reported() {
        let err = parse_envelope::<Value>(r#"{"status":"ok"}"#).unwrap_err();
        assert!(matches!(err, DirectoryError::MissingField("data")));
    }

    #[test]
    fn garbage_body_is_invalid_response() {
        let err = parse_envelope::<Value>("<html>").unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidResponse(_)));
    }
}
