//! Worker heartbeat payload and endpoint validation.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

/// Maximum length of a worker endpoint.
const MAX_ENDPOINT_LEN: usize = 255;

/// Heartbeat sent by a worker on a fixed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPing {
    pub endpoint: String,
    #[serde(default)]
    pub version: Option<String>,
    /// The task the worker is currently running, if any.
    #[serde(default)]
    pub task_id: Option<DbId>,
}

/// Validate a worker endpoint.
///
/// Rules:
/// - Must not be empty or exceed `MAX_ENDPOINT_LEN` characters.
/// - Must be an `http://` or `https://` URL with a host.
/// - Must not contain whitespace.
pub fn validate_endpoint(endpoint: &str) -> Result<(), CoreError> {
    if endpoint.is_empty() {
        return Err(CoreError::Validation("Worker endpoint must not be empty".into()));
    }
    if endpoint.len() > MAX_ENDPOINT_LEN {
        return Err(CoreError::Validation(format!(
            "Worker endpoint must not exceed {MAX_ENDPOINT_LEN} characters"
        )));
    }
    if endpoint.chars().any(char::is_whitespace) {
        return Err(CoreError::Validation(
            "Worker endpoint must not contain whitespace".into(),
        ));
    }
    let host = endpoint
        .strip_prefix("http://")
        .or_else(|| endpoint.strip_prefix("https://"))
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "Worker endpoint '{endpoint}' must start with http:// or https://"
            ))
        })?;
    if host.is_empty() || host.starts_with('/') {
        return Err(CoreError::Validation(format!(
            "Worker endpoint '{endpoint}' has no host"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn accepts_http_and_https() {
        assert!(validate_endpoint("http://10.0.0.4:5000").is_ok());
        assert!(validate_endpoint("https://worker-1.internal").is_ok());
    }

    #[test]
    fn rejects_missing_scheme() {
        assert_matches!(validate_endpoint("10.0.0.4:5000"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn rejects_empty_and_hostless() {
        assert!(validate_endpoint("").is_err());
        assert!(validate_endpoint("http://").is_err());
        assert!(validate_endpoint("https:///path").is_err());
    }

    #[test]
    fn rejects_whitespace_and_overlong() {
        assert!(validate_endpoint("http://a b").is_err());
        let long = format!("http://{}", "a".repeat(MAX_ENDPOINT_LEN));
        assert!(validate_endpoint(&long).is_err());
    }
}
