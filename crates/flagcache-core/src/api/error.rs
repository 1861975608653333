use thiserror::Error;

/// Errors produced while talking to the flag authority.
///
/// `Clone` and `PartialEq` so that one failed refresh can be handed to every
/// caller waiting on it and stored in published snapshots.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlagError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    Protocol(String),

    #[error("Unknown feature flag: {0}")]
    UnknownFlag(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Refresh task failed: {0}")]
    TaskFailed(String),

    #[error("Flag service has been shut down")]
    Shutdown,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl FlagError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Map a non-success status. `flag` names the flag for per-name
    /// endpoints, where a 404 means the authority does not know it.
    pub fn from_status(status: reqwest::StatusCode, body: &str, flag: Option<&str>) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => FlagError::Unauthorized,
            403 => FlagError::AccessDenied(truncated),
            404 => match flag {
                Some(name) => FlagError::UnknownFlag(name.to_string()),
                None => FlagError::Status { status: 404, body: truncated },
            },
            429 => FlagError::RateLimited,
            500..=599 => FlagError::Server(truncated),
            code => FlagError::Status { status: code, body: truncated },
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, FlagError::Network(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, FlagError::Protocol(_))
    }
}

impl From<reqwest::Error> for FlagError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FlagError::Protocol(err.to_string())
        } else {
            FlagError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FlagError {
    fn from(err: serde_json::Error) -> Self {
        FlagError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_mapping() {
        assert_eq!(
            FlagError::from_status(StatusCode::UNAUTHORIZED, "", None),
            FlagError::Unauthorized
        );
        assert_eq!(
            FlagError::from_status(StatusCode::TOO_MANY_REQUESTS, "", None),
            FlagError::RateLimited
        );
        assert_eq!(
            FlagError::from_status(StatusCode::BAD_GATEWAY, "upstream", None),
            FlagError::Server("upstream".to_string())
        );
        assert_eq!(
            FlagError::from_status(StatusCode::FORBIDDEN, "nope", None),
            FlagError::AccessDenied("nope".to_string())
        );
    }

    #[test]
    fn test_not_found_is_unknown_flag_only_for_named_lookups() {
        assert_eq!(
            FlagError::from_status(StatusCode::NOT_FOUND, "", Some("beta")),
            FlagError::UnknownFlag("beta".to_string())
        );
        assert!(matches!(
            FlagError::from_status(StatusCode::NOT_FOUND, "", None),
            FlagError::Status { status: 404, .. }
        ));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        match FlagError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body, None) {
            FlagError::Server(msg) => {
                assert!(msg.len() < 600);
                assert!(msg.contains("2000 total bytes"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
