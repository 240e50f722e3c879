use thiserror::Error;

/// Every failure a relay session can end with.
///
/// Each variant becomes exactly one terminal `{"error": ...}` frame on the
/// streaming wire. Nothing here is retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RelayError {
    /// Malformed client input, rejected before any upstream call.
    #[error("{0}")]
    Validation(String),

    /// Upstream refused the credentials, quota or model before streaming began.
    #[error("{0}")]
    UpstreamAuth(String),

    #[error("{}", transport_message(.status, .message))]
    UpstreamTransport { status: Option<u16>, message: String },

    /// A reasoning-provider frame had an unexpected shape.
    #[error("malformed upstream frame: {0}")]
    Decode(String),

    /// Saving the finished artifact failed. The answer was already delivered.
    #[error("answer delivered but not saved: {0}")]
    Persistence(String),
}

impl RelayError {
    pub fn transport(message: impl Into<String>) -> Self {
        RelayError::UpstreamTransport {
            status: None,
            message: message.into(),
        }
    }

    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        RelayError::UpstreamTransport {
            status: Some(status),
            message: message.into(),
        }
    }
}

fn transport_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("upstream request failed (HTTP {code}): {message}"),
        None => format!("upstream request failed: {message}"),
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::UpstreamTransport {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}
