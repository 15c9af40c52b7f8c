//! Client-facing error taxonomy.
//!
//! Every failure that reaches a client is first mapped to a [`ClientError`].
//! The mapping to text is a fixed table: internal error messages never reach
//! the socket.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::security::limits::LimitViolation;

/// Failure categories that can be rendered to a client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("blocklisted")]
    Blocklisted,

    #[error("banned")]
    Banned { retry_after: Duration },

    #[error("rate limited")]
    RateLimited { retry_after: Duration },

    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("not found")]
    NotFound,

    #[error("input rejected")]
    InputRejected,

    #[error("backend failure")]
    TemporaryFailure,

    #[error("generation timeout")]
    Timeout,

    #[error("internal error")]
    Internal,
}

impl ClientError {
    /// The user-safe phrase shown to clients.
    pub fn phrase(&self) -> String {
        match self {
            ClientError::Blocklisted => "Access denied: your address is blocklisted".to_string(),
            ClientError::Banned { retry_after } => format!(
                "Access denied: temporarily banned, retry after {} seconds",
                retry_secs(*retry_after)
            ),
            ClientError::RateLimited { retry_after } => format!(
                "Rate limited, retry after {} seconds",
                retry_secs(*retry_after)
            ),
            ClientError::BadRequest(reason) => format!("Bad request: {reason}"),
            ClientError::NotFound => "Not found".to_string(),
            ClientError::InputRejected => "Rejected for security reasons".to_string(),
            ClientError::TemporaryFailure => {
                "Temporary failure, please try again later".to_string()
            }
            ClientError::Timeout => "Generation timed out, please try again later".to_string(),
            ClientError::Internal => "Internal error".to_string(),
        }
    }

    /// Gemini status code for this failure.
    pub fn gemini_status(&self) -> u8 {
        match self {
            ClientError::RateLimited { .. } => 44,
            ClientError::Blocklisted | ClientError::Banned { .. } => 50,
            ClientError::NotFound => 51,
            ClientError::BadRequest(_) | ClientError::InputRejected => 59,
            ClientError::TemporaryFailure | ClientError::Timeout | ClientError::Internal => 40,
        }
    }

    /// Gemini meta field: seconds for status 44, the phrase otherwise.
    pub fn gemini_meta(&self) -> String {
        match self {
            ClientError::RateLimited { retry_after } => retry_secs(*retry_after).to_string(),
            other => other.phrase(),
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ClientError::Blocklisted => "blocklisted",
            ClientError::Banned { .. } => "banned",
            ClientError::RateLimited { .. } => "rate_limited",
            ClientError::BadRequest(_) => "bad_request",
            ClientError::NotFound => "not_found",
            ClientError::InputRejected => "input_rejected",
            ClientError::TemporaryFailure => "backend_failure",
            ClientError::Timeout => "timeout",
            ClientError::Internal => "internal",
        }
    }
}

/// Whole seconds until retry, rounded up and never below one.
pub fn retry_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl From<&ProtocolError> for ClientError {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::TooLong(_) => ClientError::BadRequest("request too long"),
            ProtocolError::Incomplete => ClientError::BadRequest("incomplete request"),
            ProtocolError::InvalidUtf8 => ClientError::BadRequest("request is not valid UTF-8"),
            ProtocolError::ControlCharacter => {
                ClientError::BadRequest("request contains control characters")
            }
            ProtocolError::Malformed(_) => ClientError::BadRequest("malformed request"),
            ProtocolError::ForwardingRefused => ClientError::BadRequest("forwarding refused"),
            ProtocolError::Io(_) => ClientError::Internal,
        }
    }
}

impl From<&LimitViolation> for ClientError {
    fn from(err: &LimitViolation) -> Self {
        match err {
            LimitViolation::SelectorTooLong { .. } => ClientError::BadRequest("selector too long"),
            LimitViolation::QueryTooLong { .. } => ClientError::BadRequest("query too long"),
            LimitViolation::SpecialCharacters { .. } => {
                ClientError::BadRequest("too many special characters")
            }
            LimitViolation::UnicodeComplexity { .. } => {
                ClientError::BadRequest("text is too complex")
            }
        }
    }
}
