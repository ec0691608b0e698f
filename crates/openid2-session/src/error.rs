//! Session error taxonomy
//!
//! Every failure ends the current request; nothing is retried internally.
//! [`SessionError::into_response`] turns an error into the HTTP error the
//! browser sees.

use openid2_core::ProtocolError;
use thiserror::Error;

use crate::response::Response;

/// Errors raised by the consumer and provider state machines
#[derive(Debug, Error)]
pub enum SessionError {
    /// No provider endpoint could be resolved for the claimed identifier
    #[error("Discovery failed: {0}")]
    DiscoveryFailure(String),

    /// Key exchange with the provider failed
    #[error("Association failed: {0}")]
    AssociationFailure(String),

    /// The provider response did not yield a verified identifier
    #[error("Failed to login: {0}")]
    VerificationFailure(String),

    /// `finish_login` ran on a session that never called `commence`
    #[error("No origin URL captured; finish_login called without commence")]
    MissingOrigin,

    /// A checkid response was requested for an identity without a nickname
    #[error("Identity is not ready: nickname is not set")]
    IdentityNotReady,

    /// The request carried an unknown (or no) `openid.mode`
    #[error("Unknown request: {}", .0.as_deref().unwrap_or("no mode"))]
    UnknownMode(Option<String>),

    /// A protocol message could not be parsed, built, or signed
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The server or relying party was constructed incorrectly
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SessionError {
    /// HTTP status to surface the error with
    pub fn status_code(&self) -> u16 {
        500
    }

    /// Error response for the browser
    pub fn into_response(self) -> Response {
        Response::Error {
            status: self.status_code(),
            message: self.to_string(),
        }
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Discovery { .. } => Self::DiscoveryFailure(err.to_string()),
            ProtocolError::Association { .. } => Self::AssociationFailure(err.to_string()),
            ProtocolError::Verification(reason) => Self::VerificationFailure(reason),
            other => Self::MalformedMessage(other.to_string()),
        }
    }
}

impl From<SessionError> for Response {
    fn from(err: SessionError) -> Self {
        err.into_response()
    }
}

/// Result alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_map_onto_session_taxonomy() {
        let discovery = ProtocolError::Discovery {
            identifier: "x".to_string(),
            reason: "none".to_string(),
        };
        assert!(matches!(SessionError::from(discovery), SessionError::DiscoveryFailure(_)));
        assert!(matches!(
            SessionError::from(ProtocolError::MissingParameter("mode".to_string())),
            SessionError::MalformedMessage(_)
        ));
    }

    #[test]
    fn test_error_response() {
        let response =
            SessionError::VerificationFailure("bad signature".to_string()).into_response();
        assert_eq!(
            response,
            Response::Error {
                status: 500,
                message: "Failed to login: bad signature".to_string()
            }
        );
        assert_eq!(
            SessionError::UnknownMode(Some("bogus".to_string())).to_string(),
            "Unknown request: bogus"
        );
    }
}
