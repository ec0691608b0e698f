//! Protocol error types
//!
//! Every primitive in this crate reports failures through [`ProtocolError`].
//! The session layer maps these onto its own, coarser taxonomy.

use thiserror::Error;

/// Errors raised by the OpenID 2.0 primitives
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No provider endpoint could be resolved for an identifier
    #[error("Discovery failed for {identifier}: {reason}")]
    Discovery {
        /// The identifier that was being discovered
        identifier: String,
        /// Why discovery failed
        reason: String,
    },

    /// Association (shared key establishment) with a provider failed
    #[error("Association with {endpoint} failed: {reason}")]
    Association {
        /// Provider endpoint
        endpoint: String,
        /// Why the association failed
        reason: String,
    },

    /// A positive assertion could not be verified
    #[error("Verification failed: {0}")]
    Verification(String),

    /// A protocol message was malformed or could not be built
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A required protocol parameter is absent
    #[error("Missing required parameter: openid.{0}")]
    MissingParameter(String),

    /// The association or session type is not supported
    #[error("Unsupported association type: {0}")]
    UnsupportedType(String),

    /// return_to does not fall under the declared realm
    #[error("return_to {return_to} does not match realm {realm}")]
    RealmMismatch {
        /// Declared realm
        realm: String,
        /// Offending return_to URL
        return_to: String,
    },

    /// A direct (server-to-server) request failed
    #[error("Direct request to {endpoint} failed: {reason}")]
    Transport {
        /// Target endpoint
        endpoint: String,
        /// Transport failure detail
        reason: String,
    },

    /// Cryptographic primitive failure (key generation, signing)
    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl ProtocolError {
    /// Shorthand for [`ProtocolError::MalformedMessage`]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage(reason.into())
    }

    /// Shorthand for [`ProtocolError::Verification`]
    pub fn verification(reason: impl Into<String>) -> Self {
        Self::Verification(reason.into())
    }
}

impl From<url::ParseError> for ProtocolError {
    fn from(err: url::ParseError) -> Self {
        Self::MalformedMessage(format!("invalid URL: {err}"))
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ProtocolError>;
