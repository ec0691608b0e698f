//! Consumer and server configuration
//!
//! Both structs deserialize with every field optional, falling back to the
//! defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::association::AssociationType;

/// Relying-party configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Oldest response nonce accepted, in seconds (default: 5000)
    pub nonce_max_age_secs: u64,

    /// Allow `no-encryption` associations with plain-http endpoints (default: false)
    pub allow_plaintext_association: bool,

    /// Send an AX fetch request alongside SReg (default: true)
    pub request_attribute_exchange: bool,

    /// Association type asked for first (default: HMAC-SHA256)
    pub preferred_association_type: AssociationType,

    /// Timeout for discovery and direct requests, in seconds (default: 5)
    pub http_timeout_secs: u64,
}

impl ConsumerConfig {
    /// Nonce acceptance window
    pub fn nonce_max_age(&self) -> Duration {
        Duration::from_secs(self.nonce_max_age_secs)
    }

    /// HTTP timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            nonce_max_age_secs: 5000,
            allow_plaintext_association: false,
            request_attribute_exchange: true,
            preferred_association_type: AssociationType::HmacSha256,
            http_timeout_secs: 5,
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Lifetime of shared associations, in seconds (default: 1 day)
    pub association_lifetime_secs: u64,

    /// Lifetime of private (stateless-mode) associations, in seconds (default: 300)
    pub private_association_lifetime_secs: u64,

    /// How long issued nonces are remembered for replay checks, in seconds (default: 3600)
    pub nonce_window_secs: u64,
}

impl ServerConfig {
    /// Shared association lifetime
    pub fn association_lifetime(&self) -> Duration {
        Duration::from_secs(self.association_lifetime_secs)
    }

    /// Private association lifetime
    pub fn private_association_lifetime(&self) -> Duration {
        Duration::from_secs(self.private_association_lifetime_secs)
    }

    /// Nonce replay window
    pub fn nonce_window(&self) -> Duration {
        Duration::from_secs(self.nonce_window_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            association_lifetime_secs: 24 * 60 * 60,
            private_association_lifetime_secs: 300,
            nonce_window_secs: 3600,
        }
    }
}
