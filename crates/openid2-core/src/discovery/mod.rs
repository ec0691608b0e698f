//! # Identifier Discovery
//!
//! Resolves a user-supplied identifier to the provider endpoint(s) that may
//! vouch for it.
//!
//! Two kinds of result exist:
//!
//! - **Claimed identifier**: the identifier names a user; the provider will
//!   assert exactly this identifier (optionally under a provider-local id).
//! - **OP identifier**: the identifier names a provider. The authentication
//!   request then carries `identifier_select` and the provider picks the
//!   identity (directed identity).
//!
//! [`HttpDiscovery`] performs XRDS and HTML-based discovery over HTTP.
//! [`StaticDiscovery`] answers from a fixed table, for deployments that talk
//! to a known provider and for tests.

mod fetcher;

pub use fetcher::{HttpDiscovery, HttpDiscoveryConfig, parse_html, parse_xrds};

use async_trait::async_trait;
use url::Url;

use crate::error::{ProtocolError, Result};

/// Service type announcing an OP identifier
pub const SERVER_SERVICE_TYPE: &str = "http://specs.openid.net/auth/2.0/server";

/// Service type announcing a claimed identifier
pub const SIGNON_SERVICE_TYPE: &str = "http://specs.openid.net/auth/2.0/signon";

/// One provider endpoint able to authenticate an identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryInformation {
    op_endpoint: Url,
    claimed_id: Option<String>,
    local_id: Option<String>,
}

impl DiscoveryInformation {
    /// Endpoint for an OP identifier (directed identity)
    pub fn op_identifier(op_endpoint: Url) -> Self {
        Self {
            op_endpoint,
            claimed_id: None,
            local_id: None,
        }
    }

    /// Endpoint for a claimed identifier, with an optional provider-local id
    pub fn claimed_identifier(
        op_endpoint: Url,
        claimed_id: impl Into<String>,
        local_id: Option<String>,
    ) -> Self {
        Self {
            op_endpoint,
            claimed_id: Some(claimed_id.into()),
            local_id,
        }
    }

    /// Provider endpoint URL
    pub fn op_endpoint(&self) -> &Url {
        &self.op_endpoint
    }

    /// Claimed identifier, absent for OP identifiers
    pub fn claimed_id(&self) -> Option<&str> {
        self.claimed_id.as_deref()
    }

    /// Identifier the provider knows the user by
    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref().or(self.claimed_id.as_deref())
    }

    /// Whether the identifier named a provider rather than a user
    pub fn is_op_identifier(&self) -> bool {
        self.claimed_id.is_none()
    }
}

/// Discovery capability
#[async_trait]
pub trait Discovery: Send + Sync + std::fmt::Debug {
    /// Resolve an identifier to candidate endpoints, most preferred first
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Discovery`] when nothing can be resolved.
    async fn discover(&self, identifier: &str) -> Result<Vec<DiscoveryInformation>>;
}

/// Normalize a user-supplied identifier into a URL identifier
///
/// Adds `http://` when no scheme is given and drops any fragment. XRIs are
/// not supported.
///
/// # Errors
///
/// Returns [`ProtocolError::Discovery`] for XRIs and unparseable input.
pub fn normalize_identifier(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let failure = |reason: &str| ProtocolError::Discovery {
        identifier: input.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(failure("empty identifier"));
    }
    if trimmed.starts_with("xri://") || trimmed.starts_with(['=', '@', '+', '$', '!', '(']) {
        return Err(failure("XRI identifiers are not supported"));
    }

    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let mut url = Url::parse(&candidate).map_err(|e| failure(&e.to_string()))?;
    url.set_fragment(None);
    Ok(url.to_string())
}

#[derive(Debug, Clone)]
enum StaticEntry {
    OpIdentifier { identifier: String, op_endpoint: Url },
    ClaimedPrefix { prefix: String, op_endpoint: Url },
}

/// Discovery from a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    entries: Vec<StaticEntry>,
}

impl StaticDiscovery {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an exact identifier to a provider (directed identity)
    pub fn with_op_identifier(mut self, identifier: impl Into<String>, op_endpoint: Url) -> Self {
        self.entries.push(StaticEntry::OpIdentifier {
            identifier: identifier.into(),
            op_endpoint,
        });
        self
    }

    /// Map every identifier starting with `prefix` to a provider
    pub fn with_claimed_prefix(mut self, prefix: impl Into<String>, op_endpoint: Url) -> Self {
        self.entries.push(StaticEntry::ClaimedPrefix {
            prefix: prefix.into(),
            op_endpoint,
        });
        self
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, identifier: &str) -> Result<Vec<DiscoveryInformation>> {
        let found: Vec<_> = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                StaticEntry::OpIdentifier {
                    identifier: known,
                    op_endpoint,
                } if known == identifier => {
                    Some(DiscoveryInformation::op_identifier(op_endpoint.clone()))
                }
                StaticEntry::ClaimedPrefix {
                    prefix,
                    op_endpoint,
                } if identifier.starts_with(prefix.as_str()) => {
                    Some(DiscoveryInformation::claimed_identifier(
                        op_endpoint.clone(),
                        identifier,
                        None,
                    ))
                }
                _ => None,
            })
            .collect();

        if found.is_empty() {
            return Err(ProtocolError::Discovery {
                identifier: identifier.to_string(),
                reason: "no provider registered for identifier".to_string(),
            });
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Url {
        Url::parse("https://idp.example.com/entryPoint").unwrap()
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("example.com").unwrap(), "http://example.com/");
        assert_eq!(
            normalize_identifier(" https://example.com/user#frag ").unwrap(),
            "https://example.com/user"
        );
        assert!(normalize_identifier("=example").is_err());
        assert!(normalize_identifier("").is_err());
    }

    #[tokio::test]
    async fn test_static_discovery() {
        let discovery = StaticDiscovery::new()
            .with_op_identifier("https://idp.example.com/", endpoint())
            .with_claimed_prefix("https://idp.example.com/~", endpoint());

        let op = discovery.discover("https://idp.example.com/").await.unwrap();
        assert_eq!(op.len(), 1);
        assert!(op[0].is_op_identifier());

        let user = discovery.discover("https://idp.example.com/~bob").await.unwrap();
        assert_eq!(user[0].claimed_id(), Some("https://idp.example.com/~bob"));
        assert_eq!(user[0].local_id(), Some("https://idp.example.com/~bob"));

        assert!(matches!(
            discovery.discover("https://elsewhere.example.net/").await,
            Err(ProtocolError::Discovery { .. })
        ));
    }
}
