//! Realm matching
//!
//! A realm is the URL pattern a relying party claims for itself. A
//! return_to URL falls under a realm when scheme and port agree, the host
//! matches (a leading `*.` matches any subdomain), and the realm path is a
//! path prefix of the return_to path.

use url::Url;

use crate::error::{ProtocolError, Result};

/// Parsed realm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Realm {
    url: Url,
    wildcard: bool,
}

impl Realm {
    /// Parse a realm, accepting a `*.` wildcard as the first host label
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedMessage`] if the realm is not an
    /// absolute URL with a host, or carries a fragment.
    pub fn parse(realm: &str) -> Result<Self> {
        let (candidate, wildcard) = match realm.split_once("://*.") {
            Some((scheme, rest)) => (format!("{scheme}://{rest}"), true),
            None => (realm.to_string(), false),
        };
        let url = Url::parse(&candidate)?;
        if url.host_str().is_none() {
            return Err(ProtocolError::malformed(format!("realm without host: {realm}")));
        }
        if url.fragment().is_some() {
            return Err(ProtocolError::malformed(format!("realm with fragment: {realm}")));
        }
        Ok(Self { url, wildcard })
    }

    /// Whether `return_to` falls under this realm
    pub fn matches(&self, return_to: &Url) -> bool {
        if self.url.scheme() != return_to.scheme()
            || self.url.port_or_known_default() != return_to.port_or_known_default()
        {
            return false;
        }

        let (Some(realm_host), Some(host)) = (self.url.host_str(), return_to.host_str()) else {
            return false;
        };
        let host_matches = host.eq_ignore_ascii_case(realm_host)
            || (self.wildcard
                && host
                    .to_ascii_lowercase()
                    .ends_with(&format!(".{}", realm_host.to_ascii_lowercase())));
        if !host_matches {
            return false;
        }

        let realm_path = self.url.path();
        let path = return_to.path();
        match path.strip_prefix(realm_path) {
            Some(rest) => realm_path.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Check that `return_to` falls under the realm string `realm`
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::RealmMismatch`] when it does not, or a parse
    /// error for an invalid realm.
    pub fn verify(realm: &str, return_to: &Url) -> Result<()> {
        if Self::parse(realm)?.matches(return_to) {
            Ok(())
        } else {
            Err(ProtocolError::RealmMismatch {
                realm: realm.to_string(),
                return_to: return_to.to_string(),
            })
        }
    }
}
