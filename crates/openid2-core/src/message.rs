//! OpenID 2.0 protocol messages
//!
//! Indirect messages are carried in a browser redirect: an [`AuthRequest`]
//! travels to the provider endpoint, an [`AuthSuccess`] (or a negative
//! assertion) back to the relying party's return_to URL.

use std::fmt;

use url::Url;

use crate::error::{ProtocolError, Result};
use crate::params::ParameterList;

/// OpenID 2.0 protocol namespace (`openid.ns`)
pub const OPENID2_NS: &str = "http://specs.openid.net/auth/2.0";

/// Claimed identifier / identity placeholder for directed identity
pub const IDENTIFIER_SELECT: &str = "http://specs.openid.net/auth/2.0/identifier_select";

/// Fields of a positive assertion that are always signed, in signing order
pub const REQUIRED_SIGNED_FIELDS: [&str; 4] =
    ["op_endpoint", "return_to", "response_nonce", "assoc_handle"];

/// Fields that belong to the core protocol rather than to an extension
const CORE_FIELDS: [&str; 11] = [
    "ns",
    "mode",
    "op_endpoint",
    "claimed_id",
    "identity",
    "return_to",
    "response_nonce",
    "assoc_handle",
    "invalidate_handle",
    "signed",
    "sig",
];

/// Protocol mode (`openid.mode`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Establish a shared association (direct)
    Associate,
    /// Interactive authentication request (indirect)
    CheckIdSetup,
    /// Non-interactive authentication request (indirect)
    CheckIdImmediate,
    /// Direct verification of an assertion signed with a private association
    CheckAuthentication,
    /// Positive assertion
    IdRes,
    /// Negative answer to `checkid_immediate`
    SetupNeeded,
    /// Negative answer to `checkid_setup`
    Cancel,
    /// Error response
    Error,
}

impl Mode {
    /// Parse an `openid.mode` value
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "associate" => Some(Self::Associate),
            "checkid_setup" => Some(Self::CheckIdSetup),
            "checkid_immediate" => Some(Self::CheckIdImmediate),
            "check_authentication" => Some(Self::CheckAuthentication),
            "id_res" => Some(Self::IdRes),
            "setup_needed" => Some(Self::SetupNeeded),
            "cancel" => Some(Self::Cancel),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Wire representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Associate => "associate",
            Self::CheckIdSetup => "checkid_setup",
            Self::CheckIdImmediate => "checkid_immediate",
            Self::CheckAuthentication => "check_authentication",
            Self::IdRes => "id_res",
            Self::SetupNeeded => "setup_needed",
            Self::Cancel => "cancel",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message delivered through the browser to `base`
#[derive(Debug, Clone)]
pub struct IndirectMessage {
    base: Url,
    params: ParameterList,
}

impl IndirectMessage {
    /// Create a message addressed to `base`
    pub fn new(base: Url, params: ParameterList) -> Self {
        Self { base, params }
    }

    /// Negative assertion answering a `checkid_immediate` request
    pub fn setup_needed(return_to: Url) -> Self {
        Self::negative(return_to, Mode::SetupNeeded)
    }

    /// Negative assertion answering a `checkid_setup` request
    pub fn cancel(return_to: Url) -> Self {
        Self::negative(return_to, Mode::Cancel)
    }

    fn negative(return_to: Url, mode: Mode) -> Self {
        let mut params = ParameterList::new();
        params.set("ns", OPENID2_NS);
        params.set("mode", mode.as_str());
        Self::new(return_to, params)
    }

    /// Message parameters
    pub fn params(&self) -> &ParameterList {
        &self.params
    }

    /// Mutable message parameters
    pub fn params_mut(&mut self) -> &mut ParameterList {
        &mut self.params
    }

    /// Base URL the message is addressed to
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Full redirect URL: the base URL with the `openid.*` parameters
    /// appended to whatever query it already carries
    pub fn destination_url(&self) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in self.params.to_prefixed_pairs() {
                query.append_pair(&key, &value);
            }
        }
        url
    }
}

/// Authentication request (`checkid_setup` / `checkid_immediate`)
#[derive(Debug, Clone)]
pub struct AuthRequest {
    message: IndirectMessage,
}

impl AuthRequest {
    /// Build an authentication request addressed to `op_endpoint`
    ///
    /// `claimed_id` and `identity` are both [`IDENTIFIER_SELECT`] when the
    /// user entered an OP identifier.
    pub fn new(
        op_endpoint: Url,
        claimed_id: &str,
        identity: &str,
        return_to: &str,
        realm: Option<&str>,
        assoc_handle: Option<&str>,
        immediate: bool,
    ) -> Self {
        let mode = if immediate { Mode::CheckIdImmediate } else { Mode::CheckIdSetup };
        let mut params = ParameterList::new();
        params.set("ns", OPENID2_NS);
        params.set("mode", mode.as_str());
        params.set("claimed_id", claimed_id);
        params.set("identity", identity);
        params.set("return_to", return_to);
        if let Some(realm) = realm {
            params.set("realm", realm);
        }
        if let Some(handle) = assoc_handle {
            params.set("assoc_handle", handle);
        }
        Self {
            message: IndirectMessage::new(op_endpoint, params),
        }
    }

    /// Interpret incoming provider-side parameters as an authentication request
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedMessage`] when the mode is not a
    /// checkid mode, the namespace is not OpenID 2.0, or return_to is not a URL.
    pub fn parse(op_endpoint: Url, params: &ParameterList) -> Result<Self> {
        match params.get("mode").and_then(Mode::parse) {
            Some(Mode::CheckIdSetup | Mode::CheckIdImmediate) => {}
            other => {
                return Err(ProtocolError::malformed(format!(
                    "not an authentication request: mode {:?}",
                    other.map(Mode::as_str)
                )));
            }
        }
        if params.get("ns") != Some(OPENID2_NS) {
            return Err(ProtocolError::malformed("only OpenID 2.0 requests are supported"));
        }
        Url::parse(params.require("return_to")?)?;
        Ok(Self {
            message: IndirectMessage::new(op_endpoint, params.clone()),
        })
    }

    /// Whether this is a `checkid_immediate` request
    pub fn is_immediate(&self) -> bool {
        self.params().get("mode") == Some(Mode::CheckIdImmediate.as_str())
    }

    /// The relying party's return_to URL
    pub fn return_to(&self) -> Result<Url> {
        Ok(Url::parse(self.params().require("return_to")?)?)
    }

    /// Declared realm, falling back to return_to as OpenID 2.0 prescribes
    pub fn realm(&self) -> Option<&str> {
        self.params()
            .get("realm")
            .or_else(|| self.params().get("return_to"))
    }

    /// Association handle the relying party asked to use
    pub fn assoc_handle(&self) -> Option<&str> {
        self.params().get("assoc_handle")
    }

    /// Request parameters
    pub fn params(&self) -> &ParameterList {
        self.message.params()
    }

    /// Mutable request parameters (for attaching extensions)
    pub fn params_mut(&mut self) -> &mut ParameterList {
        self.message.params_mut()
    }

    /// Redirect URL at the provider endpoint
    pub fn destination_url(&self) -> Url {
        self.message.destination_url()
    }
}

/// Positive assertion (`id_res`)
#[derive(Debug, Clone)]
pub struct AuthSuccess {
    message: IndirectMessage,
}

impl AuthSuccess {
    /// Assemble an unsigned positive assertion addressed to `return_to`
    pub(crate) fn new(return_to: Url, params: ParameterList) -> Self {
        Self {
            message: IndirectMessage::new(return_to, params),
        }
    }

    /// Interpret response parameters received by the relying party
    ///
    /// # Errors
    ///
    /// Returns an error when the mode is not `id_res` or a field the
    /// assertion cannot do without is missing.
    pub fn parse(params: &ParameterList) -> Result<Self> {
        if params.get("mode") != Some(Mode::IdRes.as_str()) {
            return Err(ProtocolError::malformed("not a positive assertion"));
        }
        for field in REQUIRED_SIGNED_FIELDS {
            params.require(field)?;
        }
        params.require("signed")?;
        params.require("sig")?;
        let return_to = Url::parse(params.require("return_to")?)?;
        Ok(Self::new(return_to, params.clone()))
    }

    /// Asserted identifier: claimed_id, or identity when no claimed_id is present
    pub fn identity(&self) -> Option<&str> {
        self.params()
            .get("claimed_id")
            .or_else(|| self.params().get("identity"))
    }

    /// Provider-local identifier (`openid.identity`)
    pub fn local_identity(&self) -> Option<&str> {
        self.params().get("identity")
    }

    /// Association handle used to sign the assertion
    pub fn assoc_handle(&self) -> Option<&str> {
        self.params().get("assoc_handle")
    }

    /// Provider endpoint that issued the assertion
    pub fn op_endpoint(&self) -> Option<&str> {
        self.params().get("op_endpoint")
    }

    /// Signed field names, in signing order
    pub fn signed_fields(&self) -> Vec<&str> {
        self.params()
            .get("signed")
            .map(|list| list.split(',').filter(|f| !f.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Fields that must be covered by the signature: the protocol fields
    /// plus every extension field
    pub(crate) fn fields_to_sign(&self) -> Vec<String> {
        let (op_endpoint, rest) = REQUIRED_SIGNED_FIELDS.split_at(1);
        let mut fields: Vec<String> = op_endpoint.iter().map(ToString::to_string).collect();
        fields.extend(
            ["claimed_id", "identity"]
                .into_iter()
                .filter(|optional| self.params().contains(optional))
                .map(ToString::to_string),
        );
        fields.extend(rest.iter().map(ToString::to_string));
        fields.extend(
            self.params()
                .iter()
                .map(|(k, _)| k)
                .filter(|k| !CORE_FIELDS.contains(k))
                .map(ToString::to_string),
        );
        fields
    }

    /// Only the parameters named in `openid.signed`
    ///
    /// Extension data must be read from this view: anything outside the
    /// signed list can be appended by whoever relays the browser.
    pub fn signed_params(&self) -> ParameterList {
        let signed = self.signed_fields();
        self.params()
            .iter()
            .filter(|(key, _)| signed.contains(key))
            .collect()
    }

    /// Assertion parameters
    pub fn params(&self) -> &ParameterList {
        self.message.params()
    }

    /// Mutable assertion parameters (for attaching extensions before signing)
    pub fn params_mut(&mut self) -> &mut ParameterList {
        self.message.params_mut()
    }

    /// Redirect URL at the relying party's return_to
    pub fn destination_url(&self) -> Url {
        self.message.destination_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Url {
        Url::parse("https://idp.example.com/entryPoint").unwrap()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(Mode::parse("checkid_immediate"), Some(Mode::CheckIdImmediate));
        assert_eq!(Mode::parse("bogus"), None);
        assert_eq!(Mode::CheckAuthentication.to_string(), "check_authentication");
    }

    #[test]
    fn test_destination_url_preserves_existing_query() {
        let base = Url::parse("https://rp.example.com/finish?app=1").unwrap();
        let message = IndirectMessage::cancel(base);
        let url = message.destination_url();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("app".to_string(), "1".to_string())));
        assert!(pairs.contains(&("openid.mode".to_string(), "cancel".to_string())));
    }

    #[test]
    fn test_auth_request_round_trips_through_url() {
        let request = AuthRequest::new(
            endpoint(),
            IDENTIFIER_SELECT,
            IDENTIFIER_SELECT,
            "https://rp.example.com/openid/finishLogin",
            Some("https://rp.example.com/"),
            Some("handle-1"),
            false,
        );

        let params = ParameterList::from_url(&request.destination_url()).unwrap();
        let parsed = AuthRequest::parse(endpoint(), &params).unwrap();
        assert!(!parsed.is_immediate());
        assert_eq!(parsed.assoc_handle(), Some("handle-1"));
        assert_eq!(parsed.realm(), Some("https://rp.example.com/"));
    }

    #[test]
    fn test_auth_request_rejects_other_modes() {
        let params: ParameterList =
            [("ns", OPENID2_NS), ("mode", "associate")].into_iter().collect();
        assert!(AuthRequest::parse(endpoint(), &params).is_err());
    }

    #[test]
    fn test_realm_defaults_to_return_to() {
        let request = AuthRequest::new(
            endpoint(),
            IDENTIFIER_SELECT,
            IDENTIFIER_SELECT,
            "https://rp.example.com/cb",
            None,
            None,
            true,
        );
        assert!(request.is_immediate());
        assert_eq!(request.realm(), Some("https://rp.example.com/cb"));
    }

    #[test]
    fn test_fields_to_sign_include_extensions() {
        let params: ParameterList = [
            ("ns", OPENID2_NS),
            ("mode", "id_res"),
            ("op_endpoint", "https://idp.example.com/entryPoint"),
            ("claimed_id", "https://idp.example.com/~alice"),
            ("identity", "https://idp.example.com/~alice"),
            ("return_to", "https://rp.example.com/cb"),
            ("response_nonce", "2024-01-01T00:00:00Zabc"),
            ("assoc_handle", "h"),
            ("ns.sreg", "http://openid.net/extensions/sreg/1.1"),
            ("sreg.nickname", "alice"),
        ]
        .into_iter()
        .collect();
        let success = AuthSuccess::new(Url::parse("https://rp.example.com/cb").unwrap(), params);
        let fields = success.fields_to_sign();

        for expected in ["op_endpoint", "claimed_id", "identity", "ns.sreg", "sreg.nickname"] {
            assert!(fields.iter().any(|f| f == expected), "missing {expected}");
        }
        assert!(!fields.iter().any(|f| f == "mode" || f == "sig"));
        assert_eq!(
            fields[..6],
            ["op_endpoint", "claimed_id", "identity", "return_to", "response_nonce", "assoc_handle"]
        );
    }

    #[test]
    fn test_signed_params_drop_unsigned_fields() {
        let params: ParameterList = [
            ("mode", "id_res"),
            ("op_endpoint", "https://idp.example.com/entryPoint"),
            ("ns.sreg", "http://openid.net/extensions/sreg/1.1"),
            ("sreg.nickname", "mallory"),
            ("sreg.email", "ceo@victim.example"),
            ("signed", "op_endpoint,ns.sreg,sreg.nickname"),
        ]
        .into_iter()
        .collect();
        let success = AuthSuccess::new(Url::parse("https://rp.example.com/cb").unwrap(), params);

        let signed = success.signed_params();
        assert_eq!(signed.len(), 3);
        assert_eq!(signed.get("sreg.nickname"), Some("mallory"));
        assert_eq!(signed.get("sreg.email"), None);
        assert_eq!(signed.get("mode"), None);
    }
}
