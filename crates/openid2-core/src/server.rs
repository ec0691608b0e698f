//! Provider protocol operations
//!
//! [`ServerManager`] answers `associate` and `check_authentication`
//! requests and builds and signs positive assertions. Shared associations
//! are handed to relying parties; private ones sign assertions for relying
//! parties without a usable association and are verified (once) through
//! `check_authentication`.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::association::{
    Association, AssociationType, MemoryServerAssociationStore, ServerAssociationStore,
    SessionType,
};
use crate::config::ServerConfig;
use crate::error::{ProtocolError, Result};
use crate::message::{AuthRequest, AuthSuccess, Mode, OPENID2_NS};
use crate::nonce::{MemoryNonceVerifier, NonceVerifier, generate_nonce};
use crate::params::ParameterList;
use crate::realm::Realm;

/// Provider side of the protocol
#[derive(Debug, Clone)]
pub struct ServerManager {
    op_endpoint: Url,
    config: ServerConfig,
    shared: Arc<dyn ServerAssociationStore>,
    private: Arc<dyn ServerAssociationStore>,
    nonces: Arc<dyn NonceVerifier>,
}

impl ServerManager {
    /// Create a provider for `op_endpoint` with in-memory stores
    pub fn new(op_endpoint: Url, config: ServerConfig) -> Self {
        let nonces = Arc::new(MemoryNonceVerifier::new(config.nonce_window()));
        Self {
            op_endpoint,
            config,
            shared: Arc::new(MemoryServerAssociationStore::new()),
            private: Arc::new(MemoryServerAssociationStore::new()),
            nonces,
        }
    }

    /// Use custom association stores
    pub fn with_association_stores(
        mut self,
        shared: Arc<dyn ServerAssociationStore>,
        private: Arc<dyn ServerAssociationStore>,
    ) -> Self {
        self.shared = shared;
        self.private = private;
        self
    }

    /// Provider endpoint URL
    pub fn op_endpoint(&self) -> &Url {
        &self.op_endpoint
    }

    /// Active configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Drop expired shared and private associations and stale nonces,
    /// returning how many entries were removed
    pub async fn cleanup_expired(&self) -> usize {
        let shared = self.shared.cleanup_expired().await;
        let private = self.private.cleanup_expired().await;
        let nonces = self.nonces.cleanup_expired().await;
        if shared + private + nonces > 0 {
            debug!(shared, private, nonces, "provider stores cleaned up");
        }
        shared + private + nonces
    }

    /// Answer an `associate` request
    ///
    /// Diffie-Hellman session types and unknown association types are
    /// answered with an `unsupported-type` error suggesting
    /// `HMAC-SHA256` / `no-encryption`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Crypto`] if key generation fails.
    pub async fn association_response(&self, request: &ParameterList) -> Result<ParameterList> {
        if request.get("ns") != Some(OPENID2_NS) {
            return Ok(Self::error_response("only OpenID 2.0 associations are supported"));
        }

        let assoc_type = request.get("assoc_type").and_then(AssociationType::parse);
        let session_type = request.get("session_type").and_then(SessionType::parse);
        let (Some(assoc_type), Some(SessionType::NoEncryption)) = (assoc_type, session_type) else {
            debug!(
                assoc_type = request.get("assoc_type"),
                session_type = request.get("session_type"),
                "unsupported association request"
            );
            let mut response = Self::error_response("association or session type not supported");
            response.set("error_code", "unsupported-type");
            response.set("assoc_type", AssociationType::HmacSha256.as_str());
            response.set("session_type", SessionType::NoEncryption.as_str());
            return Ok(response);
        };

        let association = self
            .shared
            .generate(assoc_type, self.config.association_lifetime())
            .await?;

        let mut response = ParameterList::new();
        response.set("ns", OPENID2_NS);
        response.set("assoc_handle", association.handle());
        response.set("session_type", SessionType::NoEncryption.as_str());
        response.set("assoc_type", assoc_type.as_str());
        response.set("expires_in", association.expires_in().as_secs().to_string());
        response.set("mac_key", association.encoded_key());
        Ok(response)
    }

    /// Build an unsigned positive assertion for `request`
    ///
    /// The relying party's association is used when it is still live;
    /// otherwise a private association is created and the requested handle
    /// is reported back as `invalidate_handle`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::RealmMismatch`] when return_to is not under
    /// the realm, or a parse error for a malformed request.
    pub async fn auth_response(
        &self,
        request: &AuthRequest,
        claimed_id: &str,
        local_id: &str,
    ) -> Result<AuthSuccess> {
        let return_to = request.return_to()?;
        let realm = request
            .realm()
            .ok_or_else(|| ProtocolError::MissingParameter("realm".to_string()))?;
        Realm::verify(realm, &return_to)?;

        let mut params = ParameterList::new();
        params.set("ns", OPENID2_NS);
        params.set("mode", Mode::IdRes.as_str());
        params.set("op_endpoint", self.op_endpoint.as_str());
        params.set("claimed_id", claimed_id);
        params.set("identity", local_id);
        params.set("return_to", return_to.as_str());
        params.set("response_nonce", generate_nonce());

        let shared = match request.assoc_handle() {
            Some(handle) => self.shared.load(handle).await,
            None => None,
        };
        let handle = match shared {
            Some(association) => association.handle().to_string(),
            None => {
                let private = self
                    .private
                    .generate(
                        AssociationType::HmacSha256,
                        self.config.private_association_lifetime(),
                    )
                    .await?;
                if let Some(requested) = request.assoc_handle() {
                    debug!(handle = requested, "relying party association unknown, invalidating");
                    params.set("invalidate_handle", requested);
                }
                private.handle().to_string()
            }
        };
        params.set("assoc_handle", handle);

        Ok(AuthSuccess::new(return_to, params))
    }

    /// Sign a positive assertion with the association it names
    ///
    /// Covers the protocol fields and every extension field present.
    ///
    /// # Errors
    ///
    /// Returns an error if the association is unknown or expired.
    pub async fn sign(&self, assertion: &mut AuthSuccess) -> Result<()> {
        let handle = assertion
            .assoc_handle()
            .ok_or_else(|| ProtocolError::MissingParameter("assoc_handle".to_string()))?
            .to_string();
        let association = self.lookup_signing_association(&handle).await?;
        let fields = assertion.fields_to_sign();
        association.sign_fields(assertion.params_mut(), &fields)
    }

    async fn lookup_signing_association(&self, handle: &str) -> Result<Association> {
        if let Some(association) = self.shared.load(handle).await {
            return Ok(association);
        }
        self.private
            .load(handle)
            .await
            .ok_or_else(|| {
                ProtocolError::malformed(format!("unknown or expired association {handle}"))
            })
    }

    /// Answer a `check_authentication` request
    ///
    /// Only assertions signed with a private association are verifiable.
    /// Each private association verifies at most one assertion, and each
    /// nonce is accepted once.
    ///
    /// # Errors
    ///
    /// Returns an error for a message missing the fields a signature needs.
    pub async fn verify(&self, request: &ParameterList) -> Result<ParameterList> {
        let handle = request.require("assoc_handle")?;
        let nonce = request.require("response_nonce")?;

        let mut response = ParameterList::new();
        response.set("ns", OPENID2_NS);

        let valid = match self.private.load(handle).await {
            None => {
                warn!(handle, "check_authentication for unknown private association");
                false
            }
            Some(association) => {
                let mut assertion = request.clone();
                assertion.set("mode", Mode::IdRes.as_str());
                let signature_ok = association.verify_signature(&assertion)?;
                let nonce_ok = self.nonces.check(self.op_endpoint.as_str(), nonce).await.is_ok();
                self.private.remove(handle).await;
                if !signature_ok {
                    warn!(handle, "check_authentication signature mismatch");
                }
                signature_ok && nonce_ok
            }
        };

        if valid
            && let Some(invalidate) = request.get("invalidate_handle")
            && self.shared.load(invalidate).await.is_none()
        {
            response.set("invalidate_handle", invalidate);
        }
        response.set("is_valid", if valid { "true" } else { "false" });
        debug!(handle, valid, "check_authentication answered");
        Ok(response)
    }

    /// Direct error response
    pub fn error_response(message: &str) -> ParameterList {
        let mut response = ParameterList::new();
        response.set("ns", OPENID2_NS);
        response.set("mode", Mode::Error.as_str());
        response.set("error", message);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::IDENTIFIER_SELECT;
    use pretty_assertions::assert_eq;

    const BOB: &str = "https://idp.example.com/~bob";

    fn server() -> ServerManager {
        ServerManager::new(
            Url::parse("https://idp.example.com/entryPoint").unwrap(),
            ServerConfig::default(),
        )
    }

    fn request(assoc_handle: Option<&str>, realm: Option<&str>) -> AuthRequest {
        AuthRequest::new(
            Url::parse("https://idp.example.com/entryPoint").unwrap(),
            IDENTIFIER_SELECT,
            IDENTIFIER_SELECT,
            "https://rp.example.com/openid/finishLogin",
            realm,
            assoc_handle,
            false,
        )
    }

    fn associate_params(assoc_type: &str, session_type: &str) -> ParameterList {
        [
            ("ns", OPENID2_NS),
            ("mode", "associate"),
            ("assoc_type", assoc_type),
            ("session_type", session_type),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_association_response() {
        let server = server();
        let response = server
            .association_response(&associate_params("HMAC-SHA256", "no-encryption"))
            .await
            .unwrap();
        assert_eq!(response.get("session_type"), Some("no-encryption"));
        assert_eq!(response.get("assoc_type"), Some("HMAC-SHA256"));
        assert!(response.get("mac_key").is_some());
        assert!(response.get("assoc_handle").is_some());
    }

    #[tokio::test]
    async fn test_cleanup_drops_expired_associations() {
        let server = ServerManager::new(
            Url::parse("https://idp.example.com/entryPoint").unwrap(),
            ServerConfig {
                association_lifetime_secs: 0,
                ..ServerConfig::default()
            },
        );
        server
            .association_response(&associate_params("HMAC-SHA256", "no-encryption"))
            .await
            .unwrap();
        server
            .association_response(&associate_params("HMAC-SHA1", "no-encryption"))
            .await
            .unwrap();

        assert_eq!(server.cleanup_expired().await, 2);
        assert_eq!(server.cleanup_expired().await, 0);
    }

    #[tokio::test]
    async fn test_diffie_hellman_is_unsupported() {
        let response = server()
            .association_response(&associate_params("HMAC-SHA1", "DH-SHA1"))
            .await
            .unwrap();
        assert_eq!(response.get("mode"), Some("error"));
        assert_eq!(response.get("error_code"), Some("unsupported-type"));
        assert_eq!(response.get("session_type"), Some("no-encryption"));
    }

    #[tokio::test]
    async fn test_shared_association_signs_assertion() {
        let server = server();
        let association = server
            .association_response(&associate_params("HMAC-SHA256", "no-encryption"))
            .await
            .unwrap();
        let handle = association.get("assoc_handle").unwrap();

        let mut assertion = server
            .auth_response(&request(Some(handle), None), BOB, BOB)
            .await
            .unwrap();
        assert_eq!(assertion.assoc_handle(), Some(handle));
        assert!(assertion.params().get("invalidate_handle").is_none());

        server.sign(&mut assertion).await.unwrap();
        let signed = assertion.signed_fields();
        assert!(signed.contains(&"claimed_id"));
        assert!(signed.contains(&"response_nonce"));
    }

    #[tokio::test]
    async fn test_unknown_handle_falls_back_to_private_association() {
        let server = server();
        let mut assertion = server
            .auth_response(&request(Some("stale"), None), BOB, BOB)
            .await
            .unwrap();
        assert_eq!(assertion.params().get("invalidate_handle"), Some("stale"));
        server.sign(&mut assertion).await.unwrap();

        let mut check = assertion.params().clone();
        check.set("mode", "check_authentication");
        let first = server.verify(&check).await.unwrap();
        assert_eq!(first.get("is_valid"), Some("true"));
        assert_eq!(first.get("invalidate_handle"), Some("stale"));

        // Private associations verify a single assertion
        let second = server.verify(&check).await.unwrap();
        assert_eq!(second.get("is_valid"), Some("false"));
    }

    #[tokio::test]
    async fn test_realm_mismatch_rejected() {
        let result = server()
            .auth_response(&request(None, Some("https://other.example.com/")), BOB, BOB)
            .await;
        assert!(matches!(result, Err(ProtocolError::RealmMismatch { .. })));
    }

    #[tokio::test]
    async fn test_tampered_assertion_is_invalid() {
        let server = server();
        let mut assertion = server
            .auth_response(&request(None, None), BOB, BOB)
            .await
            .unwrap();
        server.sign(&mut assertion).await.unwrap();

        let mut check = assertion.params().clone();
        check.set("mode", "check_authentication");
        check.set("claimed_id", "https://idp.example.com/~mallory");
        let response = server.verify(&check).await.unwrap();
        assert_eq!(response.get("is_valid"), Some("false"));
    }
}
