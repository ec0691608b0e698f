//! Relying-party protocol operations
//!
//! [`ConsumerManager`] bundles discovery, association, request building and
//! assertion verification. It holds only shared, concurrency-safe state (the
//! association store and the nonce verifier), so one instance serves every
//! relying-party session of a process.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::{debug, warn};
use url::Url;

use crate::association::{
    Association, AssociationType, ConsumerAssociationStore, MemoryConsumerAssociationStore,
    SessionType,
};
use crate::config::ConsumerConfig;
use crate::discovery::{Discovery, DiscoveryInformation, HttpDiscovery, HttpDiscoveryConfig};
use crate::error::{ProtocolError, Result};
use crate::message::{
    AuthRequest, AuthSuccess, IDENTIFIER_SELECT, Mode, OPENID2_NS, REQUIRED_SIGNED_FIELDS,
};
use crate::nonce::{MemoryNonceVerifier, NonceVerifier};
use crate::params::ParameterList;
use crate::transport::{DirectTransport, HttpTransport};

/// Result of verifying a provider response
#[derive(Debug, Clone)]
pub struct VerificationResult {
    verified: Option<AuthSuccess>,
    status: String,
}

impl VerificationResult {
    fn success(assertion: AuthSuccess) -> Self {
        Self {
            verified: Some(assertion),
            status: "OK".to_string(),
        }
    }

    fn failure(status: impl Into<String>) -> Self {
        Self {
            verified: None,
            status: status.into(),
        }
    }

    /// The verified assertion, if verification succeeded
    pub fn verified(&self) -> Option<&AuthSuccess> {
        self.verified.as_ref()
    }

    /// Consume the result, yielding the verified assertion
    pub fn into_verified(self) -> Option<AuthSuccess> {
        self.verified
    }

    /// The verified identifier, if verification succeeded
    pub fn identifier(&self) -> Option<&str> {
        self.verified.as_ref().and_then(AuthSuccess::identity)
    }

    /// Human-readable status (the provider's message on failure)
    pub fn status(&self) -> &str {
        &self.status
    }
}

/// Relying-party side of the protocol
#[derive(Debug, Clone)]
pub struct ConsumerManager {
    config: ConsumerConfig,
    discovery: Arc<dyn Discovery>,
    transport: Arc<dyn DirectTransport>,
    associations: Arc<dyn ConsumerAssociationStore>,
    nonces: Arc<dyn NonceVerifier>,
}

impl ConsumerManager {
    /// Create a manager with in-memory association and nonce stores
    pub fn new(
        config: ConsumerConfig,
        discovery: Arc<dyn Discovery>,
        transport: Arc<dyn DirectTransport>,
    ) -> Self {
        let nonces = Arc::new(MemoryNonceVerifier::new(config.nonce_max_age()));
        Self {
            config,
            discovery,
            transport,
            associations: Arc::new(MemoryConsumerAssociationStore::new()),
            nonces,
        }
    }

    /// Create a manager that discovers and talks to providers over HTTP
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Transport`] if an HTTP client cannot be built.
    pub fn with_http(config: ConsumerConfig) -> Result<Self> {
        let discovery = HttpDiscovery::with_config(HttpDiscoveryConfig {
            request_timeout: config.http_timeout(),
            ..HttpDiscoveryConfig::default()
        })?;
        let transport = HttpTransport::new(config.http_timeout())?;
        Ok(Self::new(config, Arc::new(discovery), Arc::new(transport)))
    }

    /// Use a custom association store
    pub fn with_association_store(mut self, store: Arc<dyn ConsumerAssociationStore>) -> Self {
        self.associations = store;
        self
    }

    /// Use a custom nonce verifier
    pub fn with_nonce_verifier(mut self, nonces: Arc<dyn NonceVerifier>) -> Self {
        self.nonces = nonces;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Drop expired associations and nonces that aged out of the window,
    /// returning how many entries were removed
    pub async fn cleanup_expired(&self) -> usize {
        let associations = self.associations.cleanup_expired().await;
        let nonces = self.nonces.cleanup_expired().await;
        if associations + nonces > 0 {
            debug!(associations, nonces, "consumer stores cleaned up");
        }
        associations + nonces
    }

    /// Resolve the preferred provider endpoint for an identifier
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Discovery`] if no endpoint is found.
    pub async fn discover(&self, identifier: &str) -> Result<DiscoveryInformation> {
        let mut found = self.discovery.discover(identifier).await?;
        if found.is_empty() {
            return Err(ProtocolError::Discovery {
                identifier: identifier.to_string(),
                reason: "no endpoints discovered".to_string(),
            });
        }
        let info = found.swap_remove(0);
        debug!(
            identifier,
            op_endpoint = %info.op_endpoint(),
            op_identifier = info.is_op_identifier(),
            "discovered provider"
        );
        Ok(info)
    }

    /// Establish (or reuse) an association with the discovered provider
    ///
    /// A live association for the endpoint is reused. A fresh one is
    /// requested with the preferred type; if the provider answers
    /// `unsupported-type` with a supported suggestion, the request is retried
    /// once with that type.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Association`] if no association can be made.
    pub async fn associate(&self, info: &DiscoveryInformation) -> Result<Association> {
        let endpoint = info.op_endpoint();
        if let Some(existing) = self.associations.latest(endpoint.as_str()).await {
            debug!(handle = existing.handle(), %endpoint, "reusing association");
            return Ok(existing);
        }

        let failure = |reason: String| ProtocolError::Association {
            endpoint: endpoint.to_string(),
            reason,
        };
        if endpoint.scheme() != "https" && !self.config.allow_plaintext_association {
            warn!(%endpoint, "refusing no-encryption association over plain http");
            return Err(failure("no-encryption association requires https".to_string()));
        }

        let mut assoc_type = self.config.preferred_association_type;
        let mut retried = false;
        loop {
            let mut request = ParameterList::new();
            request.set("ns", OPENID2_NS);
            request.set("mode", Mode::Associate.as_str());
            request.set("assoc_type", assoc_type.as_str());
            request.set("session_type", SessionType::NoEncryption.as_str());

            let response = self.transport.send(endpoint, &request).await?;

            if response.get("mode") == Some(Mode::Error.as_str()) {
                let message = response.get("error").unwrap_or("unknown error").to_string();
                let suggestion = response.get("assoc_type").and_then(AssociationType::parse);
                let session_ok = response
                    .get("session_type")
                    .is_none_or(|s| s == SessionType::NoEncryption.as_str());

                if response.get("error_code") == Some("unsupported-type")
                    && !retried
                    && session_ok
                    && let Some(suggested) = suggestion
                    && suggested != assoc_type
                {
                    debug!(
                        %endpoint,
                        suggested = suggested.as_str(),
                        "retrying association with suggested type"
                    );
                    assoc_type = suggested;
                    retried = true;
                    continue;
                }
                warn!(%endpoint, %message, "association rejected");
                return Err(failure(message));
            }

            let association =
                parse_association(&response, assoc_type).map_err(|e| failure(e.to_string()))?;
            debug!(handle = association.handle(), %endpoint, "association established");
            self.associations.save(endpoint.as_str(), association.clone()).await;
            return Ok(association);
        }
    }

    /// Build a `checkid_setup` (or `checkid_immediate`) request
    ///
    /// OP identifiers produce an `identifier_select` request.
    pub fn build_auth_request(
        &self,
        info: &DiscoveryInformation,
        association: Option<&Association>,
        return_to: &str,
        realm: Option<&str>,
        immediate: bool,
    ) -> AuthRequest {
        let (claimed_id, identity) = match (info.claimed_id(), info.local_id()) {
            (Some(claimed), Some(local)) => (claimed, local),
            _ => (IDENTIFIER_SELECT, IDENTIFIER_SELECT),
        };
        AuthRequest::new(
            info.op_endpoint().clone(),
            claimed_id,
            identity,
            return_to,
            realm,
            association.map(Association::handle),
            immediate,
        )
    }

    /// Verify a provider response received at `receiving_url`
    ///
    /// `discovered` and `association` are the values the request was built
    /// with. Failures never raise: they are reported through the returned
    /// status.
    pub async fn verify(
        &self,
        receiving_url: &Url,
        params: &ParameterList,
        discovered: &DiscoveryInformation,
        association: Option<&Association>,
    ) -> VerificationResult {
        match params.get("mode").and_then(Mode::parse) {
            Some(Mode::IdRes) => {}
            Some(Mode::Cancel) => {
                return VerificationResult::failure("Authentication cancelled by the user");
            }
            Some(Mode::SetupNeeded) => {
                return VerificationResult::failure("Provider requires user setup");
            }
            Some(Mode::Error) => {
                let error = params.get("error").unwrap_or("Provider returned an error");
                return VerificationResult::failure(error);
            }
            other => {
                return VerificationResult::failure(format!(
                    "Unexpected response mode: {}",
                    other.map_or("none", Mode::as_str)
                ));
            }
        }

        match self.verify_assertion(receiving_url, params, discovered, association).await {
            Ok(assertion) => {
                debug!(identifier = assertion.identity(), "assertion verified");
                VerificationResult::success(assertion)
            }
            Err(e) => {
                warn!(error = %e, "assertion rejected");
                VerificationResult::failure(e.to_string())
            }
        }
    }

    async fn verify_assertion(
        &self,
        receiving_url: &Url,
        params: &ParameterList,
        discovered: &DiscoveryInformation,
        association: Option<&Association>,
    ) -> Result<AuthSuccess> {
        if params.get("ns") != Some(OPENID2_NS) {
            return Err(ProtocolError::verification("not an OpenID 2.0 response"));
        }
        let assertion = AuthSuccess::parse(params)?;

        verify_return_to(&assertion, receiving_url)?;
        verify_signed_list(&assertion)?;
        self.verify_discovered_information(&assertion, discovered).await?;
        self.verify_signature(&assertion, association).await?;

        let op_endpoint = params.require("op_endpoint")?;
        let nonce = params.require("response_nonce")?;
        let check = self.nonces.check(op_endpoint, nonce).await;
        if !check.is_ok() {
            return Err(ProtocolError::verification(format!("nonce rejected: {check:?}")));
        }
        Ok(assertion)
    }

    /// The asserted identifier must be one the provider is authoritative for
    async fn verify_discovered_information(
        &self,
        assertion: &AuthSuccess,
        discovered: &DiscoveryInformation,
    ) -> Result<()> {
        let op_endpoint = assertion.op_endpoint().unwrap_or_default();
        let claimed_id = assertion
            .identity()
            .ok_or_else(|| ProtocolError::verification("no identifier asserted"))?;
        let claimed_id = strip_fragment(claimed_id);
        let local_id = assertion.local_identity().unwrap_or(claimed_id);

        let matches = |info: &DiscoveryInformation| {
            info.op_endpoint().as_str() == op_endpoint
                && info.claimed_id().map(strip_fragment) == Some(claimed_id)
                && info.local_id() == Some(local_id)
        };
        if matches(discovered) {
            return Ok(());
        }

        // OP identifiers, or a different identifier than the one requested
        debug!(claimed_id, "rediscovering asserted identifier");
        let rediscovered = self.discovery.discover(claimed_id).await?;
        if rediscovered.iter().any(matches) {
            Ok(())
        } else {
            Err(ProtocolError::verification(format!(
                "provider {op_endpoint} is not authoritative for {claimed_id}"
            )))
        }
    }

    async fn verify_signature(
        &self,
        assertion: &AuthSuccess,
        association: Option<&Association>,
    ) -> Result<()> {
        let op_endpoint = assertion.op_endpoint().unwrap_or_default();
        let handle = assertion.assoc_handle().unwrap_or_default();

        if let Some(invalidated) = assertion.params().get("invalidate_handle") {
            debug!(handle = invalidated, "provider invalidated association");
            self.associations.remove(op_endpoint, invalidated).await;
        }

        let local = match association {
            Some(bound) if bound.handle() == handle && !bound.is_expired() => Some(bound.clone()),
            _ => self.associations.load(op_endpoint, handle).await,
        };

        if let Some(association) = local {
            return if association.verify_signature(assertion.params())? {
                Ok(())
            } else {
                Err(ProtocolError::verification("signature mismatch"))
            };
        }

        // Signed with an association we do not hold: ask the provider
        let endpoint = Url::parse(op_endpoint)?;
        let mut request = assertion.params().clone();
        request.set("mode", Mode::CheckAuthentication.as_str());
        let response = self.transport.send(&endpoint, &request).await?;

        if let Some(invalidated) = response.get("invalidate_handle") {
            self.associations.remove(op_endpoint, invalidated).await;
        }
        if response.get("is_valid") == Some("true") {
            Ok(())
        } else {
            Err(ProtocolError::verification(
                response
                    .get("error")
                    .map_or_else(
                        || "provider rejected the assertion".to_string(),
                        ToString::to_string,
                    ),
            ))
        }
    }
}

fn parse_association(response: &ParameterList, requested: AssociationType) -> Result<Association> {
    let assoc_type = response
        .get("assoc_type")
        .and_then(AssociationType::parse)
        .ok_or_else(|| {
            ProtocolError::UnsupportedType(response.get("assoc_type").unwrap_or("").to_string())
        })?;
    if assoc_type != requested {
        return Err(ProtocolError::malformed(format!(
            "asked for {}, provider answered {}",
            requested.as_str(),
            assoc_type.as_str()
        )));
    }
    if response.get("session_type") != Some(SessionType::NoEncryption.as_str()) {
        return Err(ProtocolError::UnsupportedType(
            response.get("session_type").unwrap_or("").to_string(),
        ));
    }

    let handle = response.require("assoc_handle")?;
    let key = STANDARD
        .decode(response.require("mac_key")?)
        .map_err(|e| ProtocolError::malformed(format!("mac_key is not base64: {e}")))?;
    if key.len() != assoc_type.key_len() {
        return Err(ProtocolError::malformed("mac_key has the wrong length"));
    }
    let expires_in: u64 = response
        .require("expires_in")?
        .parse()
        .map_err(|_| ProtocolError::malformed("expires_in is not a number"))?;

    Ok(Association::from_parts(
        handle,
        assoc_type,
        key,
        std::time::Duration::from_secs(expires_in),
    ))
}

/// return_to must name the URL the response actually arrived at
fn verify_return_to(assertion: &AuthSuccess, receiving_url: &Url) -> Result<()> {
    let return_to = Url::parse(assertion.params().require("return_to")?)?;
    let same_base = return_to.scheme() == receiving_url.scheme()
        && return_to.host_str() == receiving_url.host_str()
        && return_to.port_or_known_default() == receiving_url.port_or_known_default()
        && return_to.path() == receiving_url.path();
    if !same_base {
        return Err(ProtocolError::verification(format!(
            "return_to {return_to} does not match {receiving_url}"
        )));
    }

    let received: Vec<(String, String)> = receiving_url.query_pairs().into_owned().collect();
    for pair in return_to.query_pairs().into_owned() {
        if !received.contains(&pair) {
            return Err(ProtocolError::verification(format!(
                "return_to parameter {} missing from the response URL",
                pair.0
            )));
        }
    }
    Ok(())
}

fn verify_signed_list(assertion: &AuthSuccess) -> Result<()> {
    let signed = assertion.signed_fields();
    let optional = ["claimed_id", "identity"]
        .into_iter()
        .filter(|field| assertion.params().contains(field));
    for field in REQUIRED_SIGNED_FIELDS.into_iter().chain(optional) {
        if !signed.contains(&field) {
            return Err(ProtocolError::verification(format!("{field} is not signed")));
        }
    }
    Ok(())
}

fn strip_fragment(identifier: &str) -> &str {
    identifier.split_once('#').map_or(identifier, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Transport answering associate requests from a script
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        answers: Mutex<Vec<ParameterList>>,
        seen: Mutex<Vec<ParameterList>>,
    }

    #[async_trait]
    impl DirectTransport for ScriptedTransport {
        async fn send(&self, _endpoint: &Url, params: &ParameterList) -> Result<ParameterList> {
            self.seen.lock().unwrap().push(params.clone());
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                return Err(ProtocolError::Transport {
                    endpoint: "test".to_string(),
                    reason: "no scripted answer".to_string(),
                });
            }
            Ok(answers.remove(0))
        }
    }

    fn endpoint() -> Url {
        Url::parse("https://idp.example.com/entryPoint").unwrap()
    }

    fn manager(transport: Arc<ScriptedTransport>) -> ConsumerManager {
        let discovery = StaticDiscovery::new()
            .with_op_identifier("https://idp.example.com/", endpoint())
            .with_claimed_prefix("https://idp.example.com/~", endpoint());
        ConsumerManager::new(ConsumerConfig::default(), Arc::new(discovery), transport)
    }

    fn association_answer(assoc_type: AssociationType, handle: &str) -> ParameterList {
        [
            ("ns", OPENID2_NS.to_string()),
            ("assoc_handle", handle.to_string()),
            ("assoc_type", assoc_type.as_str().to_string()),
            ("session_type", "no-encryption".to_string()),
            ("expires_in", "600".to_string()),
            ("mac_key", STANDARD.encode(vec![7u8; assoc_type.key_len()])),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_associate_retries_suggested_type_once() {
        let unsupported: ParameterList = [
            ("ns", OPENID2_NS),
            ("mode", "error"),
            ("error", "unsupported"),
            ("error_code", "unsupported-type"),
            ("assoc_type", "HMAC-SHA1"),
            ("session_type", "no-encryption"),
        ]
        .into_iter()
        .collect();
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .answers
            .lock()
            .unwrap()
            .extend([unsupported, association_answer(AssociationType::HmacSha1, "h1")]);

        let manager = manager(transport.clone());
        let info = manager.discover("https://idp.example.com/").await.unwrap();
        let association = manager.associate(&info).await.unwrap();
        assert_eq!(association.handle(), "h1");
        assert_eq!(association.assoc_type(), AssociationType::HmacSha1);

        // Second call reuses the stored association
        let again = manager.associate(&info).await.unwrap();
        assert_eq!(again.handle(), "h1");
        assert_eq!(transport.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_plain_http_association_refused() {
        let discovery = StaticDiscovery::new().with_op_identifier(
            "http://idp.example.com/",
            Url::parse("http://idp.example.com/entryPoint").unwrap(),
        );
        let manager = ConsumerManager::new(
            ConsumerConfig::default(),
            Arc::new(discovery),
            Arc::new(ScriptedTransport::default()),
        );
        let info = manager.discover("http://idp.example.com/").await.unwrap();
        assert!(matches!(
            manager.associate(&info).await,
            Err(ProtocolError::Association { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_request_for_op_identifier_uses_identifier_select() {
        let manager = manager(Arc::new(ScriptedTransport::default()));
        let info = manager.discover("https://idp.example.com/").await.unwrap();
        let association = Association::from_parts(
            "h",
            AssociationType::HmacSha256,
            vec![1; 32],
            Duration::from_secs(60),
        );
        let request = manager.build_auth_request(
            &info,
            Some(&association),
            "https://rp.example.com/finishLogin",
            None,
            false,
        );
        assert_eq!(request.params().get("claimed_id"), Some(IDENTIFIER_SELECT));
        assert_eq!(request.assoc_handle(), Some("h"));
        assert_eq!(request.destination_url().host_str(), Some("idp.example.com"));
    }

    #[tokio::test]
    async fn test_negative_assertions_report_status() {
        let manager = manager(Arc::new(ScriptedTransport::default()));
        let info = manager.discover("https://idp.example.com/").await.unwrap();
        let url = Url::parse("https://rp.example.com/finishLogin").unwrap();

        let cancel: ParameterList = [("ns", OPENID2_NS), ("mode", "cancel")].into_iter().collect();
        let result = manager.verify(&url, &cancel, &info, None).await;
        assert!(result.verified().is_none());
        assert!(result.status().contains("cancelled"));

        let error: ParameterList = [("ns", OPENID2_NS), ("mode", "error"), ("error", "boom")]
            .into_iter()
            .collect();
        assert_eq!(manager.verify(&url, &error, &info, None).await.status(), "boom");
    }

    #[test]
    fn test_return_to_must_match_receiving_url() {
        let params: ParameterList = [
            ("ns", OPENID2_NS),
            ("mode", "id_res"),
            ("op_endpoint", "https://idp.example.com/entryPoint"),
            ("return_to", "https://rp.example.com/finishLogin?session=1"),
            ("response_nonce", "2024-01-01T00:00:00Zx"),
            ("assoc_handle", "h"),
            ("signed", "op_endpoint,return_to,response_nonce,assoc_handle"),
            ("sig", "AAAA"),
        ]
        .into_iter()
        .collect();
        let assertion = AuthSuccess::parse(&params).unwrap();

        let good =
            Url::parse("https://rp.example.com/finishLogin?session=1&openid.mode=id_res").unwrap();
        assert!(verify_return_to(&assertion, &good).is_ok());

        let other_path = Url::parse("https://rp.example.com/elsewhere?session=1").unwrap();
        assert!(verify_return_to(&assertion, &other_path).is_err());

        let missing_query = Url::parse("https://rp.example.com/finishLogin").unwrap();
        assert!(verify_return_to(&assertion, &missing_query).is_err());
    }
}
