//! Relying-party session
//!
//! A [`ConsumerSession`] owns one outstanding authentication attempt:
//!
//! ```text
//! created ──commence──► awaiting redirect ──finish_login──► verified
//! ```
//!
//! There is no transition back. Once verified, [`ConsumerSession::authenticate`]
//! keeps handing out the same [`VerifiedIdentity`] without another round trip.
//!
//! [`RelyingParty`] is the request-facing shell: it keeps one session per
//! browser session under [`CONSUMER_SESSION`].

use std::sync::Arc;

use openid2_core::{Association, ConsumerManager, DiscoveryInformation};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::attributes::AttributeSet;
use crate::binding::{CONSUMER_SESSION, SessionScope, SessionStore};
use crate::error::{Result, SessionError};
use crate::exchange::{AttributeExchangeNegotiator, AttributeResponse};
use crate::request::RequestContext;
use crate::response::{Outcome, Response};

/// Path appended to the return base to receive the provider's answer
pub const FINISH_LOGIN_PATH: &str = "/finishLogin";

/// An identifier the provider vouched for, with what it told us about the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    open_id_url: String,
    attributes: AttributeSet,
}

impl VerifiedIdentity {
    /// The verified OpenID identifier
    pub fn open_id_url(&self) -> &str {
        &self.open_id_url
    }

    /// Attributes supplied through SReg or AX
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }
}

/// Relying-party state machine for one authentication attempt
#[derive(Debug)]
pub struct ConsumerSession {
    manager: Arc<ConsumerManager>,
    discovered: DiscoveryInformation,
    association: Association,
    finish_url: Url,
    from: Option<String>,
    identity: Option<Arc<VerifiedIdentity>>,
}

impl ConsumerSession {
    /// Discover the provider for `claimed_identifier` and associate with it
    ///
    /// `return_base` is where the provider sends the browser back, minus the
    /// [`FINISH_LOGIN_PATH`] suffix. A base starting with `/` is taken
    /// relative to the scheme, host, port, and context path of `request`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DiscoveryFailure`] when no provider endpoint
    /// is found, [`SessionError::AssociationFailure`] when key exchange
    /// fails, and [`SessionError::Configuration`] for an unusable
    /// `return_base`.
    pub async fn new(
        manager: Arc<ConsumerManager>,
        claimed_identifier: &str,
        return_base: &str,
        request: &RequestContext,
    ) -> Result<Self> {
        let finish_url = finish_url(return_base, request)?;

        let discovered = manager
            .discover(claimed_identifier)
            .await
            .map_err(|e| SessionError::DiscoveryFailure(e.to_string()))?;
        let association = manager
            .associate(&discovered)
            .await
            .map_err(|e| SessionError::AssociationFailure(e.to_string()))?;

        debug!(
            claimed_identifier,
            op_endpoint = %discovered.op_endpoint(),
            handle = association.handle(),
            "consumer session created"
        );
        Ok(Self {
            manager,
            discovered,
            association,
            finish_url,
            from: None,
            identity: None,
        })
    }

    /// Let the request through if the user is verified, otherwise start the
    /// handshake
    ///
    /// # Errors
    ///
    /// Propagates errors from [`ConsumerSession::commence`].
    pub async fn authenticate(
        &mut self,
        request: &RequestContext,
    ) -> Result<Outcome<Arc<VerifiedIdentity>>> {
        if let Some(identity) = &self.identity {
            return Ok(Outcome::Continue(identity.clone()));
        }
        self.commence(request).await.map(Outcome::Respond)
    }

    /// Remember where the user was going and redirect to the provider
    ///
    /// # Errors
    ///
    /// Does not fail for a successfully constructed session.
    pub async fn commence(&mut self, request: &RequestContext) -> Result<Response> {
        self.from = Some(request.request_uri_with_query());

        let mut auth_request = self.manager.build_auth_request(
            &self.discovered,
            Some(&self.association),
            self.finish_url.as_str(),
            None,
            false,
        );
        let include_fetch = self.manager.config().request_attribute_exchange;
        for extension in AttributeExchangeNegotiator::requests(include_fetch) {
            extension.write_to(auth_request.params_mut());
        }

        let destination = auth_request.destination_url();
        debug!(from = self.from.as_deref(), %destination, "redirecting to provider");
        Ok(Response::Redirect(destination.into()))
    }

    /// Verify the provider's answer and send the user back where they were
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingOrigin`] if [`ConsumerSession::commence`]
    /// never ran, and [`SessionError::VerificationFailure`] when the answer
    /// does not yield a verified identifier.
    pub async fn finish_login(&mut self, request: &RequestContext) -> Result<Response> {
        let Some(from) = self.from.clone() else {
            error!("finish_login reached without a captured origin");
            return Err(SessionError::MissingOrigin);
        };

        let result = self
            .manager
            .verify(request.url(), request.params(), &self.discovered, Some(&self.association))
            .await;
        let status = result.status().to_string();
        let Some(assertion) = result.into_verified() else {
            warn!(%status, "provider answer not verified");
            return Err(SessionError::VerificationFailure(status));
        };
        let open_id_url = assertion
            .identity()
            .ok_or_else(|| SessionError::VerificationFailure("no identifier asserted".to_string()))?
            .to_string();

        let signed = assertion.signed_params();
        let attributes =
            AttributeExchangeNegotiator::extract(&AttributeResponse::read_all(&signed));
        info!(identifier = %open_id_url, "user verified");
        self.identity = Some(Arc::new(VerifiedIdentity {
            open_id_url,
            attributes,
        }));
        Ok(Response::Redirect(from))
    }

    /// The verified identity, once [`ConsumerSession::finish_login`] succeeded
    pub fn identity(&self) -> Option<&Arc<VerifiedIdentity>> {
        self.identity.as_ref()
    }

    /// Where the provider sends the browser back
    pub fn finish_url(&self) -> &Url {
        &self.finish_url
    }

    /// The endpoint discovery resolved to
    pub fn discovered(&self) -> &DiscoveryInformation {
        &self.discovered
    }

    /// The association requests are signed with
    pub fn association(&self) -> &Association {
        &self.association
    }
}

fn finish_url(return_base: &str, request: &RequestContext) -> Result<Url> {
    let base = return_base.trim_end_matches('/');
    let absolute = if return_base.starts_with('/') {
        format!("{}{}{base}", request.origin(), request.context_path())
    } else {
        base.to_string()
    };
    Url::parse(&format!("{absolute}{FINISH_LOGIN_PATH}"))
        .map_err(|e| SessionError::Configuration(format!("invalid return base {return_base}: {e}")))
}

/// Request-facing relying party
///
/// Protects resources with one [`ConsumerSession`] per browser session,
/// always authenticating against the same claimed identifier.
#[derive(Debug, Clone)]
pub struct RelyingParty {
    manager: Arc<ConsumerManager>,
    store: Arc<dyn SessionStore>,
    claimed_identifier: String,
    return_base: String,
}

impl RelyingParty {
    /// Create a relying party
    pub fn new(
        manager: Arc<ConsumerManager>,
        store: Arc<dyn SessionStore>,
        claimed_identifier: impl Into<String>,
        return_base: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            store,
            claimed_identifier: claimed_identifier.into(),
            return_base: return_base.into(),
        }
    }

    /// Guard a protected resource
    ///
    /// Creates and binds a session on first use; the redirect to the
    /// provider is only returned once the session is bound.
    ///
    /// # Errors
    ///
    /// Propagates session creation and redirect errors. No session is bound
    /// when creation fails.
    pub async fn authenticate(
        &self,
        scope: &SessionScope,
        request: &RequestContext,
    ) -> Result<Outcome<Arc<VerifiedIdentity>>> {
        let session = CONSUMER_SESSION
            .get_or_try_insert(self.store.as_ref(), scope, || {
                ConsumerSession::new(
                    self.manager.clone(),
                    &self.claimed_identifier,
                    &self.return_base,
                    request,
                )
            })
            .await?;
        let mut session = session.lock().await;
        session.authenticate(request).await
    }

    /// Handle the provider's answer at the finish URL
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingOrigin`] if no session was started in
    /// this browser session, otherwise propagates
    /// [`ConsumerSession::finish_login`] errors.
    pub async fn finish_login(
        &self,
        scope: &SessionScope,
        request: &RequestContext,
    ) -> Result<Response> {
        let Some(session) = CONSUMER_SESSION.get(self.store.as_ref(), scope).await else {
            error!(%scope, "finish_login without a bound consumer session");
            return Err(SessionError::MissingOrigin);
        };
        let mut session = session.lock().await;
        session.finish_login(request).await
    }

    /// The verified identity of this browser session, if any
    pub async fn identity(&self, scope: &SessionScope) -> Option<Arc<VerifiedIdentity>> {
        let session = CONSUMER_SESSION.get(self.store.as_ref(), scope).await?;
        let session = session.lock().await;
        session.identity().cloned()
    }

    /// Forget the session, so the next request starts over
    pub async fn logout(&self, scope: &SessionScope) {
        CONSUMER_SESSION.clear(self.store.as_ref(), scope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_url_absolute_base() {
        let request = RequestContext::parse("http://rp.example.com/secret").unwrap();
        let url = finish_url("https://rp.example.com/openid/", &request).unwrap();
        assert_eq!(url.as_str(), "https://rp.example.com/openid/finishLogin");
    }

    #[test]
    fn test_finish_url_relative_base() {
        let request = RequestContext::parse("http://rp.example.com:8080/app/secret?x=1")
            .unwrap()
            .with_context_path("/app");
        let url = finish_url("/openid", &request).unwrap();
        assert_eq!(url.as_str(), "http://rp.example.com:8080/app/openid/finishLogin");
    }

    #[test]
    fn test_finish_url_rejects_garbage() {
        let request = RequestContext::parse("http://rp.example.com/").unwrap();
        assert!(matches!(
            finish_url("not a url", &request),
            Err(SessionError::Configuration(_))
        ));
    }
}
