//! Identity-provider session
//!
//! [`OpenIdServer`] receives every request addressed to the provider
//! endpoint. Each browser session gets one [`ProviderSession`], bound under
//! [`PROVIDER_SESSION`], which dispatches on `openid.mode`:
//!
//! | Mode | Answer |
//! |------|--------|
//! | `associate` | key-value form body |
//! | `checkid_setup`, `checkid_immediate` | local authentication, then a signed redirect |
//! | `check_authentication` | key-value form body |
//! | anything else | 500 error |
//!
//! Local authentication is delegated to a [`LocalAuthenticator`]. When it
//! needs the user (a login form, a consent page) it answers with its own
//! [`Response`], and the request is picked up later with
//! [`OpenIdServer::resume`].

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use openid2_core::{AuthRequest, IndirectMessage, Mode, ParameterList, ServerConfig, ServerManager};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::attributes::AttributeSet;
use crate::binding::{PROVIDER_SESSION, SessionScope, SessionStore};
use crate::error::{Result, SessionError};
use crate::exchange::{AttributeExchangeNegotiator, AttributeRequest};
use crate::request::RequestContext;
use crate::response::{Response, escape_html};

/// Path of the provider endpoint below the provider address
pub const ENTRY_POINT_PATH: &str = "entryPoint";

/// What the local authentication hook knows about the pending request
#[derive(Debug, Clone, Copy)]
pub struct AuthenticationContext<'a> {
    /// Browser session of the user being authenticated
    pub scope: &'a SessionScope,
    /// Relying party asking, as shown to the user
    pub realm: &'a str,
    /// Where the answer goes
    pub return_to: &'a Url,
    /// Whether the relying party forbids interacting with the user
    pub immediate: bool,
}

impl AuthenticationContext<'_> {
    /// Negative answer to an immediate request: the user must be involved
    pub fn setup_needed(&self) -> Response {
        let message = IndirectMessage::setup_needed(self.return_to.clone());
        Response::Redirect(message.destination_url().into())
    }

    /// Negative answer: the user declined
    pub fn cancel(&self) -> Response {
        Response::Redirect(IndirectMessage::cancel(self.return_to.clone()).destination_url().into())
    }
}

/// Host-supplied authentication of the local user
#[async_trait]
pub trait LocalAuthenticator: Send + Sync + fmt::Debug {
    /// Decide who the user is
    ///
    /// Fill `identity` (at least the nickname) and return `None` to issue a
    /// positive assertion. Return `Some(response)` to answer the browser
    /// directly instead: a login page, [`AuthenticationContext::cancel`],
    /// or [`AuthenticationContext::setup_needed`].
    async fn authenticate_user(
        &self,
        ctx: &AuthenticationContext<'_>,
        identity: &mut AttributeSet,
    ) -> Option<Response>;
}

#[derive(Debug)]
struct ProviderCore {
    manager: ServerManager,
    address: String,
    authenticator: Arc<dyn LocalAuthenticator>,
}

impl ProviderCore {
    fn identifier_for(&self, nickname: &str) -> String {
        format!("{}~{nickname}", self.address)
    }
}

/// Provider state machine for one browser session
#[derive(Debug)]
pub struct ProviderSession {
    core: Arc<ProviderCore>,
    scope: SessionScope,
    requestp: ParameterList,
    mode: Option<String>,
    realm: Option<String>,
    return_to: Option<String>,
    identity: Option<AttributeSet>,
}

impl ProviderSession {
    fn new(core: Arc<ProviderCore>, scope: SessionScope) -> Self {
        Self {
            core,
            scope,
            requestp: ParameterList::new(),
            mode: None,
            realm: None,
            return_to: None,
            identity: None,
        }
    }

    /// Take in a new request and handle it
    ///
    /// # Errors
    ///
    /// See [`ProviderSession::handle_request`].
    pub async fn on_entry(&mut self, params: ParameterList) -> Result<Response> {
        self.mode = params.get("mode").map(ToString::to_string);
        self.return_to = params.get("return_to").map(ToString::to_string);
        self.realm = derive_realm(&params);
        self.requestp = params;
        debug!(
            scope = %self.scope,
            mode = self.mode.as_deref(),
            realm = self.realm.as_deref(),
            "provider request"
        );
        self.handle_request().await
    }

    /// Handle the current request
    ///
    /// Called again through [`OpenIdServer::resume`] after the local
    /// authentication hook answered the browser itself.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownMode`] for a mode the provider does
    /// not serve, [`SessionError::IdentityNotReady`] when the hook approved
    /// a user without a nickname, and [`SessionError::MalformedMessage`]
    /// for requests that cannot be answered.
    pub async fn handle_request(&mut self) -> Result<Response> {
        let manager = &self.core.manager;
        match self.mode.as_deref().and_then(Mode::parse) {
            Some(Mode::Associate) => Ok(Response::Direct(
                manager.association_response(&self.requestp).await?,
            )),
            Some(Mode::CheckIdSetup | Mode::CheckIdImmediate) => self.check_id().await,
            Some(Mode::CheckAuthentication) => {
                Ok(Response::Direct(manager.verify(&self.requestp).await?))
            }
            _ => {
                warn!(mode = self.mode.as_deref(), "unknown provider request");
                Err(SessionError::UnknownMode(self.mode.clone()))
            }
        }
    }

    async fn check_id(&mut self) -> Result<Response> {
        self.identity = None;
        let core = self.core.clone();
        let request = AuthRequest::parse(core.manager.op_endpoint().clone(), &self.requestp)?;
        let return_to = request.return_to()?;
        let realm = self.realm.clone().unwrap_or_default();

        let mut identity = AttributeSet::new();
        let ctx = AuthenticationContext {
            scope: &self.scope,
            realm: &realm,
            return_to: &return_to,
            immediate: request.is_immediate(),
        };
        if let Some(response) = core.authenticator.authenticate_user(&ctx, &mut identity).await {
            debug!(scope = %self.scope, "local authentication answered the browser");
            return Ok(response);
        }

        let identifier = identity.openid(&core.address).inspect_err(|e| {
            error!(
                scope = %self.scope,
                error = %e,
                "local authentication approved a user without a nickname"
            );
        })?;
        let identity = self.identity.insert(identity);

        let mut assertion = core.manager.auth_response(&request, &identifier, &identifier).await?;
        let requests = AttributeRequest::read_all(&self.requestp);
        for response in AttributeExchangeNegotiator::respond(&requests, identity) {
            response.write_to(assertion.params_mut());
        }
        core.manager.sign(&mut assertion).await?;

        info!(%identifier, %realm, "asserting identity");
        Ok(Response::Redirect(assertion.destination_url().into()))
    }

    /// Browser session this provider session belongs to
    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    /// Parameters of the current request
    pub fn request(&self) -> &ParameterList {
        &self.requestp
    }

    /// `openid.mode` of the current request
    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    /// Realm of the current request
    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// `openid.return_to` of the current request
    pub fn return_to(&self) -> Option<&str> {
        self.return_to.as_deref()
    }

    /// The user last asserted, once local authentication approved one
    pub fn identity(&self) -> Option<&AttributeSet> {
        self.identity.as_ref()
    }
}

/// Explicit realm, else the host of return_to, else the raw return_to
pub fn derive_realm(params: &ParameterList) -> Option<String> {
    if let Some(realm) = params.get("realm") {
        return Some(realm.to_string());
    }
    let return_to = params.get("return_to")?;
    match Url::parse(return_to) {
        Ok(url) => Some(url.host_str().unwrap_or(return_to).to_string()),
        Err(_) => Some(return_to.to_string()),
    }
}

/// An OpenID provider mounted at a base address
///
/// Identifiers have the form `<address>~<nickname>`; the endpoint is
/// `<address>entryPoint`.
#[derive(Debug, Clone)]
pub struct OpenIdServer {
    core: Arc<ProviderCore>,
    store: Arc<dyn SessionStore>,
}

impl OpenIdServer {
    /// Create a provider at `address`
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Configuration`] if `address` is not a URL
    /// ending with `/`.
    pub fn new(
        address: impl Into<String>,
        config: ServerConfig,
        authenticator: Arc<dyn LocalAuthenticator>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let address = address.into();
        if !address.ends_with('/') {
            return Err(SessionError::Configuration(format!(
                "provider address must end with '/': {address}"
            )));
        }
        let op_endpoint = Url::parse(&format!("{address}{ENTRY_POINT_PATH}"))
            .map_err(|e| {
                SessionError::Configuration(format!("invalid provider address {address}: {e}"))
            })?;

        Ok(Self {
            core: Arc::new(ProviderCore {
                manager: ServerManager::new(op_endpoint, config),
                address,
                authenticator,
            }),
            store,
        })
    }

    /// Provider base address
    pub fn address(&self) -> &str {
        &self.core.address
    }

    /// Provider endpoint URL
    pub fn op_endpoint(&self) -> &Url {
        self.core.manager.op_endpoint()
    }

    /// Protocol operations behind the endpoint
    pub fn manager(&self) -> &ServerManager {
        &self.core.manager
    }

    /// The session bound for `scope`, if any
    pub async fn session(
        &self,
        scope: &SessionScope,
    ) -> Option<Arc<tokio::sync::Mutex<ProviderSession>>> {
        PROVIDER_SESSION.get(self.store.as_ref(), scope).await
    }

    /// Handle a request to the provider endpoint
    pub async fn entry_point(&self, scope: &SessionScope, request: &RequestContext) -> Response {
        let session = self.session_for(scope).await;
        let mut session = session.lock().await;
        session
            .on_entry(request.params().clone())
            .await
            .unwrap_or_else(|e| error_response(&e))
    }

    /// Continue the pending request after the local authentication hook
    /// answered the browser
    pub async fn resume(&self, scope: &SessionScope) -> Response {
        let Some(session) = self.session(scope).await else {
            warn!(%scope, "nothing to resume");
            return error_response(&SessionError::UnknownMode(None));
        };
        let mut session = session.lock().await;
        session.handle_request().await.unwrap_or_else(|e| error_response(&e))
    }

    /// Forget the provider session of `scope`
    pub async fn logout(&self, scope: &SessionScope) -> Response {
        PROVIDER_SESSION.clear(self.store.as_ref(), scope).await;
        Response::Ok
    }

    /// Identifier of the local user `nickname`
    pub fn identifier_for(&self, nickname: &str) -> String {
        self.core.identifier_for(nickname)
    }

    /// XRDS document advertising the provider (for the OP identifier)
    pub fn xrds_document(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<xrds:XRDS xmlns:xrds="xri://$xrds" xmlns="xri://$xrd*($v*2.0)">
  <XRD>
    <Service priority="0">
      <Type>{}</Type>
      <URI>{}</URI>
    </Service>
  </XRD>
</xrds:XRDS>
"#,
            openid2_core::discovery::SERVER_SERVICE_TYPE,
            escape_html(self.op_endpoint().as_str())
        )
    }

    /// HTML identity page of the local user `nickname`
    pub fn identity_page(&self, nickname: &str) -> Response {
        let identifier = escape_html(&self.identifier_for(nickname));
        let endpoint = escape_html(self.op_endpoint().as_str());
        Response::Html(format!(
            "<!DOCTYPE html>\n<html>\n<head>\n\
             <link rel=\"openid2.provider\" href=\"{endpoint}\">\n\
             <link rel=\"openid2.local_id\" href=\"{identifier}\">\n\
             <title>{name}</title>\n</head>\n<body><p>{identifier}</p></body>\n</html>\n",
            name = escape_html(nickname)
        ))
    }

    async fn session_for(&self, scope: &SessionScope) -> Arc<tokio::sync::Mutex<ProviderSession>> {
        let Ok(session) = PROVIDER_SESSION
            .get_or_try_insert(self.store.as_ref(), scope, || async {
                Ok::<_, Infallible>(ProviderSession::new(self.core.clone(), scope.clone()))
            })
            .await;
        session
    }
}

fn error_response(err: &SessionError) -> Response {
    debug!(error = %err, "provider request failed");
    Response::Error {
        status: err.status_code(),
        message: err.to_string(),
    }
}
