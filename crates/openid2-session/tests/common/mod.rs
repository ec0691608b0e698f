//! Shared harness: a relying party and a provider wired together in-process

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use openid2_core::{
    ConsumerConfig, ConsumerManager, DirectTransport, ParameterList, ProtocolError, ServerConfig,
    StaticDiscovery,
};
use openid2_session::{
    AttributeSet, AuthenticationContext, LocalAuthenticator, MemorySessionStore, OpenIdServer,
    RelyingParty, RequestContext, Response, SessionScope,
};
use url::Url;

pub const PROVIDER_ADDRESS: &str = "https://idp.example.com/";
pub const LOGIN_PAGE: &str = "<form>login</form>";

/// Decisions the test makes on behalf of the provider's users
#[derive(Debug, Default)]
pub struct TestAuthenticator {
    decisions: Mutex<HashMap<String, Decision>>,
}

#[derive(Debug, Clone)]
enum Decision {
    Approve(AttributeSet),
    Deny,
}

impl TestAuthenticator {
    /// The user of `scope` logs in as `identity`
    pub fn login(&self, scope: &SessionScope, identity: AttributeSet) {
        self.decide(scope, Decision::Approve(identity));
    }

    /// The user of `scope` declines
    pub fn deny(&self, scope: &SessionScope) {
        self.decide(scope, Decision::Deny);
    }

    /// The user of `scope` logs out of the provider
    pub fn logout(&self, scope: &SessionScope) {
        self.decisions.lock().unwrap().remove(scope.as_str());
    }

    fn decide(&self, scope: &SessionScope, decision: Decision) {
        self.decisions
            .lock()
            .unwrap()
            .insert(scope.as_str().to_string(), decision);
    }
}

#[async_trait]
impl LocalAuthenticator for TestAuthenticator {
    async fn authenticate_user(
        &self,
        ctx: &AuthenticationContext<'_>,
        identity: &mut AttributeSet,
    ) -> Option<Response> {
        let decision = self.decisions.lock().unwrap().get(ctx.scope.as_str()).cloned();
        match decision {
            Some(Decision::Approve(approved)) => {
                identity.populate(approved);
                None
            }
            Some(Decision::Deny) => Some(ctx.cancel()),
            None if ctx.immediate => Some(ctx.setup_needed()),
            None => Some(Response::Html(LOGIN_PAGE.to_string())),
        }
    }
}

/// Direct requests delivered straight to the provider's entry point
#[derive(Debug)]
pub struct LoopbackTransport {
    server: OpenIdServer,
}

#[async_trait]
impl DirectTransport for LoopbackTransport {
    async fn send(
        &self,
        endpoint: &Url,
        params: &ParameterList,
    ) -> openid2_core::Result<ParameterList> {
        let failure = |reason: String| ProtocolError::Transport {
            endpoint: endpoint.to_string(),
            reason,
        };
        let request = RequestContext::new(endpoint.clone())
            .and_then(|r| r.with_form(params.to_prefixed_pairs()))
            .map_err(|e| failure(e.to_string()))?;

        // Direct requests carry no browser session
        match self.server.entry_point(&SessionScope::generate(), &request).await {
            Response::Direct(answer) => Ok(answer),
            other => Err(failure(format!("unexpected answer {other:?}"))),
        }
    }
}

pub struct Harness {
    pub server: OpenIdServer,
    pub authenticator: Arc<TestAuthenticator>,
    pub manager: Arc<ConsumerManager>,
    pub store: Arc<MemorySessionStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(PROVIDER_ADDRESS, ConsumerConfig::default())
    }

    pub fn with_config(address: &str, config: ConsumerConfig) -> Self {
        let authenticator = Arc::new(TestAuthenticator::default());
        let server = OpenIdServer::new(
            address,
            ServerConfig::default(),
            authenticator.clone(),
            Arc::new(MemorySessionStore::default()),
        )
        .unwrap();

        let discovery = StaticDiscovery::new()
            .with_op_identifier(address, server.op_endpoint().clone())
            .with_claimed_prefix(format!("{address}~"), server.op_endpoint().clone());
        let transport = LoopbackTransport { server: server.clone() };
        let manager = Arc::new(ConsumerManager::new(
            config,
            Arc::new(discovery),
            Arc::new(transport),
        ));

        Self {
            server,
            authenticator,
            manager,
            store: Arc::new(MemorySessionStore::default()),
        }
    }

    /// A relying party guarding resources with `claimed_identifier`
    pub fn relying_party(&self, claimed_identifier: &str) -> RelyingParty {
        RelyingParty::new(self.manager.clone(), self.store.clone(), claimed_identifier, "/openid")
    }
}

pub fn alice() -> AttributeSet {
    AttributeSet::new()
        .with_nickname("alice")
        .with_email("a@example.com")
        .with_first_name("Alice")
        .with_last_name("Liddell")
}

pub fn request(url: &str) -> RequestContext {
    RequestContext::parse(url).unwrap()
}

pub fn location(response: &Response) -> String {
    response
        .redirect_location()
        .unwrap_or_else(|| panic!("expected a redirect, got {response:?}"))
        .to_string()
}

/// Replace one query parameter of `url`
pub fn with_query_param(url: &str, key: &str, value: &str) -> String {
    let mut url = Url::parse(url).unwrap();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .map(|(k, v)| if k == key { (k, value.to_string()) } else { (k, v) })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}
