//! Provider entry point behavior

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{Harness, LOGIN_PAGE, PROVIDER_ADDRESS, alice, location, request};
use openid2_core::discovery::parse_xrds;
use openid2_core::{DiscoveryInformation, OPENID2_NS, ServerConfig};
use openid2_session::{
    AttributeSet, AuthenticationContext, LocalAuthenticator, MemorySessionStore, OpenIdServer,
    Response, SessionScope,
};
use pretty_assertions::assert_eq;
use url::Url;

/// Holds every request in the hook for a while, counting overlaps
#[derive(Debug, Default)]
struct SlowAuthenticator {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl LocalAuthenticator for SlowAuthenticator {
    async fn authenticate_user(
        &self,
        ctx: &AuthenticationContext<'_>,
        _: &mut AttributeSet,
    ) -> Option<Response> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Some(ctx.cancel())
    }
}

fn checkid(return_to: &str, immediate: bool) -> String {
    let mode = if immediate { "checkid_immediate" } else { "checkid_setup" };
    let mut url = Url::parse("https://idp.example.com/entryPoint").unwrap();
    url.query_pairs_mut()
        .append_pair("openid.ns", OPENID2_NS)
        .append_pair("openid.mode", mode)
        .append_pair("openid.claimed_id", openid2_core::IDENTIFIER_SELECT)
        .append_pair("openid.identity", openid2_core::IDENTIFIER_SELECT)
        .append_pair("openid.return_to", return_to);
    url.to_string()
}

#[tokio::test]
async fn test_bogus_mode_is_an_error_without_side_effects() {
    let harness = Harness::new();
    let scope = SessionScope::generate();

    let response = harness
        .server
        .entry_point(&scope, &request("https://idp.example.com/entryPoint?openid.mode=bogus"))
        .await;
    assert_eq!(
        response,
        Response::Error {
            status: 500,
            message: "Unknown request: bogus".to_string()
        }
    );

    let session = harness.server.session(&scope).await.unwrap();
    let session = session.lock().await;
    assert_eq!(session.mode(), Some("bogus"));
    assert!(session.identity().is_none());
}

#[tokio::test]
async fn test_missing_mode_is_an_error() {
    let harness = Harness::new();
    let response = harness
        .server
        .entry_point(&SessionScope::generate(), &request("https://idp.example.com/entryPoint"))
        .await;
    assert_eq!(response.status(), 500);
    assert!(matches!(
        response,
        Response::Error { message, .. } if message == "Unknown request: no mode"
    ));
}

#[tokio::test]
async fn test_associate_answers_key_value_form() {
    let harness = Harness::new();
    let request = request("https://idp.example.com/entryPoint")
        .with_form([
            ("openid.ns", OPENID2_NS),
            ("openid.mode", "associate"),
            ("openid.assoc_type", "HMAC-SHA256"),
            ("openid.session_type", "no-encryption"),
        ])
        .unwrap();

    let response = harness.server.entry_point(&SessionScope::generate(), &request).await;
    assert_eq!(response.status(), 200);
    let body = response.direct_body().unwrap();
    assert!(body.contains("assoc_type:HMAC-SHA256\n"));
    assert!(body.contains("mac_key:"));
}

#[tokio::test]
async fn test_diffie_hellman_is_unsupported() {
    let harness = Harness::new();
    let request = request("https://idp.example.com/entryPoint")
        .with_form([
            ("openid.ns", OPENID2_NS),
            ("openid.mode", "associate"),
            ("openid.assoc_type", "HMAC-SHA256"),
            ("openid.session_type", "DH-SHA256"),
        ])
        .unwrap();

    let response = harness.server.entry_point(&SessionScope::generate(), &request).await;
    assert_eq!(response.status(), 400);
    let Response::Direct(params) = response else {
        panic!("expected a direct response");
    };
    assert_eq!(params.get("error_code"), Some("unsupported-type"));
    assert_eq!(params.get("session_type"), Some("no-encryption"));
}

#[tokio::test]
async fn test_realm_is_derived_from_return_to_host() {
    let harness = Harness::new();
    let scope = SessionScope::generate();

    let response = harness
        .server
        .entry_point(&scope, &request(&checkid("https://app.example.com/cb", false)))
        .await;
    assert_eq!(response, Response::Html(LOGIN_PAGE.to_string()));

    let session = harness.server.session(&scope).await.unwrap();
    let session = session.lock().await;
    assert_eq!(session.realm(), Some("app.example.com"));
    assert_eq!(session.return_to(), Some("https://app.example.com/cb"));
    assert!(session.identity().is_none());
}

#[tokio::test]
async fn test_immediate_request_without_login_needs_setup() {
    let harness = Harness::new();
    let response = harness
        .server
        .entry_point(
            &SessionScope::generate(),
            &request(&checkid("https://app.example.com/cb", true)),
        )
        .await;
    let answer = location(&response);
    assert!(answer.starts_with("https://app.example.com/cb?"));
    assert!(answer.contains("openid.mode=setup_needed"));
}

#[tokio::test]
async fn test_identity_without_nickname_is_not_ready() {
    let harness = Harness::new();
    let scope = SessionScope::generate();
    harness
        .authenticator
        .login(&scope, AttributeSet::new().with_email("nobody@example.com"));

    let response = harness
        .server
        .entry_point(&scope, &request(&checkid("https://app.example.com/cb", false)))
        .await;
    assert_eq!(response.status(), 500);
    assert!(matches!(response, Response::Error { message, .. } if message.contains("nickname")));

    let session = harness.server.session(&scope).await.unwrap();
    assert!(session.lock().await.identity().is_none());
}

#[tokio::test]
async fn test_private_association_verifies_once() {
    let harness = Harness::new();
    let scope = SessionScope::generate();
    harness.authenticator.login(&scope, alice());

    // No assoc_handle: the provider signs with a private association
    let answer = location(
        &harness
            .server
            .entry_point(&scope, &request(&checkid("https://app.example.com/cb", false)))
            .await,
    );
    {
        let session = harness.server.session(&scope).await.unwrap();
        assert_eq!(session.lock().await.identity(), Some(&alice()));
    }

    let received = request(&answer);
    let discovered = DiscoveryInformation::op_identifier(harness.server.op_endpoint().clone());
    let result = harness
        .manager
        .verify(received.url(), received.params(), &discovered, None)
        .await;
    assert_eq!(result.identifier(), Some("https://idp.example.com/~alice"));

    let replayed = harness
        .manager
        .verify(received.url(), received.params(), &discovered, None)
        .await;
    assert!(replayed.verified().is_none());
}

#[tokio::test]
async fn test_requests_of_one_browser_session_are_serialized() {
    let authenticator = Arc::new(SlowAuthenticator::default());
    let server = OpenIdServer::new(
        PROVIDER_ADDRESS,
        ServerConfig::default(),
        authenticator.clone(),
        Arc::new(MemorySessionStore::default()),
    )
    .unwrap();
    let scope = SessionScope::generate();
    let first = request(&checkid("https://app.example.com/first", false));
    let second = request(&checkid("https://app.example.com/second", false));

    let (a, b) = tokio::join!(
        server.entry_point(&scope, &first),
        server.entry_point(&scope, &second),
    );
    assert!(location(&a).starts_with("https://app.example.com/first?"));
    assert!(location(&b).starts_with("https://app.example.com/second?"));
    assert_eq!(authenticator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(authenticator.peak.load(Ordering::SeqCst), 1);

    // Both tabs went through the one bound session; resuming replays the
    // request that ran last
    let resumed = location(&server.resume(&scope).await);
    let session = server.session(&scope).await.unwrap();
    let last = session.lock().await.return_to().map(ToString::to_string);
    assert!(resumed.starts_with(&format!("{}?", last.unwrap())));
    assert_eq!(authenticator.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_new_request_forgets_the_previous_identity() {
    let harness = Harness::new();
    let scope = SessionScope::generate();
    harness.authenticator.login(&scope, alice());
    harness
        .server
        .entry_point(&scope, &request(&checkid("https://app.example.com/cb", false)))
        .await;
    {
        let session = harness.server.session(&scope).await.unwrap();
        assert_eq!(session.lock().await.identity(), Some(&alice()));
    }

    harness.authenticator.logout(&scope);
    let response = harness
        .server
        .entry_point(&scope, &request(&checkid("https://other.example.com/cb", false)))
        .await;
    assert_eq!(response, Response::Html(LOGIN_PAGE.to_string()));

    let session = harness.server.session(&scope).await.unwrap();
    let session = session.lock().await;
    assert_eq!(session.realm(), Some("other.example.com"));
    assert!(session.identity().is_none());
}

#[tokio::test]
async fn test_logout_clears_the_session() {
    let harness = Harness::new();
    let scope = SessionScope::generate();
    harness
        .server
        .entry_point(&scope, &request(&checkid("https://app.example.com/cb", false)))
        .await;
    assert!(harness.server.session(&scope).await.is_some());

    assert_eq!(harness.server.logout(&scope).await, Response::Ok);
    assert!(harness.server.session(&scope).await.is_none());
    assert!(harness.server.resume(&scope).await.is_error());
}

#[test]
fn test_discovery_documents_name_the_endpoint() {
    let harness = Harness::new();
    assert_eq!(harness.server.identifier_for("bob"), "https://idp.example.com/~bob");

    let found = parse_xrds(&harness.server.xrds_document(), PROVIDER_ADDRESS);
    assert_eq!(found.len(), 1);
    assert!(found[0].is_op_identifier());
    assert_eq!(found[0].op_endpoint(), harness.server.op_endpoint());
}
