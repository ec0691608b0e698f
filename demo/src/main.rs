//! OpenID 2.0 demo - a provider and a protected resource in one process
//!
//! - `/idp/` is the provider (OP identifier, XRDS discovery)
//! - `/idp/~<nickname>` are the user identity pages
//! - `/secret` is guarded by a relying party that logs in through `/idp/`
//!
//! ```text
//! RUST_LOG=debug cargo run -p openid2-demo -- --bind 127.0.0.1:8080
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::extract::{Form, Path, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use clap::Parser;
use openid2_core::{ConsumerConfig, ConsumerManager, ServerConfig};
use openid2_session::{
    AttributeSet, MemorySessionStore, OpenIdServer, Outcome, RelyingParty, RequestContext, Response,
    SessionError, SessionScope, escape_html,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

mod authenticator;

use authenticator::DemoAuthenticator;

const SESSION_COOKIE: &str = "openid2_demo_session";

/// OpenID 2.0 provider and relying party demo
#[derive(Debug, Parser)]
#[command(name = "openid2-demo", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "OPENID2_DEMO_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// URL the demo is reachable at, with trailing slash
    #[arg(
        long,
        env = "OPENID2_DEMO_PUBLIC_URL",
        default_value = "http://127.0.0.1:8080/"
    )]
    public_url: Url,

    /// Refuse associations with plain-http providers
    #[arg(long, env = "OPENID2_DEMO_REQUIRE_HTTPS")]
    require_https: bool,

    /// Idle timeout of browser sessions, in seconds
    #[arg(long, env = "OPENID2_DEMO_SESSION_IDLE_SECS", default_value_t = 1800)]
    session_idle_secs: u64,
}

#[derive(Debug, Clone)]
struct AppState {
    public_url: Url,
    provider: OpenIdServer,
    relying_party: RelyingParty,
    users: Arc<DemoAuthenticator>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,openid2_core=debug,openid2_session=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let store = Arc::new(MemorySessionStore::new(Duration::from_secs(
        args.session_idle_secs,
    )));

    let address = args.public_url.join("idp/").context("invalid public URL")?;
    let users = Arc::new(DemoAuthenticator::new(format!("{address}login")));
    let provider = OpenIdServer::new(
        address.as_str(),
        ServerConfig::default(),
        users.clone(),
        store.clone(),
    )?;

    let config = ConsumerConfig {
        allow_plaintext_association: !args.require_https,
        ..ConsumerConfig::default()
    };
    let manager = Arc::new(ConsumerManager::with_http(config)?);
    let relying_party = RelyingParty::new(
        manager.clone(),
        store.clone(),
        provider.address(),
        "/openid",
    );

    spawn_sweeper(store.clone(), users.clone(), manager, provider.clone());

    let state = AppState {
        public_url: args.public_url.clone(),
        provider,
        relying_party,
        users,
    };
    let app = Router::new()
        .route("/", get(index))
        .route("/secret", get(secret))
        .route("/openid/finishLogin", get(finish_login))
        .route("/logout", get(rp_logout))
        .route("/idp/", get(provider_xrds))
        .route("/idp/entryPoint", get(entry_point).post(entry_point_form))
        .route("/idp/login", post(login))
        .route("/idp/logout", get(provider_logout))
        .route("/idp/{user}", get(identity_page))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, public_url = %args.public_url, "openid2 demo listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Expire idle browser sessions along with their provider logins, and
/// prune association and nonce stores
fn spawn_sweeper(
    store: Arc<MemorySessionStore>,
    users: Arc<DemoAuthenticator>,
    consumer: Arc<ConsumerManager>,
    provider: OpenIdServer,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            for scope in store.expire_idle().await {
                users.logout(&scope);
            }
            let pruned = consumer.cleanup_expired().await
                + provider.manager().cleanup_expired().await;
            if pruned > 0 {
                debug!(pruned, "pruned expired protocol state");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

/// The browser session of the request, issuing a cookie on first contact
fn session_scope(jar: CookieJar) -> (CookieJar, SessionScope) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let scope = SessionScope::new(cookie.value());
        return (jar, scope);
    }
    let scope = SessionScope::generate();
    let cookie = Cookie::build((SESSION_COOKIE, scope.as_str().to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    (jar.add(cookie), scope)
}

fn request_context(public_url: &Url, uri: &Uri) -> openid2_session::Result<RequestContext> {
    let path = uri.path_and_query().map_or("/", |p| p.as_str());
    let url = public_url
        .join(path)
        .map_err(|e| SessionError::MalformedMessage(format!("invalid request path {path}: {e}")))?;
    RequestContext::new(url)
}

fn render(response: Response) -> axum::response::Response {
    let status =
        StatusCode::from_u16(response.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match response {
        Response::Redirect(location) => (status, [(header::LOCATION, location)]).into_response(),
        Response::Direct(params) => (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            params.to_key_value_form(),
        )
            .into_response(),
        Response::Ok => status.into_response(),
        Response::Html(body) => (status, Html(body)).into_response(),
        Response::Error { message, .. } => (status, message).into_response(),
    }
}

async fn index() -> Html<&'static str> {
    Html(
        "<!DOCTYPE html>\n<html><body>\
         <p><a href=\"/secret\">Protected page</a> (logs in through the local provider)</p>\
         <p><a href=\"/logout\">Log out of the relying party</a> | \
         <a href=\"/idp/logout\">Log out of the provider</a></p>\
         </body></html>",
    )
}

async fn secret(State(app): State<AppState>, jar: CookieJar, uri: Uri) -> impl IntoResponse {
    let (jar, scope) = session_scope(jar);
    let outcome = match request_context(&app.public_url, &uri) {
        Ok(request) => app.relying_party.authenticate(&scope, &request).await,
        Err(e) => Err(e),
    };
    let response = match outcome {
        Ok(Outcome::Continue(identity)) => {
            let attributes = identity.attributes();
            Response::Html(format!(
                "<!DOCTYPE html>\n<html><body><p>Hello {}</p><p>Email: {}</p>\
                 <p><a href=\"/logout\">Log out</a></p></body></html>",
                escape_html(identity.open_id_url()),
                escape_html(attributes.email().unwrap_or("not shared")),
            ))
        }
        Ok(Outcome::Respond(response)) => response,
        Err(e) => e.into_response(),
    };
    (jar, render(response))
}

async fn finish_login(
    State(app): State<AppState>,
    jar: CookieJar,
    uri: Uri,
) -> impl IntoResponse {
    let (jar, scope) = session_scope(jar);
    let response = match request_context(&app.public_url, &uri) {
        Ok(request) => app.relying_party.finish_login(&scope, &request).await,
        Err(e) => Err(e),
    };
    (jar, render(response.unwrap_or_else(SessionError::into_response)))
}

async fn rp_logout(State(app): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let (jar, scope) = session_scope(jar);
    app.relying_party.logout(&scope).await;
    (jar, render(Response::Redirect("/".to_string())))
}

async fn provider_xrds(State(app): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/xrds+xml")],
        app.provider.xrds_document(),
    )
}

async fn identity_page(
    State(app): State<AppState>,
    Path(user): Path<String>,
) -> axum::response::Response {
    match user.strip_prefix('~') {
        Some(nickname) if !nickname.is_empty() => render(app.provider.identity_page(nickname)),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn entry_point(
    State(app): State<AppState>,
    jar: CookieJar,
    uri: Uri,
) -> impl IntoResponse {
    let (jar, scope) = session_scope(jar);
    let response = match request_context(&app.public_url, &uri) {
        Ok(request) => app.provider.entry_point(&scope, &request).await,
        Err(e) => e.into_response(),
    };
    (jar, render(response))
}

async fn entry_point_form(
    State(app): State<AppState>,
    jar: CookieJar,
    uri: Uri,
    Form(form): Form<Vec<(String, String)>>,
) -> impl IntoResponse {
    let (jar, scope) = session_scope(jar);
    let request = request_context(&app.public_url, &uri).and_then(|r| r.with_form(form));
    let response = match request {
        Ok(request) => app.provider.entry_point(&scope, &request).await,
        Err(e) => e.into_response(),
    };
    (jar, render(response))
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    nickname: String,
    #[serde(default)]
    email: String,
}

async fn login(
    State(app): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> impl IntoResponse {
    let (jar, scope) = session_scope(jar);
    let nickname = form.nickname.trim();
    if nickname.is_empty() {
        return (jar, render(app.users.login_page("A nickname is required")));
    }

    let mut identity = AttributeSet::new().with_nickname(nickname);
    if !form.email.trim().is_empty() {
        identity = identity.with_email(form.email.trim());
    }
    app.users.login(&scope, identity);
    info!(%scope, nickname, "provider user logged in");
    (jar, render(app.provider.resume(&scope).await))
}

async fn provider_logout(State(app): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let (jar, scope) = session_scope(jar);
    app.users.logout(&scope);
    (jar, render(app.provider.logout(&scope).await))
}
