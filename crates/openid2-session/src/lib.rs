//! # OpenID 2.0 Sessions - Consumer and Provider State Machines
//!
//! The redirect-driven OpenID 2.0 handshake, from both sides, as state
//! machines that survive between HTTP requests of one browser session.
//!
//! ## Key Features
//!
//! - **Relying Party** - [`ConsumerSession`] discovers, associates, redirects,
//!   and verifies; [`RelyingParty`] guards resources with it
//! - **Identity Provider** - [`ProviderSession`] dispatches on `openid.mode`;
//!   [`OpenIdServer`] hosts the endpoint and discovery documents
//! - **Attribute Exchange** - SReg and AX negotiated together, AX first
//! - **Session Binding** - Typed keys into a per-browser-session store, one
//!   lock per session
//! - **Framework Neutral** - [`RequestContext`] in, [`Response`] out
//!
//! ## Architecture
//!
//! - [`attributes`] - [`AttributeSet`], the neutral user profile
//! - [`exchange`] - [`AttributeExchangeNegotiator`]
//! - [`consumer`] - Relying-party session
//! - [`provider`] - Provider session and local authentication hook
//! - [`binding`] - [`SessionBindingKey`] and [`SessionStore`]
//! - [`request`] / [`response`] - The HTTP boundary
//! - [`error`] - [`SessionError`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use openid2_core::{ConsumerConfig, ConsumerManager};
//! use openid2_session::{MemorySessionStore, Outcome, RelyingParty, RequestContext, SessionScope};
//!
//! # async fn example() -> openid2_session::Result<()> {
//! let manager = Arc::new(ConsumerManager::with_http(ConsumerConfig::default())?);
//! let relying_party = RelyingParty::new(
//!     manager,
//!     Arc::new(MemorySessionStore::default()),
//!     "https://idp.example.com/",
//!     "/openid",
//! );
//!
//! let scope = SessionScope::new("session-cookie-value");
//! let request = RequestContext::parse("https://app.example.com/secret")?;
//! match relying_party.authenticate(&scope, &request).await? {
//!     Outcome::Continue(identity) => println!("hello {}", identity.open_id_url()),
//!     Outcome::Respond(redirect) => {
//!         println!("send the browser to {:?}", redirect.redirect_location())
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod binding;
pub mod consumer;
pub mod error;
pub mod exchange;
pub mod provider;
pub mod request;
pub mod response;

#[doc(inline)]
pub use attributes::AttributeSet;
#[doc(inline)]
pub use binding::{
    CONSUMER_SESSION, MemorySessionStore, PROVIDER_SESSION, SessionBindingKey, SessionScope,
    SessionStore,
};
#[doc(inline)]
pub use consumer::{ConsumerSession, RelyingParty, VerifiedIdentity};
#[doc(inline)]
pub use error::{Result, SessionError};
#[doc(inline)]
pub use exchange::{AttributeExchangeNegotiator, AttributeRequest, AttributeResponse};
#[doc(inline)]
pub use provider::{AuthenticationContext, LocalAuthenticator, OpenIdServer, ProviderSession};
#[doc(inline)]
pub use request::RequestContext;
#[doc(inline)]
pub use response::{Outcome, Response, escape_html};
