//! # OpenID 2.0 Core - Protocol Primitives
//!
//! Building blocks for both sides of an OpenID 2.0 authentication: the
//! relying party (consumer) and the identity provider (server).
//!
//! ## Key Features
//!
//! - **Messages** - `openid.*` parameter lists, key-value form, authentication
//!   requests, positive and negative assertions
//! - **Extensions** - Simple Registration 1.1 and Attribute Exchange 1.0 fetch
//! - **Associations** - HMAC-SHA1 / HMAC-SHA256 shared keys (`no-encryption`
//!   sessions over TLS) with concurrent in-memory stores
//! - **Replay Protection** - Timestamped response nonces with a bounded window
//! - **Discovery** - XRDS and HTML discovery over HTTP, or a static table
//! - **Realm Verification** - Wildcard-aware return_to matching
//!
//! ## Architecture
//!
//! - [`params`] - Flat parameter lists and their encodings
//! - [`message`] - Protocol modes and indirect messages
//! - [`extension`] - SReg and AX
//! - [`association`] - Shared MAC keys and their stores
//! - [`nonce`] - Response nonces and the replay store
//! - [`realm`] - Realm matching
//! - [`discovery`] - Identifier discovery
//! - [`transport`] - Direct (server-to-server) requests
//! - [`consumer`] - Relying-party operations ([`ConsumerManager`])
//! - [`server`] - Provider operations ([`ServerManager`])
//!
//! ## Quick Start
//!
//! ```rust
//! use openid2_core::{ServerConfig, ServerManager};
//! use url::Url;
//!
//! # async fn example() -> openid2_core::Result<()> {
//! let server = ServerManager::new(
//!     Url::parse("https://idp.example.com/entryPoint")?,
//!     ServerConfig::default(),
//! );
//!
//! let request: openid2_core::ParameterList = [
//!     ("ns", openid2_core::OPENID2_NS),
//!     ("mode", "associate"),
//!     ("assoc_type", "HMAC-SHA256"),
//!     ("session_type", "no-encryption"),
//! ]
//! .into_iter()
//! .collect();
//!
//! let response = server.association_response(&request).await?;
//! assert!(response.get("mac_key").is_some());
//! # Ok(())
//! # }
//! ```

pub mod association;
pub mod config;
pub mod consumer;
pub mod discovery;
pub mod error;
pub mod extension;
pub mod message;
pub mod nonce;
pub mod params;
pub mod realm;
pub mod server;
pub mod transport;

#[doc(inline)]
pub use association::{Association, AssociationType, SessionType};
#[doc(inline)]
pub use config::{ConsumerConfig, ServerConfig};
#[doc(inline)]
pub use consumer::{ConsumerManager, VerificationResult};
#[doc(inline)]
pub use discovery::{Discovery, DiscoveryInformation, HttpDiscovery, StaticDiscovery};
#[doc(inline)]
pub use error::{ProtocolError, Result};
#[doc(inline)]
pub use message::{AuthRequest, AuthSuccess, IDENTIFIER_SELECT, IndirectMessage, Mode, OPENID2_NS};
#[doc(inline)]
pub use params::ParameterList;
#[doc(inline)]
pub use realm::Realm;
#[doc(inline)]
pub use server::ServerManager;
#[doc(inline)]
pub use transport::{DirectTransport, HttpTransport};
