//! Direct (server-to-server) communication
//!
//! `associate` and `check_authentication` are sent by the relying party
//! straight to the provider endpoint as a form POST; the provider answers
//! with a key-value form body.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::{ProtocolError, Result};
use crate::params::ParameterList;

/// Direct request capability
#[async_trait]
pub trait DirectTransport: Send + Sync + std::fmt::Debug {
    /// POST `params` to `endpoint` and decode the key-value form answer
    ///
    /// Error responses (`mode:error`) are returned as parameters, not as
    /// errors, so the caller can read `error_code` and retry.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Transport`] when the endpoint is unreachable
    /// or answers with something other than key-value form.
    async fn send(&self, endpoint: &Url, params: &ParameterList) -> Result<ParameterList>;
}

/// Direct transport over HTTP(S) with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the given request timeout
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Transport`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProtocolError::Transport {
                endpoint: "direct".to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DirectTransport for HttpTransport {
    async fn send(&self, endpoint: &Url, params: &ParameterList) -> Result<ParameterList> {
        let failure = |reason: String| ProtocolError::Transport {
            endpoint: endpoint.to_string(),
            reason,
        };

        debug!(%endpoint, mode = params.get("mode"), "sending direct request");
        let response = self
            .client
            .post(endpoint.clone())
            .form(&params.to_prefixed_pairs())
            .send()
            .await
            .map_err(|e| failure(format!("Request failed: {e}")))?;

        // 400 carries a key-value error body per the protocol
        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::BAD_REQUEST {
            return Err(failure(format!("HTTP {}", status.as_u16())));
        }
        let body = response
            .text()
            .await
            .map_err(|e| failure(format!("Failed to read response: {e}")))?;
        ParameterList::from_key_value_form(&body)
    }
}
