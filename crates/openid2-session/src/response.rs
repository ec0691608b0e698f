//! Framework-neutral responses
//!
//! The state machines never touch an HTTP framework. They return a
//! [`Response`] for the caller to render, or an [`Outcome`] when the caller
//! may continue with its own handling.

use openid2_core::{Mode, ParameterList};

/// What the browser (or the calling relying party) should receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// 302 redirect to the given location
    Redirect(String),
    /// Key-value form body answering a direct request
    Direct(ParameterList),
    /// Plain success acknowledgment
    Ok,
    /// HTML document
    Html(String),
    /// Error with HTTP status and message
    Error {
        /// HTTP status code
        status: u16,
        /// Human-readable message
        message: String,
    },
}

impl Response {
    /// HTTP status code for this response
    ///
    /// Direct error messages (`mode:error`) are sent with 400.
    pub fn status(&self) -> u16 {
        match self {
            Self::Redirect(_) => 302,
            Self::Direct(params) if params.get("mode") == Some(Mode::Error.as_str()) => 400,
            Self::Direct(_) | Self::Ok | Self::Html(_) => 200,
            Self::Error { status, .. } => *status,
        }
    }

    /// Redirect target, if this is a redirect
    pub fn redirect_location(&self) -> Option<&str> {
        match self {
            Self::Redirect(location) => Some(location),
            _ => None,
        }
    }

    /// Body of a direct response in key-value form
    pub fn direct_body(&self) -> Option<String> {
        match self {
            Self::Direct(params) => Some(params.to_key_value_form()),
            _ => None,
        }
    }

    /// Whether this is an error response
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Result of an operation that either lets the request through or answers it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Carry on handling the request with the value
    Continue(T),
    /// End the request with this response
    Respond(Response),
}

impl<T> Outcome<T> {
    /// The continuation value, if any
    pub fn into_continue(self) -> Option<T> {
        match self {
            Self::Continue(value) => Some(value),
            Self::Respond(_) => None,
        }
    }

    /// The response, if the request must end here
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Continue(_) => None,
            Self::Respond(response) => Some(response),
        }
    }
}

/// Escape text for inclusion in HTML content or a quoted attribute
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
