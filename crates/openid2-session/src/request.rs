//! The current HTTP request, as the state machines see it

use openid2_core::ParameterList;
use url::Url;

use crate::error::{Result, SessionError};

/// Explicit view of the request being handled
///
/// Carries the full request URL (including the query), the application's
/// context path, and the `openid.*` parameters from the query string and,
/// for POSTed messages, the form body.
#[derive(Debug, Clone)]
pub struct RequestContext {
    url: Url,
    context_path: String,
    params: ParameterList,
}

impl RequestContext {
    /// Build a context from the full request URL
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedMessage`] for conflicting `openid.*`
    /// query parameters.
    pub fn new(url: Url) -> Result<Self> {
        let params = ParameterList::from_url(&url)?;
        Ok(Self {
            url,
            context_path: String::new(),
            params,
        })
    }

    /// Parse a full request URL string
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedMessage`] if the URL does not parse.
    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| SessionError::MalformedMessage(format!("invalid request URL: {e}")))?;
        Self::new(url)
    }

    /// Merge `openid.*` parameters from a form body
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedMessage`] if a form field conflicts
    /// with a query field.
    pub fn with_form<I, K, V>(mut self, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let query = self.params.to_prefixed_pairs();
        let form: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.into()))
            .collect();
        self.params = ParameterList::from_pairs(query.into_iter().chain(form))?;
        Ok(self)
    }

    /// Set the path prefix the application is mounted under (e.g. `/app`)
    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into().trim_end_matches('/').to_string();
        self
    }

    /// Full request URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Path prefix the application is mounted under, without trailing `/`
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    /// `openid.*` parameters of the request
    pub fn params(&self) -> &ParameterList {
        &self.params
    }

    /// Path plus query string, as used for redirecting back later
    pub fn request_uri_with_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }

    /// Scheme, host, and port of the request
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }
}
