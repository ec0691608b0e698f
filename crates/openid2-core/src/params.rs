//! Flat OpenID parameter lists
//!
//! Indirect messages travel as `openid.`-prefixed query or form parameters,
//! direct responses as key-value form (`key:value\n`). [`ParameterList`]
//! holds the unprefixed keys and converts between both encodings.

use std::collections::BTreeMap;

use url::Url;

use crate::error::{ProtocolError, Result};

/// Prefix carried by every OpenID parameter in URLs and form bodies
pub const OPENID_PREFIX: &str = "openid.";

/// Unprefixed OpenID parameters of a single message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterList {
    params: BTreeMap<String, String>,
}

impl ParameterList {
    /// Create an empty parameter list
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw request pairs (query string or form body)
    ///
    /// Only `openid.`-prefixed keys are kept. A key repeated with a different
    /// value is rejected; protocol messages never carry multi-valued fields.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedMessage`] on conflicting duplicates.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = BTreeMap::new();
        for (key, value) in pairs {
            let Some(name) = key.as_ref().strip_prefix(OPENID_PREFIX) else {
                continue;
            };
            let value = value.into();
            if let Some(existing) = params.get(name)
                && existing != &value
            {
                return Err(ProtocolError::malformed(format!(
                    "conflicting values for openid.{name}"
                )));
            }
            params.insert(name.to_string(), value);
        }
        Ok(Self { params })
    }

    /// Parse the OpenID parameters carried in a URL's query string
    ///
    /// # Errors
    ///
    /// See [`ParameterList::from_pairs`].
    pub fn from_url(url: &Url) -> Result<Self> {
        Self::from_pairs(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())))
    }

    /// Decode a key-value form document (direct response body)
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedMessage`] for a line without `:`.
    pub fn from_key_value_form(body: &str) -> Result<Self> {
        let mut params = BTreeMap::new();
        for line in body.lines() {
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                ProtocolError::malformed(format!("key-value line without separator: {line}"))
            })?;
            params.insert(key.to_string(), value.to_string());
        }
        Ok(Self { params })
    }

    /// Encode every parameter as key-value form
    pub fn to_key_value_form(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.params {
            push_key_value(&mut out, key, value);
        }
        out
    }

    /// Key-value form of the named fields, in the given order
    ///
    /// This is the exact byte string a message signature covers.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingParameter`] if a named field is absent.
    pub fn key_value_form_of<'a, I>(&self, keys: I) -> Result<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = String::new();
        for key in keys {
            let value = self.require(key)?;
            push_key_value(&mut out, key, value);
        }
        Ok(out)
    }

    /// Prefixed pairs suitable for a query string or form body
    pub fn to_prefixed_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (format!("{OPENID_PREFIX}{k}"), v.clone()))
            .collect()
    }

    /// Get a parameter value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Get a parameter value that must be present
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingParameter`] if the key is absent.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| ProtocolError::MissingParameter(key.to_string()))
    }

    /// Set a parameter, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    /// Remove a parameter, returning its value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.params.remove(key)
    }

    /// Whether the parameter is present
    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Iterate over `(key, value)` pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys starting with `prefix`, in key order
    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        self.params
            .keys()
            .filter(move |k| k.starts_with(prefix))
            .map(String::as_str)
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterList {
    /// Collect already-unprefixed pairs
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            params: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn push_key_value(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push(':');
    out.push_str(value);
    out.push('\n');
}
