//! Simple Registration extension (SReg 1.1)
//!
//! Named profile fields (`nickname`, `email`, `fullname`, ...) requested as
//! comma-separated `required` / `optional` lists and answered as
//! `<alias>.<field>=<value>`.

use std::collections::BTreeMap;

use super::{declare_alias, fields_of, find_alias, split_list};
use crate::params::ParameterList;

/// SReg 1.1 namespace
pub const SREG_NS_11: &str = "http://openid.net/extensions/sreg/1.1";

/// SReg 1.0 namespace, still sent by older relying parties
pub const SREG_NS_10: &str = "http://openid.net/sreg/1.0";

const PREFERRED_ALIAS: &str = "sreg";

/// Resolve the SReg alias, accepting an undeclared legacy `sreg.` prefix
fn sreg_alias(params: &ParameterList) -> Option<String> {
    find_alias(params, &[SREG_NS_11, SREG_NS_10]).or_else(|| {
        params
            .keys_with_prefix("sreg.")
            .next()
            .map(|_| PREFERRED_ALIAS.to_string())
    })
}

/// SReg fetch request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SRegRequest {
    required: Vec<String>,
    optional: Vec<String>,
    policy_url: Option<String>,
}

impl SRegRequest {
    /// Create an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a field, either as required or as optional
    pub fn add_attribute(&mut self, name: impl Into<String>, required: bool) -> &mut Self {
        let name = name.into();
        if required {
            self.required.push(name);
        } else {
            self.optional.push(name);
        }
        self
    }

    /// Set the relying party's privacy policy URL
    pub fn with_policy_url(mut self, url: impl Into<String>) -> Self {
        self.policy_url = Some(url.into());
        self
    }

    /// Requested fields, required ones first
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.required.iter().chain(&self.optional).map(String::as_str)
    }

    /// Whether `name` was requested as required
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// Attach the request to a message
    pub fn write_to(&self, params: &mut ParameterList) {
        let alias = declare_alias(params, SREG_NS_11, PREFERRED_ALIAS);
        if !self.required.is_empty() {
            params.set(format!("{alias}.required"), self.required.join(","));
        }
        if !self.optional.is_empty() {
            params.set(format!("{alias}.optional"), self.optional.join(","));
        }
        if let Some(policy) = &self.policy_url {
            params.set(format!("{alias}.policy_url"), policy.clone());
        }
    }

    /// Read the request carried by a message, if any
    pub fn read_from(params: &ParameterList) -> Option<Self> {
        let alias = sreg_alias(params)?;
        Some(Self {
            required: split_list(params.get(&format!("{alias}.required"))),
            optional: split_list(params.get(&format!("{alias}.optional"))),
            policy_url: params.get(&format!("{alias}.policy_url")).map(ToString::to_string),
        })
    }
}

/// SReg response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SRegResponse {
    values: BTreeMap<String, String>,
}

impl SRegResponse {
    /// Create an empty response
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer a field
    pub fn add_attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Value of an answered field
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Whether no field was answered
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Attach the response to a message
    pub fn write_to(&self, params: &mut ParameterList) {
        let alias = declare_alias(params, SREG_NS_11, PREFERRED_ALIAS);
        for (name, value) in &self.values {
            params.set(format!("{alias}.{name}"), value.clone());
        }
    }

    /// Read the response carried by a message, if any
    pub fn read_from(params: &ParameterList) -> Option<Self> {
        let alias = sreg_alias(params)?;
        let values = fields_of(params, &alias)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Some(Self { values })
    }
}
