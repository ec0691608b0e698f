//! Attribute Exchange 1.0 fetch messages
//!
//! Attributes are identified by type URI and carried under a local alias
//! chosen by the requester:
//!
//! ```text
//! openid.ax.mode=fetch_request
//! openid.ax.type.email=http://axschema.org/contact/email
//! openid.ax.required=email
//! ```
//!
//! The provider answers under the same aliases with `value.<alias>`, or with
//! `count.<alias>` plus `value.<alias>.<n>` for multi-valued attributes.

use super::{declare_alias, find_alias, split_list};
use crate::params::ParameterList;

/// Attribute Exchange 1.0 namespace
pub const AX_NS: &str = "http://openid.net/srv/ax/1.0";

const PREFERRED_ALIAS: &str = "ax";
const FETCH_REQUEST: &str = "fetch_request";
const FETCH_RESPONSE: &str = "fetch_response";

/// One requested attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxAttribute {
    /// Requester-chosen alias
    pub alias: String,
    /// Attribute type URI
    pub type_uri: String,
    /// Whether the relying party requires the attribute
    pub required: bool,
}

/// AX fetch request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    attributes: Vec<AxAttribute>,
}

impl FetchRequest {
    /// Create an empty fetch request
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an attribute under `alias`
    ///
    /// Aliases must not contain `.` or `,`; such aliases are ignored.
    pub fn add_attribute(
        &mut self,
        alias: impl Into<String>,
        type_uri: impl Into<String>,
        required: bool,
    ) -> &mut Self {
        let alias = alias.into();
        if is_valid_alias(&alias) {
            self.attributes.push(AxAttribute {
                alias,
                type_uri: type_uri.into(),
                required,
            });
        } else {
            tracing::warn!(%alias, "ignoring AX attribute with invalid alias");
        }
        self
    }

    /// Requested attributes, in request order
    pub fn attributes(&self) -> &[AxAttribute] {
        &self.attributes
    }

    /// Attach the request to a message
    pub fn write_to(&self, params: &mut ParameterList) {
        let alias = declare_alias(params, AX_NS, PREFERRED_ALIAS);
        params.set(format!("{alias}.mode"), FETCH_REQUEST);
        for attribute in &self.attributes {
            params.set(format!("{alias}.type.{}", attribute.alias), attribute.type_uri.clone());
        }
        let join = |required: bool| {
            self.attributes
                .iter()
                .filter(|a| a.required == required)
                .map(|a| a.alias.as_str())
                .collect::<Vec<_>>()
                .join(",")
        };
        let required = join(true);
        if !required.is_empty() {
            params.set(format!("{alias}.required"), required);
        }
        let if_available = join(false);
        if !if_available.is_empty() {
            params.set(format!("{alias}.if_available"), if_available);
        }
    }

    /// Read the fetch request carried by a message, if any
    ///
    /// Only aliases named in `required` / `if_available` that also declare a
    /// type URI are returned.
    pub fn read_from(params: &ParameterList) -> Option<Self> {
        let ax = find_alias(params, &[AX_NS])?;
        if params.get(&format!("{ax}.mode")) != Some(FETCH_REQUEST) {
            return None;
        }
        let required = split_list(params.get(&format!("{ax}.required")));
        let if_available = split_list(params.get(&format!("{ax}.if_available")));

        let attributes = required
            .iter()
            .map(|a| (a, true))
            .chain(if_available.iter().map(|a| (a, false)))
            .filter_map(|(alias, required)| {
                params
                    .get(&format!("{ax}.type.{alias}"))
                    .map(|type_uri| AxAttribute {
                        alias: alias.clone(),
                        type_uri: type_uri.to_string(),
                        required,
                    })
            })
            .collect();
        Some(Self { attributes })
    }
}

/// One answered attribute
#[derive(Debug, Clone, PartialEq, Eq)]
struct AxValue {
    alias: String,
    type_uri: String,
    values: Vec<String>,
}

/// AX fetch response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    values: Vec<AxValue>,
}

impl FetchResponse {
    /// Create an empty fetch response
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer an attribute under the requester's alias
    pub fn add_attribute(
        &mut self,
        alias: impl Into<String>,
        type_uri: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        let alias = alias.into();
        let value = value.into();
        if let Some(existing) = self.values.iter_mut().find(|v| v.alias == alias) {
            existing.values.push(value);
        } else {
            self.values.push(AxValue {
                alias,
                type_uri: type_uri.into(),
                values: vec![value],
            });
        }
        self
    }

    /// First value for an attribute type URI
    pub fn value_for_type(&self, type_uri: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.type_uri == type_uri)
            .and_then(|v| v.values.first())
            .map(String::as_str)
    }

    /// Aliases answered, in answer order
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| v.alias.as_str())
    }

    /// Whether nothing was answered
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Attach the response to a message
    pub fn write_to(&self, params: &mut ParameterList) {
        let ax = declare_alias(params, AX_NS, PREFERRED_ALIAS);
        params.set(format!("{ax}.mode"), FETCH_RESPONSE);
        for value in &self.values {
            params.set(format!("{ax}.type.{}", value.alias), value.type_uri.clone());
            if let [single] = value.values.as_slice() {
                params.set(format!("{ax}.value.{}", value.alias), single.clone());
            } else {
                params.set(format!("{ax}.count.{}", value.alias), value.values.len().to_string());
                for (n, v) in value.values.iter().enumerate() {
                    params.set(format!("{ax}.value.{}.{}", value.alias, n + 1), v.clone());
                }
            }
        }
    }

    /// Read the fetch response carried by a message, if any
    pub fn read_from(params: &ParameterList) -> Option<Self> {
        let ax = find_alias(params, &[AX_NS])?;
        if params.get(&format!("{ax}.mode")) != Some(FETCH_RESPONSE) {
            return None;
        }
        let type_prefix = format!("{ax}.type.");
        let mut values = Vec::new();
        for (key, type_uri) in params.iter() {
            let Some(alias) = key.strip_prefix(type_prefix.as_str()) else {
                continue;
            };
            let answered = match params.get(&format!("{ax}.count.{alias}")) {
                Some(count) => {
                    let count: usize = count.parse().unwrap_or(0);
                    (1..=count)
                        .filter_map(|n| params.get(&format!("{ax}.value.{alias}.{n}")))
                        .map(ToString::to_string)
                        .collect()
                }
                None => params
                    .get(&format!("{ax}.value.{alias}"))
                    .map(|v| vec![v.to_string()])
                    .unwrap_or_default(),
            };
            values.push(AxValue {
                alias: alias.to_string(),
                type_uri: type_uri.to_string(),
                values: answered,
            });
        }
        Some(Self { values })
    }
}

fn is_valid_alias(alias: &str) -> bool {
    !alias.is_empty() && !alias.contains(['.', ','])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EMAIL: &str = "http://axschema.org/contact/email";
    const FRIENDLY: &str = "http://axschema.org/namePerson/friendly";

    #[test]
    fn test_fetch_request_encoding() {
        let mut request = FetchRequest::new();
        request
            .add_attribute("email", EMAIL, true)
            .add_attribute("nick", FRIENDLY, false)
            .add_attribute("bad.alias", FRIENDLY, false);

        let mut params = ParameterList::new();
        request.write_to(&mut params);

        assert_eq!(params.get("ax.mode"), Some("fetch_request"));
        assert_eq!(params.get("ax.required"), Some("email"));
        assert_eq!(params.get("ax.if_available"), Some("nick"));

        let parsed = FetchRequest::read_from(&params).unwrap();
        assert_eq!(parsed.attributes().len(), 2);
        assert_eq!(parsed.attributes()[1].type_uri, FRIENDLY);
        assert!(!parsed.attributes()[1].required);
    }

    #[test]
    fn test_request_alias_without_type_is_dropped() {
        let params: ParameterList = [
            ("ns.ax", AX_NS),
            ("ax.mode", "fetch_request"),
            ("ax.required", "email,ghost"),
            ("ax.type.email", EMAIL),
        ]
        .into_iter()
        .collect();
        let request = FetchRequest::read_from(&params).unwrap();
        assert_eq!(request.attributes().len(), 1);
    }

    #[test]
    fn test_response_single_and_counted_values() {
        let mut response = FetchResponse::new();
        response
            .add_attribute("mail", EMAIL, "a@example.com")
            .add_attribute("mail", EMAIL, "b@example.com")
            .add_attribute("nick", FRIENDLY, "alice");

        let mut params = ParameterList::new();
        response.write_to(&mut params);
        assert_eq!(params.get("ax.count.mail"), Some("2"));
        assert_eq!(params.get("ax.value.mail.2"), Some("b@example.com"));
        assert_eq!(params.get("ax.value.nick"), Some("alice"));

        let parsed = FetchResponse::read_from(&params).unwrap();
        assert_eq!(parsed.value_for_type(EMAIL), Some("a@example.com"));
        assert_eq!(parsed.value_for_type(FRIENDLY), Some("alice"));
    }

    #[test]
    fn test_request_is_not_a_response() {
        let mut params = ParameterList::new();
        FetchRequest::new().write_to(&mut params);
        assert!(FetchResponse::read_from(&params).is_none());
    }
}
