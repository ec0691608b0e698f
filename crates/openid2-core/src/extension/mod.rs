//! OpenID message extensions
//!
//! Extensions ride along in the same flat parameter list as the protocol
//! fields. Each one is declared with `openid.ns.<alias>=<namespace URI>` and
//! its fields are `openid.<alias>.<name>`. The alias is chosen by the sender,
//! so readers locate an extension by its namespace, never by a fixed alias.
//!
//! - [`sreg`] - Simple Registration 1.1 (named profile fields)
//! - [`ax`] - Attribute Exchange 1.0 fetch (URI-typed attributes)

pub mod ax;
pub mod sreg;

pub use ax::{AX_NS, AxAttribute, FetchRequest, FetchResponse};
pub use sreg::{SREG_NS_10, SREG_NS_11, SRegRequest, SRegResponse};

use crate::params::ParameterList;

/// Find the alias declared for any of the given namespaces
pub fn find_alias(params: &ParameterList, namespaces: &[&str]) -> Option<String> {
    params
        .iter()
        .filter_map(|(key, value)| key.strip_prefix("ns.").map(|alias| (alias, value)))
        .find(|(_, value)| namespaces.contains(value))
        .map(|(alias, _)| alias.to_string())
}

/// Declare `namespace` on `params`, reusing an existing declaration
///
/// Prefers `preferred` as the alias and falls back to `ext1`, `ext2`, ...
/// when another namespace already owns it.
pub fn declare_alias(params: &mut ParameterList, namespace: &str, preferred: &str) -> String {
    if let Some(alias) = find_alias(params, &[namespace]) {
        return alias;
    }
    let taken = |alias: &str| params.contains(&format!("ns.{alias}"));
    let alias = if taken(preferred) {
        (1..)
            .map(|n| format!("ext{n}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| preferred.to_string())
    } else {
        preferred.to_string()
    };
    params.set(format!("ns.{alias}"), namespace);
    alias
}

/// Fields under `alias.`, with the prefix stripped
pub(crate) fn fields_of<'a>(
    params: &'a ParameterList,
    alias: &str,
) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    let prefix = format!("{alias}.");
    params
        .iter()
        .filter_map(move |(key, value)| key.strip_prefix(prefix.as_str()).map(|name| (name, value)))
}

/// Split a comma-separated field list, skipping empty entries
pub(crate) fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}
