//! Attribute exchange negotiation
//!
//! Relying parties may ask for profile data with Simple Registration (named
//! fields), Attribute Exchange (URI-typed fields), or both at once. The
//! negotiator answers whichever schemes a request carries from an
//! [`AttributeSet`], and reads whichever schemes a response carries back
//! into one.
//!
//! When both schemes supply a field, the AX value wins; SReg is only a
//! fallback.

use openid2_core::ParameterList;
use openid2_core::extension::{FetchRequest, FetchResponse, SRegRequest, SRegResponse};
use tracing::debug;

use crate::attributes::AttributeSet;

/// AX type URI for the email address
pub const AX_EMAIL: &str = "http://axschema.org/contact/email";
/// Legacy AX type URI for the email address
pub const AX_EMAIL_LEGACY: &str = "http://schema.openid.net/contact/email";
/// AX type URI for the nickname
pub const AX_FRIENDLY_NAME: &str = "http://axschema.org/namePerson/friendly";
/// AX type URI for the first name
pub const AX_FIRST_NAME: &str = "http://axschema.org/namePerson/first";
/// AX type URI for the last name
pub const AX_LAST_NAME: &str = "http://axschema.org/namePerson/last";
/// AX type URI for the full name
pub const AX_FULL_NAME: &str = "http://axschema.org/namePerson";

/// An attribute request, by scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeRequest {
    /// Simple Registration
    Simple(SRegRequest),
    /// Attribute Exchange fetch
    Fetch(FetchRequest),
}

impl AttributeRequest {
    /// Every attribute request a message carries
    pub fn read_all(params: &ParameterList) -> Vec<Self> {
        let mut requests = Vec::new();
        if let Some(fetch) = FetchRequest::read_from(params) {
            requests.push(Self::Fetch(fetch));
        }
        if let Some(simple) = SRegRequest::read_from(params) {
            requests.push(Self::Simple(simple));
        }
        requests
    }

    /// Attach the request to a message
    pub fn write_to(&self, params: &mut ParameterList) {
        match self {
            Self::Simple(request) => request.write_to(params),
            Self::Fetch(request) => request.write_to(params),
        }
    }
}

/// An attribute response, by scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeResponse {
    /// Simple Registration
    Simple(SRegResponse),
    /// Attribute Exchange fetch
    Fetch(FetchResponse),
}

impl AttributeResponse {
    /// Every attribute response a message carries
    pub fn read_all(params: &ParameterList) -> Vec<Self> {
        let mut responses = Vec::new();
        if let Some(fetch) = FetchResponse::read_from(params) {
            responses.push(Self::Fetch(fetch));
        }
        if let Some(simple) = SRegResponse::read_from(params) {
            responses.push(Self::Simple(simple));
        }
        responses
    }

    /// Attach the response to a message
    pub fn write_to(&self, params: &mut ParameterList) {
        match self {
            Self::Simple(response) => response.write_to(params),
            Self::Fetch(response) => response.write_to(params),
        }
    }
}

/// Reconciles SReg and AX on both sides of the exchange
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeExchangeNegotiator;

impl AttributeExchangeNegotiator {
    /// Requests a relying party attaches to an authentication request
    ///
    /// SReg asks for `nickname` (required), `fullname` and `email`. With
    /// `include_fetch`, an AX request for email, nickname, first and last
    /// name is added.
    pub fn requests(include_fetch: bool) -> Vec<AttributeRequest> {
        let mut simple = SRegRequest::new();
        simple
            .add_attribute("fullname", false)
            .add_attribute("nickname", true)
            .add_attribute("email", false);
        let mut requests = vec![AttributeRequest::Simple(simple)];

        if include_fetch {
            let mut fetch = FetchRequest::new();
            fetch
                .add_attribute("email", AX_EMAIL, false)
                .add_attribute("nickname", AX_FRIENDLY_NAME, true)
                .add_attribute("firstname", AX_FIRST_NAME, false)
                .add_attribute("lastname", AX_LAST_NAME, false);
            requests.push(AttributeRequest::Fetch(fetch));
        }
        requests
    }

    /// Answer every request from `identity`
    ///
    /// SReg answers only `nickname`. AX answers email (either URI spelling),
    /// nickname, first and last name under the requester's aliases. Unknown
    /// names and URIs, and fields without a value, are left out.
    pub fn respond(
        requests: &[AttributeRequest],
        identity: &AttributeSet,
    ) -> Vec<AttributeResponse> {
        requests
            .iter()
            .map(|request| match request {
                AttributeRequest::Simple(request) => {
                    let mut response = SRegResponse::new();
                    for name in request.attributes() {
                        if name == "nickname"
                            && let Some(nickname) = identity.nickname()
                        {
                            response.add_attribute(name, nickname);
                        }
                    }
                    AttributeResponse::Simple(response)
                }
                AttributeRequest::Fetch(request) => {
                    let mut response = FetchResponse::new();
                    for attribute in request.attributes() {
                        let value = match attribute.type_uri.as_str() {
                            AX_EMAIL | AX_EMAIL_LEGACY => identity.email(),
                            AX_FRIENDLY_NAME => identity.nickname(),
                            AX_FIRST_NAME => identity.first_name(),
                            AX_LAST_NAME => identity.last_name(),
                            other => {
                                debug!(type_uri = other, "not answering unknown AX attribute");
                                None
                            }
                        };
                        if let Some(value) = value {
                            response.add_attribute(
                                attribute.alias.clone(),
                                attribute.type_uri.clone(),
                                value,
                            );
                        }
                    }
                    AttributeResponse::Fetch(response)
                }
            })
            .collect()
    }

    /// Read the attributes a response supplied
    pub fn extract(responses: &[AttributeResponse]) -> AttributeSet {
        let fetch = responses.iter().find_map(|r| match r {
            AttributeResponse::Fetch(fetch) => Some(fetch),
            AttributeResponse::Simple(_) => None,
        });
        let simple = responses.iter().find_map(|r| match r {
            AttributeResponse::Simple(simple) => Some(simple),
            AttributeResponse::Fetch(_) => None,
        });
        let ax = |uri: &str| fetch.and_then(|f| f.value_for_type(uri));
        let sreg = |name: &str| simple.and_then(|s| s.get(name));

        let mut attributes = AttributeSet::new();
        if let Some(nickname) = ax(AX_FRIENDLY_NAME).or_else(|| sreg("nickname")) {
            attributes = attributes.with_nickname(nickname);
        }
        if let Some(email) = ax(AX_EMAIL)
            .or_else(|| ax(AX_EMAIL_LEGACY))
            .or_else(|| sreg("email"))
        {
            attributes = attributes.with_email(email);
        }
        if let Some(first) = ax(AX_FIRST_NAME) {
            attributes = attributes.with_first_name(first);
        }
        if let Some(last) = ax(AX_LAST_NAME) {
            attributes = attributes.with_last_name(last);
        }
        if let Some(full) = ax(AX_FULL_NAME).or_else(|| sreg("fullname")) {
            attributes = attributes.with_full_name(full);
        }
        attributes
    }
}
