//! HTTP discovery: XRDS (Yadis) first, HTML `<link>` tags as fallback

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use super::{
    Discovery, DiscoveryInformation, SERVER_SERVICE_TYPE, SIGNON_SERVICE_TYPE,
    normalize_identifier,
};
use crate::error::{ProtocolError, Result};

const XRDS_CONTENT_TYPE: &str = "application/xrds+xml";
const XRDS_LOCATION_HEADER: &str = "x-xrds-location";

static SERVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<Service\b([^>]*)>(.*?)</Service>")
        .expect("Invalid XRDS service regex pattern")
});
static PRIORITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)priority\s*=\s*["'](\d+)["']"#).expect("Invalid priority regex pattern")
});
static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<Type\b[^>]*>\s*(.*?)\s*</Type>").expect("Invalid XRDS type regex pattern")
});
static URI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<URI\b[^>]*>\s*(.*?)\s*</URI>").expect("Invalid XRDS URI regex pattern")
});
static LOCAL_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<(?:LocalID|openid:Delegate)\b[^>]*>\s*(.*?)\s*</(?:LocalID|openid:Delegate)>",
    )
    .expect("Invalid XRDS local id regex pattern")
});
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<link\b([^>]*)>").expect("Invalid HTML link regex pattern")
});
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(rel|href)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("Invalid HTML attribute regex pattern")
});

/// Configuration for [`HttpDiscovery`]
#[derive(Debug, Clone)]
pub struct HttpDiscoveryConfig {
    /// Request timeout (default: 5 seconds)
    pub request_timeout: Duration,

    /// Maximum document size in bytes (default: 256 KB)
    pub max_response_size: usize,

    /// Maximum redirects followed while resolving the identifier (default: 5)
    pub max_redirects: usize,

    /// User agent for discovery requests
    pub user_agent: String,
}

impl Default for HttpDiscoveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_response_size: 256 * 1024,
            max_redirects: 5,
            user_agent: format!("openid2/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Discovery over HTTP
///
/// Fetches the identifier with `Accept: application/xrds+xml`. An XRDS
/// response (or an `X-XRDS-Location` header pointing at one) is scanned for
/// OpenID 2.0 services; otherwise the HTML page is scanned for
/// `openid2.provider` / `openid2.local_id` links. Redirects are followed and
/// the final URL becomes the claimed identifier.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    client: reqwest::Client,
    config: HttpDiscoveryConfig,
}

impl HttpDiscovery {
    /// Create a discovery client with default configuration
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Transport`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_config(HttpDiscoveryConfig::default())
    }

    /// Create a discovery client with custom configuration
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Transport`] if the HTTP client cannot be built.
    pub fn with_config(config: HttpDiscoveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| ProtocolError::Transport {
                endpoint: "discovery".to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    async fn fetch(&self, url: &str) -> Result<(Url, Option<String>, Option<String>, String)> {
        let transport = |reason: String| ProtocolError::Discovery {
            identifier: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, format!("{XRDS_CONTENT_TYPE}, text/html;q=0.9"))
            .send()
            .await
            .map_err(|e| transport(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(transport(format!("HTTP {}", response.status().as_u16())));
        }
        if let Some(length) = response.content_length()
            && length > self.config.max_response_size as u64
        {
            return Err(transport("document too large".to_string()));
        }

        let final_url = response.url().clone();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
        };
        let content_type = header(reqwest::header::CONTENT_TYPE.as_str());
        let xrds_location = header(XRDS_LOCATION_HEADER);

        let body = response
            .bytes()
            .await
            .map_err(|e| transport(format!("Failed to read response: {e}")))?;
        if body.len() > self.config.max_response_size {
            return Err(transport("document too large".to_string()));
        }
        Ok((final_url, content_type, xrds_location, String::from_utf8_lossy(&body).into_owned()))
    }
}

#[async_trait]
impl Discovery for HttpDiscovery {
    async fn discover(&self, identifier: &str) -> Result<Vec<DiscoveryInformation>> {
        let normalized = normalize_identifier(identifier)?;
        let (final_url, content_type, xrds_location, body) = self.fetch(&normalized).await?;
        let claimed_id = final_url.to_string();

        let is_xrds = content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains(XRDS_CONTENT_TYPE));

        let found = if is_xrds {
            parse_xrds(&body, &claimed_id)
        } else if let Some(location) = xrds_location {
            debug!(%location, "following X-XRDS-Location");
            let (_, _, _, document) = self.fetch(&location).await?;
            parse_xrds(&document, &claimed_id)
        } else {
            parse_html(&body, &claimed_id).into_iter().collect()
        };

        if found.is_empty() {
            warn!(identifier = %normalized, "no OpenID 2.0 service found");
            return Err(ProtocolError::Discovery {
                identifier: normalized,
                reason: "no OpenID 2.0 service found".to_string(),
            });
        }
        debug!(identifier = %normalized, endpoints = found.len(), "discovery complete");
        Ok(found)
    }
}

/// OpenID 2.0 services in an XRDS document
///
/// OP identifier services come first, then claimed identifier services,
/// each ordered by their `priority` attribute.
pub fn parse_xrds(document: &str, claimed_id: &str) -> Vec<DiscoveryInformation> {
    let mut services: Vec<(u8, u32, DiscoveryInformation)> = SERVICE_RE
        .captures_iter(document)
        .filter_map(|service| {
            let attributes = service.get(1).map_or("", |m| m.as_str());
            let body = service.get(2).map_or("", |m| m.as_str());
            let priority = PRIORITY_RE
                .captures(attributes)
                .and_then(|c| c[1].parse().ok())
                .unwrap_or(u32::MAX);
            let types: Vec<&str> = TYPE_RE
                .captures_iter(body)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();
            let op_endpoint = URI_RE
                .captures(body)
                .and_then(|c| Url::parse(&decode_entities(&c[1])).ok())?;

            if types.contains(&SERVER_SERVICE_TYPE) {
                Some((0, priority, DiscoveryInformation::op_identifier(op_endpoint)))
            } else if types.contains(&SIGNON_SERVICE_TYPE) {
                let local_id = LOCAL_ID_RE.captures(body).map(|c| decode_entities(&c[1]));
                Some((
                    1,
                    priority,
                    DiscoveryInformation::claimed_identifier(op_endpoint, claimed_id, local_id),
                ))
            } else {
                None
            }
        })
        .collect();
    services.sort_by_key(|(kind, priority, _)| (*kind, *priority));
    services.into_iter().map(|(_, _, info)| info).collect()
}

/// OpenID 2.0 provider declared by `<link rel="openid2.provider">` in an HTML page
pub fn parse_html(document: &str, claimed_id: &str) -> Option<DiscoveryInformation> {
    let mut provider = None;
    let mut local_id = None;

    for link in LINK_RE.captures_iter(document) {
        let attributes = link.get(1).map_or("", |m| m.as_str());
        let mut rel = None;
        let mut href = None;
        for attr in ATTR_RE.captures_iter(attributes) {
            let value = attr.get(2).or_else(|| attr.get(3)).map_or("", |m| m.as_str());
            if attr[1].eq_ignore_ascii_case("rel") {
                rel = Some(value.to_ascii_lowercase());
            } else {
                href = Some(decode_entities(value));
            }
        }
        let (Some(rel), Some(href)) = (rel, href) else {
            continue;
        };
        let rels: Vec<&str> = rel.split_whitespace().collect();
        if provider.is_none() && rels.contains(&"openid2.provider") {
            provider = Url::parse(&href).ok();
        }
        if local_id.is_none() && rels.contains(&"openid2.local_id") {
            local_id = Some(href);
        }
    }

    provider.map(|op_endpoint| {
        DiscoveryInformation::claimed_identifier(op_endpoint, claimed_id, local_id)
    })
}

fn decode_entities(value: &str) -> String {
    value
        .trim()
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
