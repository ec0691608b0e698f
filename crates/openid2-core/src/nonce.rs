//! Response nonces and replay protection
//!
//! A `response_nonce` is a UTC timestamp in `YYYY-MM-DDTHH:MM:SSZ` form
//! followed by a unique suffix. Relying parties reject nonces they have seen
//! before and nonces whose timestamp is older than their acceptance window.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const TIMESTAMP_LEN: usize = 20;

/// Generate a fresh `response_nonce`
pub fn generate_nonce() -> String {
    format!(
        "{}{}",
        Utc::now().format(TIMESTAMP_FORMAT),
        uuid::Uuid::new_v4().simple()
    )
}

/// Timestamp embedded in a nonce
pub fn nonce_timestamp(nonce: &str) -> Option<DateTime<Utc>> {
    let stamp = nonce.get(..TIMESTAMP_LEN)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Outcome of a nonce check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceCheck {
    /// First sighting within the window
    Ok,
    /// Already seen for this provider
    Seen,
    /// Timestamp outside the acceptance window
    TooOld,
    /// No parseable timestamp
    Invalid,
}

impl NonceCheck {
    /// Whether the nonce was accepted
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

/// Replay store for response nonces
#[async_trait]
pub trait NonceVerifier: Send + Sync + std::fmt::Debug {
    /// Check a nonce issued by `op_endpoint` and remember it when accepted
    async fn check(&self, op_endpoint: &str, nonce: &str) -> NonceCheck;

    /// Forget nonces that have aged out of the window
    async fn cleanup_expired(&self) -> usize;
}

/// In-memory nonce verifier with a bounded acceptance window
#[derive(Debug)]
pub struct MemoryNonceVerifier {
    seen: DashMap<(String, String), DateTime<Utc>>,
    max_age: Duration,
}

impl MemoryNonceVerifier {
    /// Create a verifier accepting nonces up to `max_age` old
    pub fn new(max_age: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            max_age,
        }
    }

    fn cutoff(&self) -> DateTime<Utc> {
        let window = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[async_trait]
impl NonceVerifier for MemoryNonceVerifier {
    async fn check(&self, op_endpoint: &str, nonce: &str) -> NonceCheck {
        let Some(timestamp) = nonce_timestamp(nonce) else {
            warn!(%nonce, "nonce without a valid timestamp");
            return NonceCheck::Invalid;
        };
        if timestamp < self.cutoff() {
            warn!(%nonce, "nonce outside the acceptance window");
            return NonceCheck::TooOld;
        }

        let key = (op_endpoint.to_string(), nonce.to_string());
        match self.seen.entry(key) {
            Entry::Occupied(_) => {
                warn!(%nonce, op_endpoint, "replayed nonce");
                NonceCheck::Seen
            }
            Entry::Vacant(slot) => {
                slot.insert(timestamp);
                debug!(%nonce, "nonce accepted");
                NonceCheck::Ok
            }
        }
    }

    async fn cleanup_expired(&self) -> usize {
        let cutoff = self.cutoff();
        let before = self.seen.len();
        self.seen.retain(|_, timestamp| *timestamp >= cutoff);
        before - self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OP: &str = "https://idp.example.com/entryPoint";

    #[test]
    fn test_generated_nonce_has_timestamp() {
        let nonce = generate_nonce();
        let stamp = nonce_timestamp(&nonce).unwrap();
        assert!((Utc::now() - stamp).num_seconds() < 5);
        assert!(nonce.len() > TIMESTAMP_LEN);
        assert_ne!(nonce, generate_nonce());
    }

    #[test]
    fn test_timestamp_parsing() {
        let stamp = nonce_timestamp("2005-05-15T17:11:51ZUNIQUE").unwrap();
        assert_eq!(stamp.to_rfc3339(), "2005-05-15T17:11:51+00:00");
        assert!(nonce_timestamp("garbage").is_none());
        assert!(nonce_timestamp("").is_none());
    }

    #[tokio::test]
    async fn test_replay_rejected_per_endpoint() {
        let verifier = MemoryNonceVerifier::new(Duration::from_secs(60));
        let nonce = generate_nonce();

        assert_eq!(verifier.check(OP, &nonce).await, NonceCheck::Ok);
        assert_eq!(verifier.check(OP, &nonce).await, NonceCheck::Seen);
        // A different provider may legitimately produce the same nonce
        assert_eq!(verifier.check("https://other.example.com/op", &nonce).await, NonceCheck::Ok);
    }

    #[tokio::test]
    async fn test_stale_and_invalid_nonces() {
        let verifier = MemoryNonceVerifier::new(Duration::from_secs(60));
        assert_eq!(verifier.check(OP, "2001-01-01T00:00:00Zold").await, NonceCheck::TooOld);
        assert_eq!(verifier.check(OP, "not-a-nonce").await, NonceCheck::Invalid);
        assert_eq!(verifier.cleanup_expired().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_forgets_aged_out_nonces() {
        let verifier = MemoryNonceVerifier::new(Duration::from_secs(60));
        let fresh = generate_nonce();
        assert!(verifier.check(OP, &fresh).await.is_ok());
        verifier.seen.insert(
            (OP.to_string(), "2001-01-01T00:00:00Zold".to_string()),
            Utc::now() - chrono::Duration::hours(1),
        );

        assert_eq!(verifier.cleanup_expired().await, 1);
        assert_eq!(verifier.seen.len(), 1);
        assert_eq!(verifier.check(OP, &fresh).await, NonceCheck::Seen);
    }
}
