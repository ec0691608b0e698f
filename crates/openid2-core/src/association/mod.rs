//! Associations: shared MAC keys between relying party and provider
//!
//! An association is established once with a direct `associate` request and
//! then used to sign (provider) and verify (relying party) any number of
//! assertions without further server-to-server traffic.
//!
//! Only the `no-encryption` session type is supported, which transfers the
//! MAC key in the clear and is therefore restricted to TLS endpoints by the
//! consumer. Diffie-Hellman session types are answered with
//! `unsupported-type` so conforming relying parties fall back.

mod store;

pub use store::{
    ConsumerAssociationStore, MemoryConsumerAssociationStore, MemoryServerAssociationStore,
    ServerAssociationStore,
};

use std::fmt;
use std::time::{Duration, SystemTime};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{ProtocolError, Result};
use crate::params::ParameterList;

/// MAC algorithm of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum AssociationType {
    /// HMAC-SHA1 (legacy)
    #[serde(rename = "HMAC-SHA1")]
    HmacSha1,
    /// HMAC-SHA256
    #[default]
    #[serde(rename = "HMAC-SHA256")]
    HmacSha256,
}

impl AssociationType {
    /// Parse an `assoc_type` value
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "HMAC-SHA1" => Some(Self::HmacSha1),
            "HMAC-SHA256" => Some(Self::HmacSha256),
            _ => None,
        }
    }

    /// Wire representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HmacSha1 => "HMAC-SHA1",
            Self::HmacSha256 => "HMAC-SHA256",
        }
    }

    /// MAC key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
        }
    }

    fn algorithm(self) -> hmac::Algorithm {
        match self {
            Self::HmacSha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Self::HmacSha256 => hmac::HMAC_SHA256,
        }
    }
}

/// Key transfer method of an `associate` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    /// MAC key sent in the clear (TLS only)
    NoEncryption,
    /// Diffie-Hellman over SHA1 (not supported)
    DhSha1,
    /// Diffie-Hellman over SHA256 (not supported)
    DhSha256,
}

impl SessionType {
    /// Parse a `session_type` value
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "no-encryption" => Some(Self::NoEncryption),
            "DH-SHA1" => Some(Self::DhSha1),
            "DH-SHA256" => Some(Self::DhSha256),
            _ => None,
        }
    }

    /// Wire representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoEncryption => "no-encryption",
            Self::DhSha1 => "DH-SHA1",
            Self::DhSha256 => "DH-SHA256",
        }
    }
}

/// A shared MAC key identified by its handle
#[derive(Clone)]
pub struct Association {
    handle: String,
    assoc_type: AssociationType,
    key: hmac::Key,
    raw_key: Vec<u8>,
    expires_at: SystemTime,
}

impl Association {
    /// Generate a fresh association with a random MAC key
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Crypto`] if the system RNG fails.
    pub fn generate(assoc_type: AssociationType, lifetime: Duration) -> Result<Self> {
        let mut raw_key = vec![0u8; assoc_type.key_len()];
        SystemRandom::new()
            .fill(&mut raw_key)
            .map_err(|_| ProtocolError::Crypto("system RNG unavailable".to_string()))?;
        let handle = format!("{}-{}", assoc_type.as_str(), uuid::Uuid::new_v4().simple());
        Ok(Self::from_parts(handle, assoc_type, raw_key, lifetime))
    }

    /// Rebuild an association from an `associate` response
    pub fn from_parts(
        handle: impl Into<String>,
        assoc_type: AssociationType,
        raw_key: Vec<u8>,
        expires_in: Duration,
    ) -> Self {
        Self {
            handle: handle.into(),
            assoc_type,
            key: hmac::Key::new(assoc_type.algorithm(), &raw_key),
            raw_key,
            expires_at: SystemTime::now() + expires_in,
        }
    }

    /// Association handle
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// MAC algorithm
    pub fn assoc_type(&self) -> AssociationType {
        self.assoc_type
    }

    /// Base64 MAC key as transferred in a `no-encryption` response
    pub fn encoded_key(&self) -> String {
        STANDARD.encode(&self.raw_key)
    }

    /// When the association stops being usable
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// Whether the association has expired
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    /// Remaining lifetime (zero once expired)
    pub fn expires_in(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    /// Sign `fields` of `params` and record `signed` / `sig` on it
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingParameter`] if a field is absent.
    pub fn sign_fields(&self, params: &mut ParameterList, fields: &[String]) -> Result<()> {
        let signed = fields.join(",");
        let data = params.key_value_form_of(fields.iter().map(String::as_str))?;
        let tag = hmac::sign(&self.key, data.as_bytes());
        params.set("signed", signed);
        params.set("sig", STANDARD.encode(tag.as_ref()));
        Ok(())
    }

    /// Check the `sig` of a message against the fields its `signed` list names
    ///
    /// # Errors
    ///
    /// Returns an error if `signed`, `sig`, or a signed field is missing, or
    /// the signature is not base64. A wrong signature is `Ok(false)`.
    pub fn verify_signature(&self, params: &ParameterList) -> Result<bool> {
        let signed = params.require("signed")?;
        let sig = STANDARD
            .decode(params.require("sig")?)
            .map_err(|e| ProtocolError::malformed(format!("signature is not base64: {e}")))?;
        let data = params.key_value_form_of(signed.split(',').filter(|f| !f.is_empty()))?;
        Ok(hmac::verify(&self.key, data.as_bytes(), &sig).is_ok())
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("handle", &self.handle)
            .field("assoc_type", &self.assoc_type)
            .field("key", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn signed_message(association: &Association) -> ParameterList {
        let mut params: ParameterList = [
            ("op_endpoint", "https://idp.example.com/entryPoint"),
            ("return_to", "https://rp.example.com/cb"),
            ("response_nonce", "2024-01-01T00:00:00Zabc"),
            ("assoc_handle", association.handle()),
        ]
        .into_iter()
        .collect();
        let fields: Vec<String> = ["op_endpoint", "return_to", "response_nonce", "assoc_handle"]
            .iter()
            .map(ToString::to_string)
            .collect();
        association.sign_fields(&mut params, &fields).unwrap();
        params
    }

    fn generated(assoc_type: AssociationType) -> Association {
        Association::generate(assoc_type, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn test_generate_key_lengths() {
        let sha1 = generated(AssociationType::HmacSha1);
        let sha256 = generated(AssociationType::HmacSha256);
        assert_eq!(STANDARD.decode(sha1.encoded_key()).unwrap().len(), 20);
        assert_eq!(STANDARD.decode(sha256.encoded_key()).unwrap().len(), 32);
        assert_ne!(sha1.handle(), sha256.handle());
    }

    #[test]
    fn test_sign_and_verify() {
        let association = generated(AssociationType::HmacSha256);
        let params = signed_message(&association);
        assert!(association.verify_signature(&params).unwrap());

        // The relying party's copy of the key verifies too
        let raw = STANDARD.decode(association.encoded_key()).unwrap();
        let copy = Association::from_parts(
            association.handle(),
            AssociationType::HmacSha256,
            raw,
            Duration::from_secs(60),
        );
        assert!(copy.verify_signature(&params).unwrap());
    }

    #[test]
    fn test_other_key_rejects_signature() {
        let signer = generated(AssociationType::HmacSha256);
        let other = generated(AssociationType::HmacSha256);
        assert!(!other.verify_signature(&signed_message(&signer)).unwrap());
    }

    #[test]
    fn test_expiry() {
        let association =
            Association::from_parts("h", AssociationType::HmacSha1, vec![0; 20], Duration::ZERO);
        assert!(association.is_expired());
        assert_eq!(association.expires_in(), Duration::ZERO);
        assert!(!format!("{association:?}").contains("0, 0"));
    }

    proptest! {
        #[test]
        fn prop_tampered_signed_field_fails(value in "[a-zA-Z0-9:/._-]{1,40}") {
            let association = generated(AssociationType::HmacSha256);
            let mut params = signed_message(&association);
            prop_assume!(params.get("return_to") != Some(value.as_str()));
            params.set("return_to", value);
            prop_assert!(!association.verify_signature(&params).unwrap());
        }
    }
}
