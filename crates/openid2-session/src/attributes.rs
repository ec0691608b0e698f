//! Neutral attribute bag describing a user

use crate::error::{Result, SessionError};

/// Profile attributes of a user, with no protocol awareness
///
/// On the provider it is filled in by the local authentication hook; on the
/// relying party it is what the attribute exchange yielded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet {
    nickname: Option<String>,
    email: Option<String>,
    full_name: Option<String>,
    last_name: Option<String>,
    first_name: Option<String>,
}

impl AttributeSet {
    /// Create an empty attribute set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the nickname
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    /// Set the email address
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the full name
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    /// Set the last name
    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    /// Set the first name
    pub fn with_first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self
    }

    /// Replace the contents in place (for hooks handed `&mut AttributeSet`)
    pub fn populate(&mut self, other: Self) {
        *self = other;
    }

    /// Nickname
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    /// Email address
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Full name
    pub fn full_name(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    /// Last name
    pub fn last_name(&self) -> Option<&str> {
        self.last_name.as_deref()
    }

    /// First name
    pub fn first_name(&self) -> Option<&str> {
        self.first_name.as_deref()
    }

    /// Provider-local identifier: `address` followed by `~nickname`
    ///
    /// `address` is the provider base address and always ends with `/`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IdentityNotReady`] if no nickname is set.
    pub fn openid(&self, address: &str) -> Result<String> {
        let nickname = self.nickname().ok_or(SessionError::IdentityNotReady)?;
        Ok(format!("{address}~{nickname}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identifier_synthesis() {
        let identity = AttributeSet::new().with_nickname("bob");
        assert_eq!(
            identity.openid("https://idp.example.com/").unwrap(),
            "https://idp.example.com/~bob"
        );
    }

    #[test]
    fn test_identifier_requires_nickname() {
        let identity = AttributeSet::new().with_email("bob@example.com");
        assert!(matches!(
            identity.openid("https://idp.example.com/"),
            Err(SessionError::IdentityNotReady)
        ));
    }

    #[test]
    fn test_populate_replaces_everything() {
        let mut identity = AttributeSet::new().with_email("old@example.com");
        identity.populate(AttributeSet::new().with_nickname("alice"));
        assert_eq!(identity.nickname(), Some("alice"));
        assert_eq!(identity.email(), None);
    }

    proptest! {
        #[test]
        fn prop_identifier_is_address_tilde_nickname(nickname in "[a-z][a-z0-9_]{0,15}") {
            let identity = AttributeSet::new().with_nickname(nickname.clone());
            let openid = identity.openid("https://idp.example.com/").unwrap();
            prop_assert_eq!(openid, format!("https://idp.example.com/~{nickname}"));
        }
    }
}
