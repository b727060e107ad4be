//! Session token issuance.

use std::fmt;

use rand::Rng;
use serde::Deserialize;

use crate::model::PasswordDigest;
use crate::services::password::CredentialHasher;

/// How session tokens are produced at login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStrategy {
    /// 32 bytes from the thread RNG, hex encoded.
    #[default]
    Random,
    /// Digest of login followed by password digest. Repeated logins with the
    /// same credentials yield the same token.
    Derived,
}

/// Hex token identifying a live session.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a token read back from a cookie.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// The token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "SessionToken({prefix}..)")
    }
}

/// Issues session tokens for authenticated users.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenIssuer {
    strategy: TokenStrategy,
}

impl TokenIssuer {
    /// Create an issuer using the given strategy.
    #[must_use]
    pub const fn new(strategy: TokenStrategy) -> Self {
        Self { strategy }
    }

    /// The configured strategy.
    #[must_use]
    pub const fn strategy(&self) -> TokenStrategy {
        self.strategy
    }

    /// Issue a token for a successful login.
    #[must_use]
    pub fn issue(&self, login: &str, password: &PasswordDigest) -> SessionToken {
        match self.strategy {
            TokenStrategy::Random => Self::random(),
            TokenStrategy::Derived => Self::derive(login, password),
        }
    }

    /// `Digest(login ++ passwordDigest)`.
    #[must_use]
    pub fn derive(login: &str, password: &PasswordDigest) -> SessionToken {
        let mut material = String::with_capacity(login.len() + password.as_str().len());
        material.push_str(login);
        material.push_str(password.as_str());
        SessionToken(CredentialHasher::digest(&material))
    }

    fn random() -> SessionToken {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        SessionToken(hex::encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> PasswordDigest {
        PasswordDigest::from_hex(CredentialHasher::digest("qwert1234"))
    }

    #[test]
    fn test_derived_token_matches_digest_of_concatenation() {
        let issuer = TokenIssuer::new(TokenStrategy::Derived);
        let token = issuer.issue("Loko", &digest());

        let expected = CredentialHasher::digest(&format!("Loko{}", digest().as_str()));
        assert_eq!(token.as_str(), expected);
        assert_eq!(token, issuer.issue("Loko", &digest()));
    }

    #[test]
    fn test_random_tokens_differ() {
        let issuer = TokenIssuer::default();
        assert_eq!(issuer.strategy(), TokenStrategy::Random);

        let first = issuer.issue("Loko", &digest());
        let second = issuer.issue("Loko", &digest());
        assert_ne!(first, second);
        assert_eq!(first.as_str().len(), 64);
        assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let token = SessionToken::new("0123456789abcdef".into());
        assert_eq!(format!("{token:?}"), "SessionToken(01234567..)");
    }

    #[test]
    fn test_strategy_from_config_string() {
        let strategy: TokenStrategy = serde_json::from_str("\"derived\"").unwrap();
        assert_eq!(strategy, TokenStrategy::Derived);
    }
}
