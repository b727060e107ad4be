//! Password digests and at-rest sealing.
//!
//! Clients may send either plaintext or a SHA-256 hex digest of their
//! password. [`CredentialHasher`] brings both forms to the digest, which is
//! the value the rest of the service works with. Before a digest is
//! persisted, [`DigestSealer`] wraps it in a salted argon2id hash.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use sha2::{Digest as _, Sha256};

use crate::error::{AccountError, AccountResult};
use crate::model::{Credential, HashState, PasswordDigest};

/// Deterministic one-way transform of secrets into hex digests.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialHasher;

impl CredentialHasher {
    /// SHA-256 of `plaintext`, lowercase hex, 64 characters.
    #[must_use]
    pub fn digest(plaintext: &str) -> String {
        hex::encode(Sha256::digest(plaintext.as_bytes()))
    }

    /// Bring a credential to the hashed state.
    ///
    /// A hashed credential is left untouched. A raw one has its first field
    /// digested, the digest copied into both fields, and its state flipped.
    pub fn normalize(credential: &mut Credential) {
        if credential.state == HashState::Hashed {
            return;
        }

        let digest = Self::digest(&credential.password_one);
        credential.password_two.clone_from(&digest);
        credential.password_one = digest;
        credential.state = HashState::Hashed;
    }
}

/// Argon2id sealing of password digests for storage.
#[derive(Debug, Clone)]
pub struct DigestSealer {
    /// Argon2 hasher configuration.
    argon2: Argon2<'static>,
}

impl DigestSealer {
    /// Create a sealer with default argon2id parameters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }

    /// Create a sealer with custom parameters.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Internal`] if argon2 rejects the parameters.
    pub fn with_params(
        memory_cost: u32,
        time_cost: u32,
        parallelism: u32,
        output_len: Option<usize>,
    ) -> AccountResult<Self> {
        let params = Params::new(memory_cost, time_cost, parallelism, output_len)
            .map_err(|e| AccountError::Internal(format!("invalid argon2 parameters: {e}")))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        Ok(Self { argon2 })
    }

    /// Seal a digest with a fresh random salt, returning a PHC string.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Internal`] if hashing fails.
    pub fn seal(&self, digest: &PasswordDigest) -> AccountResult<String> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(digest.as_str().as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AccountError::Internal(format!("failed to seal password: {e}")))
    }

    /// Check a digest against a stored seal.
    ///
    /// A malformed seal never verifies.
    #[must_use]
    pub fn verify(&self, digest: &PasswordDigest, sealed: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(sealed) else {
            return false;
        };

        self.argon2
            .verify_password(digest.as_str().as_bytes(), &parsed)
            .is_ok()
    }
}

impl DigestSealer {
    /// [`Self::seal`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Internal`] if hashing fails or the task dies.
    pub async fn seal_blocking(&self, digest: &PasswordDigest) -> AccountResult<String> {
        let sealer = self.clone();
        let digest = digest.clone();

        tokio::task::spawn_blocking(move || sealer.seal(&digest))
            .await
            .map_err(|e| AccountError::Internal(format!("sealing task failed: {e}")))?
    }

    /// The first candidate whose seal verifies against `digest`, checked on
    /// the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Internal`] if the task dies.
    pub async fn find_verified<T>(
        &self,
        digest: &PasswordDigest,
        candidates: Vec<(T, String)>,
    ) -> AccountResult<Option<T>>
    where
        T: Send + 'static,
    {
        let sealer = self.clone();
        let digest = digest.clone();

        tokio::task::spawn_blocking(move || {
            candidates
                .into_iter()
                .find(|(_, sealed)| sealer.verify(&digest, sealed))
                .map(|(candidate, _)| candidate)
        })
        .await
        .map_err(|e| AccountError::Internal(format!("verify task failed: {e}")))
    }
}

impl Default for DigestSealer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(password: &str) -> Credential {
        Credential {
            state: HashState::Raw,
            password_one: password.to_string(),
            password_two: password.to_string(),
        }
    }

    fn fast_sealer() -> DigestSealer {
        DigestSealer::with_params(1024, 1, 1, Some(32)).unwrap()
    }

    #[test]
    fn test_digest_known_values() {
        assert_eq!(
            CredentialHasher::digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(
            CredentialHasher::digest("qwert1234"),
            CredentialHasher::digest("qwert4321")
        );
    }

    #[test]
    fn test_normalize_raw_credential() {
        let mut credential = raw("qwert1234");
        CredentialHasher::normalize(&mut credential);

        let expected = CredentialHasher::digest("qwert1234");
        assert_eq!(credential.state, HashState::Hashed);
        assert_eq!(credential.password_one, expected);
        assert_eq!(credential.password_two, expected);
    }

    #[test]
    fn test_normalize_keeps_hashed_credential() {
        let mut credential = Credential {
            state: HashState::Hashed,
            password_one: "already".into(),
            password_two: "opaque".into(),
        };
        CredentialHasher::normalize(&mut credential);
        assert_eq!(credential.password_one, "already");
        assert_eq!(credential.password_two, "opaque");
    }

    #[test]
    fn test_seal_and_verify() {
        let sealer = fast_sealer();
        let digest = PasswordDigest::from_hex(CredentialHasher::digest("qwert1234"));
        let sealed = sealer.seal(&digest).unwrap();

        assert!(sealed.starts_with("$argon2id$"));
        assert!(sealer.verify(&digest, &sealed));

        let other = PasswordDigest::from_hex(CredentialHasher::digest("qwert4321"));
        assert!(!sealer.verify(&other, &sealed));
    }

    #[test]
    fn test_seals_are_salted() {
        let sealer = fast_sealer();
        let digest = PasswordDigest::from_hex(CredentialHasher::digest("same"));
        assert_ne!(sealer.seal(&digest).unwrap(), sealer.seal(&digest).unwrap());
    }

    #[test]
    fn test_verify_invalid_seal() {
        let digest = PasswordDigest::from_hex(CredentialHasher::digest("x"));
        assert!(!fast_sealer().verify(&digest, "invalid-hash-format"));
    }

    #[tokio::test]
    async fn test_find_verified_picks_matching_seal() {
        let sealer = fast_sealer();
        let digest = PasswordDigest::from_hex(CredentialHasher::digest("qwert1234"));
        let other = PasswordDigest::from_hex(CredentialHasher::digest("qwert4321"));

        let candidates = vec![
            (1, sealer.seal_blocking(&other).await.unwrap()),
            (2, sealer.seal_blocking(&digest).await.unwrap()),
            (3, "invalid-hash-format".to_string()),
        ];
        assert_eq!(
            sealer.find_verified(&digest, candidates.clone()).await.unwrap(),
            Some(2)
        );

        let stranger = PasswordDigest::from_hex(CredentialHasher::digest("nobody"));
        assert_eq!(sealer.find_verified(&stranger, candidates).await.unwrap(), None);
    }

    #[test]
    fn test_invalid_params() {
        assert!(DigestSealer::with_params(0, 0, 0, Some(1)).is_err());
    }

    proptest! {
        #[test]
        fn digest_is_deterministic_hex(input in ".*") {
            let first = CredentialHasher::digest(&input);
            prop_assert_eq!(first.len(), 64);
            prop_assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
            prop_assert_eq!(first, CredentialHasher::digest(&input));
        }

        #[test]
        fn normalize_is_idempotent(input in ".*") {
            let mut credential = raw(&input);
            CredentialHasher::normalize(&mut credential);
            let once = credential.clone();
            CredentialHasher::normalize(&mut credential);
            prop_assert_eq!(once, credential);
        }
    }
}
