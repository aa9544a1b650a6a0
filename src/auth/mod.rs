use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::User;
use crate::store::Store;

/// Two-stage credential verification.
///
/// A raw API key is never stored. Stage one computes a cheap SHA-256 digest
/// and uses it as an indexed lookup key; stage two verifies the raw key
/// against that user's salted bcrypt hash. Lookup stays cheap, offline
/// attack on a leaked table stays expensive.
pub struct AuthService {
    store: Arc<Store>,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(store: Arc<Store>, bcrypt_cost: u32) -> Self {
        Self { store, bcrypt_cost }
    }

    /// Hex SHA-256 of the raw key; deterministic, used only for lookup.
    pub fn lookup_digest(raw_key: &str) -> String {
        hex::encode(Sha256::digest(raw_key.as_bytes()))
    }

    /// Generate a fresh API key (shown once to the user)
    pub fn generate_api_key() -> String {
        format!("ck_{}", Uuid::new_v4().to_string().replace('-', ""))
    }

    /// Register a user and issue their API key. The raw key is returned
    /// exactly once and cannot be recovered later.
    pub fn register_user(&self, name: &str) -> Result<(User, String)> {
        let raw_key = Self::generate_api_key();
        let key_hash = bcrypt::hash(&raw_key, self.bcrypt_cost)
            .map_err(|e| Error::BadRequest(format!("Failed to hash credential: {}", e)))?;
        let user = self
            .store
            .create_user(name, &key_hash, &Self::lookup_digest(&raw_key))?;
        log::info!("Registered user {} ({})", user.id, user.name);
        Ok((user, raw_key))
    }

    /// Resolve a raw credential to its user.
    ///
    /// A missing credential is its own error kind; everything else — no
    /// digest match, bcrypt mismatch, or a hashing failure — collapses into
    /// InvalidCredential so the caller cannot tell which stage rejected it.
    pub fn verify_credential(&self, raw_key: Option<&str>) -> Result<User> {
        let raw_key = raw_key.ok_or(Error::AuthenticationRequired)?;

        let user = self
            .store
            .get_user_by_digest(&Self::lookup_digest(raw_key))?
            .ok_or_else(|| {
                log::warn!("Credential lookup miss");
                Error::InvalidCredential
            })?;

        let valid = bcrypt::verify(raw_key, &user.api_key_hash).unwrap_or(false);
        if !valid {
            log::warn!("Credential verification failed for user {}", user.id);
            return Err(Error::InvalidCredential);
        }

        log::debug!("User {} ({}) authenticated", user.id, user.name);
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_auth_service() -> AuthService {
        let store = Store::in_memory().unwrap();
        // Minimum cost keeps the tests fast.
        AuthService::new(Arc::new(store), 4)
    }

    #[test]
    fn test_registered_key_verifies() {
        let auth = create_test_auth_service();
        let (user, raw_key) = auth.register_user("nick").unwrap();

        let verified = auth.verify_credential(Some(&raw_key)).unwrap();
        assert_eq!(verified.id, user.id);
        assert_eq!(verified.name, "nick");
    }

    #[test]
    fn test_missing_credential_is_distinct_error() {
        let auth = create_test_auth_service();
        assert!(matches!(
            auth.verify_credential(None),
            Err(Error::AuthenticationRequired)
        ));
    }

    #[test]
    fn test_unknown_key_is_invalid() {
        let auth = create_test_auth_service();
        auth.register_user("nick").unwrap();
        assert!(matches!(
            auth.verify_credential(Some("ck_nonsense")),
            Err(Error::InvalidCredential)
        ));
    }

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(
            AuthService::lookup_digest("ck_abc"),
            AuthService::lookup_digest("ck_abc")
        );
        assert_ne!(
            AuthService::lookup_digest("ck_abc"),
            AuthService::lookup_digest("ck_abd")
        );
    }
}
