//! Argon2 hashing for API-key secrets.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use chainwatch_core::error::AuthError;
use chainwatch_core::ports::SecretHasher;

/// Argon2-based secret hasher. Verification is constant-time.
pub struct Argon2SecretHasher {
    argon2: Argon2<'static>,
}

impl Argon2SecretHasher {
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl Default for Argon2SecretHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretHasher for Argon2SecretHasher {
    fn hash(&self, secret: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::Backend(e.to_string()))
    }

    fn verify(&self, secret: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Backend(e.to_string()))?;

        Ok(self
            .argon2
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hasher = Argon2SecretHasher::new();
        let secret = "0123456789abcdef0123456789abcdef";

        let hash = hasher.hash(secret).unwrap();
        assert!(hasher.verify(secret, &hash).unwrap());
        assert!(!hasher.verify("wrong-secret", &hash).unwrap());
    }
}
