//! Principal resolution port: opaque bearer key in, `Principal` out.

use async_trait::async_trait;

use crate::domain::{ClientType, Principal};
use crate::error::AuthError;

/// Resolves a raw API key into an authenticated principal. Implementations
/// must not distinguish unknown, revoked, and wrong-secret failures to the
/// caller; all of them are `Unauthenticated`.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(
        &self,
        raw_key: &str,
        client_type: Option<ClientType>,
    ) -> Result<Principal, AuthError>;
}

/// One-way secret hashing. Verification is constant-time.
pub trait SecretHasher: Send + Sync {
    fn hash(&self, secret: &str) -> Result<String, AuthError>;
    fn verify(&self, secret: &str, hash: &str) -> Result<bool, AuthError>;
}
