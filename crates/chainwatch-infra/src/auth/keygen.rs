//! API-key minting: `sc_{env}_{id}_{secret}` with a 12-char public id and
//! a 32-char secret, both URL-safe. The raw key is surfaced exactly once;
//! only the secret's hash is stored.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use chainwatch_core::domain::{KEY_ID_LEN, KEY_SCHEME, KEY_SECRET_LEN};
use chainwatch_core::error::AuthError;
use chainwatch_core::ports::SecretHasher;

/// Freshly minted key material.
#[derive(Debug, Clone)]
pub struct MintedKey {
    /// Public id, doubles as the indexed key prefix.
    pub key_id: String,
    /// The full bearer key handed to the caller once.
    pub raw_key: String,
    /// Hash of the secret segment, ready to persist.
    pub secret_hash: String,
}

pub fn generate_api_key(env: &str, hasher: &dyn SecretHasher) -> Result<MintedKey, AuthError> {
    let key_id = random_token(KEY_ID_LEN);
    let secret = random_token(KEY_SECRET_LEN);
    let raw_key = format!("{KEY_SCHEME}_{env}_{key_id}_{secret}");
    let secret_hash = hasher.hash(&secret)?;
    Ok(MintedKey {
        key_id,
        raw_key,
        secret_hash,
    })
}

/// URL-safe token of exactly `len` characters.
fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut token = URL_SAFE_NO_PAD.encode(&bytes);
    token.truncate(len);
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwatch_core::domain::parse_api_key;

    use crate::auth::Argon2SecretHasher;

    #[test]
    fn minted_keys_parse_and_verify() {
        let hasher = Argon2SecretHasher::new();
        let minted = generate_api_key("test", &hasher).unwrap();

        let parsed = parse_api_key(&minted.raw_key).expect("minted key must parse");
        assert_eq!(parsed.env, "test");
        assert_eq!(parsed.id, minted.key_id);
        assert!(hasher.verify(parsed.secret, &minted.secret_hash).unwrap());
    }

    #[test]
    fn tokens_have_requested_length_and_differ() {
        let a = random_token(12);
        let b = random_token(12);
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }
}
