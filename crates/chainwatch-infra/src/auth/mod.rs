//! API-key authentication: secret hashing, key minting, and principal
//! resolution against the durable store.

mod keygen;
mod resolver;
mod secret;

pub use keygen::{generate_api_key, MintedKey};
pub use resolver::{DbPrincipalResolver, StaticPrincipalResolver};
pub use secret::Argon2SecretHasher;
