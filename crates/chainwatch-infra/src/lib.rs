//! # Chainwatch Infrastructure
//!
//! Concrete implementations of the ports defined in `chainwatch-core`:
//! counter stores, durable-store repositories, secret hashing, and billing
//! provider adapters.

pub mod alerts;
pub mod auth;
pub mod billing;
pub mod counter;
pub mod database;

pub use auth::{Argon2SecretHasher, DbPrincipalResolver, StaticPrincipalResolver};
pub use counter::{InMemoryCounterStore, RedisCounterStore};
pub use database::DatabaseConfig;
