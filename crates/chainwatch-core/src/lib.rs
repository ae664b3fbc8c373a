//! # Chainwatch Core
//!
//! The domain layer of the Chainwatch metering plane.
//! This crate contains the admission, aggregation, and reconciliation
//! policies plus the ports they depend on; it has zero infrastructure
//! dependencies.

pub mod admission;
pub mod billing;
pub mod domain;
pub mod error;
pub mod ports;
pub mod usage;

pub use error::{AuthError, BillingError, CounterError, RepoError};
