//! Domain-level error types.

use thiserror::Error;

/// Errors from the counter store backends.
#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter backend error: {0}")]
    Backend(String),
}

/// Errors from authentication and principal resolution.
///
/// Every lookup or verification failure collapses to `Unauthenticated` at
/// the HTTP boundary; `Backend` exists so operators can tell a bad key from
/// a broken store in the logs.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("auth backend error: {0}")]
    Backend(String),
}

/// Repository-level errors.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("query execution failed: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("store not configured")]
    NotConfigured,
}

/// Errors from billing providers and the reconciler.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed webhook payload: {0}")]
    Malformed(String),

    #[error("billing provider error: {0}")]
    Provider(String),

    #[error("billing not configured: {0}")]
    NotConfigured(&'static str),

    #[error("operation not supported by provider: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Counter(#[from] CounterError),
}
