//! Application error type mapped onto the wire error envelope.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::fmt;

use chainwatch_core::error::{AuthError, BillingError, CounterError, RepoError};
use chainwatch_shared::ErrorBody;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized => write!(f, "unauthorized"),
            ApiError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            ApiError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            ApiError::NotFound(msg) => write!(f, "not found: {msg}"),
            ApiError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let phrase = status.canonical_reason().unwrap_or("Error");
        let body = match self {
            ApiError::Unauthorized => ErrorBody::new(phrase),
            ApiError::Forbidden(msg)
            | ApiError::BadRequest(msg)
            | ApiError::NotFound(msg) => ErrorBody::new(phrase).with_message(msg.clone()),
            ApiError::Internal(msg) => {
                // Log the detail; the wire gets only the phrase.
                tracing::error!(error = %msg, "request failed");
                ErrorBody::new(phrase)
            }
        };
        HttpResponse::build(status).json(body)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated => ApiError::Unauthorized,
            AuthError::Backend(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => ApiError::NotFound("resource not found".to_string()),
            RepoError::Constraint(msg) => ApiError::BadRequest(msg),
            RepoError::NotConfigured => {
                ApiError::Internal("durable store not configured".to_string())
            }
            RepoError::Connection(msg) | RepoError::Query(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<CounterError> for ApiError {
    fn from(err: CounterError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidSignature => {
                ApiError::BadRequest("invalid webhook signature".to_string())
            }
            BillingError::Malformed(msg) => ApiError::BadRequest(msg),
            BillingError::Unsupported(what) => {
                ApiError::BadRequest(format!("not supported: {what}"))
            }
            BillingError::NotConfigured(what) => {
                ApiError::Internal(format!("billing not configured: {what}"))
            }
            BillingError::Provider(msg) => ApiError::Internal(msg),
            BillingError::Repo(err) => err.into(),
            BillingError::Counter(err) => err.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
