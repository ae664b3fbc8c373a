//! Data Transfer Objects - request/response types for the API.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// GET /v1/me
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub account_id: Uuid,
    pub api_key_id: String,
    pub plan: String,
    pub client_type: String,
    pub overage_enabled: bool,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// GET /v1/limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsResponse {
    pub plan: String,
    pub per_endpoint_rpm: u64,
    pub monthly_quota: u64,
}

/// GET /v1/usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageResponse {
    pub account_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total: u64,
    pub per_endpoint: HashMap<String, u64>,
}

/// One bucket of GET /v1/usage/timeseries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageBucket {
    pub ts: DateTime<Utc>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeseriesResponse {
    pub bucket: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub data: Vec<UsageBucket>,
}

/// POST /v1/billing/checkout-session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    pub plan_code: String,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub overage_enabled: bool,
}

/// POST /v1/billing/portal-session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSessionResponse {
    pub url: String,
}

/// POST /v1/admin/accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountResponse {
    pub account_id: Uuid,
}

/// POST /v1/admin/accounts/{id}/keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintKeyRequest {
    pub client_type: String,
    #[serde(default)]
    pub label: String,
}

/// The raw key appears exactly once, in this response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintKeyResponse {
    pub api_key: String,
    pub key_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySummary {
    pub key_id: String,
    pub client_type: String,
    pub status: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeKeyResponse {
    pub status: String,
    pub key_id: String,
}
