//! Counter store port: low-latency per-key, per-endpoint, per-period
//! counters with TTLs. Authoritative for the running period until the
//! aggregator drains it into the durable store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::month_key;
use crate::error::CounterError;

/// Outcome of one rate-window consume.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    /// Tokens left in the window. `None` when the backend cannot produce
    /// it atomically with the increment; the literal `-` is emitted then.
    pub remaining: Option<u64>,
    /// Seconds until the current minute window resets.
    pub reset_seconds: u64,
}

/// Shared counter backend. Increment-plus-TTL is atomic per operation;
/// readers observe at least the last committed increment.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically consume one rate token for (key, method, path) in the
    /// current minute window. Denied requests still consume; the window
    /// keeps filling so probing cannot sidestep the limit.
    async fn check_and_consume_rate(
        &self,
        api_key_id: &str,
        method: &str,
        path: &str,
        rpm_limit: u64,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, CounterError>;

    /// Increment the monthly total and per-endpoint counters, TTL pinned
    /// to the end of the current period.
    async fn inc_monthly(
        &self,
        api_key_id: &str,
        method: &str,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CounterError>;

    /// Current-period total for one key.
    async fn monthly_total(
        &self,
        api_key_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, CounterError>;

    /// Current-period per-endpoint map for one key, keyed `METHOD:PATH`.
    async fn endpoint_usage(
        &self,
        api_key_id: &str,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, CounterError>;

    /// Lifetime trial-request count for an account.
    async fn trial_usage(&self, account_id: Uuid) -> Result<u64, CounterError>;

    async fn inc_trial_usage(&self, account_id: Uuid) -> Result<(), CounterError>;

    /// Sum of current-period totals across a set of keys, for overage
    /// reconciliation.
    async fn sum_monthly(
        &self,
        api_key_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<u64, CounterError> {
        let mut total = 0u64;
        for id in api_key_ids {
            total += self.monthly_total(id, now).await?;
        }
        Ok(total)
    }
}

// Composite key layout shared by every backend. Keeping the schema in one
// place means the in-process fallback and redis agree byte-for-byte.

pub fn rate_key(api_key_id: &str, method: &str, path: &str, now: DateTime<Utc>) -> String {
    let minute_epoch = now.timestamp() / 60;
    format!("rl:{api_key_id}:{method}:{path}:{minute_epoch}")
}

pub fn monthly_total_key(api_key_id: &str, now: DateTime<Utc>) -> String {
    format!("quota:{api_key_id}:{}:total", month_key(now))
}

pub fn endpoint_key(api_key_id: &str, method: &str, path: &str, now: DateTime<Utc>) -> String {
    format!("quota:{api_key_id}:{}:ep:{method}:{path}", month_key(now))
}

pub fn trial_key(account_id: Uuid) -> String {
    format!("trial:{account_id}:used")
}

/// Recover the `METHOD:PATH` endpoint label from a per-endpoint counter
/// key. Returns `None` for keys outside the endpoint namespace.
pub fn endpoint_from_key(key: &str) -> Option<&str> {
    key.split_once(":ep:").map(|(_, endpoint)| endpoint)
}
