use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A drained snapshot of one key's counters for one billing period.
/// Upserted whole by the aggregator; `total_requests` is always at least
/// the sum of the per-endpoint map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageAggregate {
    pub account_id: Uuid,
    pub api_key_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_requests: u64,
    pub per_endpoint: HashMap<String, u64>,
}
