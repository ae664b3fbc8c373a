//! In-process counter store.
//!
//! Strictly single-replica: counts live in a sharded map and are lost on
//! crash, an accepted degradation when no shared store is configured. Keys
//! are hashed across shards so hot tenants do not serialize behind one
//! lock.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use chainwatch_core::error::CounterError;
use chainwatch_core::ports::{
    endpoint_from_key, endpoint_key, monthly_total_key, trial_key, CounterStore, RateDecision,
};

const SHARD_COUNT: usize = 16;

#[derive(Default)]
struct Shard {
    /// Rate windows: one bucket per (key, method, path) holding the
    /// minute epoch it belongs to; stale buckets are reset in place so
    /// the map stays bounded by the number of live endpoints.
    rate: HashMap<String, (i64, u64)>,
    /// Monthly, per-endpoint, and trial counters, addressed by the same
    /// composite keys the redis backend uses.
    counters: HashMap<String, u64>,
}

pub struct InMemoryCounterStore {
    shards: Vec<Mutex<Shard>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::default())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// All keys are sharded by api_key_id (or account id), so every
    /// counter for one principal lands in the same shard.
    fn bump(&self, shard_by: &str, key: String) -> u64 {
        let mut shard = self.shard(shard_by).lock().unwrap();
        let count = shard.counters.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    fn read(&self, shard_by: &str, key: &str) -> u64 {
        let shard = self.shard(shard_by).lock().unwrap();
        *shard.counters.get(key).unwrap_or(&0)
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn check_and_consume_rate(
        &self,
        api_key_id: &str,
        method: &str,
        path: &str,
        rpm_limit: u64,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, CounterError> {
        let key = format!("rl:{api_key_id}:{method}:{path}");
        let minute_epoch = now.timestamp() / 60;

        let mut shard = self.shard(api_key_id).lock().unwrap();
        let entry = shard.rate.entry(key).or_insert((minute_epoch, 0));
        if entry.0 != minute_epoch {
            *entry = (minute_epoch, 0);
        }
        entry.1 += 1;
        let count = entry.1;

        Ok(RateDecision {
            allowed: count <= rpm_limit,
            remaining: Some(rpm_limit.saturating_sub(count)),
            reset_seconds: (60 - (now.timestamp() % 60)) as u64,
        })
    }

    async fn inc_monthly(
        &self,
        api_key_id: &str,
        method: &str,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CounterError> {
        self.bump(api_key_id, monthly_total_key(api_key_id, now));
        self.bump(api_key_id, endpoint_key(api_key_id, method, path, now));
        Ok(())
    }

    async fn monthly_total(
        &self,
        api_key_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, CounterError> {
        Ok(self.read(api_key_id, &monthly_total_key(api_key_id, now)))
    }

    async fn endpoint_usage(
        &self,
        api_key_id: &str,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, CounterError> {
        let prefix = {
            // "quota:{key}:{YYYYMM}:ep:" without a trailing endpoint.
            let mut p = endpoint_key(api_key_id, "", "", now);
            p.truncate(p.len() - 1);
            p
        };
        let shard = self.shard(api_key_id).lock().unwrap();
        Ok(shard
            .counters
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, v)| endpoint_from_key(k).map(|ep| (ep.to_string(), *v)))
            .collect())
    }

    async fn trial_usage(&self, account_id: Uuid) -> Result<u64, CounterError> {
        let shard_by = account_id.to_string();
        Ok(self.read(&shard_by, &trial_key(account_id)))
    }

    async fn inc_trial_usage(&self, account_id: Uuid) -> Result<(), CounterError> {
        let shard_by = account_id.to_string();
        self.bump(&shard_by, trial_key(account_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn consumes_within_a_minute_window() {
        let store = InMemoryCounterStore::new();
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 10, 0, 30).unwrap();

        for i in 1..=3u64 {
            let d = store
                .check_and_consume_rate("k1", "GET", "/v1/alerts", 3, now)
                .await
                .unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, Some(3 - i));
        }
        let d = store
            .check_and_consume_rate("k1", "GET", "/v1/alerts", 3, now)
            .await
            .unwrap();
        assert!(!d.allowed);
        assert_eq!(d.remaining, Some(0));
        assert_eq!(d.reset_seconds, 30);
    }

    #[tokio::test]
    async fn next_minute_starts_a_fresh_window() {
        let store = InMemoryCounterStore::new();
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 10, 0, 59).unwrap();

        let first = store
            .check_and_consume_rate("k1", "GET", "/v1/alerts", 1, now)
            .await
            .unwrap();
        assert!(first.allowed);
        assert!(
            !store
                .check_and_consume_rate("k1", "GET", "/v1/alerts", 1, now)
                .await
                .unwrap()
                .allowed
        );

        let next_minute = now + Duration::seconds(1);
        let fresh = store
            .check_and_consume_rate("k1", "GET", "/v1/alerts", 1, next_minute)
            .await
            .unwrap();
        assert!(fresh.allowed);
    }

    #[tokio::test]
    async fn monthly_counters_split_at_the_month_boundary() {
        let store = InMemoryCounterStore::new();
        let august = Utc.with_ymd_and_hms(2026, 8, 31, 23, 59, 59).unwrap();
        let september = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 1).unwrap();

        store.inc_monthly("k1", "GET", "/v1/alerts", august).await.unwrap();
        store.inc_monthly("k1", "GET", "/v1/alerts", september).await.unwrap();
        store.inc_monthly("k1", "GET", "/v1/alerts", september).await.unwrap();

        assert_eq!(store.monthly_total("k1", august).await.unwrap(), 1);
        assert_eq!(store.monthly_total("k1", september).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn endpoint_usage_lists_only_this_key() {
        let store = InMemoryCounterStore::new();
        let now = Utc::now();

        store.inc_monthly("k1", "GET", "/v1/alerts", now).await.unwrap();
        store.inc_monthly("k1", "GET", "/v1/alerts/{id}", now).await.unwrap();
        store.inc_monthly("k2", "GET", "/v1/alerts", now).await.unwrap();

        let usage = store.endpoint_usage("k1", now).await.unwrap();
        assert_eq!(usage.len(), 2);
        assert_eq!(usage.get("GET:/v1/alerts"), Some(&1));
        assert_eq!(usage.get("GET:/v1/alerts/{id}"), Some(&1));
    }

    #[tokio::test]
    async fn trial_usage_accumulates_without_expiry() {
        let store = InMemoryCounterStore::new();
        let account = Uuid::new_v4();
        for _ in 0..10 {
            store.inc_trial_usage(account).await.unwrap();
        }
        assert_eq!(store.trial_usage(account).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn sum_monthly_spans_keys() {
        let store = InMemoryCounterStore::new();
        let now = Utc::now();
        store.inc_monthly("k1", "GET", "/v1/alerts", now).await.unwrap();
        store.inc_monthly("k1", "GET", "/v1/alerts", now).await.unwrap();
        for _ in 0..6 {
            store.inc_monthly("k2", "GET", "/v1/alerts", now).await.unwrap();
        }
        let ids = vec!["k1".to_string(), "k2".to_string()];
        assert_eq!(store.sum_monthly(&ids, now).await.unwrap(), 8);
    }
}
