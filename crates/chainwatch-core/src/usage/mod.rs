//! Usage aggregation: periodic drain of the counter store into the
//! durable `usage_aggregates` table.
//!
//! Upserts replace rather than add, so repeated flushes converge and a
//! crashed tick is safe to retry wholesale. Monthly counters are keyed by
//! calendar month, so a flush that straddles a rollover writes the new
//! period while the previous flush's rows for the old period stand.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{Period, UsageAggregate};
use crate::ports::{ApiKeyRepository, CounterStore, UsageRepository};

pub struct UsageAggregator {
    keys: Arc<dyn ApiKeyRepository>,
    usage: Arc<dyn UsageRepository>,
    counters: Arc<dyn CounterStore>,
}

impl UsageAggregator {
    pub fn new(
        keys: Arc<dyn ApiKeyRepository>,
        usage: Arc<dyn UsageRepository>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            keys,
            usage,
            counters,
        }
    }

    /// Run one aggregation cycle: snapshot every active key's counters and
    /// upsert the current period's rows. Returns how many rows were
    /// written. Per-key failures are logged and skipped; the next tick
    /// picks them up.
    pub async fn flush_once(&self, now: DateTime<Utc>) -> u32 {
        let pairs = match self.keys.list_all_active().await {
            Ok(pairs) => pairs,
            Err(err) => {
                tracing::error!(error = %err, "usage flush: listing active keys failed");
                return 0;
            }
        };

        let period = Period::containing(now);
        let mut written = 0u32;

        for (account_id, api_key_id) in pairs {
            // Endpoint map first, total second: increments racing the
            // snapshot land in the total, keeping it >= the map's sum.
            let per_endpoint = match self.counters.endpoint_usage(&api_key_id, now).await {
                Ok(map) => map,
                Err(err) => {
                    tracing::warn!(api_key_id, error = %err, "usage flush: endpoint read failed");
                    continue;
                }
            };
            let total = match self.counters.monthly_total(&api_key_id, now).await {
                Ok(total) => total,
                Err(err) => {
                    tracing::warn!(api_key_id, error = %err, "usage flush: total read failed");
                    continue;
                }
            };

            let aggregate = UsageAggregate {
                account_id,
                api_key_id: api_key_id.clone(),
                period_start: period.start,
                period_end: period.end,
                total_requests: total,
                per_endpoint,
            };

            match self.usage.upsert(&aggregate).await {
                Ok(()) => written += 1,
                Err(err) => {
                    tracing::warn!(api_key_id, error = %err, "usage flush: upsert failed");
                }
            }
        }

        tracing::debug!(rows = written, "usage flush complete");
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use uuid::Uuid;

    use crate::domain::{ApiKey, NewApiKey};
    use crate::error::{CounterError, RepoError};
    use crate::ports::{
        monthly_total_key, AccountUsageSummary, KeyAuth, RateDecision,
    };

    struct FixedKeys(Vec<(Uuid, String)>);

    #[async_trait]
    impl ApiKeyRepository for FixedKeys {
        async fn find_active_auth(&self, _key_id: &str) -> Result<Option<KeyAuth>, RepoError> {
            Ok(None)
        }
        async fn insert(&self, _key: NewApiKey) -> Result<(), RepoError> {
            Ok(())
        }
        async fn revoke(&self, _key_id: &str) -> Result<bool, RepoError> {
            Ok(false)
        }
        async fn list_for_account(&self, _account_id: Uuid) -> Result<Vec<ApiKey>, RepoError> {
            Ok(vec![])
        }
        async fn list_active_ids(&self, _account_id: Uuid) -> Result<Vec<String>, RepoError> {
            Ok(self.0.iter().map(|(_, k)| k.clone()).collect())
        }
        async fn list_all_active(&self) -> Result<Vec<(Uuid, String)>, RepoError> {
            Ok(self.0.clone())
        }
    }

    /// Keyed upsert sink mirroring the unique constraint on
    /// (account, key, period).
    #[derive(Default)]
    struct RecordingUsage {
        rows: Mutex<HashMap<(Uuid, String, i64), UsageAggregate>>,
    }

    #[async_trait]
    impl UsageRepository for RecordingUsage {
        async fn upsert(&self, aggregate: &UsageAggregate) -> Result<(), RepoError> {
            self.rows.lock().unwrap().insert(
                (
                    aggregate.account_id,
                    aggregate.api_key_id.clone(),
                    aggregate.period_start.timestamp(),
                ),
                aggregate.clone(),
            );
            Ok(())
        }

        async fn account_summaries(
            &self,
            _period_start: DateTime<Utc>,
        ) -> Result<Vec<AccountUsageSummary>, RepoError> {
            Ok(vec![])
        }
    }

    /// Counter fake with month-keyed totals, like the real backends.
    #[derive(Default)]
    struct MonthlyCounters {
        totals: Mutex<HashMap<String, u64>>,
    }

    impl MonthlyCounters {
        fn set(&self, key_id: &str, now: DateTime<Utc>, total: u64) {
            self.totals
                .lock()
                .unwrap()
                .insert(monthly_total_key(key_id, now), total);
        }
    }

    #[async_trait]
    impl CounterStore for MonthlyCounters {
        async fn check_and_consume_rate(
            &self,
            _api_key_id: &str,
            _method: &str,
            _path: &str,
            _rpm_limit: u64,
            _now: DateTime<Utc>,
        ) -> Result<RateDecision, CounterError> {
            unreachable!("aggregator never touches rate windows")
        }

        async fn inc_monthly(
            &self,
            api_key_id: &str,
            _method: &str,
            _path: &str,
            now: DateTime<Utc>,
        ) -> Result<(), CounterError> {
            *self
                .totals
                .lock()
                .unwrap()
                .entry(monthly_total_key(api_key_id, now))
                .or_insert(0) += 1;
            Ok(())
        }

        async fn monthly_total(
            &self,
            api_key_id: &str,
            now: DateTime<Utc>,
        ) -> Result<u64, CounterError> {
            Ok(*self
                .totals
                .lock()
                .unwrap()
                .get(&monthly_total_key(api_key_id, now))
                .unwrap_or(&0))
        }

        async fn endpoint_usage(
            &self,
            _api_key_id: &str,
            _now: DateTime<Utc>,
        ) -> Result<HashMap<String, u64>, CounterError> {
            Ok(HashMap::new())
        }

        async fn trial_usage(&self, _account_id: Uuid) -> Result<u64, CounterError> {
            Ok(0)
        }

        async fn inc_trial_usage(&self, _account_id: Uuid) -> Result<(), CounterError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn back_to_back_flushes_converge() {
        let acct = Uuid::new_v4();
        let keys = Arc::new(FixedKeys(vec![
            (acct, "k1".to_string()),
            (acct, "k2".to_string()),
        ]));
        let usage = Arc::new(RecordingUsage::default());
        let counters = Arc::new(MonthlyCounters::default());
        let now = Utc::now();
        counters.set("k1", now, 2);
        counters.set("k2", now, 7);

        let aggregator = UsageAggregator::new(keys, usage.clone(), counters);
        assert_eq!(aggregator.flush_once(now).await, 2);
        assert_eq!(aggregator.flush_once(now).await, 2);

        let rows = usage.rows.lock().unwrap();
        assert_eq!(rows.len(), 2);
        let period = Period::containing(now);
        let k1 = rows
            .get(&(acct, "k1".to_string(), period.start.timestamp()))
            .unwrap();
        let k2 = rows
            .get(&(acct, "k2".to_string(), period.start.timestamp()))
            .unwrap();
        assert_eq!(k1.total_requests, 2);
        assert_eq!(k2.total_requests, 7);
        assert_eq!(k1.period_end, period.end);
    }

    #[tokio::test]
    async fn month_rollover_keeps_both_period_rows() {
        let acct = Uuid::new_v4();
        let keys = Arc::new(FixedKeys(vec![(acct, "k1".to_string())]));
        let usage = Arc::new(RecordingUsage::default());
        let counters = Arc::new(MonthlyCounters::default());

        let august = Utc.with_ymd_and_hms(2026, 8, 31, 23, 59, 0).unwrap();
        let september = Utc.with_ymd_and_hms(2026, 9, 1, 0, 1, 0).unwrap();
        counters.set("k1", august, 40);
        counters.set("k1", september, 1);

        let aggregator = UsageAggregator::new(keys, usage.clone(), counters);
        aggregator.flush_once(august).await;
        aggregator.flush_once(september).await;

        let rows = usage.rows.lock().unwrap();
        assert_eq!(rows.len(), 2, "one row per period must survive rollover");
        let aug_start = Period::containing(august).start.timestamp();
        let sep_start = Period::containing(september).start.timestamp();
        assert_eq!(
            rows.get(&(acct, "k1".to_string(), aug_start)).unwrap().total_requests,
            40
        );
        assert_eq!(
            rows.get(&(acct, "k1".to_string(), sep_start)).unwrap().total_requests,
            1
        );
    }
}
