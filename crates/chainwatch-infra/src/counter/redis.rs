//! Redis counter store.
//!
//! Increment-plus-TTL runs as a Lua script (rate windows) or an atomic
//! pipeline (monthly counters), so concurrent replicas converge without
//! read-modify-write races.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use uuid::Uuid;

use chainwatch_core::domain::Period;
use chainwatch_core::error::CounterError;
use chainwatch_core::ports::{
    endpoint_from_key, endpoint_key, monthly_total_key, rate_key, trial_key, CounterStore,
    RateDecision,
};

/// Redis connection configuration for the counter store.
#[derive(Debug, Clone)]
pub struct RedisCounterConfig {
    pub url: String,
    pub connect_timeout: Duration,
}

impl RedisCounterConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

pub struct RedisCounterStore {
    conn: ConnectionManager,
    /// Atomic increment-with-expiry for rate windows; returns the
    /// post-increment count.
    rate_script: Script,
}

impl RedisCounterStore {
    pub async fn new(config: RedisCounterConfig) -> Result<Self, CounterError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| CounterError::Backend(e.to_string()))?;

        // Bound the handshake so a dead redis fails fast instead of
        // hanging startup.
        let conn = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CounterError::Backend("connection timed out".to_string()))?
            .map_err(|e| CounterError::Backend(e.to_string()))?;

        let rate_script = Script::new(
            r#"
            local current = redis.call('INCR', KEYS[1])
            if current == 1 then
                redis.call('EXPIRE', KEYS[1], tonumber(ARGV[1]))
            end
            return current
            "#,
        );

        tracing::info!(url = %config.url, "Connected to redis counter store");

        Ok(Self { conn, rate_script })
    }

    fn backend_err(e: redis::RedisError) -> CounterError {
        CounterError::Backend(e.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn check_and_consume_rate(
        &self,
        api_key_id: &str,
        method: &str,
        path: &str,
        rpm_limit: u64,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, CounterError> {
        let key = rate_key(api_key_id, method, path, now);
        let mut conn = self.conn.clone();

        let count: u64 = self
            .rate_script
            .key(&key)
            .arg(60)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::backend_err)?;

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
        let total_key = monthly_total_key(api_key_id, now);
        let ep_key = endpoint_key(api_key_id, method, path, now);
        let ttl = Period::containing(now).seconds_until_end(now).max(1);

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .incr(&total_key, 1)
            .ignore()
            .expire(&total_key, ttl as i64)
            .ignore()
            .incr(&ep_key, 1)
            .ignore()
            .expire(&ep_key, ttl as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::backend_err)
    }

    async fn monthly_total(
        &self,
        api_key_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, CounterError> {
        let mut conn = self.conn.clone();
        let total: Option<u64> = conn
            .get(monthly_total_key(api_key_id, now))
            .await
            .map_err(Self::backend_err)?;
        Ok(total.unwrap_or(0))
    }

    async fn endpoint_usage(
        &self,
        api_key_id: &str,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, CounterError> {
        let pattern = {
            let mut p = endpoint_key(api_key_id, "", "", now);
            p.truncate(p.len() - 1);
            p.push('*');
            p
        };

        let mut conn = self.conn.clone();
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(Self::backend_err)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        let mut usage = HashMap::with_capacity(keys.len());
        if keys.is_empty() {
            return Ok(usage);
        }
        let values: Vec<Option<u64>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(Self::backend_err)?;
        for (key, value) in keys.iter().zip(values) {
            if let (Some(endpoint), Some(count)) = (endpoint_from_key(key), value) {
                usage.insert(endpoint.to_string(), count);
            }
        }
        Ok(usage)
    }

    async fn trial_usage(&self, account_id: Uuid) -> Result<u64, CounterError> {
        let mut conn = self.conn.clone();
        let used: Option<u64> = conn
            .get(trial_key(account_id))
            .await
            .map_err(Self::backend_err)?;
        Ok(used.unwrap_or(0))
    }

    async fn inc_trial_usage(&self, account_id: Uuid) -> Result<(), CounterError> {
        let mut conn = self.conn.clone();
        conn.incr::<_, _, ()>(trial_key(account_id), 1)
            .await
            .map_err(Self::backend_err)
    }

    async fn sum_monthly(
        &self,
        api_key_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<u64, CounterError> {
        if api_key_ids.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = api_key_ids
            .iter()
            .map(|id| monthly_total_key(id, now))
            .collect();
        let mut conn = self.conn.clone();
        let values: Vec<Option<u64>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(Self::backend_err)?;
        Ok(values.into_iter().flatten().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> Option<RedisCounterStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        let config = RedisCounterConfig {
            url,
            connect_timeout: Duration::from_secs(1),
        };
        RedisCounterStore::new(config).await.ok()
    }

    #[tokio::test]
    async fn rate_window_consumes_and_denies() {
        let Some(store) = test_store().await else {
            return;
        };
        let key = format!("itest-{}", Uuid::new_v4());
        let now = Utc::now();

        let first = store
            .check_and_consume_rate(&key, "GET", "/v1/alerts", 2, now)
            .await
            .unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, Some(1));

        store
            .check_and_consume_rate(&key, "GET", "/v1/alerts", 2, now)
            .await
            .unwrap();
        let third = store
            .check_and_consume_rate(&key, "GET", "/v1/alerts", 2, now)
            .await
            .unwrap();
        assert!(!third.allowed);
        assert!(third.reset_seconds <= 60);
    }

    #[tokio::test]
    async fn monthly_increment_is_observed() {
        let Some(store) = test_store().await else {
            return;
        };
        let key = format!("itest-{}", Uuid::new_v4());
        let now = Utc::now();

        store.inc_monthly(&key, "GET", "/v1/alerts", now).await.unwrap();
        store.inc_monthly(&key, "GET", "/v1/alerts/{id}", now).await.unwrap();

        assert_eq!(store.monthly_total(&key, now).await.unwrap(), 2);
        let usage = store.endpoint_usage(&key, now).await.unwrap();
        assert_eq!(usage.get("GET:/v1/alerts"), Some(&1));
        assert_eq!(usage.get("GET:/v1/alerts/{id}"), Some(&1));
    }
}
