//! Admission gate: the per-request policy engine.
//!
//! Decision order is rate window, then monthly quota, then trial cap, each
//! short-circuiting on the first denial. Accounting happens after the
//! handler runs, unconditionally, so 5xx responses still count.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Period, PlanCatalog, PlanCode, PlanLimits, Principal};
use crate::error::CounterError;
use crate::ports::{CounterStore, RateDecision, SubscriptionChecker};

/// Retry hint handed to callers that exhausted the trial cap.
const TRIAL_RETRY_AFTER_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    RateExceeded,
    QuotaExceeded,
    TrialExhausted,
}

/// A deny decision plus the `Retry-After` seconds to surface.
#[derive(Debug, Clone, Copy)]
pub struct Denial {
    pub kind: DenialKind,
    pub retry_after_seconds: u64,
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("request denied")]
    Denied(Denial),

    #[error(transparent)]
    Counter(#[from] CounterError),
}

/// Ticket for an admitted request, carried across the handler so the
/// post-handler accounting pass can emit headers without re-deriving the
/// rate decision or the entitlement check.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub limits: PlanLimits,
    pub rate: RateDecision,
    /// Whether an active-or-trialing subscription exists. Trial counting
    /// stays armed until one does.
    pub entitled: bool,
}

/// Header snapshot emitted after accounting.
#[derive(Debug, Clone, Copy)]
pub struct UsageHeaders {
    pub rate_limit: u64,
    pub rate_remaining: Option<u64>,
    pub rate_reset: u64,
    pub quota_limit: u64,
    pub quota_remaining: u64,
    pub quota_reset: u64,
}

pub struct AdmissionGate {
    counters: Arc<dyn CounterStore>,
    subscriptions: Arc<dyn SubscriptionChecker>,
    plans: PlanCatalog,
    trial_cap: u64,
}

impl AdmissionGate {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        subscriptions: Arc<dyn SubscriptionChecker>,
        plans: PlanCatalog,
        trial_cap: u64,
    ) -> Self {
        Self {
            counters,
            subscriptions,
            plans,
            trial_cap,
        }
    }

    pub fn plan_limits(&self, plan: PlanCode) -> PlanLimits {
        self.plans.limits(plan)
    }

    /// Decide whether to admit one request. Denials inside the gate do not
    /// count against quota, but the rate token is consumed either way.
    pub async fn admit(
        &self,
        principal: &Principal,
        method: &str,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<Admission, AdmissionError> {
        let limits = self.plans.limits(principal.plan);

        let rate = self
            .counters
            .check_and_consume_rate(
                &principal.api_key_id,
                method,
                path,
                limits.per_endpoint_rpm,
                now,
            )
            .await?;
        if !rate.allowed {
            return Err(AdmissionError::Denied(Denial {
                kind: DenialKind::RateExceeded,
                retry_after_seconds: rate.reset_seconds,
            }));
        }

        if !principal.overage_enabled {
            let total = self
                .counters
                .monthly_total(&principal.api_key_id, now)
                .await?;
            if total >= limits.monthly_quota {
                let period = Period::containing(now);
                return Err(AdmissionError::Denied(Denial {
                    kind: DenialKind::QuotaExceeded,
                    retry_after_seconds: period.seconds_until_end(now),
                }));
            }
        }

        let entitled = self.subscriptions.is_entitled(principal.account_id).await;
        if !entitled {
            let used = self.counters.trial_usage(principal.account_id).await?;
            if used >= self.trial_cap {
                return Err(AdmissionError::Denied(Denial {
                    kind: DenialKind::TrialExhausted,
                    retry_after_seconds: TRIAL_RETRY_AFTER_SECS,
                }));
            }
        }

        Ok(Admission {
            limits,
            rate,
            entitled,
        })
    }

    /// Post-handler accounting: bump the monthly and (when unsubscribed)
    /// trial counters, then snapshot the response headers.
    pub async fn record(
        &self,
        principal: &Principal,
        method: &str,
        path: &str,
        admission: &Admission,
        now: DateTime<Utc>,
    ) -> Result<UsageHeaders, CounterError> {
        self.counters
            .inc_monthly(&principal.api_key_id, method, path, now)
            .await?;
        if !admission.entitled {
            self.counters.inc_trial_usage(principal.account_id).await?;
        }

        let total = self
            .counters
            .monthly_total(&principal.api_key_id, now)
            .await?;
        let period = Period::containing(now);

        Ok(UsageHeaders {
            rate_limit: admission.limits.per_endpoint_rpm,
            rate_remaining: admission.rate.remaining,
            rate_reset: admission.rate.reset_seconds,
            quota_limit: admission.limits.monthly_quota,
            quota_remaining: admission.limits.monthly_quota.saturating_sub(total),
            quota_reset: period.seconds_until_end(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::ports::{
        endpoint_from_key, endpoint_key, monthly_total_key, rate_key, trial_key,
    };

    /// Single-map counter fake sharing the production key schema.
    #[derive(Default)]
    struct FakeCounters {
        inner: Mutex<HashMap<String, u64>>,
    }

    impl FakeCounters {
        fn get(&self, key: &str) -> u64 {
            *self.inner.lock().unwrap().get(key).unwrap_or(&0)
        }

        fn bump(&self, key: String) -> u64 {
            let mut map = self.inner.lock().unwrap();
            let count = map.entry(key).or_insert(0);
            *count += 1;
            *count
        }
    }

    #[async_trait]
    impl CounterStore for FakeCounters {
        async fn check_and_consume_rate(
            &self,
            api_key_id: &str,
            method: &str,
            path: &str,
            rpm_limit: u64,
            now: DateTime<Utc>,
        ) -> Result<RateDecision, CounterError> {
            let count = self.bump(rate_key(api_key_id, method, path, now));
            Ok(RateDecision {
                allowed: count <= rpm_limit,
                remaining: Some(rpm_limit.saturating_sub(count)),
                reset_seconds: 60 - (now.timestamp() % 60) as u64,
            })
        }

        async fn inc_monthly(
            &self,
            api_key_id: &str,
            method: &str,
            path: &str,
            now: DateTime<Utc>,
        ) -> Result<(), CounterError> {
            self.bump(monthly_total_key(api_key_id, now));
            self.bump(endpoint_key(api_key_id, method, path, now));
            Ok(())
        }

        async fn monthly_total(
            &self,
            api_key_id: &str,
            now: DateTime<Utc>,
        ) -> Result<u64, CounterError> {
            Ok(self.get(&monthly_total_key(api_key_id, now)))
        }

        async fn endpoint_usage(
            &self,
            api_key_id: &str,
            now: DateTime<Utc>,
        ) -> Result<HashMap<String, u64>, CounterError> {
            let prefix = endpoint_key(api_key_id, "", "", now);
            let prefix = prefix.trim_end_matches(':');
            let map = self.inner.lock().unwrap();
            Ok(map
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .filter_map(|(k, v)| endpoint_from_key(k).map(|ep| (ep.to_string(), *v)))
                .collect())
        }

        async fn trial_usage(&self, account_id: Uuid) -> Result<u64, CounterError> {
            Ok(self.get(&trial_key(account_id)))
        }

        async fn inc_trial_usage(&self, account_id: Uuid) -> Result<(), CounterError> {
            self.bump(trial_key(account_id));
            Ok(())
        }
    }

    struct ToggleChecker(AtomicBool);

    #[async_trait]
    impl SubscriptionChecker for ToggleChecker {
        async fn is_entitled(&self, _account_id: Uuid) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn principal(plan: PlanCode, overage: bool) -> Principal {
        Principal {
            account_id: Uuid::new_v4(),
            api_key_id: "k1-prefix-aaa".to_string(),
            plan,
            client_type: crate::domain::ClientType::Agent,
            overage_enabled: overage,
        }
    }

    fn gate(
        counters: Arc<FakeCounters>,
        entitled: bool,
        plans: PlanCatalog,
        trial_cap: u64,
    ) -> (AdmissionGate, Arc<ToggleChecker>) {
        let checker = Arc::new(ToggleChecker(AtomicBool::new(entitled)));
        (
            AdmissionGate::new(counters, checker.clone(), plans, trial_cap),
            checker,
        )
    }

    #[tokio::test]
    async fn lite_plan_admits_twenty_then_rate_limits() {
        let counters = Arc::new(FakeCounters::default());
        let (gate, _) = gate(counters, true, PlanCatalog::default(), 10);
        let p = principal(PlanCode::Lite, false);
        let now = Utc::now();

        for _ in 0..20 {
            let adm = gate.admit(&p, "GET", "/v1/alerts", now).await.unwrap();
            gate.record(&p, "GET", "/v1/alerts", &adm, now).await.unwrap();
        }
        let denied = gate.admit(&p, "GET", "/v1/alerts", now).await.unwrap_err();
        match denied {
            AdmissionError::Denied(d) => {
                assert_eq!(d.kind, DenialKind::RateExceeded);
                assert!(d.retry_after_seconds <= 60);
            }
            other => panic!("expected rate denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_denials_still_consume_the_window() {
        let counters = Arc::new(FakeCounters::default());
        let plans = PlanCatalog::with_limits(
            PlanLimits {
                per_endpoint_rpm: 1,
                monthly_quota: 1_000,
            },
            PlanCatalog::default().limits(PlanCode::Pro),
        );
        let (gate, _) = gate(counters.clone(), true, plans, 10);
        let p = principal(PlanCode::Lite, false);
        let now = Utc::now();

        assert!(gate.admit(&p, "GET", "/v1/alerts", now).await.is_ok());
        for _ in 0..2 {
            assert!(matches!(
                gate.admit(&p, "GET", "/v1/alerts", now).await,
                Err(AdmissionError::Denied(Denial {
                    kind: DenialKind::RateExceeded,
                    ..
                }))
            ));
        }
        // Consume-on-check: all three attempts landed in the bucket.
        assert_eq!(counters.get(&rate_key(&p.api_key_id, "GET", "/v1/alerts", now)), 3);
        // Gate denials never touch the quota counters.
        assert_eq!(counters.monthly_total(&p.api_key_id, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn quota_counts_down_then_denies_at_the_limit() {
        let counters = Arc::new(FakeCounters::default());
        let plans = PlanCatalog::with_limits(
            PlanLimits {
                per_endpoint_rpm: 100,
                monthly_quota: 5,
            },
            PlanCatalog::default().limits(PlanCode::Pro),
        );
        let (gate, _) = gate(counters, true, plans, 10);
        let p = principal(PlanCode::Lite, false);
        let now = Utc::now();

        for expected_remaining in [4, 3, 2, 1, 0] {
            let adm = gate.admit(&p, "GET", "/v1/alerts", now).await.unwrap();
            let headers = gate.record(&p, "GET", "/v1/alerts", &adm, now).await.unwrap();
            assert_eq!(headers.quota_remaining, expected_remaining);
        }

        let denied = gate.admit(&p, "GET", "/v1/alerts", now).await.unwrap_err();
        match denied {
            AdmissionError::Denied(d) => {
                assert_eq!(d.kind, DenialKind::QuotaExceeded);
                assert_eq!(
                    d.retry_after_seconds,
                    Period::containing(now).seconds_until_end(now)
                );
            }
            other => panic!("expected quota denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overage_enabled_keeps_counting_past_the_quota() {
        let counters = Arc::new(FakeCounters::default());
        let plans = PlanCatalog::with_limits(
            PlanLimits {
                per_endpoint_rpm: 100,
                monthly_quota: 5,
            },
            PlanCatalog::default().limits(PlanCode::Pro),
        );
        let (gate, _) = gate(counters.clone(), true, plans, 10);
        let p = principal(PlanCode::Lite, true);
        let now = Utc::now();

        for _ in 0..8 {
            let adm = gate.admit(&p, "GET", "/v1/alerts", now).await.unwrap();
            gate.record(&p, "GET", "/v1/alerts", &adm, now).await.unwrap();
        }
        assert_eq!(counters.monthly_total(&p.api_key_id, now).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn trial_cap_lifts_once_a_subscription_appears() {
        let counters = Arc::new(FakeCounters::default());
        let (gate, checker) = gate(counters.clone(), false, PlanCatalog::default(), 10);
        let p = principal(PlanCode::Lite, false);
        let now = Utc::now();

        for _ in 0..10 {
            let adm = gate.admit(&p, "GET", "/v1/alerts/{id}", now).await.unwrap();
            gate.record(&p, "GET", "/v1/alerts/{id}", &adm, now)
                .await
                .unwrap();
        }
        assert!(matches!(
            gate.admit(&p, "GET", "/v1/alerts/{id}", now).await,
            Err(AdmissionError::Denied(Denial {
                kind: DenialKind::TrialExhausted,
                retry_after_seconds: TRIAL_RETRY_AFTER_SECS,
            }))
        ));

        // A trialing subscription appears: the cap no longer applies and
        // the trial counter stops moving.
        checker.0.store(true, Ordering::SeqCst);
        let trial_before = counters.trial_usage(p.account_id).await.unwrap();
        for _ in 0..12 {
            let adm = gate.admit(&p, "GET", "/v1/alerts/{id}", now).await.unwrap();
            gate.record(&p, "GET", "/v1/alerts/{id}", &adm, now)
                .await
                .unwrap();
        }
        assert_eq!(counters.trial_usage(p.account_id).await.unwrap(), trial_before);
    }

    #[tokio::test]
    async fn per_endpoint_counters_follow_the_route_template() {
        let counters = Arc::new(FakeCounters::default());
        let (gate, _) = gate(counters.clone(), true, PlanCatalog::default(), 10);
        let p = principal(PlanCode::Lite, false);
        let now = Utc::now();

        for _ in 0..3 {
            let adm = gate.admit(&p, "GET", "/v1/alerts", now).await.unwrap();
            gate.record(&p, "GET", "/v1/alerts", &adm, now).await.unwrap();
        }
        let adm = gate.admit(&p, "GET", "/v1/alerts/{id}", now).await.unwrap();
        gate.record(&p, "GET", "/v1/alerts/{id}", &adm, now)
            .await
            .unwrap();

        let usage = counters.endpoint_usage(&p.api_key_id, now).await.unwrap();
        assert_eq!(usage.get("GET:/v1/alerts"), Some(&3));
        assert_eq!(usage.get("GET:/v1/alerts/{id}"), Some(&1));
        assert_eq!(counters.monthly_total(&p.api_key_id, now).await.unwrap(), 4);
    }
}
