//! Application state - shared across all handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::DbConn;
use uuid::Uuid;

use chainwatch_core::admission::AdmissionGate;
use chainwatch_core::billing::BillingReconciler;
use chainwatch_core::domain::PlanCatalog;
use chainwatch_core::ports::{
    AccountRepository, AlertStore, ApiKeyRepository, BillingProvider, CounterStore,
    PrincipalResolver, SecretHasher, SubscriptionChecker, SubscriptionRepository, UsageRepository,
};
use chainwatch_core::usage::UsageAggregator;
use chainwatch_infra::alerts::InMemoryAlertStore;
use chainwatch_infra::billing::{RazorpayProvider, StripeMeterReporter, StripeProvider};
use chainwatch_infra::counter::RedisCounterConfig;
use chainwatch_infra::database::{
    fetch_plan_catalog, DbSubscriptionChecker, PgAccountRepository, PgApiKeyRepository,
    PgProcessedEventRepository, PgSubscriptionRepository, PgUsageRepository,
};
use chainwatch_infra::{
    Argon2SecretHasher, DbPrincipalResolver, InMemoryCounterStore, RedisCounterStore,
    StaticPrincipalResolver,
};

use crate::config::AppConfig;

/// Repositories available only when the durable store is configured.
#[derive(Clone)]
pub struct Repositories {
    pub accounts: Arc<dyn AccountRepository>,
    pub keys: Arc<dyn ApiKeyRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub usage: Arc<dyn UsageRepository>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub counters: Arc<dyn CounterStore>,
    pub gate: Arc<AdmissionGate>,
    pub resolver: Arc<dyn PrincipalResolver>,
    pub alerts: Arc<dyn AlertStore>,
    pub hasher: Arc<dyn SecretHasher>,
    pub plans: PlanCatalog,
    pub db: Option<DbConn>,
    pub repos: Option<Repositories>,
    pub aggregator: Option<Arc<UsageAggregator>>,
    pub reconciler: Option<Arc<BillingReconciler>>,
    pub provider: Option<Arc<dyn BillingProvider>>,
    pub started_at: DateTime<Utc>,
}

/// Entitlement stub for deployments without a durable store: nobody has a
/// subscription, so the trial cap applies to everyone.
struct NoSubscriptions;

#[async_trait::async_trait]
impl SubscriptionChecker for NoSubscriptions {
    async fn is_entitled(&self, _account_id: Uuid) -> bool {
        false
    }
}

impl AppState {
    /// Build the application state with the configured backends, falling
    /// back to in-process implementations when shared ones are absent or
    /// unreachable.
    pub async fn new(config: AppConfig) -> Self {
        let counters: Arc<dyn CounterStore> = match &config.counter_store_url {
            Some(url) => match RedisCounterStore::new(RedisCounterConfig::new(url.clone())).await {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    tracing::error!(error = %err, "counter store unreachable, using in-process fallback");
                    Arc::new(InMemoryCounterStore::new())
                }
            },
            None => {
                tracing::info!("COUNTER_STORE_URL not set, using in-process counters");
                Arc::new(InMemoryCounterStore::new())
            }
        };

        let db = match &config.database {
            Some(db_config) => match db_config.connect().await {
                Ok(conn) => Some(conn),
                Err(err) => {
                    tracing::error!(error = %err, "durable store unreachable, running without it");
                    None
                }
            },
            None => {
                tracing::warn!("DATABASE_URL not set, running in pass-through mode");
                None
            }
        };

        let hasher: Arc<dyn SecretHasher> = Arc::new(Argon2SecretHasher::new());

        let (repos, plans, resolver, checker): (
            Option<Repositories>,
            PlanCatalog,
            Arc<dyn PrincipalResolver>,
            Arc<dyn SubscriptionChecker>,
        ) = match &db {
            Some(conn) => {
                let repos = Repositories {
                    accounts: Arc::new(PgAccountRepository::new(conn.clone())),
                    keys: Arc::new(PgApiKeyRepository::new(conn.clone())),
                    subscriptions: Arc::new(PgSubscriptionRepository::new(conn.clone())),
                    usage: Arc::new(PgUsageRepository::new(conn.clone())),
                };
                let plans = match fetch_plan_catalog(conn).await {
                    Ok(catalog) => catalog,
                    Err(err) => {
                        tracing::warn!(error = %err, "plan catalog unavailable, using defaults");
                        PlanCatalog::default()
                    }
                };
                let resolver: Arc<dyn PrincipalResolver> = Arc::new(DbPrincipalResolver::new(
                    repos.keys.clone(),
                    repos.subscriptions.clone(),
                    hasher.clone(),
                ));
                let checker: Arc<dyn SubscriptionChecker> =
                    Arc::new(DbSubscriptionChecker::new(conn.clone()));
                (Some(repos), plans, resolver, checker)
            }
            None => (
                None,
                PlanCatalog::default(),
                Arc::new(StaticPrincipalResolver::new()),
                Arc::new(NoSubscriptions),
            ),
        };

        let gate = Arc::new(AdmissionGate::new(
            counters.clone(),
            checker,
            plans.clone(),
            config.trial_cap,
        ));

        let aggregator = repos.as_ref().map(|repos| {
            Arc::new(UsageAggregator::new(
                repos.keys.clone(),
                repos.usage.clone(),
                counters.clone(),
            ))
        });

        let provider: Option<Arc<dyn BillingProvider>> =
            match config.billing.provider.to_lowercase().as_str() {
                "razorpay" => match RazorpayProvider::new(config.billing.razorpay.clone()) {
                    Ok(p) => Some(Arc::new(p)),
                    Err(err) => {
                        tracing::error!(error = %err, "razorpay provider init failed");
                        None
                    }
                },
                _ => match StripeProvider::new(config.billing.stripe.clone()) {
                    Ok(p) => Some(Arc::new(p)),
                    Err(err) => {
                        tracing::error!(error = %err, "stripe provider init failed");
                        None
                    }
                },
            };

        let reconciler = match (&db, &repos) {
            (Some(conn), Some(repos)) => {
                match StripeMeterReporter::new(config.billing.stripe.clone()) {
                    Ok(meter) => Some(Arc::new(BillingReconciler::new(
                        repos.subscriptions.clone(),
                        repos.keys.clone(),
                        Arc::new(PgProcessedEventRepository::new(conn.clone())),
                        counters.clone(),
                        Arc::new(meter),
                        plans.clone(),
                        config.billing.stripe.price_overage_metered.clone(),
                    ))),
                    Err(err) => {
                        tracing::error!(error = %err, "meter reporter init failed");
                        None
                    }
                }
            }
            _ => None,
        };

        tracing::info!(
            durable_store = db.is_some(),
            billing_provider = provider.as_ref().map(|p| p.name()).unwrap_or("none"),
            "Application state initialized"
        );

        Self {
            config: Arc::new(config),
            counters,
            gate,
            resolver,
            alerts: Arc::new(InMemoryAlertStore::with_fixtures()),
            hasher,
            plans,
            db,
            repos,
            aggregator,
            reconciler,
            provider,
            started_at: Utc::now(),
        }
    }
}
