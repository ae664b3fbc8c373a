//! Durable-store repository ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Account, ApiKey, ClientType, NewApiKey, PlanCode, Subscription, SubscriptionSync,
    UsageAggregate,
};
use crate::error::RepoError;

/// Admin operations are the sole writer to accounts.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create(&self, name: &str, email: &str) -> Result<Account, RepoError>;
    async fn find(&self, id: Uuid) -> Result<Option<Account>, RepoError>;
}

/// Credential row needed to authenticate a key, fetched by public prefix.
#[derive(Debug, Clone)]
pub struct KeyAuth {
    pub key_id: String,
    pub account_id: Uuid,
    pub key_hash: String,
    pub client_type: ClientType,
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Fetch the auth material for an active key. Revoked and unknown
    /// prefixes both come back `None`.
    async fn find_active_auth(&self, key_id: &str) -> Result<Option<KeyAuth>, RepoError>;

    async fn insert(&self, key: NewApiKey) -> Result<(), RepoError>;

    /// Flip a key to revoked. Returns false when the id is unknown.
    async fn revoke(&self, key_id: &str) -> Result<bool, RepoError>;

    async fn list_for_account(&self, account_id: Uuid) -> Result<Vec<ApiKey>, RepoError>;

    /// Active key ids for one account, for overage summation.
    async fn list_active_ids(&self, account_id: Uuid) -> Result<Vec<String>, RepoError>;

    /// All active (account_id, key_id) pairs, for the aggregator sweep.
    async fn list_all_active(&self) -> Result<Vec<(Uuid, String)>, RepoError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// The account's current active-or-trialing subscription, if any.
    async fn find_entitled(&self, account_id: Uuid) -> Result<Option<Subscription>, RepoError>;

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Subscription>, RepoError>;

    /// Create a trialing row if the account has none yet.
    async fn ensure_trial(&self, account_id: Uuid, plan_code: PlanCode) -> Result<(), RepoError>;

    /// Attach provider ids after checkout and mark the row active.
    async fn record_checkout(
        &self,
        account_id: Uuid,
        external_customer_id: &str,
        external_subscription_id: &str,
    ) -> Result<(), RepoError>;

    /// Upsert from a provider subscription event, matched by external
    /// subscription id or account id.
    async fn sync_from_provider(&self, sync: SubscriptionSync) -> Result<(), RepoError>;

    async fn cancel_by_external_id(&self, external_id: &str) -> Result<(), RepoError>;

    /// Mark an account's subscription active on a one-shot payment
    /// (order-based providers).
    async fn activate(&self, account_id: Uuid, plan_code: PlanCode) -> Result<(), RepoError>;
}

/// Per-account rollup for the admin usage view.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AccountUsageSummary {
    pub account_id: Uuid,
    pub total_requests: u64,
}

#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Replace-style upsert keyed by (account, key, period). Repeated
    /// flushes of the same snapshot converge to identical rows.
    async fn upsert(&self, aggregate: &UsageAggregate) -> Result<(), RepoError>;

    async fn account_summaries(
        &self,
        period_start: DateTime<Utc>,
    ) -> Result<Vec<AccountUsageSummary>, RepoError>;
}

#[async_trait]
pub trait ProcessedEventRepository: Send + Sync {
    /// Record a webhook event id. Returns false when the id was already
    /// present, which callers treat as idempotent success.
    async fn insert_once(&self, event_id: &str) -> Result<bool, RepoError>;
}
