//! Subscription entitlement check consumed by the admission gate, so the
//! gate itself stays database-agnostic.

use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait SubscriptionChecker: Send + Sync {
    /// Whether the account holds an active or trialing subscription.
    /// Lookup failures count as "no subscription": the trial cap then
    /// applies, which fails closed rather than open.
    async fn is_entitled(&self, account_id: Uuid) -> bool;
}
