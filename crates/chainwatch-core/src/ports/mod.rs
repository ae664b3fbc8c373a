//! Ports - trait definitions for external dependencies.
//! These are the interfaces that infrastructure must implement.

mod alerts;
mod billing;
mod counter_store;
mod repository;
mod resolver;
mod subscription_check;

pub use alerts::AlertStore;
pub use billing::{
    BillingEvent, BillingEventKind, BillingProvider, CheckoutRequest, CheckoutResponse,
    InvoiceLine, MeterReporter,
};
pub use counter_store::{
    endpoint_from_key, endpoint_key, monthly_total_key, rate_key, trial_key, CounterStore,
    RateDecision,
};
pub use repository::{
    AccountRepository, AccountUsageSummary, ApiKeyRepository, KeyAuth, ProcessedEventRepository,
    SubscriptionRepository, UsageRepository,
};
pub use resolver::{PrincipalResolver, SecretHasher};
pub use subscription_check::SubscriptionChecker;
