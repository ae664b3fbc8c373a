//! Domain entities and value types.

mod account;
mod alert;
mod api_key;
mod period;
mod plan;
mod principal;
mod subscription;
mod usage;

pub use account::Account;
pub use alert::{Alert, AlertPage, AlertQuery};
pub use api_key::{
    parse_api_key, ApiKey, ApiKeyStatus, ClientType, NewApiKey, ParsedKey, KEY_ID_LEN,
    KEY_SCHEME, KEY_SECRET_LEN,
};
pub use period::{month_key, Period};
pub use plan::{PlanCatalog, PlanCode, PlanEntry, PlanLimits};
pub use principal::Principal;
pub use subscription::{Subscription, SubscriptionStatus, SubscriptionSync};
pub use usage::UsageAggregate;
