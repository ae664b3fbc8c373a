//! Durable store: connection management, entities, and repository
//! implementations over sea-orm/Postgres.

mod connections;
pub mod entity;
mod repos;

pub use connections::DatabaseConfig;
pub use repos::{
    fetch_plan_catalog, DbSubscriptionChecker, PgAccountRepository, PgApiKeyRepository,
    PgProcessedEventRepository, PgSubscriptionRepository, PgUsageRepository,
};
