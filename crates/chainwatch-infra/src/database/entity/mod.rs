//! SeaORM entities for the metering schema.

pub mod account;
pub mod api_key;
pub mod plan;
pub mod processed_event;
pub mod subscription;
pub mod usage_aggregate;
