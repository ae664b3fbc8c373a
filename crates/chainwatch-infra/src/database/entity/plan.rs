//! Plan catalog entity. Seeded by migration, read-only at runtime.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "plan_catalog")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub plan_code: String,
    pub monthly_quota: i64,
    pub per_endpoint_rpm: i32,
    pub monthly_price_cents: i64,
    pub annual_price_cents: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
