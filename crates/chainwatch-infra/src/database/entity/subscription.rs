//! Subscription entity, one row per account.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub account_id: Uuid,
    pub plan_code: String,
    pub overage_enabled: bool,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub status: String,
    pub current_period_start: Option<DateTimeWithTimeZone>,
    pub current_period_end: Option<DateTimeWithTimeZone>,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for chainwatch_core::domain::Subscription {
    fn from(model: Model) -> Self {
        use chainwatch_core::domain::{PlanCode, SubscriptionStatus};
        Self {
            account_id: model.account_id,
            plan_code: PlanCode::parse_or_default(&model.plan_code),
            overage_enabled: model.overage_enabled,
            external_customer_id: model.external_customer_id,
            external_subscription_id: model.external_subscription_id,
            status: SubscriptionStatus::parse(&model.status)
                .unwrap_or(SubscriptionStatus::Inactive),
            current_period_start: model.current_period_start.map(Into::into),
            current_period_end: model.current_period_end.map(Into::into),
        }
    }
}
