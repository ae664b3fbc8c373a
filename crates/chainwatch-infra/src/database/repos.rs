//! PostgreSQL repository implementations over sea-orm.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DbConn, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use chainwatch_core::domain::{
    Account, ApiKey, ApiKeyStatus, ClientType, NewApiKey, PlanCatalog, PlanCode, PlanEntry,
    PlanLimits, Subscription, SubscriptionStatus, SubscriptionSync, UsageAggregate,
};
use chainwatch_core::error::RepoError;
use chainwatch_core::ports::{
    AccountRepository, AccountUsageSummary, ApiKeyRepository, KeyAuth, ProcessedEventRepository,
    SubscriptionChecker, SubscriptionRepository, UsageRepository,
};

use super::entity::{account, api_key, plan, processed_event, subscription, usage_aggregate};

fn map_err(err: DbErr) -> RepoError {
    let text = err.to_string();
    if text.contains("duplicate") || text.contains("unique") {
        RepoError::Constraint(text)
    } else {
        RepoError::Query(text)
    }
}

const ENTITLED_STATUSES: [&str; 2] = ["active", "trialing"];

// ---------------------------------------------------------------- accounts

pub struct PgAccountRepository {
    db: DbConn,
}

impl PgAccountRepository {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn create(&self, name: &str, email: &str) -> Result<Account, RepoError> {
        let now = Utc::now();
        let model = account::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(email.to_string()),
            created_at: Set(now.into()),
        };
        let inserted = model.insert(&self.db).await.map_err(map_err)?;
        Ok(inserted.into())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Account>, RepoError> {
        let found = account::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(map_err)?;
        Ok(found.map(Into::into))
    }
}

// ---------------------------------------------------------------- api keys

pub struct PgApiKeyRepository {
    db: DbConn,
}

impl PgApiKeyRepository {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

fn key_model_to_domain(model: api_key::Model) -> ApiKey {
    ApiKey {
        id: model.id,
        account_id: model.account_id,
        client_type: ClientType::parse(&model.client_type).unwrap_or(ClientType::Human),
        status: ApiKeyStatus::parse(&model.status).unwrap_or(ApiKeyStatus::Revoked),
        label: model.label,
        created_at: model.created_at.into(),
    }
}

#[async_trait]
impl ApiKeyRepository for PgApiKeyRepository {
    async fn find_active_auth(&self, key_id: &str) -> Result<Option<KeyAuth>, RepoError> {
        let found = api_key::Entity::find_by_id(key_id)
            .filter(api_key::Column::Status.eq(ApiKeyStatus::Active.as_str()))
            .one(&self.db)
            .await
            .map_err(map_err)?;
        Ok(found.map(|model| KeyAuth {
            account_id: model.account_id,
            client_type: ClientType::parse(&model.client_type).unwrap_or(ClientType::Human),
            key_hash: model.key_hash,
            key_id: model.id,
        }))
    }

    async fn insert(&self, key: NewApiKey) -> Result<(), RepoError> {
        let model = api_key::ActiveModel {
            id: Set(key.id),
            account_id: Set(key.account_id),
            key_hash: Set(key.key_hash),
            client_type: Set(key.client_type.as_str().to_string()),
            status: Set(ApiKeyStatus::Active.as_str().to_string()),
            label: Set(key.label),
            created_at: Set(Utc::now().into()),
        };
        model.insert(&self.db).await.map_err(map_err)?;
        Ok(())
    }

    async fn revoke(&self, key_id: &str) -> Result<bool, RepoError> {
        let result = api_key::Entity::update_many()
            .col_expr(
                api_key::Column::Status,
                Expr::value(ApiKeyStatus::Revoked.as_str()),
            )
            .filter(api_key::Column::Id.eq(key_id))
            .exec(&self.db)
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected > 0)
    }

    async fn list_for_account(&self, account_id: Uuid) -> Result<Vec<ApiKey>, RepoError> {
        let rows = api_key::Entity::find()
            .filter(api_key::Column::AccountId.eq(account_id))
            .order_by_asc(api_key::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(map_err)?;
        Ok(rows.into_iter().map(key_model_to_domain).collect())
    }

    async fn list_active_ids(&self, account_id: Uuid) -> Result<Vec<String>, RepoError> {
        api_key::Entity::find()
            .select_only()
            .column(api_key::Column::Id)
            .filter(api_key::Column::AccountId.eq(account_id))
            .filter(api_key::Column::Status.eq(ApiKeyStatus::Active.as_str()))
            .into_tuple::<String>()
            .all(&self.db)
            .await
            .map_err(map_err)
    }

    async fn list_all_active(&self) -> Result<Vec<(Uuid, String)>, RepoError> {
        api_key::Entity::find()
            .select_only()
            .column(api_key::Column::AccountId)
            .column(api_key::Column::Id)
            .filter(api_key::Column::Status.eq(ApiKeyStatus::Active.as_str()))
            .into_tuple::<(Uuid, String)>()
            .all(&self.db)
            .await
            .map_err(map_err)
    }
}

// ----------------------------------------------------------- subscriptions

pub struct PgSubscriptionRepository {
    db: DbConn,
}

impl PgSubscriptionRepository {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn find_entitled(&self, account_id: Uuid) -> Result<Option<Subscription>, RepoError> {
        let found = subscription::Entity::find_by_id(account_id)
            .filter(subscription::Column::Status.is_in(ENTITLED_STATUSES))
            .one(&self.db)
            .await
            .map_err(map_err)?;
        Ok(found.map(Into::into))
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Subscription>, RepoError> {
        let found = subscription::Entity::find()
            .filter(subscription::Column::ExternalSubscriptionId.eq(external_id))
            .one(&self.db)
            .await
            .map_err(map_err)?;
        Ok(found.map(Into::into))
    }

    async fn ensure_trial(&self, account_id: Uuid, plan_code: PlanCode) -> Result<(), RepoError> {
        let model = subscription::ActiveModel {
            account_id: Set(account_id),
            plan_code: Set(plan_code.as_str().to_string()),
            overage_enabled: Set(false),
            external_customer_id: Set(None),
            external_subscription_id: Set(None),
            status: Set(SubscriptionStatus::Trialing.as_str().to_string()),
            current_period_start: Set(None),
            current_period_end: Set(None),
            updated_at: Set(Utc::now().into()),
        };
        let insert = subscription::Entity::insert(model)
            .on_conflict(
                OnConflict::column(subscription::Column::AccountId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.db)
            .await;
        match insert {
            Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
            Err(err) => Err(map_err(err)),
        }
    }

    async fn record_checkout(
        &self,
        account_id: Uuid,
        external_customer_id: &str,
        external_subscription_id: &str,
    ) -> Result<(), RepoError> {
        let model = subscription::ActiveModel {
            account_id: Set(account_id),
            plan_code: Set(PlanCode::Lite.as_str().to_string()),
            overage_enabled: Set(false),
            external_customer_id: Set(Some(external_customer_id.to_string())),
            external_subscription_id: Set(Some(external_subscription_id.to_string())),
            status: Set(SubscriptionStatus::Active.as_str().to_string()),
            current_period_start: Set(None),
            current_period_end: Set(None),
            updated_at: Set(Utc::now().into()),
        };
        subscription::Entity::insert(model)
            .on_conflict(
                OnConflict::column(subscription::Column::AccountId)
                    .update_columns([
                        subscription::Column::ExternalCustomerId,
                        subscription::Column::ExternalSubscriptionId,
                        subscription::Column::Status,
                        subscription::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn sync_from_provider(&self, sync: SubscriptionSync) -> Result<(), RepoError> {
        // Match by external id first, falling back to the account id from
        // checkout metadata for rows created before the provider assigned
        // a subscription id.
        let mut matcher = Condition::any().add(
            subscription::Column::ExternalSubscriptionId.eq(sync.external_subscription_id.as_str()),
        );
        if let Some(account_id) = sync.account_id {
            matcher = matcher.add(subscription::Column::AccountId.eq(account_id));
        }

        let mut update = subscription::Entity::update_many()
            .col_expr(
                subscription::Column::ExternalSubscriptionId,
                Expr::value(sync.external_subscription_id.clone()),
            )
            .col_expr(subscription::Column::Status, Expr::value(sync.status.as_str()))
            .col_expr(subscription::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(plan) = sync.plan_code {
            update = update.col_expr(subscription::Column::PlanCode, Expr::value(plan.as_str()));
        }
        if let Some(overage) = sync.overage_enabled {
            update = update.col_expr(subscription::Column::OverageEnabled, Expr::value(overage));
        }
        if let Some(start) = sync.current_period_start {
            update = update.col_expr(subscription::Column::CurrentPeriodStart, Expr::value(start));
        }
        if let Some(end) = sync.current_period_end {
            update = update.col_expr(subscription::Column::CurrentPeriodEnd, Expr::value(end));
        }

        let result = update.filter(matcher).exec(&self.db).await.map_err(map_err)?;
        if result.rows_affected > 0 {
            return Ok(());
        }

        // Nothing to update: create the row when metadata tells us whose
        // subscription this is.
        let Some(account_id) = sync.account_id else {
            tracing::warn!(
                external_subscription_id = %sync.external_subscription_id,
                "subscription event matched no account"
            );
            return Ok(());
        };
        let model = subscription::ActiveModel {
            account_id: Set(account_id),
            plan_code: Set(sync.plan_code.unwrap_or(PlanCode::Lite).as_str().to_string()),
            overage_enabled: Set(sync.overage_enabled.unwrap_or(false)),
            external_customer_id: Set(None),
            external_subscription_id: Set(Some(sync.external_subscription_id)),
            status: Set(sync.status.as_str().to_string()),
            current_period_start: Set(sync.current_period_start.map(Into::into)),
            current_period_end: Set(sync.current_period_end.map(Into::into)),
            updated_at: Set(Utc::now().into()),
        };
        model.insert(&self.db).await.map_err(map_err)?;
        Ok(())
    }

    async fn cancel_by_external_id(&self, external_id: &str) -> Result<(), RepoError> {
        subscription::Entity::update_many()
            .col_expr(
                subscription::Column::Status,
                Expr::value(SubscriptionStatus::Canceled.as_str()),
            )
            .col_expr(subscription::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(subscription::Column::ExternalSubscriptionId.eq(external_id))
            .exec(&self.db)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn activate(&self, account_id: Uuid, plan_code: PlanCode) -> Result<(), RepoError> {
        let model = subscription::ActiveModel {
            account_id: Set(account_id),
            plan_code: Set(plan_code.as_str().to_string()),
            overage_enabled: Set(false),
            external_customer_id: Set(None),
            external_subscription_id: Set(None),
            status: Set(SubscriptionStatus::Active.as_str().to_string()),
            current_period_start: Set(None),
            current_period_end: Set(None),
            updated_at: Set(Utc::now().into()),
        };
        subscription::Entity::insert(model)
            .on_conflict(
                OnConflict::column(subscription::Column::AccountId)
                    .update_columns([
                        subscription::Column::PlanCode,
                        subscription::Column::Status,
                        subscription::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(map_err)?;
        Ok(())
    }
}

/// Entitlement check backed by the subscriptions table. Errors read as "no
/// subscription", which keeps the trial cap applied rather than bypassed.
pub struct DbSubscriptionChecker {
    db: DbConn,
}

impl DbSubscriptionChecker {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriptionChecker for DbSubscriptionChecker {
    async fn is_entitled(&self, account_id: Uuid) -> bool {
        let found = subscription::Entity::find_by_id(account_id)
            .filter(subscription::Column::Status.is_in(ENTITLED_STATUSES))
            .one(&self.db)
            .await;
        match found {
            Ok(row) => row.is_some(),
            Err(err) => {
                tracing::warn!(error = %err, "subscription check failed");
                false
            }
        }
    }
}

// ------------------------------------------------------------------ usage

pub struct PgUsageRepository {
    db: DbConn,
}

impl PgUsageRepository {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsageRepository for PgUsageRepository {
    async fn upsert(&self, aggregate: &UsageAggregate) -> Result<(), RepoError> {
        let model = usage_aggregate::ActiveModel {
            account_id: Set(aggregate.account_id),
            api_key_id: Set(aggregate.api_key_id.clone()),
            period_start: Set(aggregate.period_start.into()),
            period_end: Set(aggregate.period_end.into()),
            total_requests: Set(aggregate.total_requests as i64),
            per_endpoint: Set(serde_json::to_value(&aggregate.per_endpoint)
                .map_err(|e| RepoError::Query(e.to_string()))?),
        };
        usage_aggregate::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    usage_aggregate::Column::AccountId,
                    usage_aggregate::Column::ApiKeyId,
                    usage_aggregate::Column::PeriodStart,
                    usage_aggregate::Column::PeriodEnd,
                ])
                .update_columns([
                    usage_aggregate::Column::TotalRequests,
                    usage_aggregate::Column::PerEndpoint,
                ])
                .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn account_summaries(
        &self,
        period_start: DateTime<Utc>,
    ) -> Result<Vec<AccountUsageSummary>, RepoError> {
        let rows = usage_aggregate::Entity::find()
            .filter(usage_aggregate::Column::PeriodStart.eq(period_start))
            .all(&self.db)
            .await
            .map_err(map_err)?;

        let mut by_account: std::collections::HashMap<Uuid, u64> = std::collections::HashMap::new();
        for row in rows {
            *by_account.entry(row.account_id).or_insert(0) += row.total_requests.max(0) as u64;
        }
        let mut summaries: Vec<AccountUsageSummary> = by_account
            .into_iter()
            .map(|(account_id, total_requests)| AccountUsageSummary {
                account_id,
                total_requests,
            })
            .collect();
        summaries.sort_by(|a, b| b.total_requests.cmp(&a.total_requests));
        Ok(summaries)
    }
}

// ----------------------------------------------------------------- events

pub struct PgProcessedEventRepository {
    db: DbConn,
}

impl PgProcessedEventRepository {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProcessedEventRepository for PgProcessedEventRepository {
    async fn insert_once(&self, event_id: &str) -> Result<bool, RepoError> {
        let model = processed_event::ActiveModel {
            event_id: Set(event_id.to_string()),
            processed_at: Set(Utc::now().into()),
        };
        let insert = processed_event::Entity::insert(model)
            .on_conflict(
                OnConflict::column(processed_event::Column::EventId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.db)
            .await;
        match insert {
            Ok(_) => Ok(true),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(err) => Err(map_err(err)),
        }
    }
}

// ------------------------------------------------------------------ plans

/// Load the seeded plan catalog, falling back to the built-in defaults for
/// any missing row.
pub async fn fetch_plan_catalog(db: &DbConn) -> Result<PlanCatalog, RepoError> {
    let rows = plan::Entity::find().all(db).await.map_err(map_err)?;
    let defaults = PlanCatalog::default();
    let mut lite = *defaults.entry(PlanCode::Lite);
    let mut pro = *defaults.entry(PlanCode::Pro);
    for row in rows {
        let entry = PlanEntry {
            limits: PlanLimits {
                per_endpoint_rpm: row.per_endpoint_rpm.max(0) as u64,
                monthly_quota: row.monthly_quota.max(0) as u64,
            },
            monthly_price_cents: row.monthly_price_cents,
            annual_price_cents: row.annual_price_cents,
        };
        match PlanCode::parse(&row.plan_code) {
            Some(PlanCode::Lite) => lite = entry,
            Some(PlanCode::Pro) => pro = entry,
            None => tracing::warn!(plan_code = %row.plan_code, "unknown plan row ignored"),
        }
    }
    Ok(PlanCatalog::new(lite, pro))
}
