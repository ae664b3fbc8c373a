//! Metering plane schema: accounts, keys, subscriptions, plan catalog,
//! usage aggregates, and the processed-event ledger.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Accounts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Accounts::Name).text().not_null())
                    .col(ColumnDef::new(Accounts::Email).text().not_null())
                    .col(
                        ColumnDef::new(Accounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ApiKeys::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ApiKeys::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(ApiKeys::AccountId).uuid().not_null())
                    .col(ColumnDef::new(ApiKeys::KeyHash).text().not_null())
                    .col(ColumnDef::new(ApiKeys::ClientType).text().not_null())
                    .col(ColumnDef::new(ApiKeys::Status).text().not_null())
                    .col(
                        ColumnDef::new(ApiKeys::Label)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_api_keys_account")
                    .table(ApiKeys::Table)
                    .col(ApiKeys::AccountId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subscriptions::AccountId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Subscriptions::PlanCode).text().not_null())
                    .col(
                        ColumnDef::new(Subscriptions::OverageEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Subscriptions::ExternalCustomerId).text())
                    .col(ColumnDef::new(Subscriptions::ExternalSubscriptionId).text())
                    .col(ColumnDef::new(Subscriptions::Status).text().not_null())
                    .col(
                        ColumnDef::new(Subscriptions::CurrentPeriodStart)
                            .timestamp_with_time_zone(),
                    )
                    .col(ColumnDef::new(Subscriptions::CurrentPeriodEnd).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Subscriptions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_external_id")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::ExternalSubscriptionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PlanCatalog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PlanCatalog::PlanCode)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PlanCatalog::MonthlyQuota)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PlanCatalog::PerEndpointRpm)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PlanCatalog::MonthlyPriceCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PlanCatalog::AnnualPriceCents)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UsageAggregates::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(UsageAggregates::AccountId).uuid().not_null())
                    .col(ColumnDef::new(UsageAggregates::ApiKeyId).text().not_null())
                    .col(
                        ColumnDef::new(UsageAggregates::PeriodStart)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UsageAggregates::PeriodEnd)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UsageAggregates::TotalRequests)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UsageAggregates::PerEndpoint)
                            .json_binary()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(UsageAggregates::AccountId)
                            .col(UsageAggregates::ApiKeyId)
                            .col(UsageAggregates::PeriodStart)
                            .col(UsageAggregates::PeriodEnd),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ProcessedEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProcessedEvents::EventId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProcessedEvents::ProcessedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Seed the catalog with the contract plans.
        let insert = Query::insert()
            .into_table(PlanCatalog::Table)
            .columns([
                PlanCatalog::PlanCode,
                PlanCatalog::MonthlyQuota,
                PlanCatalog::PerEndpointRpm,
                PlanCatalog::MonthlyPriceCents,
                PlanCatalog::AnnualPriceCents,
            ])
            .values_panic(["lite".into(), 450_000i64.into(), 20.into(), 4_900i64.into(), 49_000i64.into()])
            .values_panic([
                "pro".into(),
                1_350_000i64.into(),
                60.into(),
                19_900i64.into(),
                199_000i64.into(),
            ])
            .on_conflict(
                OnConflict::column(PlanCatalog::PlanCode)
                    .do_nothing()
                    .to_owned(),
            )
            .to_owned();
        manager.exec_stmt(insert).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProcessedEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UsageAggregates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PlanCatalog::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ApiKeys::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Accounts {
    Table,
    Id,
    Name,
    Email,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ApiKeys {
    Table,
    Id,
    AccountId,
    KeyHash,
    ClientType,
    Status,
    Label,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    AccountId,
    PlanCode,
    OverageEnabled,
    ExternalCustomerId,
    ExternalSubscriptionId,
    Status,
    CurrentPeriodStart,
    CurrentPeriodEnd,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PlanCatalog {
    Table,
    PlanCode,
    MonthlyQuota,
    PerEndpointRpm,
    MonthlyPriceCents,
    AnnualPriceCents,
}

#[derive(DeriveIden)]
enum UsageAggregates {
    Table,
    AccountId,
    ApiKeyId,
    PeriodStart,
    PeriodEnd,
    TotalRequests,
    PerEndpoint,
}

#[derive(DeriveIden)]
enum ProcessedEvents {
    Table,
    EventId,
    ProcessedAt,
}
