//! Billing reconciliation: the webhook-driven subscription state machine
//! plus metered overage reporting at invoice finalization.
//!
//! The event id is recorded before any mutation; a redelivered event sees
//! the conflict and becomes an idempotent no-op. The mutations themselves
//! are upserts, so the machine is safe under at-least-once delivery.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{PlanCatalog, PlanCode, SubscriptionSync};
use crate::error::BillingError;
use crate::ports::{
    ApiKeyRepository, BillingEvent, BillingEventKind, CounterStore, MeterReporter,
    ProcessedEventRepository, SubscriptionRepository,
};

/// What the reconciler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    /// Replay of an event id we have already seen.
    AlreadyProcessed,
}

pub struct BillingReconciler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    keys: Arc<dyn ApiKeyRepository>,
    events: Arc<dyn ProcessedEventRepository>,
    counters: Arc<dyn CounterStore>,
    meter: Arc<dyn MeterReporter>,
    plans: PlanCatalog,
    /// Price id of the metered overage line on provider invoices.
    metered_price_id: String,
}

impl BillingReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        keys: Arc<dyn ApiKeyRepository>,
        events: Arc<dyn ProcessedEventRepository>,
        counters: Arc<dyn CounterStore>,
        meter: Arc<dyn MeterReporter>,
        plans: PlanCatalog,
        metered_price_id: String,
    ) -> Self {
        Self {
            subscriptions,
            keys,
            events,
            counters,
            meter,
            plans,
            metered_price_id,
        }
    }

    /// Apply one verified, decoded webhook event.
    pub async fn process(
        &self,
        event: BillingEvent,
        now: DateTime<Utc>,
    ) -> Result<Outcome, BillingError> {
        if !self.events.insert_once(&event.event_id).await? {
            tracing::debug!(event_id = %event.event_id, "webhook replay, skipping");
            return Ok(Outcome::AlreadyProcessed);
        }

        match event.kind {
            BillingEventKind::CheckoutCompleted {
                account_id,
                plan_code,
                external_customer_id,
                external_subscription_id,
            } => match (external_customer_id, external_subscription_id) {
                (Some(customer), Some(subscription)) => {
                    self.subscriptions
                        .record_checkout(account_id, &customer, &subscription)
                        .await?;
                }
                _ => {
                    // Trial flow: checkout closed without a subscription.
                    self.subscriptions
                        .ensure_trial(account_id, plan_code.unwrap_or(PlanCode::Lite))
                        .await?;
                }
            },
            BillingEventKind::SubscriptionSynced {
                external_subscription_id,
                account_id,
                plan_code,
                overage_enabled,
                status,
                current_period_start,
                current_period_end,
            } => {
                self.subscriptions
                    .sync_from_provider(SubscriptionSync {
                        external_subscription_id,
                        account_id,
                        plan_code,
                        overage_enabled,
                        status,
                        current_period_start,
                        current_period_end,
                    })
                    .await?;
            }
            BillingEventKind::SubscriptionDeleted {
                external_subscription_id,
            } => {
                self.subscriptions
                    .cancel_by_external_id(&external_subscription_id)
                    .await?;
            }
            BillingEventKind::InvoiceFinalized {
                external_subscription_id,
                lines,
            } => {
                self.report_overage(external_subscription_id.as_deref(), &lines, now)
                    .await?;
            }
            BillingEventKind::PaymentCaptured {
                account_id,
                plan_code,
            } => {
                self.subscriptions
                    .activate(account_id, plan_code.unwrap_or(PlanCode::Lite))
                    .await?;
            }
            BillingEventKind::Ignored => {}
        }

        Ok(Outcome::Processed)
    }

    /// Invoice-finalization path: sum current-period usage across the
    /// account's active keys and report units beyond the plan quota to the
    /// metered subscription item. Exactly one report per invoice; the
    /// event-id dedup above guarantees it.
    async fn report_overage(
        &self,
        external_subscription_id: Option<&str>,
        lines: &[crate::ports::InvoiceLine],
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        let Some(subscription_id) = external_subscription_id else {
            return Ok(());
        };
        let Some(subscription) = self
            .subscriptions
            .find_by_external_id(subscription_id)
            .await?
        else {
            tracing::warn!(subscription_id, "invoice for unknown subscription");
            return Ok(());
        };
        if !subscription.overage_enabled {
            return Ok(());
        }

        let key_ids = self
            .keys
            .list_active_ids(subscription.account_id)
            .await?;
        let total = self.counters.sum_monthly(&key_ids, now).await?;
        let quota = self.plans.limits(subscription.plan_code).monthly_quota;
        let overage_units = total.saturating_sub(quota);
        if overage_units == 0 {
            return Ok(());
        }

        let Some(item_id) = lines
            .iter()
            .find(|line| line.price_id == self.metered_price_id)
            .and_then(|line| line.subscription_item_id.as_deref())
        else {
            tracing::warn!(
                subscription_id,
                "overage due but no metered line on the invoice"
            );
            return Ok(());
        };

        self.meter.report(item_id, overage_units).await?;
        tracing::info!(
            subscription_id,
            item_id,
            overage_units,
            "reported metered overage"
        );
        Ok(())
    }
}
