//! Billing provider seam. The core never references concrete SDK symbols;
//! adapters translate wire payloads into the neutral `BillingEvent` shape
//! consumed by the reconciler.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{PlanCode, SubscriptionStatus};
use crate::error::BillingError;

/// Checkout initiation parameters, round-tripped through provider
/// metadata so webhook events can be mapped back to the account.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub account_id: Uuid,
    pub plan_code: PlanCode,
    /// `month` or `year`.
    pub interval: String,
    pub overage_enabled: bool,
}

/// Provider-neutral checkout handle. Redirect providers populate `url`;
/// client-side providers populate `params` for the frontend widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<HashMap<String, serde_json::Value>>,
}

/// An invoice line relevant to metered reporting.
#[derive(Debug, Clone)]
pub struct InvoiceLine {
    pub price_id: String,
    pub subscription_item_id: Option<String>,
}

/// A webhook event after provider-specific decoding.
#[derive(Debug, Clone)]
pub struct BillingEvent {
    /// Provider event id, used for exactly-once processing.
    pub event_id: String,
    pub kind: BillingEventKind,
}

#[derive(Debug, Clone)]
pub enum BillingEventKind {
    /// Checkout finished. Without a subscription id this is the trial flow.
    CheckoutCompleted {
        account_id: Uuid,
        plan_code: Option<PlanCode>,
        external_customer_id: Option<String>,
        external_subscription_id: Option<String>,
    },
    /// Subscription created or updated upstream.
    SubscriptionSynced {
        external_subscription_id: String,
        account_id: Option<Uuid>,
        plan_code: Option<PlanCode>,
        overage_enabled: Option<bool>,
        status: SubscriptionStatus,
        current_period_start: Option<DateTime<Utc>>,
        current_period_end: Option<DateTime<Utc>>,
    },
    SubscriptionDeleted {
        external_subscription_id: String,
    },
    /// Invoice closed; time to report metered overage.
    InvoiceFinalized {
        external_subscription_id: Option<String>,
        lines: Vec<InvoiceLine>,
    },
    /// One-shot payment captured (order-based providers).
    PaymentCaptured {
        account_id: Uuid,
        plan_code: Option<PlanCode>,
    },
    /// Recognized but irrelevant event type.
    Ignored,
}

/// A billing provider adapter. Exactly one is selected per deployment.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Header carrying the webhook signature for this provider.
    fn signature_header(&self) -> &'static str;

    async fn create_checkout(
        &self,
        req: &CheckoutRequest,
    ) -> Result<CheckoutResponse, BillingError>;

    async fn create_portal(&self, external_customer_id: &str) -> Result<String, BillingError>;

    /// Verify the webhook signature over the raw body. Must be
    /// constant-time and side-effect free.
    fn verify_webhook(&self, signature: Option<&str>, body: &[u8]) -> Result<(), BillingError>;

    /// Decode a verified webhook body.
    fn parse_event(&self, body: &[u8]) -> Result<BillingEvent, BillingError>;
}

/// Reports a metered quantity against a provider subscription item.
/// Production adapters talk to the provider; tests substitute a recorder.
#[async_trait]
pub trait MeterReporter: Send + Sync {
    async fn report(&self, subscription_item_id: &str, quantity: u64) -> Result<(), BillingError>;
}
