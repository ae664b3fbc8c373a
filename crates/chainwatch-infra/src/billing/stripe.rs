//! Stripe adapter: checkout sessions, billing portal, webhook signature
//! verification, and metered usage records, all over the plain REST API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use chainwatch_core::domain::{PlanCode, SubscriptionStatus};
use chainwatch_core::error::BillingError;
use chainwatch_core::ports::{
    BillingEvent, BillingEventKind, BillingProvider, CheckoutRequest, CheckoutResponse,
    InvoiceLine, MeterReporter,
};

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com";
/// Maximum accepted skew between the signature timestamp and now.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, Default)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_lite_monthly: String,
    pub price_lite_annual: String,
    pub price_pro_monthly: String,
    pub price_pro_annual: String,
    pub price_overage_metered: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub portal_return_url: String,
}

pub struct StripeProvider {
    cfg: StripeConfig,
    client: reqwest::Client,
}

impl StripeProvider {
    pub fn new(cfg: StripeConfig) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BillingError::Provider(e.to_string()))?;
        Ok(Self { cfg, client })
    }

    pub fn metered_price_id(&self) -> &str {
        &self.cfg.price_overage_metered
    }

    fn price_for(&self, plan: PlanCode, interval: &str) -> Result<&str, BillingError> {
        let price = match (plan, interval) {
            (PlanCode::Lite, "year") => &self.cfg.price_lite_annual,
            (PlanCode::Lite, _) => &self.cfg.price_lite_monthly,
            (PlanCode::Pro, "year") => &self.cfg.price_pro_annual,
            (PlanCode::Pro, _) => &self.cfg.price_pro_monthly,
        };
        if price.is_empty() {
            return Err(BillingError::NotConfigured("price id for plan/interval"));
        }
        Ok(price)
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, BillingError> {
        let response = self
            .client
            .post(format!("{API_BASE}{path}"))
            .bearer_auth(&self.cfg.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Body intentionally dropped from the error: it can echo
            // request parameters.
            return Err(BillingError::Provider(format!(
                "stripe returned {status} for {path}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))
    }
}

fn form_pairs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    url: String,
}

/// Parsed `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_signature_header(header: &str) -> Option<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(hex::decode(value).ok()?),
            _ => {}
        }
    }
    Some(SignatureHeader {
        timestamp: timestamp?,
        signatures,
    })
}

fn verify_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<(), BillingError> {
    let parsed = parse_signature_header(header).ok_or(BillingError::InvalidSignature)?;
    if (now.timestamp() - parsed.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(BillingError::InvalidSignature);
    }

    for candidate in &parsed.signatures {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| BillingError::InvalidSignature)?;
        mac.update(parsed.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        if mac.verify_slice(candidate).is_ok() {
            return Ok(());
        }
    }
    Err(BillingError::InvalidSignature)
}

// Wire shapes for the handful of event objects we consume.

#[derive(Debug, Deserialize)]
struct Event {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    client_reference_id: Option<String>,
    customer: Option<String>,
    subscription: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    status: String,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    subscription: Option<String>,
    #[serde(default)]
    lines: InvoiceLines,
}

#[derive(Debug, Deserialize, Default)]
struct InvoiceLines {
    #[serde(default)]
    data: Vec<InvoiceLineObject>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLineObject {
    price: Option<PriceObject>,
    subscription_item: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceObject {
    id: String,
}

fn decode<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> Result<T, BillingError> {
    serde_json::from_value(value).map_err(|e| BillingError::Malformed(e.to_string()))
}

fn map_status(status: &str) -> SubscriptionStatus {
    match status {
        "active" => SubscriptionStatus::Active,
        "trialing" => SubscriptionStatus::Trialing,
        "past_due" => SubscriptionStatus::PastDue,
        "canceled" => SubscriptionStatus::Canceled,
        _ => SubscriptionStatus::Inactive,
    }
}

fn metadata_account(metadata: &HashMap<String, String>) -> Option<Uuid> {
    metadata.get("account_id").and_then(|v| Uuid::parse_str(v).ok())
}

fn unix_ts(seconds: Option<i64>) -> Option<DateTime<Utc>> {
    seconds.and_then(|s| Utc.timestamp_opt(s, 0).single())
}

#[async_trait]
impl BillingProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn signature_header(&self) -> &'static str {
        "Stripe-Signature"
    }

    async fn create_checkout(
        &self,
        req: &CheckoutRequest,
    ) -> Result<CheckoutResponse, BillingError> {
        let price = self.price_for(req.plan_code, &req.interval)?;
        let account_id = req.account_id.to_string();
        let overage = if req.overage_enabled { "true" } else { "false" };

        let form = form_pairs(&[
            ("mode", "subscription"),
            ("success_url", &self.cfg.checkout_success_url),
            ("cancel_url", &self.cfg.checkout_cancel_url),
            ("client_reference_id", &account_id),
            ("line_items[0][price]", price),
            ("line_items[0][quantity]", "1"),
            ("subscription_data[metadata][account_id]", &account_id),
            (
                "subscription_data[metadata][plan_code]",
                req.plan_code.as_str(),
            ),
            ("subscription_data[metadata][interval]", &req.interval),
            ("subscription_data[metadata][overage_enabled]", overage),
        ]);

        let session: SessionResponse = self.post_form("/v1/checkout/sessions", &form).await?;
        Ok(CheckoutResponse {
            provider: self.name().to_string(),
            url: Some(session.url),
            params: None,
        })
    }

    async fn create_portal(&self, external_customer_id: &str) -> Result<String, BillingError> {
        if external_customer_id.is_empty() {
            return Err(BillingError::NotConfigured("external customer id"));
        }
        let form = form_pairs(&[
            ("customer", external_customer_id),
            ("return_url", &self.cfg.portal_return_url),
        ]);
        let session: SessionResponse = self.post_form("/v1/billing_portal/sessions", &form).await?;
        Ok(session.url)
    }

    fn verify_webhook(&self, signature: Option<&str>, body: &[u8]) -> Result<(), BillingError> {
        let header = signature.ok_or(BillingError::InvalidSignature)?;
        verify_signature(&self.cfg.webhook_secret, header, body, Utc::now())
    }

    fn parse_event(&self, body: &[u8]) -> Result<BillingEvent, BillingError> {
        let event: Event =
            serde_json::from_slice(body).map_err(|e| BillingError::Malformed(e.to_string()))?;

        let kind = match event.kind.as_str() {
            "checkout.session.completed" => {
                let session: CheckoutSessionObject = decode(event.data.object)?;
                let account_id = session
                    .client_reference_id
                    .as_deref()
                    .and_then(|v| Uuid::parse_str(v).ok())
                    .or_else(|| metadata_account(&session.metadata));
                match account_id {
                    Some(account_id) => BillingEventKind::CheckoutCompleted {
                        account_id,
                        plan_code: session.metadata.get("plan_code").map(|p| PlanCode::parse_or_default(p)),
                        external_customer_id: session.customer,
                        external_subscription_id: session.subscription,
                    },
                    None => {
                        tracing::warn!(event_id = %event.id, "checkout event without account reference");
                        BillingEventKind::Ignored
                    }
                }
            }
            "customer.subscription.created" | "customer.subscription.updated" => {
                let sub: SubscriptionObject = decode(event.data.object)?;
                BillingEventKind::SubscriptionSynced {
                    account_id: metadata_account(&sub.metadata),
                    plan_code: sub.metadata.get("plan_code").map(|p| PlanCode::parse_or_default(p)),
                    overage_enabled: sub
                        .metadata
                        .get("overage_enabled")
                        .map(|v| v == "true"),
                    status: map_status(&sub.status),
                    current_period_start: unix_ts(sub.current_period_start),
                    current_period_end: unix_ts(sub.current_period_end),
                    external_subscription_id: sub.id,
                }
            }
            "customer.subscription.deleted" => {
                let sub: SubscriptionObject = decode(event.data.object)?;
                BillingEventKind::SubscriptionDeleted {
                    external_subscription_id: sub.id,
                }
            }
            "invoice.finalized" => {
                let invoice: InvoiceObject = decode(event.data.object)?;
                BillingEventKind::InvoiceFinalized {
                    external_subscription_id: invoice.subscription,
                    lines: invoice
                        .lines
                        .data
                        .into_iter()
                        .filter_map(|line| {
                            line.price.map(|price| InvoiceLine {
                                price_id: price.id,
                                subscription_item_id: line.subscription_item,
                            })
                        })
                        .collect(),
                }
            }
            _ => BillingEventKind::Ignored,
        };

        Ok(BillingEvent {
            event_id: event.id,
            kind,
        })
    }
}

/// Reports metered usage records, retrying transient failures with a
/// bounded doubling backoff.
pub struct StripeMeterReporter {
    cfg: StripeConfig,
    client: reqwest::Client,
    attempts: u32,
    base_delay: Duration,
}

impl StripeMeterReporter {
    pub fn new(cfg: StripeConfig) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BillingError::Provider(e.to_string()))?;
        Ok(Self {
            cfg,
            client,
            attempts: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    async fn post_usage_record(
        &self,
        subscription_item_id: &str,
        quantity: u64,
    ) -> Result<(), BillingError> {
        let quantity = quantity.to_string();
        let timestamp = Utc::now().timestamp().to_string();
        let form = form_pairs(&[
            ("quantity", &quantity),
            ("timestamp", &timestamp),
            ("action", "increment"),
        ]);

        let response = self
            .client
            .post(format!(
                "{API_BASE}/v1/subscription_items/{subscription_item_id}/usage_records"
            ))
            .bearer_auth(&self.cfg.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BillingError::Provider(format!(
                "usage record returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MeterReporter for StripeMeterReporter {
    async fn report(&self, subscription_item_id: &str, quantity: u64) -> Result<(), BillingError> {
        let mut delay = self.base_delay;
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match self.post_usage_record(subscription_item_id, quantity).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "meter report attempt failed");
                    last_err = Some(err);
                    if attempt < self.attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(BillingError::Provider("meter report failed".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_a_valid_signature_within_tolerance() {
        let secret = "whsec_test";
        let body = br#"{"id":"evt_1"}"#;
        let now = Utc::now();
        let header = format!("t={},v1={}", now.timestamp(), sign(secret, now.timestamp(), body));
        assert!(verify_signature(secret, &header, body, now).is_ok());
    }

    #[test]
    fn rejects_stale_timestamps_and_bad_signatures() {
        let secret = "whsec_test";
        let body = br#"{"id":"evt_1"}"#;
        let now = Utc::now();

        let stale_ts = now.timestamp() - SIGNATURE_TOLERANCE_SECS - 1;
        let stale = format!("t={},v1={}", stale_ts, sign(secret, stale_ts, body));
        assert!(matches!(
            verify_signature(secret, &stale, body, now),
            Err(BillingError::InvalidSignature)
        ));

        let wrong = format!(
            "t={},v1={}",
            now.timestamp(),
            sign("other_secret", now.timestamp(), body)
        );
        assert!(matches!(
            verify_signature(secret, &wrong, body, now),
            Err(BillingError::InvalidSignature)
        ));

        assert!(matches!(
            verify_signature(secret, "not-a-header", body, now),
            Err(BillingError::InvalidSignature)
        ));
    }

    fn provider() -> StripeProvider {
        StripeProvider::new(StripeConfig {
            price_overage_metered: "price_overage".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn parses_subscription_deleted() {
        let body = br#"{"id":"evt_1","type":"customer.subscription.deleted","data":{"object":{"id":"sub_1","status":"canceled"}}}"#;
        let event = provider().parse_event(body).unwrap();
        assert_eq!(event.event_id, "evt_1");
        assert!(matches!(
            event.kind,
            BillingEventKind::SubscriptionDeleted { external_subscription_id } if external_subscription_id == "sub_1"
        ));
    }

    #[test]
    fn parses_subscription_sync_with_metadata() {
        let account = Uuid::new_v4();
        let body = serde_json::json!({
            "id": "evt_2",
            "type": "customer.subscription.updated",
            "data": {"object": {
                "id": "sub_2",
                "status": "past_due",
                "current_period_start": 1754092800i64,
                "current_period_end": 1756771200i64,
                "metadata": {
                    "account_id": account.to_string(),
                    "plan_code": "pro",
                    "overage_enabled": "true"
                }
            }}
        });
        let event = provider()
            .parse_event(serde_json::to_vec(&body).unwrap().as_slice())
            .unwrap();
        match event.kind {
            BillingEventKind::SubscriptionSynced {
                external_subscription_id,
                account_id,
                plan_code,
                overage_enabled,
                status,
                current_period_start,
                current_period_end,
            } => {
                assert_eq!(external_subscription_id, "sub_2");
                assert_eq!(account_id, Some(account));
                assert_eq!(plan_code, Some(PlanCode::Pro));
                assert_eq!(overage_enabled, Some(true));
                assert_eq!(status, SubscriptionStatus::PastDue);
                assert!(current_period_start.is_some());
                assert!(current_period_end.is_some());
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn parses_invoice_lines_for_metering() {
        let body = br#"{
            "id": "evt_3",
            "type": "invoice.finalized",
            "data": {"object": {
                "subscription": "sub_3",
                "lines": {"data": [
                    {"price": {"id": "price_base"}, "subscription_item": "si_base"},
                    {"price": {"id": "price_overage"}, "subscription_item": "si_X"}
                ]}
            }}
        }"#;
        let event = provider().parse_event(body).unwrap();
        match event.kind {
            BillingEventKind::InvoiceFinalized {
                external_subscription_id,
                lines,
            } => {
                assert_eq!(external_subscription_id.as_deref(), Some("sub_3"));
                assert_eq!(lines.len(), 2);
                assert_eq!(lines[1].price_id, "price_overage");
                assert_eq!(lines[1].subscription_item_id.as_deref(), Some("si_X"));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let body = br#"{"id":"evt_4","type":"charge.refunded","data":{"object":{}}}"#;
        let event = provider().parse_event(body).unwrap();
        assert!(matches!(event.kind, BillingEventKind::Ignored));
    }
}
