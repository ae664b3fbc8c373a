//! Razorpay adapter: Orders API checkout and webhook activation.
//!
//! Orders are one-shot payments, so subscription lifecycle here is
//! simpler: a captured payment activates the account's plan. Amounts are
//! integer paisa throughout.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use chainwatch_core::domain::PlanCode;
use chainwatch_core::error::BillingError;
use chainwatch_core::ports::{
    BillingEvent, BillingEventKind, BillingProvider, CheckoutRequest, CheckoutResponse,
};

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.razorpay.com";

#[derive(Debug, Clone, Default)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub currency: String,
    pub amount_lite_monthly_paisa: i64,
    pub amount_lite_annual_paisa: i64,
    pub amount_pro_monthly_paisa: i64,
    pub amount_pro_annual_paisa: i64,
}

pub struct RazorpayProvider {
    cfg: RazorpayConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OrderRequest {
    amount: i64,
    currency: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    notes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    notes: HashMap<String, String>,
}

impl RazorpayProvider {
    pub fn new(cfg: RazorpayConfig) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BillingError::Provider(e.to_string()))?;
        Ok(Self { cfg, client })
    }

    fn amount_for(&self, plan: PlanCode, interval: &str) -> Result<i64, BillingError> {
        let amount = match (plan, interval) {
            (PlanCode::Lite, "year") => self.cfg.amount_lite_annual_paisa,
            (PlanCode::Lite, _) => self.cfg.amount_lite_monthly_paisa,
            (PlanCode::Pro, "year") => self.cfg.amount_pro_annual_paisa,
            (PlanCode::Pro, _) => self.cfg.amount_pro_monthly_paisa,
        };
        if amount <= 0 {
            return Err(BillingError::NotConfigured("order amount for plan/interval"));
        }
        Ok(amount)
    }

    fn currency(&self) -> String {
        if self.cfg.currency.is_empty() {
            "INR".to_string()
        } else {
            self.cfg.currency.clone()
        }
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderResponse, BillingError> {
        if self.cfg.key_id.is_empty() || self.cfg.key_secret.is_empty() {
            return Err(BillingError::NotConfigured("razorpay api keys"));
        }
        let response = self
            .client
            .post(format!("{API_BASE}/v1/orders"))
            .basic_auth(&self.cfg.key_id, Some(&self.cfg.key_secret))
            .json(order)
            .send()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BillingError::Provider(format!(
                "razorpay order returned {status}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))
    }
}

// Webhook payload shapes: entities arrive wrapped per type.

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    payload: HashMap<String, EntityWrapper>,
}

#[derive(Debug, Deserialize)]
struct EntityWrapper {
    entity: Entity,
}

#[derive(Debug, Deserialize)]
struct Entity {
    id: String,
    #[serde(default)]
    notes: HashMap<String, String>,
}

#[async_trait]
impl BillingProvider for RazorpayProvider {
    fn name(&self) -> &'static str {
        "razorpay"
    }

    fn signature_header(&self) -> &'static str {
        "X-Razorpay-Signature"
    }

    async fn create_checkout(
        &self,
        req: &CheckoutRequest,
    ) -> Result<CheckoutResponse, BillingError> {
        let amount = self.amount_for(req.plan_code, &req.interval)?;
        let mut notes = HashMap::new();
        notes.insert("account_id".to_string(), req.account_id.to_string());
        notes.insert("plan_code".to_string(), req.plan_code.as_str().to_string());
        notes.insert("interval".to_string(), req.interval.clone());

        let order = self
            .create_order(&OrderRequest {
                amount,
                currency: self.currency(),
                notes,
            })
            .await?;

        // The frontend widget needs these to open the checkout.
        let mut params: HashMap<String, serde_json::Value> = HashMap::new();
        params.insert("key".to_string(), self.cfg.key_id.clone().into());
        params.insert("amount".to_string(), order.amount.into());
        params.insert("currency".to_string(), order.currency.into());
        params.insert("order_id".to_string(), order.id.into());
        params.insert(
            "notes".to_string(),
            serde_json::to_value(&order.notes).unwrap_or_default(),
        );
        params.insert(
            "account_id".to_string(),
            req.account_id.to_string().into(),
        );

        Ok(CheckoutResponse {
            provider: self.name().to_string(),
            url: None,
            params: Some(params),
        })
    }

    async fn create_portal(&self, _external_customer_id: &str) -> Result<String, BillingError> {
        Err(BillingError::Unsupported("razorpay billing portal"))
    }

    fn verify_webhook(&self, signature: Option<&str>, body: &[u8]) -> Result<(), BillingError> {
        let signature = signature.ok_or(BillingError::InvalidSignature)?;

        let mut mac = HmacSha256::new_from_slice(self.cfg.webhook_secret.as_bytes())
            .map_err(|_| BillingError::InvalidSignature)?;
        mac.update(body);

        // The dashboard can be configured for hex or base64 digests;
        // accept either, constant-time both ways.
        if let Ok(decoded) = hex::decode(signature) {
            let mut hex_mac = HmacSha256::new_from_slice(self.cfg.webhook_secret.as_bytes())
                .map_err(|_| BillingError::InvalidSignature)?;
            hex_mac.update(body);
            if hex_mac.verify_slice(&decoded).is_ok() {
                return Ok(());
            }
        }
        if let Ok(decoded) = BASE64_STD.decode(signature) {
            if mac.verify_slice(&decoded).is_ok() {
                return Ok(());
            }
        }
        Err(BillingError::InvalidSignature)
    }

    fn parse_event(&self, body: &[u8]) -> Result<BillingEvent, BillingError> {
        let envelope: WebhookEnvelope =
            serde_json::from_slice(body).map_err(|e| BillingError::Malformed(e.to_string()))?;

        let entity_for = |kind: &str| envelope.payload.get(kind).map(|w| &w.entity);

        let (event_id, kind) = match envelope.event.as_str() {
            "payment.captured" | "order.paid" => {
                let wrapper_key = if envelope.event == "payment.captured" {
                    "payment"
                } else {
                    "order"
                };
                let Some(entity) = entity_for(wrapper_key) else {
                    return Err(BillingError::Malformed(format!(
                        "{} event without {wrapper_key} entity",
                        envelope.event
                    )));
                };
                let account_id = entity
                    .notes
                    .get("account_id")
                    .and_then(|v| Uuid::parse_str(v).ok());
                let kind = match account_id {
                    Some(account_id) => BillingEventKind::PaymentCaptured {
                        account_id,
                        plan_code: entity
                            .notes
                            .get("plan_code")
                            .map(|p| PlanCode::parse_or_default(p)),
                    },
                    None => {
                        tracing::warn!(event = %envelope.event, "payment without account note");
                        BillingEventKind::Ignored
                    }
                };
                (format!("razorpay:{}:{}", envelope.event, entity.id), kind)
            }
            other => {
                // Stable synthetic id so replays of ignored events also
                // dedupe instead of reprocessing.
                let entity_id = envelope
                    .payload
                    .values()
                    .next()
                    .map(|w| w.entity.id.as_str())
                    .unwrap_or("none");
                (
                    format!("razorpay:{other}:{entity_id}"),
                    BillingEventKind::Ignored,
                )
            }
        };

        Ok(BillingEvent { event_id, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> RazorpayProvider {
        RazorpayProvider::new(RazorpayConfig {
            webhook_secret: "rzp_whsec".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn sign_hex(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn verifies_hex_body_signature() {
        let p = provider();
        let body = br#"{"event":"payment.captured"}"#;
        let sig = sign_hex("rzp_whsec", body);
        assert!(p.verify_webhook(Some(&sig), body).is_ok());
        assert!(p.verify_webhook(Some("deadbeef"), body).is_err());
        assert!(p.verify_webhook(None, body).is_err());
    }

    #[test]
    fn payment_captured_maps_to_activation() {
        let account = Uuid::new_v4();
        let body = serde_json::json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {
                "id": "pay_123",
                "notes": {"account_id": account.to_string(), "plan_code": "pro"}
            }}}
        });
        let event = provider()
            .parse_event(serde_json::to_vec(&body).unwrap().as_slice())
            .unwrap();
        assert_eq!(event.event_id, "razorpay:payment.captured:pay_123");
        match event.kind {
            BillingEventKind::PaymentCaptured {
                account_id,
                plan_code,
            } => {
                assert_eq!(account_id, account);
                assert_eq!(plan_code, Some(PlanCode::Pro));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn unrelated_events_are_ignored_with_stable_ids() {
        let body = serde_json::json!({
            "event": "refund.processed",
            "payload": {"refund": {"entity": {"id": "rfnd_9"}}}
        });
        let event = provider()
            .parse_event(serde_json::to_vec(&body).unwrap().as_slice())
            .unwrap();
        assert_eq!(event.event_id, "razorpay:refund.processed:rfnd_9");
        assert!(matches!(event.kind, BillingEventKind::Ignored));
    }
}
