//! Billing handlers: checkout/portal session initiation and the provider
//! webhook.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;

use chainwatch_core::domain::PlanCode;
use chainwatch_core::ports::CheckoutRequest;
use chainwatch_shared::dto::{CheckoutSessionRequest, PortalSessionResponse};

use crate::middleware::auth::Authed;
use crate::middleware::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn create_checkout_session(
    state: web::Data<AppState>,
    Authed(principal): Authed,
    body: web::Json<CheckoutSessionRequest>,
) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    let plan_code = PlanCode::parse(&body.plan_code)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid plan_code: {}", body.plan_code)))?;
    let interval = body.interval.unwrap_or_else(|| "month".to_string());
    if interval != "month" && interval != "year" {
        return Err(ApiError::BadRequest(format!("invalid interval: {interval}")));
    }

    let provider = state
        .provider
        .as_ref()
        .ok_or_else(|| ApiError::Internal("billing provider not configured".to_string()))?;

    let checkout = provider
        .create_checkout(&CheckoutRequest {
            account_id: principal.account_id,
            plan_code,
            interval,
            overage_enabled: body.overage_enabled,
        })
        .await?;

    Ok(HttpResponse::Ok().json(checkout))
}

pub async fn create_portal_session(
    state: web::Data<AppState>,
    Authed(principal): Authed,
) -> ApiResult<HttpResponse> {
    let repos = state
        .repos
        .as_ref()
        .ok_or_else(|| ApiError::Internal("durable store not configured".to_string()))?;
    let provider = state
        .provider
        .as_ref()
        .ok_or_else(|| ApiError::Internal("billing provider not configured".to_string()))?;

    let subscription = repos
        .subscriptions
        .find_entitled(principal.account_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("no active subscription".to_string()))?;
    let customer_id = subscription
        .external_customer_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("no billing customer on file".to_string()))?;

    let url = provider.create_portal(&customer_id).await?;
    Ok(HttpResponse::Ok().json(PortalSessionResponse { url }))
}

/// Provider webhook. Signature failures and undecodable payloads are a
/// 400 with no side effects; a failed mutation is also a 400 so the
/// provider redelivers, and the event-id ledger makes redelivery safe.
pub async fn webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let provider = state
        .provider
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("billing provider not configured".to_string()))?;
    let reconciler = state
        .reconciler
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("billing not available".to_string()))?;

    let signature = req
        .headers()
        .get(provider.signature_header())
        .and_then(|v| v.to_str().ok());
    provider.verify_webhook(signature, &body)?;

    let event = provider.parse_event(&body)?;
    let event_id = event.event_id.clone();
    let outcome = reconciler.process(event, Utc::now()).await.map_err(|err| {
        tracing::error!(event_id = %event_id, error = %err, "webhook processing failed");
        ApiError::BadRequest("webhook not processed".to_string())
    })?;

    tracing::debug!(event_id = %event_id, ?outcome, "webhook handled");
    Ok(HttpResponse::Ok().json(serde_json::json!({ "received": true })))
}
