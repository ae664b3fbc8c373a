//! Admin handlers, guarded by the shared admin secret.

use actix_web::{web, FromRequest, HttpRequest, HttpResponse};
use chrono::Utc;
use std::future::{ready, Ready};
use uuid::Uuid;

use chainwatch_core::domain::{ClientType, NewApiKey, Period};
use chainwatch_infra::auth::generate_api_key;
use chainwatch_shared::dto::{
    CreateAccountRequest, CreateAccountResponse, KeySummary, MintKeyRequest, MintKeyResponse,
    RevokeKeyResponse,
};

use crate::middleware::error::{ApiError, ApiResult};
use crate::state::AppState;

const ADMIN_SECRET_HEADER: &str = "X-Admin-Secret";

/// Extractor proving the request carried the admin secret. Deployments
/// without a configured secret refuse every admin call.
pub struct AdminGuard;

impl FromRequest for AdminGuard {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>();
        let outcome = match state.and_then(|s| s.config.admin_secret.as_deref()) {
            None => Err(ApiError::Forbidden("admin not configured".to_string())),
            Some(secret) => {
                let presented = req
                    .headers()
                    .get(ADMIN_SECRET_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if presented == secret {
                    Ok(AdminGuard)
                } else {
                    Err(ApiError::Forbidden("forbidden".to_string()))
                }
            }
        };
        ready(outcome)
    }
}

pub async fn create_account(
    state: web::Data<AppState>,
    _guard: AdminGuard,
    body: web::Json<CreateAccountRequest>,
) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    if body.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    let repos = state
        .repos
        .as_ref()
        .ok_or_else(|| ApiError::Internal("durable store not configured".to_string()))?;

    let account = repos.accounts.create(&body.name, &body.email).await?;
    Ok(HttpResponse::Created().json(CreateAccountResponse {
        account_id: account.id,
    }))
}

pub async fn mint_key(
    state: web::Data<AppState>,
    _guard: AdminGuard,
    path: web::Path<Uuid>,
    body: web::Json<MintKeyRequest>,
) -> ApiResult<HttpResponse> {
    let account_id = path.into_inner();
    let body = body.into_inner();
    let client_type = ClientType::parse(&body.client_type)
        .ok_or_else(|| ApiError::BadRequest("client_type must be agent or human".to_string()))?;
    let repos = state
        .repos
        .as_ref()
        .ok_or_else(|| ApiError::Internal("durable store not configured".to_string()))?;

    let minted = generate_api_key(&state.config.auth.key_env, state.hasher.as_ref())?;
    repos
        .keys
        .insert(NewApiKey {
            id: minted.key_id.clone(),
            account_id,
            client_type,
            label: body.label,
            key_hash: minted.secret_hash,
        })
        .await?;

    Ok(HttpResponse::Created().json(MintKeyResponse {
        api_key: minted.raw_key,
        key_id: minted.key_id,
    }))
}

pub async fn list_keys(
    state: web::Data<AppState>,
    _guard: AdminGuard,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let repos = state
        .repos
        .as_ref()
        .ok_or_else(|| ApiError::Internal("durable store not configured".to_string()))?;

    let keys = repos.keys.list_for_account(path.into_inner()).await?;
    let summaries: Vec<KeySummary> = keys
        .into_iter()
        .map(|key| KeySummary {
            key_id: key.id,
            client_type: key.client_type.as_str().to_string(),
            status: key.status.as_str().to_string(),
            label: key.label,
            created_at: key.created_at,
        })
        .collect();
    Ok(HttpResponse::Ok().json(summaries))
}

pub async fn revoke_key(
    state: web::Data<AppState>,
    _guard: AdminGuard,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let key_id = path.into_inner();
    let repos = state
        .repos
        .as_ref()
        .ok_or_else(|| ApiError::Internal("durable store not configured".to_string()))?;

    let revoked = repos.keys.revoke(&key_id).await?;
    if !revoked {
        tracing::warn!(key_id, "revoke on unknown key id");
    }
    Ok(HttpResponse::Ok().json(RevokeKeyResponse {
        status: "revoked".to_string(),
        key_id,
    }))
}

pub async fn usage_summary(
    state: web::Data<AppState>,
    _guard: AdminGuard,
) -> ApiResult<HttpResponse> {
    let repos = state
        .repos
        .as_ref()
        .ok_or_else(|| ApiError::Internal("durable store not configured".to_string()))?;

    let period = Period::containing(Utc::now());
    let summaries = repos.usage.account_summaries(period.start).await?;
    let total_usage: u64 = summaries.iter().map(|s| s.total_requests).sum();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "period_start": period.start,
        "period_end": period.end,
        "total_accounts": summaries.len(),
        "total_usage": total_usage,
        "by_account": summaries,
    })))
}
