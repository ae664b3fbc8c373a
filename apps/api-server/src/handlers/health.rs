//! Health, readiness, and version handlers.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "version": VERSION,
    }))
}

/// Readiness: the alert store and (when configured) the durable store
/// must answer. 503 otherwise.
pub async fn ready(state: web::Data<AppState>) -> HttpResponse {
    let mut checks = serde_json::Map::new();
    let mut healthy = true;

    match state.alerts.health().await {
        Ok(()) => {
            checks.insert("alerts".to_string(), json!("ok"));
        }
        Err(err) => {
            healthy = false;
            checks.insert("alerts".to_string(), json!(format!("error: {err}")));
        }
    }

    if let Some(db) = &state.db {
        match db.ping().await {
            Ok(()) => {
                checks.insert("durable_store".to_string(), json!("ok"));
            }
            Err(err) => {
                healthy = false;
                checks.insert("durable_store".to_string(), json!(format!("error: {err}")));
            }
        }
    }

    let body = json!({
        "status": if healthy { "ready" } else { "not_ready" },
        "timestamp": Utc::now(),
        "checks": checks,
    });
    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub async fn live(state: web::Data<AppState>) -> HttpResponse {
    let uptime = Utc::now() - state.started_at;
    HttpResponse::Ok().json(json!({
        "status": "alive",
        "timestamp": Utc::now(),
        "uptime_seconds": uptime.num_seconds(),
    }))
}

pub async fn version() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "version": VERSION,
    }))
}
