//! Account visibility handlers: principal echo, limits, and usage.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use chainwatch_core::domain::Period;
use chainwatch_shared::dto::{
    LimitsResponse, MeResponse, TimeseriesResponse, UsageBucket, UsageResponse,
};

use crate::middleware::auth::Authed;
use crate::middleware::error::ApiResult;
use crate::state::AppState;

pub async fn me(Authed(principal): Authed) -> ApiResult<HttpResponse> {
    let period = Period::containing(Utc::now());
    Ok(HttpResponse::Ok().json(MeResponse {
        account_id: principal.account_id,
        api_key_id: principal.api_key_id,
        plan: principal.plan.as_str().to_string(),
        client_type: principal.client_type.as_str().to_string(),
        overage_enabled: principal.overage_enabled,
        period_start: period.start,
        period_end: period.end,
    }))
}

pub async fn limits(state: web::Data<AppState>, Authed(principal): Authed) -> ApiResult<HttpResponse> {
    let limits = state.gate.plan_limits(principal.plan);
    Ok(HttpResponse::Ok().json(LimitsResponse {
        plan: principal.plan.as_str().to_string(),
        per_endpoint_rpm: limits.per_endpoint_rpm,
        monthly_quota: limits.monthly_quota,
    }))
}

pub async fn usage(state: web::Data<AppState>, Authed(principal): Authed) -> ApiResult<HttpResponse> {
    let now = Utc::now();
    let period = Period::containing(now);
    let total = state.counters.monthly_total(&principal.api_key_id, now).await?;
    let per_endpoint = state.counters.endpoint_usage(&principal.api_key_id, now).await?;

    Ok(HttpResponse::Ok().json(UsageResponse {
        account_id: principal.account_id,
        period_start: period.start,
        period_end: period.end,
        total,
        per_endpoint,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TimeseriesParams {
    bucket: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

/// Bucketed usage totals. Aggregates are kept per calendar period, not per
/// hour, so the buckets are a zero-filled skeleton clients can render
/// while finer-grained storage does not exist.
pub async fn usage_timeseries(
    params: web::Query<TimeseriesParams>,
    _authed: Authed,
) -> ApiResult<HttpResponse> {
    let bucket = match params.bucket.as_deref() {
        Some("hour") => "hour",
        _ => "day",
    };
    let step = if bucket == "hour" {
        Duration::hours(1)
    } else {
        Duration::days(1)
    };

    let end = parse_ts(params.end.as_deref()).unwrap_or_else(Utc::now);
    let start = parse_ts(params.start.as_deref()).unwrap_or_else(|| end - Duration::days(7));

    let mut data = Vec::new();
    let mut ts = start;
    while ts <= end && data.len() < 10_000 {
        data.push(UsageBucket { ts, total: 0 });
        ts += step;
    }

    Ok(HttpResponse::Ok().json(TimeseriesResponse {
        bucket: bucket.to_string(),
        start,
        end,
        data,
    }))
}

fn parse_ts(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|ts| ts.to_utc())
}
