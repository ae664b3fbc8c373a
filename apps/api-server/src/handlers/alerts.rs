//! Alert feed handlers - the metered surface.

use actix_web::{web, HttpResponse};
use chrono::DateTime;

use chainwatch_core::domain::AlertQuery;

use crate::middleware::auth::Authed;
use crate::middleware::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_LIMIT: usize = 1000;

/// Parse the repeated-parameter filter set. Unknown parameters are
/// ignored; malformed values are a 400.
fn parse_query(pairs: &[(String, String)]) -> Result<AlertQuery, ApiError> {
    let mut query = AlertQuery::default();
    for (key, value) in pairs {
        match key.as_str() {
            "limit" => {
                let limit: usize = value
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("invalid limit: {value}")))?;
                if limit > MAX_LIMIT {
                    return Err(ApiError::BadRequest(format!(
                        "limit must be between 0 and {MAX_LIMIT}"
                    )));
                }
                query.limit = limit;
            }
            "offset" => {
                query.offset = value
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("invalid offset: {value}")))?;
            }
            "since" => {
                let ts = DateTime::parse_from_rfc3339(value)
                    .map_err(|_| ApiError::BadRequest(format!("invalid since format: {value}")))?;
                query.since = Some(ts.to_utc());
            }
            "until" => {
                let ts = DateTime::parse_from_rfc3339(value)
                    .map_err(|_| ApiError::BadRequest(format!("invalid until format: {value}")))?;
                query.until = Some(ts.to_utc());
            }
            "source" => query.sources.push(value.clone()),
            "severity" => query.severities.push(value.clone()),
            "disruption" => query.disruptions.push(value.clone()),
            "region" => query.regions.push(value.clone()),
            "country" => query.countries.push(value.clone()),
            _ => {}
        }
    }
    Ok(query)
}

pub async fn list_alerts(
    state: web::Data<AppState>,
    raw_query: web::Query<Vec<(String, String)>>,
    _authed: Authed,
) -> ApiResult<HttpResponse> {
    let query = parse_query(&raw_query)?;
    let page = state.alerts.list(&query).await?;

    Ok(HttpResponse::Ok()
        .insert_header(("Cache-Control", "public, max-age=60"))
        .json(serde_json::json!({
            "data": page.data,
            "count": page.count,
            "timestamp": chrono::Utc::now(),
        })))
}

pub async fn get_alert(
    state: web::Data<AppState>,
    path: web::Path<String>,
    _authed: Authed,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    if id.is_empty() {
        return Err(ApiError::BadRequest("alert ID is required".to_string()));
    }

    let alert = state
        .alerts
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("alert not found".to_string()))?;

    Ok(HttpResponse::Ok()
        .insert_header(("Cache-Control", "public, max-age=300"))
        .json(alert))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_filters_and_repeats() {
        let query = parse_query(&pairs(&[
            ("limit", "50"),
            ("severity", "high"),
            ("severity", "medium"),
            ("since", "2026-08-01T00:00:00Z"),
        ]))
        .unwrap();
        assert_eq!(query.limit, 50);
        assert_eq!(query.severities, vec!["high", "medium"]);
        assert!(query.since.is_some());
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(parse_query(&pairs(&[("limit", "abc")])).is_err());
        assert!(parse_query(&pairs(&[("limit", "5000")])).is_err());
        assert!(parse_query(&pairs(&[("since", "yesterday")])).is_err());
        assert!(parse_query(&pairs(&[("offset", "-3")])).is_err());
    }
}
