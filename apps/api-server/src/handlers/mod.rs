//! API route handlers.

mod account;
mod admin;
mod alerts;
mod billing;
mod health;

use actix_web::web;
use std::sync::Arc;

use crate::middleware::admission::AdmissionMiddleware;
use crate::middleware::auth::ApiKeyAuth;
use crate::state::AppState;

/// Configure all API routes.
///
/// Metered alert routes sit behind authentication plus admission; account
/// visibility and billing-session routes are authenticated but not
/// metered; webhooks, health, and admin routes authenticate their own way.
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: &AppState) {
    let auth = ApiKeyAuth::new(state.resolver.clone(), Arc::new(state.config.auth.clone()));

    cfg.service(
        web::scope("/v1")
            .service(
                web::scope("/alerts")
                    .wrap(AdmissionMiddleware::new(state.gate.clone()))
                    .wrap(auth.clone())
                    .route("", web::get().to(alerts::list_alerts))
                    .route("/{id}", web::get().to(alerts::get_alert)),
            )
            .service(
                web::resource("/me")
                    .wrap(auth.clone())
                    .route(web::get().to(account::me)),
            )
            .service(
                web::resource("/limits")
                    .wrap(auth.clone())
                    .route(web::get().to(account::limits)),
            )
            .service(
                web::resource("/usage")
                    .wrap(auth.clone())
                    .route(web::get().to(account::usage)),
            )
            .service(
                web::resource("/usage/timeseries")
                    .wrap(auth.clone())
                    .route(web::get().to(account::usage_timeseries)),
            )
            .service(
                web::resource("/billing/checkout-session")
                    .wrap(auth.clone())
                    .route(web::post().to(billing::create_checkout_session)),
            )
            .service(
                web::resource("/billing/portal-session")
                    .wrap(auth)
                    .route(web::post().to(billing::create_portal_session)),
            )
            .route("/billing/webhook", web::post().to(billing::webhook))
            .service(
                web::scope("/admin")
                    .route("/accounts", web::post().to(admin::create_account))
                    .route(
                        "/accounts/{account_id}/keys",
                        web::post().to(admin::mint_key),
                    )
                    .route(
                        "/accounts/{account_id}/keys",
                        web::get().to(admin::list_keys),
                    )
                    .route("/keys/{key_id}/revoke", web::post().to(admin::revoke_key))
                    .route("/usage", web::get().to(admin::usage_summary)),
            )
            .route("/health", web::get().to(health::health))
            .route("/health/ready", web::get().to(health::ready))
            .route("/health/live", web::get().to(health::live))
            .route("/version", web::get().to(health::version)),
    );

    // Root health check for load balancers.
    cfg.route("/health", web::get().to(health::health));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use actix_web::{http::StatusCode, test};

    use crate::config::{AppConfig, AuthConfig, BillingSettings, ServerConfig};
    use crate::observability::RequestIdMiddleware;

    fn test_config(trial_cap: u64) -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                client_timeout: Duration::from_secs(30),
                shutdown_timeout: Duration::from_secs(5),
            },
            database: None,
            counter_store_url: None,
            auth: AuthConfig {
                require_api_keys: true,
                key_header: "Authorization".to_string(),
                agent_header: "X-Client-Type".to_string(),
                enable_agent_header: true,
                key_env: "test".to_string(),
            },
            admin_secret: Some("sekrit".to_string()),
            trial_cap,
            aggregator_enabled: false,
            billing: BillingSettings {
                provider: "stripe".to_string(),
                stripe: Default::default(),
                razorpay: Default::default(),
            },
        }
    }

    macro_rules! test_app {
        ($trial_cap:expr) => {{
            let state = AppState::new(test_config($trial_cap)).await;
            let app_state = state.clone();
            let app = test::init_service(
                actix_web::App::new()
                    .wrap(RequestIdMiddleware)
                    .app_data(web::Data::new(app_state.clone()))
                    .configure(|cfg| configure_routes(cfg, &app_state)),
            )
            .await;
            (app, state)
        }};
    }

    fn alerts_request() -> test::TestRequest {
        test::TestRequest::get()
            .uri("/v1/alerts")
            .insert_header(("Authorization", "Bearer sc_test_key"))
            .insert_header(("X-Client-Type", "agent"))
    }

    #[actix_web::test]
    async fn missing_key_is_unauthorized() {
        let (app, _) = test_app!(1000);
        let res = test::call_service(&app, test::TestRequest::get().uri("/v1/alerts").to_request())
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn invalid_client_type_is_unauthorized() {
        let (app, _) = test_app!(1000);
        let req = test::TestRequest::get()
            .uri("/v1/alerts")
            .insert_header(("Authorization", "Bearer sc_test_key"))
            .insert_header(("X-Client-Type", "robot"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn admitted_requests_carry_usage_headers() {
        let (app, _) = test_app!(1000);
        let res = test::call_service(&app, alerts_request().to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);

        let headers = res.headers();
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "20");
        assert!(headers.contains_key("x-ratelimit-remaining"));
        assert!(headers.contains_key("x-ratelimit-reset"));
        assert_eq!(headers.get("x-quota-limit").unwrap(), "450000");
        assert_eq!(headers.get("x-quota-remaining").unwrap(), "449999");
        assert!(headers.contains_key("x-quota-reset"));
        assert!(headers.contains_key("x-request-id"));
    }

    #[actix_web::test]
    async fn burst_beyond_the_lite_rpm_is_rate_limited() {
        let (app, _) = test_app!(1000);
        // The lite window admits 20 per minute. A burst may straddle one
        // minute boundary, so up to 40 requests can legitimately pass;
        // the 41st cannot.
        let mut denied = None;
        for _ in 0..45 {
            let res = test::call_service(&app, alerts_request().to_request()).await;
            if res.status() == StatusCode::TOO_MANY_REQUESTS {
                denied = Some(res);
                break;
            }
            assert_eq!(res.status(), StatusCode::OK);
        }
        let denied = denied.expect("burst must hit the rate limit");
        let retry_after: u64 = denied
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap();
        assert!(retry_after <= 60);
    }

    #[actix_web::test]
    async fn trial_cap_denies_the_eleventh_request() {
        let (app, _) = test_app!(10);
        for _ in 0..10 {
            let res = test::call_service(&app, alerts_request().to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
        }
        let res = test::call_service(&app, alerts_request().to_request()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get("retry-after").unwrap(), "3600");
    }

    #[actix_web::test]
    async fn unknown_alert_is_a_404_and_still_counted() {
        let (app, state) = test_app!(1000);
        let req = test::TestRequest::get()
            .uri("/v1/alerts/alrt_nope")
            .insert_header(("Authorization", "Bearer sc_test_key"))
            .insert_header(("X-Client-Type", "human"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        // Admission accounting runs regardless of handler outcome.
        let total = state
            .counters
            .monthly_total("key_dev", chrono::Utc::now())
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[actix_web::test]
    async fn me_endpoint_echoes_the_principal() {
        let (app, _) = test_app!(1000);
        let req = test::TestRequest::get()
            .uri("/v1/me")
            .insert_header(("Authorization", "Bearer sc_test_key"))
            .insert_header(("X-Client-Type", "human"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["plan"], "lite");
        assert_eq!(body["overage_enabled"], false);
    }

    #[actix_web::test]
    async fn webhook_without_backing_store_is_rejected() {
        let (app, _) = test_app!(1000);
        let req = test::TestRequest::post()
            .uri("/v1/billing/webhook")
            .set_payload(r#"{"id":"evt_1","type":"x","data":{"object":{}}}"#)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn admin_routes_require_the_secret() {
        let (app, _) = test_app!(1000);
        let req = test::TestRequest::post()
            .uri("/v1/admin/accounts")
            .set_json(serde_json::json!({"name": "Acme"}))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn health_is_open_and_ready() {
        let (app, _) = test_app!(1000);
        let res =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = test::call_service(
            &app,
            test::TestRequest::get().uri("/v1/health/ready").to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
