//! # Chainwatch API Server
//!
//! Metered, multi-tenant HTTP API for supply-chain disruption alerts.

use actix_web::{web, App, HttpServer};
use tracing_actix_web::TracingLogger;

mod background;
mod config;
mod handlers;
mod middleware;
mod observability;
mod state;
mod telemetry;

use config::AppConfig;
use observability::RequestIdMiddleware;
use state::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    let telemetry_config = telemetry::TelemetryConfig::from_env();
    telemetry::init_telemetry(&telemetry_config);

    let config = AppConfig::from_env();
    let bind_addr = (config.server.host.clone(), config.server.port);
    let client_timeout = config.server.client_timeout;
    let shutdown_timeout = config.server.shutdown_timeout;
    let aggregator_enabled = config.aggregator_enabled;

    tracing::info!(
        host = %bind_addr.0,
        port = bind_addr.1,
        "Starting Chainwatch API server"
    );

    let state = AppState::new(config).await;

    // Five-minute usage drain, plus one final flush at shutdown.
    let mut scheduler = match (&state.aggregator, aggregator_enabled) {
        (Some(aggregator), true) => match background::start_aggregator(aggregator.clone()).await {
            Ok(scheduler) => Some(scheduler),
            Err(err) => {
                tracing::error!(error = %err, "aggregator scheduler failed to start");
                None
            }
        },
        _ => None,
    };

    let app_state = state.clone();
    let server = HttpServer::new(move || {
        let state = app_state.clone();
        App::new()
            .wrap(TracingLogger::default())
            .wrap(RequestIdMiddleware)
            .app_data(web::Data::new(state.clone()))
            .configure(|cfg| handlers::configure_routes(cfg, &state))
    })
    .client_request_timeout(client_timeout)
    .shutdown_timeout(shutdown_timeout.as_secs())
    .bind(bind_addr)?
    .run();

    server.await?;

    tracing::info!("Server stopped, draining counters");
    if let Some(aggregator) = &state.aggregator {
        background::scheduler::flush_with_timeout(aggregator).await;
    }
    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(err) = scheduler.shutdown().await {
            tracing::warn!(error = %err, "scheduler shutdown failed");
        }
    }

    tracing::info!("Server exited");
    Ok(())
}
