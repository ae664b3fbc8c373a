//! Application configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use chainwatch_infra::billing::{RazorpayConfig, StripeConfig};
use chainwatch_infra::DatabaseConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Budget for reading a request plus running the handler.
    pub client_timeout: Duration,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// When off, every request passes through unauthenticated (dev only).
    pub require_api_keys: bool,
    pub key_header: String,
    pub agent_header: String,
    pub enable_agent_header: bool,
    /// Environment segment minted into new keys, e.g. `live` or `test`.
    pub key_env: String,
}

#[derive(Debug, Clone)]
pub struct BillingSettings {
    /// `stripe` or `razorpay`.
    pub provider: String,
    pub stripe: StripeConfig,
    pub razorpay: RazorpayConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    /// Shared counter store endpoint; absent selects the in-process
    /// fallback (single replica, lossy on crash).
    pub counter_store_url: Option<String>,
    pub auth: AuthConfig,
    pub admin_secret: Option<String>,
    pub trial_cap: u64,
    pub aggregator_enabled: bool,
    pub billing: BillingSettings,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database = env::var("DATABASE_URL").ok().map(|url| {
            let mut config = DatabaseConfig::new(url);
            config.max_connections = env_parse("DB_MAX_CONNS", 25);
            config.min_connections = env_parse("DB_MIN_CONNS", 5);
            config
        });

        Self {
            server: ServerConfig {
                host: env_string("SERVER_HOST", "0.0.0.0"),
                port: env_parse("SERVER_PORT", 8080),
                client_timeout: Duration::from_secs(env_parse(
                    "SERVER_CLIENT_TIMEOUT_SECS",
                    30u64,
                )),
                shutdown_timeout: Duration::from_secs(env_parse(
                    "SERVER_SHUTDOWN_TIMEOUT_SECS",
                    30u64,
                )),
            },
            database,
            counter_store_url: env::var("COUNTER_STORE_URL").ok(),
            auth: AuthConfig {
                require_api_keys: env_bool("AUTH_REQUIRE_API_KEYS", false),
                key_header: env_string("AUTH_KEY_HEADER", "Authorization"),
                agent_header: env_string("AUTH_AGENT_HEADER", "X-Client-Type"),
                enable_agent_header: env_bool("AUTH_ENABLE_AGENT_HEADER", true),
                key_env: env_string("KEY_ENV", "live"),
            },
            admin_secret: env::var("ADMIN_SECRET").ok().filter(|s| !s.is_empty()),
            trial_cap: env_parse("TRIAL_CAP", 10u64),
            aggregator_enabled: env_bool("AGGREGATOR_ENABLED", true),
            billing: BillingSettings {
                provider: env_string("BILLING_PROVIDER", "stripe"),
                stripe: StripeConfig {
                    secret_key: env_string("STRIPE_SECRET_KEY", ""),
                    webhook_secret: env_string("STRIPE_WEBHOOK_SECRET", ""),
                    price_lite_monthly: env_string("STRIPE_PRICE_LITE_MONTHLY", ""),
                    price_lite_annual: env_string("STRIPE_PRICE_LITE_ANNUAL", ""),
                    price_pro_monthly: env_string("STRIPE_PRICE_PRO_MONTHLY", ""),
                    price_pro_annual: env_string("STRIPE_PRICE_PRO_ANNUAL", ""),
                    price_overage_metered: env_string("STRIPE_PRICE_OVERAGE_METERED", ""),
                    checkout_success_url: env_string(
                        "STRIPE_CHECKOUT_SUCCESS_URL",
                        "https://dashboard.example.com/billing/success",
                    ),
                    checkout_cancel_url: env_string(
                        "STRIPE_CHECKOUT_CANCEL_URL",
                        "https://dashboard.example.com/billing/cancel",
                    ),
                    portal_return_url: env_string(
                        "STRIPE_PORTAL_RETURN_URL",
                        "https://dashboard.example.com/billing",
                    ),
                },
                razorpay: RazorpayConfig {
                    key_id: env_string("RAZORPAY_KEY_ID", ""),
                    key_secret: env_string("RAZORPAY_KEY_SECRET", ""),
                    webhook_secret: env_string("RAZORPAY_WEBHOOK_SECRET", ""),
                    currency: env_string("RAZORPAY_CURRENCY", "INR"),
                    amount_lite_monthly_paisa: env_parse("RAZORPAY_AMOUNT_LITE_MONTHLY_PAISA", 0),
                    amount_lite_annual_paisa: env_parse("RAZORPAY_AMOUNT_LITE_ANNUAL_PAISA", 0),
                    amount_pro_monthly_paisa: env_parse("RAZORPAY_AMOUNT_PRO_MONTHLY_PAISA", 0),
                    amount_pro_annual_paisa: env_parse("RAZORPAY_AMOUNT_PRO_ANNUAL_PAISA", 0),
                },
            },
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "on" => Some(true),
            "0" | "false" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}
