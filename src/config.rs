//! Application configuration management.
//!
//! Configuration is loaded from environment variables (and an optional
//! `.env` file) with the `envy` crate, then split into the typed settings
//! each component receives at construction. Business logic never reads the
//! environment directly.

use std::time::Duration;

use serde::Deserialize;

use crate::services::gateway::GatewayConfig;
use crate::services::payment_service::PaymentPolicy;
use crate::services::verification_service::{RetryPolicy, VerificationSettings};

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `DATABASE_MAX_CONNECTIONS`: pool size, defaults to 10
/// - `SERVER_PORT`: HTTP server port, defaults to 3000
/// - `PUBLIC_BASE_URL`: base of customer-facing invoice links
/// - `GATEWAY_BASE_URL`, `GATEWAY_SECRET_KEY` (required): payment provider API
/// - `GATEWAY_WEBHOOK_SECRET`: provider webhook signing secret (defaults to the secret key)
/// - `GATEWAY_AMOUNT_DIVISOR`: provider subunits per invoice unit, defaults to 100
/// - `REFERENCE_PREFIX`: prefix of generated checkout references, defaults to `inv`
/// - `GATEWAY_MIN_AMOUNT` / `MANUAL_MIN_AMOUNT`: payment floors (100 / 1)
/// - `APPLY_CONFLICT_RETRIES`: version-conflict retries when applying a payment
/// - `VERIFY_ATTEMPTS`, `VERIFY_INTERVAL_MS`: proactive verification budget
/// - `POLL_ATTEMPTS`, `POLL_INTERVAL_MS`: polling fallback budget (15 x 2s)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    pub gateway_base_url: String,

    pub gateway_secret_key: String,

    #[serde(default)]
    pub gateway_webhook_secret: Option<String>,

    #[serde(default = "default_amount_divisor")]
    pub gateway_amount_divisor: i64,

    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    #[serde(default = "default_reference_prefix")]
    pub reference_prefix: String,

    #[serde(default = "default_gateway_min_amount")]
    pub gateway_min_amount: i64,

    #[serde(default = "default_manual_min_amount")]
    pub manual_min_amount: i64,

    #[serde(default = "default_conflict_retries")]
    pub apply_conflict_retries: u32,

    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    #[serde(default = "default_verify_interval_ms")]
    pub verify_interval_ms: u64,

    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_attempt_ttl_secs")]
    pub attempt_ttl_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_port() -> u16 {
    3000
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_amount_divisor() -> i64 {
    100
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_reference_prefix() -> String {
    "inv".to_string()
}

fn default_gateway_min_amount() -> i64 {
    100
}

fn default_manual_min_amount() -> i64 {
    1
}

fn default_conflict_retries() -> u32 {
    5
}

fn default_verify_attempts() -> u32 {
    3
}

fn default_verify_interval_ms() -> u64 {
    1000
}

fn default_poll_attempts() -> u32 {
    15
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_attempt_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` first if present, then deserializes the environment.
    /// Field names map to upper-case variables: `database_url -> DATABASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value cannot
    /// be parsed into its expected type.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>()
    }

    pub fn payment_policy(&self) -> PaymentPolicy {
        PaymentPolicy {
            manual_minimum: self.manual_min_amount,
            gateway_minimum: self.gateway_min_amount,
            conflict_retries: self.apply_conflict_retries,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.gateway_base_url.trim_end_matches('/').to_string(),
            secret_key: self.gateway_secret_key.clone(),
            amount_divisor: self.gateway_amount_divisor,
            timeout: Duration::from_secs(self.gateway_timeout_secs),
        }
    }

    /// Secret used to check signatures on provider webhooks.
    pub fn gateway_webhook_secret(&self) -> String {
        self.gateway_webhook_secret
            .clone()
            .unwrap_or_else(|| self.gateway_secret_key.clone())
    }

    pub fn verification_settings(&self) -> VerificationSettings {
        VerificationSettings {
            reference_prefix: self.reference_prefix.clone(),
            verify: RetryPolicy::new(
                self.verify_attempts,
                Duration::from_millis(self.verify_interval_ms),
            ),
            poll: RetryPolicy::new(
                self.poll_attempts,
                Duration::from_millis(self.poll_interval_ms),
            ),
            attempt_ttl: Duration::from_secs(self.attempt_ttl_secs),
        }
    }
}
