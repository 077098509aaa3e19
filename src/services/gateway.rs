//! Payment provider client.
//!
//! The ledger only needs one thing from the provider: an authenticated,
//! server-to-server answer to "what happened to the charge with this
//! reference?". [`PaymentGateway`] is that seam; [`HttpGateway`] talks to the
//! provider's `GET /transaction/verify/{reference}` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::GatewayError;
use crate::models::checkout::{ChargeStatus, GatewayCharge};

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Look up a charge by reference.
    async fn verify(&self, reference: &str) -> Result<GatewayCharge, GatewayError>;
}

/// Connection settings for [`HttpGateway`].
#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    /// Provider subunits per invoice unit (100 when the provider bills in cents)
    pub amount_divisor: i64,
    pub timeout: Duration,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("secret_key", &"<redacted>")
            .field("amount_divisor", &self.amount_divisor)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Provider response envelope.
#[derive(Debug, Deserialize)]
struct VerifyEnvelope {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<VerifyData>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: ChargeStatus,
    /// Amount in provider subunits
    amount: i64,
    reference: String,
}

/// HTTP client for the provider's verification API.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(client: Client, config: GatewayConfig) -> Self {
        Self { client, config }
    }
}

/// Convert a provider amount to invoice units.
///
/// Fractions of an invoice unit are refused rather than rounded.
pub fn to_invoice_units(subunits: i64, divisor: i64) -> Result<i64, GatewayError> {
    let divisor = divisor.max(1);
    if subunits % divisor != 0 {
        return Err(GatewayError::Malformed(format!(
            "amount {subunits} is not a whole number of invoice units"
        )));
    }
    Ok(subunits / divisor)
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn verify(&self, reference: &str) -> Result<GatewayCharge, GatewayError> {
        let mut url = url::Url::parse(&self.config.base_url)
            .map_err(|e| GatewayError::Unavailable(format!("invalid gateway URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Unavailable("gateway URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["transaction", "verify", reference]);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.secret_key)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        tracing::debug!(status = %status, %reference, "Gateway verify response");

        if !status.is_success() {
            let message = serde_json::from_str::<VerifyEnvelope>(&body)
                .map(|env| env.message)
                .unwrap_or_else(|_| body.chars().take(200).collect());
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: VerifyEnvelope =
            serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        if !envelope.status {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: envelope.message,
            });
        }
        let data = envelope
            .data
            .ok_or_else(|| GatewayError::Malformed("missing data".to_string()))?;

        if data.reference != reference {
            return Err(GatewayError::Malformed(format!(
                "asked for {reference}, provider answered for {}",
                data.reference
            )));
        }

        Ok(GatewayCharge {
            status: data.status,
            amount: to_invoice_units(data.amount, self.config.amount_divisor)?,
            reference: data.reference,
        })
    }
}
