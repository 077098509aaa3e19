//! Payment provider webhook intake.
//!
//! # Security
//!
//! The raw body must carry a valid `X-Gateway-Signature: sha256=<hex>`
//! (HMAC-SHA256 with the shared webhook secret). The body is only parsed
//! after the signature checks out.
//!
//! # Responses
//!
//! The provider retries anything but 2xx, so a 2xx is returned for every
//! event that a retry cannot help: ignored event types, declined charges,
//! unknown references, unusable amounts and charges that need manual
//! follow-up. Storage errors and exhausted write retries return an error so
//! the provider tries again.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::error::{AppError, PaymentError, VerificationError};
use crate::models::checkout::{ChargeStatus, GatewayCharge, GatewayEvent};
use crate::routes::AppState;
use crate::services::{gateway, webhook_service};

pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

const CHARGE_SUCCESS: &str = "charge.success";

pub async fn receive_gateway_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    if !webhook_service::verify_signature(&state.gateway_webhook_secret, &body, signature) {
        tracing::warn!("Rejected gateway webhook with bad signature");
        return Err(AppError::InvalidSignature);
    }

    let event: GatewayEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidRequest(format!("Malformed gateway event: {}", e)))?;

    if event.event != CHARGE_SUCCESS {
        tracing::debug!(event = %event.event, "Ignoring gateway event");
        return Ok(StatusCode::OK);
    }

    let amount = match gateway::to_invoice_units(event.data.amount, state.gateway_amount_divisor) {
        Ok(amount) => amount,
        Err(e) => {
            let reference = event.data.reference;
            tracing::warn!(%reference, raw_amount = event.data.amount, error = %e, "Gateway charge amount not usable");
            if event.data.status == ChargeStatus::Success {
                state
                    .verifier
                    .report_unusable_charge(&reference, event.data.amount, &e.to_string())
                    .await;
            }
            return Ok(StatusCode::OK);
        }
    };
    let charge = GatewayCharge {
        status: event.data.status,
        amount,
        reference: event.data.reference,
    };
    let reference = charge.reference.clone();

    match state.verifier.apply_webhook_charge(charge).await {
        Ok(applied) => {
            tracing::info!(%reference, applied = applied.is_new(), "Gateway webhook processed");
            Ok(StatusCode::OK)
        }
        Err(
            e @ VerificationError::Payment(
                PaymentError::ConcurrencyConflict | PaymentError::Store(_),
            ),
        ) => Err(e.into()),
        Err(e) => {
            tracing::warn!(%reference, error = %e, "Gateway charge not applied");
            Ok(StatusCode::OK)
        }
    }
}
