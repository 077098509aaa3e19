//! Customer checkout through the payment provider.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::error::{AppError, VerificationError};
use crate::models::checkout::{CheckoutRequest, CheckoutResponse, VerificationResponse, VerifyRequest};
use crate::services::verification_service::GatewayVerifier;

/// Start a checkout and get the reference to hand to the provider widget.
///
/// # Request Body
///
/// ```json
/// { "amount": 20000 }
/// ```
///
/// Send `{}` to pay the full balance.
///
/// # Errors
///
/// 422 when the amount exceeds the balance, is below the gateway minimum
/// (unless it pays the whole balance) or the invoice is already paid.
pub async fn start_checkout(
    State(verifier): State<GatewayVerifier>,
    Path(number): Path<String>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = verifier.initiate_checkout(&number, request.amount).await?;

    Ok((StatusCode::CREATED, Json(CheckoutResponse::from(&attempt))))
}

/// Confirm a checkout after the provider widget reported back.
///
/// Holds the request open while the charge is verified and, if needed, the
/// invoice is polled. Closing the connection stops the work.
///
/// # Response
///
/// 200 OK for every outcome; `state` is one of `verified`, `timed_out`,
/// `cancelled` or `failed`.
pub async fn verify_checkout(
    State(verifier): State<GatewayVerifier>,
    Path(reference): Path<String>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerificationResponse>, AppError> {
    let outcome = verifier
        .confirm_payment(&reference, request.expected_amount)
        .await?;

    Ok(Json(outcome.into()))
}

/// Cancel a checkout. Stops any running confirmation; the invoice is untouched.
pub async fn cancel_checkout(
    State(verifier): State<GatewayVerifier>,
    Path(reference): Path<String>,
) -> Result<StatusCode, AppError> {
    if !verifier.cancel_checkout(&reference) {
        return Err(VerificationError::UnknownReference(reference).into());
    }

    Ok(StatusCode::NO_CONTENT)
}
