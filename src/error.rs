//! Error types and HTTP error response handling.
//!
//! This module defines the errors raised by each layer of the ledger
//! (storage, invoice edits, payment application, gateway verification) and
//! how they are converted into HTTP responses with appropriate status codes
//! and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::models::checkout::ChargeStatus;
use crate::models::invoice::InvoiceStatus;

/// Errors raised by a [`LedgerStore`](crate::store::LedgerStore) implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed (connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Another invoice already uses this invoice number.
    #[error("Invoice number already taken")]
    DuplicateNumber,

    /// A write would have broken a ledger invariant (payments rewritten,
    /// negative balance). The write is rejected before it reaches storage.
    #[error("Ledger integrity violation: {0}")]
    Integrity(String),
}

/// Rejections from invoice creation and owner edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("{0} cannot be changed")]
    ImmutableField(&'static str),

    #[error("Total amount must be positive")]
    NonPositiveTotal,

    /// The new total would under-bill what has already been paid.
    #[error("Total amount cannot be less than the {total_paid} already paid")]
    TotalBelowPaid { total_paid: i64 },

    #[error("Customer name is required")]
    MissingCustomerName,

    /// Fully paid invoices are read-only.
    #[error("Invoice is fully paid and can no longer be edited")]
    Settled,
}

/// Failures of the payment application path.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Invoice not found")]
    InvoiceNotFound,

    #[error("Payment amount must be positive")]
    InvalidAmount,

    #[error("Payment amount is below the minimum of {minimum}")]
    BelowMinimum { minimum: i64 },

    /// The payment would push the total paid above the invoice total.
    /// Carries the true remaining balance so the caller can correct input.
    #[error("Payment exceeds the outstanding balance of {balance}")]
    ExceedsBalance { balance: i64, status: InvoiceStatus },

    #[error("Invoice is already fully paid")]
    AlreadySettled,

    #[error("Payment method is required")]
    MissingMethod,

    #[error("Gateway payments require a reference")]
    MissingReference,

    /// The reference was already applied to a different invoice.
    #[error("Reference {0} belongs to another invoice")]
    ReferenceInUse(String),

    /// Concurrent writers kept winning the version race; safe to retry.
    #[error("Invoice was modified concurrently, please retry")]
    ConcurrencyConflict,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures talking to the payment provider.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Network failure or timeout reaching the provider.
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The provider answered with a non-success HTTP status.
    #[error("Payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The provider answered with a body we could not interpret.
    #[error("Malformed gateway response: {0}")]
    Malformed(String),
}

/// Failures of reference reconciliation (webhook intake and owner re-checks).
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The provider knows the reference but the charge did not succeed.
    #[error("Charge is {0}, nothing to apply")]
    ChargeNotSuccessful(ChargeStatus),

    /// The reference cannot be matched to an invoice.
    #[error("Unknown payment reference {0}")]
    UnknownReference(String),

    #[error("Charged amount {charged} does not match the expected {expected}")]
    AmountMismatch { expected: i64, charged: i64 },
}

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error message.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed outside the ledger store (auth, webhooks).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// API key is missing, invalid, or inactive.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Requested invoice does not exist or doesn't belong to the authenticated business.
    #[error("Invoice not found")]
    InvoiceNotFound,

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error("Webhook endpoint not found")]
    WebhookNotFound,

    #[error("Invalid webhook URL: {0}")]
    InvalidWebhookUrl(String),

    /// Gateway webhook signature missing or wrong.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Request body or parameters are invalid.
    #[error("Invalid request")]
    InvalidRequest(String),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Verification(VerificationError::Gateway(err))
    }
}

type ErrorParts = (StatusCode, &'static str, String, Option<serde_json::Value>);

fn store_parts(err: &StoreError) -> ErrorParts {
    match err {
        StoreError::DuplicateNumber => (
            StatusCode::CONFLICT,
            "duplicate_invoice_number",
            err.to_string(),
            None,
        ),
        StoreError::Database(_) | StoreError::Integrity(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "An internal error occurred".to_string(),
            None,
        ),
    }
}

fn payment_parts(err: &PaymentError) -> ErrorParts {
    let message = err.to_string();
    match err {
        PaymentError::InvoiceNotFound => (StatusCode::NOT_FOUND, "invoice_not_found", message, None),
        PaymentError::InvalidAmount
        | PaymentError::MissingMethod
        | PaymentError::MissingReference => {
            (StatusCode::BAD_REQUEST, "invalid_request", message, None)
        }
        PaymentError::BelowMinimum { minimum } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "below_minimum",
            message,
            Some(json!({ "minimum": minimum })),
        ),
        PaymentError::ExceedsBalance { balance, status } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "exceeds_balance",
            message,
            Some(json!({ "balance": balance, "status": status })),
        ),
        PaymentError::AlreadySettled => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "already_settled",
            message,
            Some(json!({ "balance": 0, "status": InvoiceStatus::Paid })),
        ),
        PaymentError::ReferenceInUse(_) => {
            (StatusCode::CONFLICT, "reference_in_use", message, None)
        }
        PaymentError::ConcurrencyConflict => {
            (StatusCode::CONFLICT, "concurrency_conflict", message, None)
        }
        PaymentError::Store(store) => store_parts(store),
    }
}

fn verification_parts(err: &VerificationError) -> ErrorParts {
    let message = err.to_string();
    match err {
        VerificationError::Payment(payment) => payment_parts(payment),
        VerificationError::Gateway(_) => (StatusCode::BAD_GATEWAY, "gateway_error", message, None),
        VerificationError::ChargeNotSuccessful(status) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "charge_not_successful",
            message,
            Some(json!({ "charge_status": status })),
        ),
        VerificationError::UnknownReference(_) => {
            (StatusCode::NOT_FOUND, "unknown_reference", message, None)
        }
        VerificationError::AmountMismatch { expected, charged } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "amount_mismatch",
            message,
            Some(json!({ "expected": expected, "charged": charged })),
        ),
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "exceeds_balance",
///     "message": "Payment exceeds the outstanding balance of 200",
///     "details": { "balance": 200, "status": "partial" }
///   }
/// }
/// ```
///
/// Database and integrity failures return 500 and hide their details.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
                None,
            ),
            AppError::InvoiceNotFound => (
                StatusCode::NOT_FOUND,
                "invoice_not_found",
                self.to_string(),
                None,
            ),
            AppError::WebhookNotFound => (
                StatusCode::NOT_FOUND,
                "webhook_not_found",
                self.to_string(),
                None,
            ),
            AppError::InvalidWebhookUrl(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_webhook_url",
                msg.clone(),
                None,
            ),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                self.to_string(),
                None,
            ),
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone(), None)
            }
            AppError::Edit(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_edit",
                err.to_string(),
                None,
            ),
            AppError::Payment(err) => payment_parts(err),
            AppError::Verification(err) => verification_parts(err),
            AppError::Store(err) => store_parts(err),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let mut error = json!({
            "code": code,
            "message": message
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
