//! HTTP handlers for merchant invoice management.
//!
//! All routes here sit behind API key authentication and only ever see the
//! invoices of the authenticated business.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::checkout::{ReconcileRequest, ReconcileResponse};
use crate::models::invoice::{
    CreateInvoiceRequest, InvoiceEdit, InvoiceResponse, ManualPaymentRequest, ReminderResponse,
};
use crate::services::invoice_service::InvoiceService;
use crate::services::verification_service::GatewayVerifier;

/// Create an invoice.
///
/// # Request Body
///
/// ```json
/// {
///   "customer_name": "Ada Obi",
///   "customer_phone": "+2348012345678",
///   "description": "Catering, 40 guests",
///   "due_date": "2026-11-30",
///   "total_amount": 50000
/// }
/// ```
///
/// # Response
///
/// 201 Created with the invoice (status `unpaid`, no payments).
pub async fn create_invoice(
    State(invoices): State<InvoiceService>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateInvoiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = invoices.create_invoice(auth.business_id, request).await?;

    Ok((StatusCode::CREATED, Json(InvoiceResponse::from(invoice))))
}

/// List the business's invoices, newest first.
pub async fn list_invoices(
    State(invoices): State<InvoiceService>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<InvoiceResponse>>, AppError> {
    let list = invoices.list_invoices(auth.business_id).await?;

    Ok(Json(list.into_iter().map(InvoiceResponse::from).collect()))
}

pub async fn get_invoice(
    State(invoices): State<InvoiceService>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = invoices.get_invoice(auth.business_id, id).await?;

    Ok(Json(invoice.into()))
}

/// Edit an invoice. Absent fields are left unchanged.
///
/// # Errors
///
/// 422 `invalid_edit` when the invoice is fully paid, the new total is below
/// what has been paid, or `invoice_number` / `business_id` would change.
pub async fn update_invoice(
    State(invoices): State<InvoiceService>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(edit): Json<InvoiceEdit>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = invoices.update_invoice(auth.business_id, id, edit).await?;

    Ok(Json(invoice.into()))
}

/// Delete an invoice and its payments. Its public link stops working.
pub async fn delete_invoice(
    State(invoices): State<InvoiceService>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    invoices.delete_invoice(auth.business_id, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Record a manual (cash, transfer) payment.
///
/// # Request Body
///
/// ```json
/// { "amount": 30000, "method": "Cash" }
/// ```
///
/// # Errors
///
/// 422 `exceeds_balance` with the true balance when the amount would overpay.
pub async fn record_payment(
    State(invoices): State<InvoiceService>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<ManualPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = invoices
        .record_manual_payment(auth.business_id, id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(InvoiceResponse::from(invoice))))
}

/// Stamp a reminder and get the link to share with the customer.
pub async fn send_reminder(
    State(invoices): State<InvoiceService>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReminderResponse>, AppError> {
    let reminder = invoices.initiate_reminder(auth.business_id, id).await?;

    Ok(Json(reminder))
}

/// Re-check a provider reference and apply it to this invoice.
///
/// # Request Body
///
/// ```json
/// { "reference": "inv_INV-7K2Q9XDA_1760860800000123" }
/// ```
pub async fn reconcile_payment(
    State(invoices): State<InvoiceService>,
    State(verifier): State<GatewayVerifier>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>, AppError> {
    invoices.get_invoice(auth.business_id, id).await?;

    let reference = request.reference.trim();
    if reference.is_empty() {
        return Err(AppError::InvalidRequest("reference is required".to_string()));
    }

    let applied = verifier.reconcile_reference(reference, Some(id)).await?;
    tracing::info!(invoice_id = %id, %reference, applied = applied.is_new(), "Reference reconciled");

    Ok(Json(ReconcileResponse {
        applied: applied.is_new(),
        invoice: applied.into_invoice().into(),
    }))
}
