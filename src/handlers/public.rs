//! Public invoice link handlers.
//!
//! No authentication: anyone holding the invoice number can read the
//! redacted view. Internal ids and payment references are never exposed.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::error::AppError;
use crate::models::invoice::InvoiceView;
use crate::services::invoice_service::InvoiceService;

/// Read an invoice by number.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "invoice_number": "INV-7K2Q9XDA",
///   "customer_name": "Ada Obi",
///   "total_amount": 50000,
///   "amount_paid": 20000,
///   "balance": 30000,
///   "status": "partial",
///   "payments": [{ "amount": 20000, "method": "gateway", "date": "2026-10-19T09:00:00Z" }],
///   "confirmed": false
/// }
/// ```
pub async fn get_invoice(
    State(invoices): State<InvoiceService>,
    Path(number): Path<String>,
) -> Result<Json<InvoiceView>, AppError> {
    let invoice = invoices.get_invoice_by_number(&number).await?;

    Ok(Json(InvoiceView::from(&invoice)))
}

/// Count an opening of the public link.
pub async fn record_view(
    State(invoices): State<InvoiceService>,
    Path(number): Path<String>,
) -> Result<StatusCode, AppError> {
    invoices.record_view(&number).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Customer confirms they received the invoice. Safe to repeat.
pub async fn confirm_invoice(
    State(invoices): State<InvoiceService>,
    Path(number): Path<String>,
) -> Result<Json<InvoiceView>, AppError> {
    let invoice = invoices.confirm_receipt(&number).await?;

    Ok(Json(InvoiceView::from(&invoice)))
}
