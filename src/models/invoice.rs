//! Invoice data model and lifecycle rules.
//!
//! This module owns the financial truth of an invoice:
//! - `Invoice`: the ledger entity (payments kept private, status derived)
//! - `Payment`: an append-only ledger entry
//! - status and balance derivation, edit validation, confirmation
//! - request/response types for the owner and public APIs
//!
//! # Amounts
//!
//! Amounts are `i64` in the invoice currency unit. A payment is never stored
//! if it would make the total paid exceed the invoice total.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EditError, PaymentError};

/// Payment status of an invoice, derived from its payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Unpaid,
    Partial,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Partial => "partial",
            InvoiceStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single payment applied to an invoice.
///
/// Payments are append-only: once recorded they are never edited or removed.
/// Corrections are new entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    /// Amount applied, always positive
    pub amount: i64,

    /// Free-text method ("Cash", "Transfer", "gateway")
    pub method: String,

    /// When the payment was applied to the ledger
    #[sqlx(rename = "paid_at")]
    pub date: DateTime<Utc>,

    /// External transaction reference, unique across all invoices
    pub reference: Option<String>,
}

impl Payment {
    pub fn new(amount: i64, method: impl Into<String>, reference: Option<String>) -> Self {
        Self {
            amount,
            method: method.into(),
            date: Utc::now(),
            reference,
        }
    }
}

/// Sum of all payment amounts.
pub fn total_paid(payments: &[Payment]) -> i64 {
    payments.iter().map(|p| p.amount).sum()
}

/// Derive the status from the total and the payments.
///
/// | total paid          | status    |
/// |---------------------|-----------|
/// | 0                   | `unpaid`  |
/// | between 0 and total | `partial` |
/// | total or more       | `paid`    |
pub fn compute_status(total_amount: i64, payments: &[Payment]) -> InvoiceStatus {
    let paid = total_paid(payments);
    if paid <= 0 {
        InvoiceStatus::Unpaid
    } else if paid >= total_amount {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::Partial
    }
}

/// True outstanding balance: `total_amount - sum(payments)`.
///
/// Never clamped. A negative value means the ledger is corrupt.
pub fn compute_balance(total_amount: i64, payments: &[Payment]) -> i64 {
    total_amount - total_paid(payments)
}

/// Generate a public invoice number such as `INV-7K2Q9XDA`.
///
/// Numbers never contain `_`, which separates the parts of a gateway reference.
pub fn generate_invoice_number() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("INV-{suffix}")
}

/// Persisted projection of an invoice without its payments.
///
/// Storage backends read and write this shape; [`Invoice::from_record`]
/// rebuilds the entity and re-derives the status from the payments.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub invoice_number: String,
    pub business_id: Uuid,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub total_amount: i64,
    pub amount_paid: i64,
    pub status: String,
    pub confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub view_count: i64,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_link_sent_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create an invoice.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceRequest {
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub total_amount: i64,
}

/// Proposed owner edit. Absent fields are left unchanged.
///
/// `invoice_number` and `business_id` are accepted only so that an attempt
/// to change them can be rejected explicitly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceEdit {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub total_amount: Option<i64>,
    pub invoice_number: Option<String>,
    pub business_id: Option<Uuid>,
}

/// An invoice and its payment ledger.
///
/// `payments` and `status` are private: the only way to add a payment is
/// [`Invoice::append_payment`], which recomputes the status in the same step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    id: Uuid,
    invoice_number: String,
    business_id: Uuid,
    customer_name: String,
    customer_phone: Option<String>,
    description: Option<String>,
    due_date: Option<NaiveDate>,
    total_amount: i64,
    payments: Vec<Payment>,
    status: InvoiceStatus,
    confirmed: bool,
    confirmed_at: Option<DateTime<Utc>>,
    view_count: i64,
    last_opened_at: Option<DateTime<Utc>>,
    last_link_sent_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Create a new unpaid invoice owned by `business_id`.
    pub fn new(business_id: Uuid, request: CreateInvoiceRequest) -> Result<Self, EditError> {
        if request.total_amount <= 0 {
            return Err(EditError::NonPositiveTotal);
        }
        let customer_name = request.customer_name.trim().to_string();
        if customer_name.is_empty() {
            return Err(EditError::MissingCustomerName);
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            invoice_number: generate_invoice_number(),
            business_id,
            customer_name,
            customer_phone: request.customer_phone,
            description: request.description,
            due_date: request.due_date,
            total_amount: request.total_amount,
            payments: Vec::new(),
            status: InvoiceStatus::Unpaid,
            confirmed: false,
            confirmed_at: None,
            view_count: 0,
            last_opened_at: None,
            last_link_sent_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild an invoice from storage.
    ///
    /// The stored status is only a cache; it is re-derived here and a
    /// mismatch is logged.
    pub fn from_record(record: InvoiceRecord, payments: Vec<Payment>) -> Self {
        let status = compute_status(record.total_amount, &payments);
        if record.status != status.as_str() {
            tracing::warn!(
                invoice_id = %record.id,
                stored = %record.status,
                derived = %status,
                "Stored invoice status disagrees with payments, using derived status"
            );
        }

        Self {
            id: record.id,
            invoice_number: record.invoice_number,
            business_id: record.business_id,
            customer_name: record.customer_name,
            customer_phone: record.customer_phone,
            description: record.description,
            due_date: record.due_date,
            total_amount: record.total_amount,
            payments,
            status,
            confirmed: record.confirmed,
            confirmed_at: record.confirmed_at,
            view_count: record.view_count,
            last_opened_at: record.last_opened_at,
            last_link_sent_at: record.last_link_sent_at,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    /// Persisted projection of this invoice (payments excluded).
    pub fn to_record(&self) -> InvoiceRecord {
        InvoiceRecord {
            id: self.id,
            invoice_number: self.invoice_number.clone(),
            business_id: self.business_id,
            customer_name: self.customer_name.clone(),
            customer_phone: self.customer_phone.clone(),
            description: self.description.clone(),
            due_date: self.due_date,
            total_amount: self.total_amount,
            amount_paid: self.amount_paid(),
            status: self.status.as_str().to_string(),
            confirmed: self.confirmed,
            confirmed_at: self.confirmed_at,
            view_count: self.view_count,
            last_opened_at: self.last_opened_at,
            last_link_sent_at: self.last_link_sent_at,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn business_id(&self) -> Uuid {
        self.business_id
    }

    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    pub fn customer_phone(&self) -> Option<&str> {
        self.customer_phone.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn total_amount(&self) -> i64 {
        self.total_amount
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn view_count(&self) -> i64 {
        self.view_count
    }

    pub fn last_opened_at(&self) -> Option<DateTime<Utc>> {
        self.last_opened_at
    }

    pub fn last_link_sent_at(&self) -> Option<DateTime<Utc>> {
        self.last_link_sent_at
    }

    /// Optimistic-concurrency version this copy was read at.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn amount_paid(&self) -> i64 {
        total_paid(&self.payments)
    }

    /// True balance, see [`compute_balance`].
    pub fn balance(&self) -> i64 {
        compute_balance(self.total_amount, &self.payments)
    }

    /// Balance floored at zero for display.
    ///
    /// A negative true balance is logged as an integrity violation; the
    /// stored ledger is never touched.
    pub fn display_balance(&self) -> i64 {
        let balance = self.balance();
        if balance < 0 {
            tracing::error!(
                invoice_id = %self.id,
                balance,
                "Ledger integrity violation: negative balance"
            );
            return 0;
        }
        balance
    }

    pub fn is_settled(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }

    /// Whether a payment with this reference is already on the ledger.
    pub fn has_reference(&self, reference: &str) -> bool {
        self.payments
            .iter()
            .any(|p| p.reference.as_deref() == Some(reference))
    }

    /// Append a payment and re-derive the status.
    ///
    /// Only the payment application service calls this; it is the single
    /// mutation path for the ledger.
    pub(crate) fn append_payment(&mut self, payment: Payment) -> Result<(), PaymentError> {
        if payment.amount <= 0 {
            return Err(PaymentError::InvalidAmount);
        }

        if payment.amount > self.balance() {
            return Err(PaymentError::ExceedsBalance {
                balance: self.display_balance(),
                status: self.status,
            });
        }

        self.updated_at = payment.date;
        self.payments.push(payment);
        self.status = compute_status(self.total_amount, &self.payments);
        Ok(())
    }

    /// Validate an owner edit and return the edited invoice.
    ///
    /// The original is left untouched; the caller commits the result.
    pub fn validate_edit(&self, edit: &InvoiceEdit) -> Result<Invoice, EditError> {
        if let Some(number) = &edit.invoice_number {
            if number != &self.invoice_number {
                return Err(EditError::ImmutableField("invoice_number"));
            }
        }
        if let Some(business_id) = edit.business_id {
            if business_id != self.business_id {
                return Err(EditError::ImmutableField("business_id"));
            }
        }
        if self.is_settled() {
            return Err(EditError::Settled);
        }

        let mut edited = self.clone();

        if let Some(name) = &edit.customer_name {
            let name = name.trim();
            if name.is_empty() {
                return Err(EditError::MissingCustomerName);
            }
            edited.customer_name = name.to_string();
        }
        if let Some(phone) = &edit.customer_phone {
            edited.customer_phone = Some(phone.clone());
        }
        if let Some(description) = &edit.description {
            edited.description = Some(description.clone());
        }
        if let Some(due_date) = edit.due_date {
            edited.due_date = Some(due_date);
        }
        if let Some(total) = edit.total_amount {
            if total <= 0 {
                return Err(EditError::NonPositiveTotal);
            }
            let paid = self.amount_paid();
            if total < paid {
                return Err(EditError::TotalBelowPaid { total_paid: paid });
            }
            edited.total_amount = total;
            edited.status = compute_status(total, &edited.payments);
        }

        edited.updated_at = Utc::now();
        Ok(edited)
    }

    /// Mark the invoice as confirmed by the customer.
    ///
    /// Returns `false` (and changes nothing) when already confirmed.
    pub fn confirm(&mut self, at: DateTime<Utc>) -> bool {
        if self.confirmed {
            return false;
        }
        self.confirmed = true;
        self.confirmed_at = Some(at);
        self.updated_at = at;
        true
    }
}

/// Payment as shown to the owning merchant.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub amount: i64,
    pub method: String,
    pub date: DateTime<Utc>,
    pub reference: Option<String>,
}

impl From<&Payment> for PaymentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            amount: payment.amount,
            method: payment.method.clone(),
            date: payment.date,
            reference: payment.reference.clone(),
        }
    }
}

/// Response body for owner invoice endpoints.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "550e8400-e29b-41d4-a716-446655440000",
///   "invoice_number": "INV-7K2Q9XDA",
///   "customer_name": "Ada",
///   "total_amount": 50000,
///   "amount_paid": 20000,
///   "balance": 30000,
///   "status": "partial",
///   "payments": [{ "amount": 20000, "method": "gateway", "reference": "inv_INV-7K2Q9XDA_1760860800000123" }]
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub id: Uuid,
    pub invoice_number: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub total_amount: i64,
    pub amount_paid: i64,
    pub balance: i64,
    pub status: InvoiceStatus,
    pub payments: Vec<PaymentResponse>,
    pub confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub view_count: i64,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_link_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Invoice> for InvoiceResponse {
    fn from(invoice: &Invoice) -> Self {
        Self {
            id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
            customer_name: invoice.customer_name.clone(),
            customer_phone: invoice.customer_phone.clone(),
            description: invoice.description.clone(),
            due_date: invoice.due_date,
            total_amount: invoice.total_amount,
            amount_paid: invoice.amount_paid(),
            balance: invoice.display_balance(),
            status: invoice.status,
            payments: invoice.payments.iter().map(Into::into).collect(),
            confirmed: invoice.confirmed,
            confirmed_at: invoice.confirmed_at,
            view_count: invoice.view_count,
            last_opened_at: invoice.last_opened_at,
            last_link_sent_at: invoice.last_link_sent_at,
            created_at: invoice.created_at,
            updated_at: invoice.updated_at,
        }
    }
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        Self::from(&invoice)
    }
}

/// Payment as shown on the public invoice page (no reference).
#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub amount: i64,
    pub method: String,
    pub date: DateTime<Utc>,
}

/// Redacted invoice for customer-facing pages.
///
/// Internal ids, the owning business and payment references are omitted.
#[derive(Debug, Serialize)]
pub struct InvoiceView {
    pub invoice_number: String,
    pub customer_name: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub total_amount: i64,
    pub amount_paid: i64,
    pub balance: i64,
    pub status: InvoiceStatus,
    pub payments: Vec<PaymentView>,
    pub confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Invoice> for InvoiceView {
    fn from(invoice: &Invoice) -> Self {
        Self {
            invoice_number: invoice.invoice_number.clone(),
            customer_name: invoice.customer_name.clone(),
            description: invoice.description.clone(),
            due_date: invoice.due_date,
            total_amount: invoice.total_amount,
            amount_paid: invoice.amount_paid(),
            balance: invoice.display_balance(),
            status: invoice.status,
            payments: invoice
                .payments
                .iter()
                .map(|p| PaymentView {
                    amount: p.amount,
                    method: p.method.clone(),
                    date: p.date,
                })
                .collect(),
            confirmed: invoice.confirmed,
            confirmed_at: invoice.confirmed_at,
            created_at: invoice.created_at,
        }
    }
}

/// Request body for recording a manual payment.
///
/// ```json
/// { "amount": 30000, "method": "Cash" }
/// ```
#[derive(Debug, Deserialize)]
pub struct ManualPaymentRequest {
    pub amount: i64,

    #[serde(default = "default_manual_method")]
    pub method: String,
}

fn default_manual_method() -> String {
    "Cash".to_string()
}

/// Share link returned when a reminder is initiated.
#[derive(Debug, Serialize)]
pub struct ReminderResponse {
    pub invoice_number: String,
    pub link: String,
    pub balance: i64,
    pub status: InvoiceStatus,
    pub sent_at: DateTime<Utc>,
}
