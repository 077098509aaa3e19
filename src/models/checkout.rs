//! Gateway checkout models.
//!
//! A checkout attempt is one customer trip through the payment provider.
//! Its reference is generated here, handed to the provider widget, and later
//! used to verify the charge and as the idempotency key of the ledger entry.
//!
//! # Attempt States
//!
//! ```text
//! Initiated -> AwaitingConfirmation -> Verified
//!                                   -> TimedOut -> AwaitingConfirmation (re-check)
//!                                   -> Cancelled
//!                                   -> Failed
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::invoice::{Invoice, InvoiceResponse, InvoiceStatus, InvoiceView};

/// Lifecycle state of a checkout attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Initiated,
    AwaitingConfirmation,
    Verified,
    TimedOut,
    Cancelled,
    Failed,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Verified | AttemptState::Cancelled | AttemptState::Failed
        )
    }

    pub fn can_transition_to(&self, next: AttemptState) -> bool {
        use AttemptState::*;

        match (self, next) {
            (Initiated, AwaitingConfirmation) | (Initiated, Cancelled) => true,
            // a second callback or manual re-check re-enters confirmation
            (AwaitingConfirmation, _) => next != Initiated,
            (TimedOut, AwaitingConfirmation)
            | (TimedOut, Verified)
            | (TimedOut, Cancelled)
            | (TimedOut, Failed) => true,
            _ => false,
        }
    }
}

/// A registered checkout attempt.
#[derive(Debug, Clone)]
pub struct CheckoutAttempt {
    pub reference: String,
    pub invoice_id: Uuid,
    pub invoice_number: String,
    /// Amount the customer chose to pay
    pub amount: i64,
    /// Balance when the attempt started
    pub baseline_balance: i64,
    /// No requested amount is known; any charge a checkout would accept
    /// settles the attempt
    pub open_amount: bool,
    pub state: AttemptState,
    pub created_at: DateTime<Utc>,
    pub cancel: CancellationToken,
}

/// Build a checkout reference: `<prefix>_<invoiceNumber>_<millis><nonce>`.
pub fn build_reference(prefix: &str, invoice_number: &str, at: DateTime<Utc>) -> String {
    let nonce: u16 = rand::random::<u16>() % 1000;
    format!(
        "{}_{}_{}{:03}",
        prefix,
        invoice_number,
        at.timestamp_millis(),
        nonce
    )
}

/// Extract the invoice number from a reference built by [`build_reference`].
///
/// Returns `None` for references with another prefix or shape.
pub fn invoice_number_from_reference<'a>(prefix: &str, reference: &'a str) -> Option<&'a str> {
    let rest = reference.strip_prefix(prefix)?.strip_prefix('_')?;
    let (number, stamp) = rest.rsplit_once('_')?;
    if number.is_empty() || stamp.is_empty() || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(number)
}

/// Charge status reported by the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Success,
    Pending,
    Failed,
    Abandoned,
    Reversed,
    #[serde(other)]
    Unknown,
}

impl ChargeStatus {
    /// Whether the provider may still settle this charge.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, ChargeStatus::Pending | ChargeStatus::Unknown)
    }
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChargeStatus::Success => "success",
            ChargeStatus::Pending => "pending",
            ChargeStatus::Failed => "failed",
            ChargeStatus::Abandoned => "abandoned",
            ChargeStatus::Reversed => "reversed",
            ChargeStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Verified charge details, amounts already in invoice units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCharge {
    pub status: ChargeStatus,
    pub amount: i64,
    pub reference: String,
}

/// Which path confirmed the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPath {
    /// Server-to-server verification applied the payment
    Proactive,
    /// The reference was already on the ledger
    AlreadyApplied,
    /// Polling found the reference on the ledger after another path applied it
    Polling,
}

/// Result of running the confirmation protocol for a reference.
#[derive(Debug, Clone)]
pub enum VerificationOutcome {
    Verified {
        invoice: Invoice,
        path: ConfirmationPath,
    },
    /// Nothing confirmed within the budget; the charge may still settle.
    TimedOut { invoice: Invoice },
    Cancelled { invoice: Option<Invoice> },
    /// The provider declined the charge or it could not be applied.
    Failed { invoice: Invoice, reason: String },
}

impl VerificationOutcome {
    pub fn state(&self) -> AttemptState {
        match self {
            VerificationOutcome::Verified { .. } => AttemptState::Verified,
            VerificationOutcome::TimedOut { .. } => AttemptState::TimedOut,
            VerificationOutcome::Cancelled { .. } => AttemptState::Cancelled,
            VerificationOutcome::Failed { .. } => AttemptState::Failed,
        }
    }

    pub fn invoice(&self) -> Option<&Invoice> {
        match self {
            VerificationOutcome::Verified { invoice, .. }
            | VerificationOutcome::TimedOut { invoice }
            | VerificationOutcome::Failed { invoice, .. } => Some(invoice),
            VerificationOutcome::Cancelled { invoice } => invoice.as_ref(),
        }
    }
}

/// Request body to start a checkout. Omit `amount` to pay the full balance.
#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    pub amount: Option<i64>,
}

/// Response body for a started checkout.
///
/// ```json
/// {
///   "reference": "inv_INV-7K2Q9XDA_1760860800000123",
///   "invoice_number": "INV-7K2Q9XDA",
///   "amount": 20000,
///   "balance": 50000
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub reference: String,
    pub invoice_number: String,
    pub amount: i64,
    pub balance: i64,
}

impl From<&CheckoutAttempt> for CheckoutResponse {
    fn from(attempt: &CheckoutAttempt) -> Self {
        Self {
            reference: attempt.reference.clone(),
            invoice_number: attempt.invoice_number.clone(),
            amount: attempt.amount,
            balance: attempt.baseline_balance,
        }
    }
}

/// Request body sent after the provider widget reports a callback.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyRequest {
    /// Amount the client expects was charged, used when the server has no
    /// record of the attempt.
    pub expected_amount: Option<i64>,
}

/// Response body for a verification run.
#[derive(Debug, Serialize)]
pub struct VerificationResponse {
    pub state: AttemptState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<ConfirmationPath>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<InvoiceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<InvoiceView>,
}

impl From<VerificationOutcome> for VerificationResponse {
    fn from(outcome: VerificationOutcome) -> Self {
        let state = outcome.state();
        let (path, message) = match &outcome {
            VerificationOutcome::Verified { path, .. } => {
                (Some(*path), "Payment confirmed".to_string())
            }
            VerificationOutcome::TimedOut { .. } => (
                None,
                "Verification delayed. Your payment may still be processing; \
                 the invoice will update once it is confirmed."
                    .to_string(),
            ),
            VerificationOutcome::Cancelled { .. } => (None, "Payment cancelled".to_string()),
            VerificationOutcome::Failed { reason, .. } => (
                None,
                format!("Payment could not be confirmed: {reason}. Please retry or contact support."),
            ),
        };
        let invoice = outcome.invoice();

        Self {
            state,
            path,
            message,
            balance: invoice.map(Invoice::display_balance),
            status: invoice.map(Invoice::status),
            invoice: invoice.map(InvoiceView::from),
        }
    }
}

/// Owner request to re-check a provider reference against one invoice.
#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    /// `false` when the reference was already on the ledger
    pub applied: bool,
    pub invoice: InvoiceResponse,
}

/// Charge event posted by the payment provider.
///
/// ```json
/// {
///   "event": "charge.success",
///   "data": { "status": "success", "amount": 2000000, "reference": "inv_INV-7K2Q9XDA_1760860800000123" }
/// }
/// ```
///
/// `amount` is in provider subunits.
#[derive(Debug, Deserialize)]
pub struct GatewayEvent {
    pub event: String,
    pub data: GatewayEventData,
}

#[derive(Debug, Deserialize)]
pub struct GatewayEventData {
    pub status: ChargeStatus,
    pub amount: i64,
    pub reference: String,
}
