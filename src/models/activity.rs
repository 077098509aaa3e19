//! Activity events emitted by the ledger.
//!
//! Events feed the audit trail and merchant-facing messaging. They are
//! produced after a change is committed and never gate ledger correctness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::invoice::Invoice;

/// Kind of activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    #[serde(rename = "invoice.created")]
    InvoiceCreated,
    #[serde(rename = "invoice.updated")]
    InvoiceUpdated,
    #[serde(rename = "invoice.deleted")]
    InvoiceDeleted,
    #[serde(rename = "invoice.confirmed")]
    InvoiceConfirmed,
    #[serde(rename = "payment.recorded")]
    PaymentRecorded,
    #[serde(rename = "reminder.sent")]
    ReminderSent,
    /// Gateway confirmation did not arrive within the polling budget
    #[serde(rename = "verification.delayed")]
    VerificationDelayed,
    /// Money moved at the provider but could not be applied to the ledger
    #[serde(rename = "charge.unreconciled")]
    ChargeUnreconciled,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::InvoiceCreated => "invoice.created",
            ActivityKind::InvoiceUpdated => "invoice.updated",
            ActivityKind::InvoiceDeleted => "invoice.deleted",
            ActivityKind::InvoiceConfirmed => "invoice.confirmed",
            ActivityKind::PaymentRecorded => "payment.recorded",
            ActivityKind::ReminderSent => "reminder.sent",
            ActivityKind::VerificationDelayed => "verification.delayed",
            ActivityKind::ChargeUnreconciled => "charge.unreconciled",
        }
    }
}

/// A single activity event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub kind: ActivityKind,
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub business_id: Uuid,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, invoice: &Invoice, metadata: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            invoice_id: invoice.id(),
            invoice_number: invoice.invoice_number().to_string(),
            business_id: invoice.business_id(),
            metadata,
            occurred_at: Utc::now(),
        }
    }
}
