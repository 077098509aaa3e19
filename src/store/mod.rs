//! Ledger storage.
//!
//! The [`LedgerStore`] trait is the durable record of invoices and their
//! payments. Writes use optimistic concurrency: an invoice is read at some
//! `version` and [`LedgerStore::commit`] succeeds only if nobody else has
//! committed since. Payment references are unique across the whole store and
//! the check happens inside the same atomic commit.
//!
//! Two implementations:
//! - [`PgLedgerStore`]: PostgreSQL via sqlx (production)
//! - [`MemoryLedgerStore`]: process-local, used by tests and local runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::invoice::Invoice;

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Result of a conditional commit.
#[derive(Debug)]
pub enum CommitOutcome {
    /// Written; carries the stored copy at its new version.
    Committed(Invoice),

    /// The invoice changed (or vanished) since it was read.
    VersionConflict,

    /// A newly appended payment reuses a reference already on the ledger.
    DuplicateReference(String),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Store a brand-new invoice.
    ///
    /// Fails with [`StoreError::DuplicateNumber`] if the invoice number is taken.
    async fn insert(&self, invoice: &Invoice) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Invoice>, StoreError>;

    /// Public-link lookup.
    async fn get_by_number(&self, invoice_number: &str) -> Result<Option<Invoice>, StoreError>;

    /// Invoice holding the payment with this reference, if any.
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Invoice>, StoreError>;

    /// Invoices owned by a business, newest first.
    async fn list_for_business(&self, business_id: Uuid) -> Result<Vec<Invoice>, StoreError>;

    /// Write `invoice` if the stored version still equals `invoice.version()`.
    ///
    /// Payments beyond the stored ones are appended; stored payments are
    /// never rewritten. View and reminder counters are left as stored.
    async fn commit(&self, invoice: &Invoice) -> Result<CommitOutcome, StoreError>;

    /// Hard-delete an invoice owned by `business_id`, with its payments.
    ///
    /// Returns `false` if no such invoice exists for that business.
    async fn delete(&self, id: Uuid, business_id: Uuid) -> Result<bool, StoreError>;

    /// Bump the view counter. Returns `false` if the invoice is gone.
    async fn record_view(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Stamp the last time the share link was sent.
    async fn touch_link_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

/// Reject writes that would put a corrupt ledger into storage.
fn check_integrity(invoice: &Invoice) -> Result<(), StoreError> {
    if invoice.balance() < 0 {
        tracing::error!(
            invoice_id = %invoice.id(),
            total_amount = invoice.total_amount(),
            amount_paid = invoice.amount_paid(),
            "Ledger integrity violation: refusing to store negative balance"
        );
        return Err(StoreError::Integrity(format!(
            "invoice {} would have a negative balance",
            invoice.id()
        )));
    }
    Ok(())
}
