//! In-memory ledger store.
//!
//! A single async `RwLock` guards all maps, so every commit is one atomic
//! compare-and-swap on the invoice version plus the reference index.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CommitOutcome, LedgerStore, check_integrity};
use crate::error::StoreError;
use crate::models::invoice::Invoice;

#[derive(Default)]
struct MemoryState {
    invoices: HashMap<Uuid, Invoice>,
    numbers: HashMap<String, Uuid>,
    /// payment reference -> invoice id
    references: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: RwLock<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert(&self, invoice: &Invoice) -> Result<(), StoreError> {
        check_integrity(invoice)?;
        let mut state = self.inner.write().await;

        if state.numbers.contains_key(invoice.invoice_number()) {
            return Err(StoreError::DuplicateNumber);
        }
        for reference in invoice.payments().iter().filter_map(|p| p.reference.as_ref()) {
            if state.references.contains_key(reference) {
                return Err(StoreError::Integrity(format!(
                    "reference {reference} already applied"
                )));
            }
        }

        for reference in invoice.payments().iter().filter_map(|p| p.reference.clone()) {
            state.references.insert(reference, invoice.id());
        }
        state
            .numbers
            .insert(invoice.invoice_number().to_string(), invoice.id());
        state.invoices.insert(invoice.id(), invoice.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        Ok(self.inner.read().await.invoices.get(&id).cloned())
    }

    async fn get_by_number(&self, invoice_number: &str) -> Result<Option<Invoice>, StoreError> {
        let state = self.inner.read().await;
        Ok(state
            .numbers
            .get(invoice_number)
            .and_then(|id| state.invoices.get(id))
            .cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Invoice>, StoreError> {
        let state = self.inner.read().await;
        Ok(state
            .references
            .get(reference)
            .and_then(|id| state.invoices.get(id))
            .cloned())
    }

    async fn list_for_business(&self, business_id: Uuid) -> Result<Vec<Invoice>, StoreError> {
        let state = self.inner.read().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|inv| inv.business_id() == business_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(invoices)
    }

    async fn commit(&self, invoice: &Invoice) -> Result<CommitOutcome, StoreError> {
        check_integrity(invoice)?;
        let mut state = self.inner.write().await;

        let stored = match state.invoices.get(&invoice.id()) {
            Some(stored) if stored.version() == invoice.version() => stored.to_record(),
            _ => return Ok(CommitOutcome::VersionConflict),
        };
        let stored_payments = state.invoices[&invoice.id()].payments().len();

        if stored.invoice_number != invoice.invoice_number()
            || stored.business_id != invoice.business_id()
        {
            return Err(StoreError::Integrity(format!(
                "invoice {} identity fields changed",
                invoice.id()
            )));
        }
        if !invoice
            .payments()
            .starts_with(state.invoices[&invoice.id()].payments())
        {
            return Err(StoreError::Integrity(format!(
                "invoice {} payments are append-only",
                invoice.id()
            )));
        }

        let appended = &invoice.payments()[stored_payments..];
        let mut seen = HashSet::new();
        for reference in appended.iter().filter_map(|p| p.reference.as_ref()) {
            if state.references.contains_key(reference) || !seen.insert(reference) {
                return Ok(CommitOutcome::DuplicateReference(reference.clone()));
            }
        }

        let mut record = invoice.to_record();
        record.version = stored.version + 1;
        record.view_count = stored.view_count;
        record.last_opened_at = stored.last_opened_at;
        record.last_link_sent_at = stored.last_link_sent_at;
        let committed = Invoice::from_record(record, invoice.payments().to_vec());

        for reference in appended.iter().filter_map(|p| p.reference.clone()) {
            state.references.insert(reference, invoice.id());
        }
        state.invoices.insert(invoice.id(), committed.clone());

        Ok(CommitOutcome::Committed(committed))
    }

    async fn delete(&self, id: Uuid, business_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.inner.write().await;

        let owned = state
            .invoices
            .get(&id)
            .is_some_and(|inv| inv.business_id() == business_id);
        if !owned {
            return Ok(false);
        }

        if let Some(invoice) = state.invoices.remove(&id) {
            state.numbers.remove(invoice.invoice_number());
            for reference in invoice.payments().iter().filter_map(|p| p.reference.as_ref()) {
                state.references.remove(reference);
            }
        }
        Ok(true)
    }

    async fn record_view(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.inner.write().await;
        let Some(invoice) = state.invoices.get_mut(&id) else {
            return Ok(false);
        };

        let mut record = invoice.to_record();
        record.view_count += 1;
        record.last_opened_at = Some(at);
        *invoice = Invoice::from_record(record, invoice.payments().to_vec());
        Ok(true)
    }

    async fn touch_link_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.inner.write().await;
        let Some(invoice) = state.invoices.get_mut(&id) else {
            return Ok(false);
        };

        let mut record = invoice.to_record();
        record.last_link_sent_at = Some(at);
        *invoice = Invoice::from_record(record, invoice.payments().to_vec());
        Ok(true)
    }
}
