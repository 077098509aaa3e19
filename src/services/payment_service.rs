//! Payment application service: the only way money enters the ledger.
//!
//! This service handles:
//! - Amount validation against the configured floors
//! - Idempotency by payment reference
//! - Atomic append through an optimistic version check
//! - Bounded retries when concurrent writers collide
//!
//! # Algorithm
//!
//! 1. If the reference is already applied, return the stored invoice
//! 2. Read the invoice and remember its version
//! 3. Append the payment (rejects overshoot) and recompute status
//! 4. Commit conditioned on the version
//! 5. On conflict go back to 1; after the retry budget report a conflict

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::models::activity::{ActivityEvent, ActivityKind};
use crate::models::invoice::{Invoice, Payment};
use crate::store::{CommitOutcome, LedgerStore};
use crate::services::activity::ActivityEmitter;

/// Payment floors and retry budget.
#[derive(Debug, Clone, Copy)]
pub struct PaymentPolicy {
    pub manual_minimum: i64,
    /// Floor for partial gateway payments
    pub gateway_minimum: i64,
    pub conflict_retries: u32,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            manual_minimum: 1,
            gateway_minimum: 100,
            conflict_retries: 5,
        }
    }
}

/// Where a payment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentSource {
    /// Recorded by the merchant (cash, bank transfer)
    Manual,
    /// Confirmed by the payment provider; always carries a reference
    Gateway,
}

/// A payment to apply.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub amount: i64,
    pub method: String,
    pub reference: Option<String>,
    pub source: PaymentSource,
}

impl PaymentRequest {
    pub fn manual(amount: i64, method: impl Into<String>) -> Self {
        Self {
            amount,
            method: method.into(),
            reference: None,
            source: PaymentSource::Manual,
        }
    }

    pub fn gateway(amount: i64, reference: impl Into<String>) -> Self {
        Self {
            amount,
            method: "gateway".to_string(),
            reference: Some(reference.into()),
            source: PaymentSource::Gateway,
        }
    }
}

/// Successful result of [`PaymentService::apply_payment`].
#[derive(Debug, Clone)]
pub enum Applied {
    /// A new payment entry was written.
    Recorded(Invoice),
    /// The reference was already on this invoice; nothing was written.
    AlreadyApplied(Invoice),
}

impl Applied {
    pub fn invoice(&self) -> &Invoice {
        match self {
            Applied::Recorded(invoice) | Applied::AlreadyApplied(invoice) => invoice,
        }
    }

    pub fn into_invoice(self) -> Invoice {
        match self {
            Applied::Recorded(invoice) | Applied::AlreadyApplied(invoice) => invoice,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Applied::Recorded(_))
    }
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    emitter: Arc<dyn ActivityEmitter>,
    policy: PaymentPolicy,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        emitter: Arc<dyn ActivityEmitter>,
        policy: PaymentPolicy,
    ) -> Self {
        Self {
            store,
            emitter,
            policy,
        }
    }

    pub fn policy(&self) -> &PaymentPolicy {
        &self.policy
    }

    /// Apply a payment to an invoice, exactly once per reference.
    ///
    /// # Errors
    ///
    /// - `InvoiceNotFound`: the invoice does not exist (or was deleted)
    /// - `InvalidAmount` / `BelowMinimum`: amount rejected by policy
    /// - `ExceedsBalance`: would overpay; carries the true balance
    /// - `ReferenceInUse`: the reference belongs to another invoice
    /// - `ConcurrencyConflict`: retry budget exhausted
    pub async fn apply_payment(
        &self,
        invoice_id: Uuid,
        request: PaymentRequest,
    ) -> Result<Applied, PaymentError> {
        let method = request.method.trim();
        if method.is_empty() {
            return Err(PaymentError::MissingMethod);
        }
        let reference = match request.reference.as_deref().map(str::trim) {
            Some("") => return Err(PaymentError::MissingReference),
            Some(r) => Some(r.to_string()),
            None => None,
        };
        if request.source == PaymentSource::Gateway && reference.is_none() {
            return Err(PaymentError::MissingReference);
        }
        if request.amount <= 0 {
            return Err(PaymentError::InvalidAmount);
        }

        for attempt in 0..=self.policy.conflict_retries {
            if let Some(reference) = &reference {
                if let Some(existing) = self.store.find_by_reference(reference).await? {
                    if existing.id() != invoice_id {
                        tracing::warn!(
                            %reference,
                            invoice_id = %invoice_id,
                            holder = %existing.id(),
                            "Reference already applied to another invoice"
                        );
                        return Err(PaymentError::ReferenceInUse(reference.clone()));
                    }
                    tracing::info!(
                        %reference,
                        invoice_id = %invoice_id,
                        "Reference already applied, returning stored state"
                    );
                    return Ok(Applied::AlreadyApplied(existing));
                }
            }

            let mut invoice = self
                .store
                .get(invoice_id)
                .await?
                .ok_or(PaymentError::InvoiceNotFound)?;

            self.check_minimum(&invoice, &request)?;

            invoice.append_payment(Payment::new(request.amount, method, reference.clone()))?;

            match self.store.commit(&invoice).await? {
                CommitOutcome::Committed(stored) => {
                    tracing::info!(
                        invoice_id = %invoice_id,
                        amount = request.amount,
                        method,
                        reference = reference.as_deref().unwrap_or(""),
                        balance = stored.display_balance(),
                        status = %stored.status(),
                        "Payment recorded"
                    );
                    self.emitter.emit(ActivityEvent::new(
                        ActivityKind::PaymentRecorded,
                        &stored,
                        json!({
                            "amount": request.amount,
                            "method": method,
                            "reference": reference,
                            "amount_paid": stored.amount_paid(),
                            "balance": stored.display_balance(),
                            "status": stored.status(),
                        }),
                    ));
                    return Ok(Applied::Recorded(stored));
                }
                CommitOutcome::VersionConflict => {
                    tracing::warn!(
                        invoice_id = %invoice_id,
                        attempt,
                        "Concurrent invoice update, retrying payment"
                    );
                }
                CommitOutcome::DuplicateReference(reference) => {
                    tracing::warn!(
                        invoice_id = %invoice_id,
                        %reference,
                        attempt,
                        "Reference applied concurrently, re-reading"
                    );
                }
            }
        }

        tracing::error!(
            invoice_id = %invoice_id,
            retries = self.policy.conflict_retries,
            "Giving up on payment after repeated conflicts"
        );
        Err(PaymentError::ConcurrencyConflict)
    }

    /// Enforce the amount floor for the payment's source.
    ///
    /// Paying off the whole remaining balance is always allowed, even when it
    /// is smaller than the floor. Overpayments fall through to the balance check.
    fn check_minimum(&self, invoice: &Invoice, request: &PaymentRequest) -> Result<(), PaymentError> {
        let minimum = match request.source {
            PaymentSource::Manual => self.policy.manual_minimum,
            PaymentSource::Gateway => self.policy.gateway_minimum,
        };
        if request.amount < minimum && request.amount < invoice.balance() {
            return Err(PaymentError::BelowMinimum { minimum });
        }
        Ok(())
    }
}
