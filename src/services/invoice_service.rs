//! Invoice service: owner operations and the public invoice link.
//!
//! Owner operations are scoped to the authenticated business; an invoice of
//! another business is reported as not found. Writes other than payments go
//! through the same versioned commit as payments and retry on conflict.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, PaymentError, StoreError};
use crate::models::activity::{ActivityEvent, ActivityKind};
use crate::models::invoice::{
    CreateInvoiceRequest, Invoice, InvoiceEdit, ManualPaymentRequest, ReminderResponse,
};
use crate::services::activity::ActivityEmitter;
use crate::services::payment_service::{PaymentRequest, PaymentService};
use crate::store::{CommitOutcome, LedgerStore};

/// Attempts at drawing an unused invoice number.
const NUMBER_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct InvoiceService {
    store: Arc<dyn LedgerStore>,
    payments: PaymentService,
    emitter: Arc<dyn ActivityEmitter>,
    public_base_url: String,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        payments: PaymentService,
        emitter: Arc<dyn ActivityEmitter>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            payments,
            emitter,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create an invoice for a business.
    ///
    /// # Process
    ///
    /// 1. Validate the request (positive total, customer name)
    /// 2. Draw an invoice number; redraw if it is taken
    /// 3. Store with status `unpaid` and no payments
    /// 4. Emit `invoice.created`
    pub async fn create_invoice(
        &self,
        business_id: Uuid,
        request: CreateInvoiceRequest,
    ) -> Result<Invoice, AppError> {
        for _ in 0..NUMBER_ATTEMPTS {
            let invoice = Invoice::new(business_id, request.clone())?;
            match self.store.insert(&invoice).await {
                Ok(()) => {
                    tracing::info!(
                        invoice_id = %invoice.id(),
                        invoice_number = %invoice.invoice_number(),
                        %business_id,
                        total_amount = invoice.total_amount(),
                        "Invoice created"
                    );
                    self.emitter.emit(ActivityEvent::new(
                        ActivityKind::InvoiceCreated,
                        &invoice,
                        json!({ "total_amount": invoice.total_amount() }),
                    ));
                    return Ok(invoice);
                }
                Err(StoreError::DuplicateNumber) => {
                    tracing::warn!(
                        invoice_number = %invoice.invoice_number(),
                        "Invoice number collision, drawing another"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::DuplicateNumber.into())
    }

    /// Fetch an invoice owned by `business_id`.
    pub async fn get_invoice(&self, business_id: Uuid, id: Uuid) -> Result<Invoice, AppError> {
        self.store
            .get(id)
            .await?
            .filter(|invoice| invoice.business_id() == business_id)
            .ok_or(AppError::InvoiceNotFound)
    }

    pub async fn list_invoices(&self, business_id: Uuid) -> Result<Vec<Invoice>, AppError> {
        Ok(self.store.list_for_business(business_id).await?)
    }

    /// Apply an owner edit.
    ///
    /// Re-reads and re-validates on every conflict, so an edit never lowers
    /// the total below a payment that landed in the meantime.
    pub async fn update_invoice(
        &self,
        business_id: Uuid,
        id: Uuid,
        edit: InvoiceEdit,
    ) -> Result<Invoice, AppError> {
        let retries = self.payments.policy().conflict_retries;

        for attempt in 0..=retries {
            let current = self.get_invoice(business_id, id).await?;
            let edited = current.validate_edit(&edit)?;

            match self.store.commit(&edited).await? {
                CommitOutcome::Committed(stored) => {
                    tracing::info!(invoice_id = %id, "Invoice updated");
                    self.emitter.emit(ActivityEvent::new(
                        ActivityKind::InvoiceUpdated,
                        &stored,
                        json!({
                            "total_amount": stored.total_amount(),
                            "balance": stored.display_balance(),
                            "status": stored.status(),
                        }),
                    ));
                    return Ok(stored);
                }
                CommitOutcome::VersionConflict | CommitOutcome::DuplicateReference(_) => {
                    tracing::warn!(invoice_id = %id, attempt, "Concurrent invoice update, retrying edit");
                }
            }
        }

        Err(PaymentError::ConcurrencyConflict.into())
    }

    /// Hard-delete an invoice and its payments.
    pub async fn delete_invoice(&self, business_id: Uuid, id: Uuid) -> Result<(), AppError> {
        let invoice = self.get_invoice(business_id, id).await?;

        if !self.store.delete(id, business_id).await? {
            return Err(AppError::InvoiceNotFound);
        }

        tracing::info!(
            invoice_id = %id,
            amount_paid = invoice.amount_paid(),
            "Invoice deleted"
        );
        self.emitter.emit(ActivityEvent::new(
            ActivityKind::InvoiceDeleted,
            &invoice,
            json!({
                "total_amount": invoice.total_amount(),
                "amount_paid": invoice.amount_paid(),
            }),
        ));
        Ok(())
    }

    /// Record a cash or bank payment on behalf of the merchant.
    pub async fn record_manual_payment(
        &self,
        business_id: Uuid,
        id: Uuid,
        request: ManualPaymentRequest,
    ) -> Result<Invoice, AppError> {
        self.get_invoice(business_id, id).await?;

        let applied = self
            .payments
            .apply_payment(id, PaymentRequest::manual(request.amount, request.method))
            .await?;
        Ok(applied.into_invoice())
    }

    /// Stamp the reminder time and return the public link to share.
    pub async fn initiate_reminder(
        &self,
        business_id: Uuid,
        id: Uuid,
    ) -> Result<ReminderResponse, AppError> {
        let invoice = self.get_invoice(business_id, id).await?;
        let sent_at = Utc::now();

        if !self.store.touch_link_sent(id, sent_at).await? {
            return Err(AppError::InvoiceNotFound);
        }

        let link = self.public_link(invoice.invoice_number());
        tracing::info!(invoice_id = %id, %link, "Reminder initiated");
        self.emitter.emit(ActivityEvent::new(
            ActivityKind::ReminderSent,
            &invoice,
            json!({ "link": link, "balance": invoice.display_balance() }),
        ));

        Ok(ReminderResponse {
            invoice_number: invoice.invoice_number().to_string(),
            link,
            balance: invoice.display_balance(),
            status: invoice.status(),
            sent_at,
        })
    }

    pub fn public_link(&self, invoice_number: &str) -> String {
        format!("{}/invoice/{}", self.public_base_url, invoice_number)
    }

    /// Public lookup by invoice number.
    pub async fn get_invoice_by_number(&self, invoice_number: &str) -> Result<Invoice, AppError> {
        self.store
            .get_by_number(invoice_number)
            .await?
            .ok_or(AppError::InvoiceNotFound)
    }

    /// Count a customer opening the public link.
    pub async fn record_view(&self, invoice_number: &str) -> Result<(), AppError> {
        let invoice = self.get_invoice_by_number(invoice_number).await?;
        if !self.store.record_view(invoice.id(), Utc::now()).await? {
            return Err(AppError::InvoiceNotFound);
        }
        Ok(())
    }

    /// Customer acknowledges the invoice. Repeated calls are no-ops.
    pub async fn confirm_receipt(&self, invoice_number: &str) -> Result<Invoice, AppError> {
        let retries = self.payments.policy().conflict_retries;

        for attempt in 0..=retries {
            let mut invoice = self.get_invoice_by_number(invoice_number).await?;
            let confirmed_at = Utc::now();
            if !invoice.confirm(confirmed_at) {
                return Ok(invoice);
            }

            match self.store.commit(&invoice).await? {
                CommitOutcome::Committed(stored) => {
                    tracing::info!(invoice_id = %stored.id(), "Invoice confirmed by customer");
                    self.emitter.emit(ActivityEvent::new(
                        ActivityKind::InvoiceConfirmed,
                        &stored,
                        json!({ "confirmed_at": confirmed_at }),
                    ));
                    return Ok(stored);
                }
                CommitOutcome::VersionConflict | CommitOutcome::DuplicateReference(_) => {
                    tracing::warn!(%invoice_number, attempt, "Concurrent invoice update, retrying confirmation");
                }
            }
        }

        Err(PaymentError::ConcurrencyConflict.into())
    }
}
