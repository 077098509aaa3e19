//! Gateway verification protocol.
//!
//! Confirms provider charges and turns them into ledger entries without ever
//! trusting the client's word that money moved.
//!
//! # Flow
//!
//! 1. `initiate_checkout` validates the amount before the customer pays and
//!    registers an attempt under a fresh reference
//! 2. `confirm_payment` (client callback) asks the provider about the
//!    reference, with retries, and applies a successful charge
//! 3. If the provider stays silent or inconclusive, the stored invoice is
//!    polled until another path (webhook, owner reconcile) has applied it
//! 4. If nothing shows up within the poll budget the attempt is `TimedOut`;
//!    the charge may still settle later through the webhook
//!
//! Every path ends in [`PaymentService::apply_payment`], so the first caller
//! wins and the rest are no-ops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{PaymentError, VerificationError};
use crate::models::activity::{ActivityEvent, ActivityKind};
use crate::models::checkout::{
    AttemptState, ChargeStatus, CheckoutAttempt, ConfirmationPath, GatewayCharge,
    VerificationOutcome, build_reference, invoice_number_from_reference,
};
use crate::models::invoice::Invoice;
use crate::services::activity::ActivityEmitter;
use crate::services::gateway::PaymentGateway;
use crate::services::payment_service::{Applied, PaymentRequest, PaymentService};
use crate::store::LedgerStore;

/// Fixed-interval retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerificationSettings {
    /// First segment of every generated reference
    pub reference_prefix: String,
    /// Provider verify-by-reference calls
    pub verify: RetryPolicy,
    /// Polling of the stored invoice after verification gave up
    pub poll: RetryPolicy,
    /// Registered attempts older than this are pruned
    pub attempt_ttl: Duration,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            reference_prefix: "inv".to_string(),
            verify: RetryPolicy::new(3, Duration::from_secs(1)),
            poll: RetryPolicy::new(15, Duration::from_secs(2)),
            attempt_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// What the proactive phase concluded.
enum Proactive {
    Done(VerificationOutcome),
    /// Nothing conclusive; fall back to polling.
    Inconclusive,
    Cancelled,
}

#[derive(Clone)]
pub struct GatewayVerifier {
    gateway: Arc<dyn PaymentGateway>,
    payments: PaymentService,
    store: Arc<dyn LedgerStore>,
    emitter: Arc<dyn ActivityEmitter>,
    settings: Arc<VerificationSettings>,
    attempts: Arc<Mutex<HashMap<String, CheckoutAttempt>>>,
}

impl GatewayVerifier {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        payments: PaymentService,
        store: Arc<dyn LedgerStore>,
        emitter: Arc<dyn ActivityEmitter>,
        settings: VerificationSettings,
    ) -> Self {
        Self {
            gateway,
            payments,
            store,
            emitter,
            settings: Arc::new(settings),
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Snapshot of a registered attempt.
    pub fn attempt(&self, reference: &str) -> Option<CheckoutAttempt> {
        self.registry().get(reference).cloned()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, CheckoutAttempt>> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate a checkout amount and register a new attempt.
    ///
    /// `amount` defaults to the full outstanding balance.
    ///
    /// # Errors
    ///
    /// - `InvoiceNotFound`: unknown invoice number
    /// - `AlreadySettled`: nothing left to pay
    /// - `InvalidAmount`, `ExceedsBalance`, `BelowMinimum`: rejected before
    ///   the customer is sent to the provider
    pub async fn initiate_checkout(
        &self,
        invoice_number: &str,
        amount: Option<i64>,
    ) -> Result<CheckoutAttempt, PaymentError> {
        let invoice = self
            .store
            .get_by_number(invoice_number)
            .await?
            .ok_or(PaymentError::InvoiceNotFound)?;

        if invoice.is_settled() {
            return Err(PaymentError::AlreadySettled);
        }

        let balance = invoice.balance();
        let amount = amount.unwrap_or(balance);
        check_checkout_amount(&invoice, amount, self.payments.policy().gateway_minimum)?;

        let now = Utc::now();
        let attempt = CheckoutAttempt {
            reference: build_reference(&self.settings.reference_prefix, invoice.invoice_number(), now),
            invoice_id: invoice.id(),
            invoice_number: invoice.invoice_number().to_string(),
            amount,
            baseline_balance: balance,
            open_amount: false,
            state: AttemptState::Initiated,
            created_at: now,
            cancel: CancellationToken::new(),
        };

        let mut registry = self.registry();
        self.prune(&mut registry);
        registry.insert(attempt.reference.clone(), attempt.clone());
        drop(registry);

        tracing::info!(
            reference = %attempt.reference,
            invoice_number = %attempt.invoice_number,
            amount,
            balance,
            "Checkout initiated"
        );

        Ok(attempt)
    }

    fn prune(&self, registry: &mut HashMap<String, CheckoutAttempt>) {
        let ttl = chrono::Duration::from_std(self.settings.attempt_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = Utc::now() - ttl;
        let before = registry.len();
        registry.retain(|_, attempt| {
            let keep = attempt.created_at > cutoff;
            if !keep {
                attempt.cancel.cancel();
            }
            keep
        });
        let pruned = before - registry.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned stale checkout attempts");
        }
    }

    /// Stop a running confirmation and forget the attempt.
    ///
    /// The invoice is left unchanged. Returns `false` if the reference is not
    /// a registered attempt.
    pub fn cancel_checkout(&self, reference: &str) -> bool {
        match self.registry().remove(reference) {
            Some(attempt) => {
                attempt.cancel.cancel();
                tracing::info!(%reference, "Checkout cancelled");
                true
            }
            None => false,
        }
    }

    /// Run the confirmation protocol for a reference after a client callback.
    ///
    /// The charge is expected to equal the registered attempt amount, else
    /// `expected_amount`. For a reference this process never registered and
    /// with no expected amount, any charge that passes the checkout amount
    /// rules is accepted.
    ///
    /// # Errors
    ///
    /// Only lookups fail: `InvoiceNotFound` when the reference cannot be tied
    /// to an existing invoice, or a storage error. Provider trouble degrades
    /// to polling and finally to a `TimedOut` outcome.
    pub async fn confirm_payment(
        &self,
        reference: &str,
        expected_amount: Option<i64>,
    ) -> Result<VerificationOutcome, PaymentError> {
        if let Some(invoice) = self.store.find_by_reference(reference).await? {
            tracing::info!(%reference, "Reference already on the ledger");
            self.forget(reference);
            return Ok(VerificationOutcome::Verified {
                invoice,
                path: ConfirmationPath::AlreadyApplied,
            });
        }

        let attempt = self.enter_confirmation(reference, expected_amount).await?;

        let outcome = match self.verify_proactively(&attempt).await? {
            Proactive::Done(outcome) => outcome,
            Proactive::Cancelled => self.cancelled(&attempt).await?,
            Proactive::Inconclusive => self.poll_ledger(&attempt).await?,
        };

        Ok(self.finish(reference, outcome))
    }

    /// Move the attempt into `AwaitingConfirmation`, registering one for
    /// references this process never issued (restart, other instance).
    async fn enter_confirmation(
        &self,
        reference: &str,
        expected_amount: Option<i64>,
    ) -> Result<CheckoutAttempt, PaymentError> {
        {
            let mut registry = self.registry();
            if let Some(attempt) = registry.get_mut(reference) {
                if attempt.state.can_transition_to(AttemptState::AwaitingConfirmation) {
                    attempt.state = AttemptState::AwaitingConfirmation;
                }
                return Ok(attempt.clone());
            }
        }

        let invoice = self
            .invoice_for_reference(reference)
            .await?
            .ok_or(PaymentError::InvoiceNotFound)?;

        let balance = invoice.balance();
        let attempt = CheckoutAttempt {
            reference: reference.to_string(),
            invoice_id: invoice.id(),
            invoice_number: invoice.invoice_number().to_string(),
            amount: expected_amount.unwrap_or(balance),
            baseline_balance: balance,
            open_amount: expected_amount.is_none(),
            state: AttemptState::AwaitingConfirmation,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
        };

        tracing::debug!(%reference, invoice_id = %attempt.invoice_id, "Tracking unregistered reference");

        Ok(self
            .registry()
            .entry(reference.to_string())
            .or_insert(attempt)
            .clone())
    }

    /// Invoice a reference points at: registered attempt first, then the
    /// invoice number embedded in the reference.
    async fn invoice_for_reference(&self, reference: &str) -> Result<Option<Invoice>, PaymentError> {
        let registered = self.registry().get(reference).map(|a| a.invoice_id);
        if let Some(invoice_id) = registered {
            return Ok(self.store.get(invoice_id).await?);
        }

        match invoice_number_from_reference(&self.settings.reference_prefix, reference) {
            Some(number) => Ok(self.store.get_by_number(number).await?),
            None => Ok(None),
        }
    }

    async fn verify_proactively(&self, attempt: &CheckoutAttempt) -> Result<Proactive, PaymentError> {
        let policy = self.settings.verify;
        let reference = attempt.reference.as_str();

        for round in 1..=policy.max_attempts {
            if attempt.cancel.is_cancelled() {
                return Ok(Proactive::Cancelled);
            }

            match self.gateway.verify(reference).await {
                Ok(charge) if charge.status == ChargeStatus::Success => {
                    if let Some(outcome) = self.settle(attempt, charge).await? {
                        return Ok(Proactive::Done(outcome));
                    }
                    return Ok(Proactive::Inconclusive);
                }
                Ok(charge) if charge.status.is_inconclusive() => {
                    tracing::debug!(%reference, round, status = %charge.status, "Charge not settled yet");
                }
                Ok(charge) => {
                    tracing::info!(%reference, status = %charge.status, "Provider reports charge did not succeed");
                    let invoice = self.current_invoice(attempt).await?;
                    return Ok(Proactive::Done(VerificationOutcome::Failed {
                        invoice,
                        reason: format!("charge {}", charge.status),
                    }));
                }
                Err(e) => {
                    tracing::warn!(%reference, round, error = %e, "Gateway verification failed");
                }
            }

            if round < policy.max_attempts && !pause(&attempt.cancel, policy.interval).await {
                return Ok(Proactive::Cancelled);
            }
        }

        Ok(Proactive::Inconclusive)
    }

    /// Apply a successful charge for a tracked attempt.
    ///
    /// Returns `None` when the apply hit a transient failure and the ledger
    /// should be polled instead.
    async fn settle(
        &self,
        attempt: &CheckoutAttempt,
        charge: GatewayCharge,
    ) -> Result<Option<VerificationOutcome>, PaymentError> {
        let mismatch = if attempt.open_amount {
            let invoice = self.current_invoice(attempt).await?;
            check_checkout_amount(&invoice, charge.amount, self.payments.policy().gateway_minimum)
                .err()
                .map(|e| format!("charged {}: {}", charge.amount, e))
        } else if charge.amount != attempt.amount {
            Some(format!(
                "charged {} but expected {}",
                charge.amount, attempt.amount
            ))
        } else {
            None
        };

        if let Some(reason) = mismatch {
            // another path may have applied it after this attempt was registered
            if let Some(invoice) = self.store.find_by_reference(&charge.reference).await? {
                if invoice.id() == attempt.invoice_id {
                    return Ok(Some(VerificationOutcome::Verified {
                        invoice,
                        path: ConfirmationPath::AlreadyApplied,
                    }));
                }
            }
            let invoice = self.current_invoice(attempt).await?;
            self.report_unreconciled(&invoice, &charge.reference, charge.amount, &reason);
            return Ok(Some(VerificationOutcome::Failed { invoice, reason }));
        }

        let request = PaymentRequest::gateway(charge.amount, charge.reference.clone());
        match self.payments.apply_payment(attempt.invoice_id, request).await {
            Ok(applied) => {
                let path = if applied.is_new() {
                    ConfirmationPath::Proactive
                } else {
                    ConfirmationPath::AlreadyApplied
                };
                Ok(Some(VerificationOutcome::Verified {
                    invoice: applied.into_invoice(),
                    path,
                }))
            }
            Err(PaymentError::InvoiceNotFound) => Err(PaymentError::InvoiceNotFound),
            Err(e @ (PaymentError::ConcurrencyConflict | PaymentError::Store(_))) => {
                tracing::warn!(reference = %charge.reference, error = %e, "Could not apply verified charge, polling");
                Ok(None)
            }
            Err(e) => {
                let invoice = self.current_invoice(attempt).await?;
                let reason = e.to_string();
                self.report_unreconciled(&invoice, &charge.reference, charge.amount, &reason);
                Ok(Some(VerificationOutcome::Failed { invoice, reason }))
            }
        }
    }

    /// Watch the stored invoice for the payment to land through another path.
    async fn poll_ledger(&self, attempt: &CheckoutAttempt) -> Result<VerificationOutcome, PaymentError> {
        let policy = self.settings.poll;

        for round in 1..=policy.max_attempts {
            if !pause(&attempt.cancel, policy.interval).await {
                return self.cancelled(attempt).await;
            }

            let invoice = self.current_invoice(attempt).await?;
            if invoice.has_reference(&attempt.reference) {
                tracing::info!(
                    reference = %attempt.reference,
                    round,
                    balance = invoice.display_balance(),
                    "Payment observed while polling"
                );
                return Ok(VerificationOutcome::Verified {
                    invoice,
                    path: ConfirmationPath::Polling,
                });
            }
            // another payment moved the ledger; this reference stays unconfirmed
            if invoice.balance() < attempt.baseline_balance || invoice.is_settled() {
                tracing::info!(
                    reference = %attempt.reference,
                    round,
                    balance = invoice.display_balance(),
                    "Ledger changed without this reference"
                );
                return Ok(self.delayed(attempt, invoice, true));
            }
            tracing::debug!(reference = %attempt.reference, round, "Payment not visible yet");
        }

        let invoice = self.current_invoice(attempt).await?;
        Ok(self.delayed(attempt, invoice, false))
    }

    fn delayed(&self, attempt: &CheckoutAttempt, invoice: Invoice, ledger_changed: bool) -> VerificationOutcome {
        tracing::warn!(
            reference = %attempt.reference,
            invoice_id = %attempt.invoice_id,
            ledger_changed,
            "Verification delayed, giving up polling"
        );
        self.emitter.emit(ActivityEvent::new(
            ActivityKind::VerificationDelayed,
            &invoice,
            json!({
                "reference": attempt.reference,
                "amount": attempt.amount,
                "ledger_changed": ledger_changed,
            }),
        ));
        VerificationOutcome::TimedOut { invoice }
    }

    async fn current_invoice(&self, attempt: &CheckoutAttempt) -> Result<Invoice, PaymentError> {
        self.store
            .get(attempt.invoice_id)
            .await?
            .ok_or(PaymentError::InvoiceNotFound)
    }

    async fn cancelled(&self, attempt: &CheckoutAttempt) -> Result<VerificationOutcome, PaymentError> {
        tracing::info!(reference = %attempt.reference, "Confirmation stopped by cancellation");
        Ok(VerificationOutcome::Cancelled {
            invoice: self.store.get(attempt.invoice_id).await?,
        })
    }

    /// Record the outcome on the attempt registry.
    fn finish(&self, reference: &str, outcome: VerificationOutcome) -> VerificationOutcome {
        let state = outcome.state();
        let mut registry = self.registry();
        if state.is_terminal() {
            registry.remove(reference);
        } else if let Some(attempt) = registry.get_mut(reference) {
            attempt.state = state;
        }
        outcome
    }

    fn forget(&self, reference: &str) {
        self.registry().remove(reference);
    }

    fn report_unreconciled(&self, invoice: &Invoice, reference: &str, charged: i64, reason: &str) {
        tracing::error!(
            %reference,
            invoice_id = %invoice.id(),
            charged,
            reason,
            "Verified charge could not be applied"
        );
        self.emitter.emit(ActivityEvent::new(
            ActivityKind::ChargeUnreconciled,
            invoice,
            json!({
                "reference": reference,
                "charged": charged,
                "reason": reason,
            }),
        ));
    }

    /// Record a provider charge that cannot be turned into a ledger entry at
    /// all, e.g. an amount that does not convert to invoice units.
    ///
    /// `charged` is the provider's raw amount. Nothing is recorded when the
    /// reference does not resolve to an invoice.
    pub async fn report_unusable_charge(&self, reference: &str, charged: i64, reason: &str) {
        match self.invoice_for_reference(reference).await {
            Ok(Some(invoice)) => self.report_unreconciled(&invoice, reference, charged, reason),
            Ok(None) => {
                tracing::warn!(%reference, charged, reason, "Unusable charge for an unknown reference");
            }
            Err(e) => {
                tracing::error!(%reference, error = %e, "Could not resolve invoice for unusable charge");
            }
        }
    }

    /// Re-verify a reference with the provider and apply it.
    ///
    /// With `scope` set, the reference must resolve to that invoice; anything
    /// else is reported as unknown. A reference that names no invoice at all
    /// is tied to the scoped invoice.
    pub async fn reconcile_reference(
        &self,
        reference: &str,
        scope: Option<Uuid>,
    ) -> Result<Applied, VerificationError> {
        if let Some(invoice) = self.store.find_by_reference(reference).await.map_err(PaymentError::from)? {
            if scope.is_some_and(|invoice_id| invoice_id != invoice.id()) {
                return Err(VerificationError::UnknownReference(reference.to_string()));
            }
            self.forget(reference);
            return Ok(Applied::AlreadyApplied(invoice));
        }

        let invoice = self.scoped_invoice(reference, scope).await?;
        let charge = self.gateway.verify(reference).await?;
        if charge.status != ChargeStatus::Success {
            return Err(VerificationError::ChargeNotSuccessful(charge.status));
        }

        self.apply_charge(invoice, charge).await
    }

    /// Apply a charge delivered by a signed provider webhook.
    pub async fn apply_webhook_charge(&self, charge: GatewayCharge) -> Result<Applied, VerificationError> {
        if charge.status != ChargeStatus::Success {
            return Err(VerificationError::ChargeNotSuccessful(charge.status));
        }
        if let Some(invoice) = self
            .store
            .find_by_reference(&charge.reference)
            .await
            .map_err(PaymentError::from)?
        {
            self.forget(&charge.reference);
            return Ok(Applied::AlreadyApplied(invoice));
        }

        let invoice = self.scoped_invoice(&charge.reference, None).await?;
        self.apply_charge(invoice, charge).await
    }

    async fn scoped_invoice(&self, reference: &str, scope: Option<Uuid>) -> Result<Invoice, VerificationError> {
        let resolved = match self.invoice_for_reference(reference).await? {
            Some(invoice) => Some(invoice),
            // references issued outside checkout belong to the invoice the owner named
            None => match scope {
                Some(invoice_id) => self.store.get(invoice_id).await.map_err(PaymentError::from)?,
                None => None,
            },
        };
        let invoice = resolved.ok_or_else(|| VerificationError::UnknownReference(reference.to_string()))?;

        if scope.is_some_and(|invoice_id| invoice_id != invoice.id()) {
            return Err(VerificationError::UnknownReference(reference.to_string()));
        }
        Ok(invoice)
    }

    async fn apply_charge(&self, invoice: Invoice, charge: GatewayCharge) -> Result<Applied, VerificationError> {
        let expected = self
            .registry()
            .get(&charge.reference)
            .filter(|a| !a.open_amount)
            .map(|a| a.amount);
        if let Some(expected) = expected {
            if expected != charge.amount {
                let err = VerificationError::AmountMismatch {
                    expected,
                    charged: charge.amount,
                };
                self.report_unreconciled(&invoice, &charge.reference, charge.amount, &err.to_string());
                return Err(err);
            }
        }

        let request = PaymentRequest::gateway(charge.amount, charge.reference.clone());
        match self.payments.apply_payment(invoice.id(), request).await {
            Ok(applied) => {
                self.forget(&charge.reference);
                Ok(applied)
            }
            Err(e @ (PaymentError::ConcurrencyConflict | PaymentError::Store(_) | PaymentError::InvoiceNotFound)) => {
                Err(e.into())
            }
            Err(e) => {
                self.report_unreconciled(&invoice, &charge.reference, charge.amount, &e.to_string());
                Err(e.into())
            }
        }
    }
}

/// Checkout amount rules: positive, within the balance, and at least the
/// gateway minimum unless it clears the balance.
fn check_checkout_amount(invoice: &Invoice, amount: i64, minimum: i64) -> Result<(), PaymentError> {
    let balance = invoice.balance();
    if amount <= 0 {
        return Err(PaymentError::InvalidAmount);
    }
    if amount > balance {
        return Err(PaymentError::ExceedsBalance {
            balance: invoice.display_balance(),
            status: invoice.status(),
        });
    }
    if amount < minimum && amount != balance {
        return Err(PaymentError::BelowMinimum { minimum });
    }
    Ok(())
}

/// Sleep for `interval` unless cancelled first. Returns `false` on cancellation.
async fn pause(token: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}
