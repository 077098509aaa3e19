#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use invoice_ledger_server::error::GatewayError;
use invoice_ledger_server::models::checkout::{ChargeStatus, GatewayCharge};
use invoice_ledger_server::models::invoice::{CreateInvoiceRequest, Invoice};
use invoice_ledger_server::services::activity::{ActivityEmitter, MemoryEmitter};
use invoice_ledger_server::services::gateway::PaymentGateway;
use invoice_ledger_server::services::invoice_service::InvoiceService;
use invoice_ledger_server::services::payment_service::{PaymentPolicy, PaymentService};
use invoice_ledger_server::services::verification_service::{
    GatewayVerifier, RetryPolicy, VerificationSettings,
};
use invoice_ledger_server::store::{LedgerStore, MemoryLedgerStore};

/// One scripted provider answer.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Charge(ChargeStatus, i64),
    Unavailable,
}

/// Fake provider: answers from a script, then repeats `fallback`.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(script: impl IntoIterator<Item = Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(reply: Reply) -> Self {
        Self::new([], reply)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn verify(&self, reference: &str) -> Result<GatewayCharge, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        match reply {
            Reply::Charge(status, amount) => Ok(GatewayCharge {
                status,
                amount,
                reference: reference.to_string(),
            }),
            Reply::Unavailable => Err(GatewayError::Unavailable("connection reset".into())),
        }
    }
}

pub struct Harness {
    pub store: Arc<dyn LedgerStore>,
    pub emitter: MemoryEmitter,
    pub payments: PaymentService,
    pub invoices: InvoiceService,
    pub verifier: GatewayVerifier,
    pub gateway: Arc<ScriptedGateway>,
}

/// Millisecond budgets so protocol tests run fast.
pub fn fast_settings() -> VerificationSettings {
    VerificationSettings {
        reference_prefix: "inv".to_string(),
        verify: RetryPolicy::new(2, Duration::from_millis(5)),
        poll: RetryPolicy::new(5, Duration::from_millis(5)),
        attempt_ttl: Duration::from_secs(3600),
    }
}

pub fn harness(gateway: ScriptedGateway) -> Harness {
    harness_with(gateway, PaymentPolicy::default(), fast_settings())
}

pub fn harness_with(
    gateway: ScriptedGateway,
    policy: PaymentPolicy,
    settings: VerificationSettings,
) -> Harness {
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
    let emitter = MemoryEmitter::new();
    let shared: Arc<dyn ActivityEmitter> = Arc::new(emitter.clone());
    let gateway = Arc::new(gateway);

    let payments = PaymentService::new(store.clone(), shared.clone(), policy);
    let invoices = InvoiceService::new(
        store.clone(),
        payments.clone(),
        shared.clone(),
        "https://pay.example",
    );
    let verifier = GatewayVerifier::new(
        gateway.clone(),
        payments.clone(),
        store.clone(),
        shared,
        settings,
    );

    Harness {
        store,
        emitter,
        payments,
        invoices,
        verifier,
        gateway,
    }
}

impl Harness {
    pub async fn invoice(&self, total: i64) -> Invoice {
        self.invoices
            .create_invoice(
                Uuid::new_v4(),
                CreateInvoiceRequest {
                    customer_name: "Ada Obi".to_string(),
                    customer_phone: Some("+2348012345678".to_string()),
                    description: Some("Catering".to_string()),
                    due_date: None,
                    total_amount: total,
                },
            )
            .await
            .unwrap()
    }

    pub async fn reload(&self, invoice: &Invoice) -> Invoice {
        self.store.get(invoice.id()).await.unwrap().unwrap()
    }
}
