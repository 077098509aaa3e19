mod common;

use common::{Reply, ScriptedGateway, fast_settings, harness, harness_with};
use invoice_ledger_server::error::PaymentError;
use invoice_ledger_server::models::activity::ActivityKind;
use invoice_ledger_server::models::checkout::ChargeStatus;
use invoice_ledger_server::models::invoice::InvoiceStatus;
use invoice_ledger_server::services::payment_service::{Applied, PaymentPolicy, PaymentRequest};

fn idle_gateway() -> ScriptedGateway {
    ScriptedGateway::always(Reply::Charge(ChargeStatus::Pending, 0))
}

#[tokio::test]
async fn status_follows_the_ledger() {
    let h = harness(idle_gateway());
    let invoice = h.invoice(1000).await;
    assert_eq!(invoice.status(), InvoiceStatus::Unpaid);

    let partial = h
        .payments
        .apply_payment(invoice.id(), PaymentRequest::manual(400, "Cash"))
        .await
        .unwrap()
        .into_invoice();
    assert_eq!(partial.status(), InvoiceStatus::Partial);
    assert_eq!(partial.balance(), 600);

    let paid = h
        .payments
        .apply_payment(invoice.id(), PaymentRequest::manual(600, "Bank transfer"))
        .await
        .unwrap()
        .into_invoice();
    assert_eq!(paid.status(), InvoiceStatus::Paid);
    assert_eq!(paid.balance(), 0);
    assert_eq!(paid.payments().len(), 2);
    assert_eq!(h.emitter.count(ActivityKind::PaymentRecorded), 2);

    let last = h.emitter.events().pop().unwrap();
    assert_eq!(last.kind, ActivityKind::PaymentRecorded);
    assert_eq!(last.metadata["balance"], 0);
    assert_eq!(last.metadata["status"], "paid");
}

#[tokio::test]
async fn overshoot_is_rejected_with_true_balance() {
    let h = harness(idle_gateway());
    let invoice = h.invoice(1000).await;
    h.payments
        .apply_payment(invoice.id(), PaymentRequest::manual(800, "Cash"))
        .await
        .unwrap();

    let err = h
        .payments
        .apply_payment(invoice.id(), PaymentRequest::manual(300, "Cash"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::ExceedsBalance {
            balance: 200,
            status: InvoiceStatus::Partial
        }
    ));

    let stored = h.reload(&invoice).await;
    assert_eq!(stored.amount_paid(), 800);
    assert_eq!(stored.payments().len(), 1);
}

#[tokio::test]
async fn payments_on_settled_invoice_are_rejected() {
    let h = harness(idle_gateway());
    let invoice = h.invoice(1000).await;
    h.payments
        .apply_payment(invoice.id(), PaymentRequest::manual(1000, "Cash"))
        .await
        .unwrap();

    let err = h
        .payments
        .apply_payment(invoice.id(), PaymentRequest::manual(1, "Cash"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::ExceedsBalance {
            balance: 0,
            status: InvoiceStatus::Paid
        }
    ));
}

#[tokio::test]
async fn same_reference_applies_once() {
    let h = harness(idle_gateway());
    let invoice = h.invoice(50000).await;

    let first = h
        .payments
        .apply_payment(invoice.id(), PaymentRequest::gateway(20000, "REF1"))
        .await
        .unwrap();
    let second = h
        .payments
        .apply_payment(invoice.id(), PaymentRequest::gateway(20000, "REF1"))
        .await
        .unwrap();

    assert!(first.is_new());
    assert!(matches!(second, Applied::AlreadyApplied(_)));
    assert_eq!(second.invoice().payments().len(), 1);
    assert_eq!(second.invoice().balance(), 30000);
    assert_eq!(h.emitter.count(ActivityKind::PaymentRecorded), 1);
}

#[tokio::test]
async fn reference_cannot_move_between_invoices() {
    let h = harness(idle_gateway());
    let first = h.invoice(1000).await;
    let second = h.invoice(1000).await;

    h.payments
        .apply_payment(first.id(), PaymentRequest::gateway(500, "REF-SHARED"))
        .await
        .unwrap();

    let err = h
        .payments
        .apply_payment(second.id(), PaymentRequest::gateway(500, "REF-SHARED"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::ReferenceInUse(r) if r == "REF-SHARED"));
    assert_eq!(h.reload(&second).await.amount_paid(), 0);
}

#[tokio::test]
async fn gateway_floor_applies_only_to_partial_payments() {
    let h = harness(idle_gateway());
    let invoice = h.invoice(1050).await;

    let err = h
        .payments
        .apply_payment(invoice.id(), PaymentRequest::gateway(50, "REF-SMALL"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::BelowMinimum { minimum: 100 }));

    h.payments
        .apply_payment(invoice.id(), PaymentRequest::gateway(1000, "REF-BIG"))
        .await
        .unwrap();

    // the last 50 clears the balance, so the floor does not apply
    let paid = h
        .payments
        .apply_payment(invoice.id(), PaymentRequest::gateway(50, "REF-REST"))
        .await
        .unwrap()
        .into_invoice();
    assert_eq!(paid.status(), InvoiceStatus::Paid);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let h = harness(idle_gateway());
    let invoice = h.invoice(1000).await;

    assert!(matches!(
        h.payments
            .apply_payment(invoice.id(), PaymentRequest::manual(0, "Cash"))
            .await,
        Err(PaymentError::InvalidAmount)
    ));
    assert!(matches!(
        h.payments
            .apply_payment(invoice.id(), PaymentRequest::manual(-5, "Cash"))
            .await,
        Err(PaymentError::InvalidAmount)
    ));
    assert!(matches!(
        h.payments
            .apply_payment(invoice.id(), PaymentRequest::manual(100, "  "))
            .await,
        Err(PaymentError::MissingMethod)
    ));
    assert!(matches!(
        h.payments
            .apply_payment(invoice.id(), PaymentRequest::gateway(100, ""))
            .await,
        Err(PaymentError::MissingReference)
    ));
    assert!(matches!(
        h.payments
            .apply_payment(uuid::Uuid::new_v4(), PaymentRequest::manual(100, "Cash"))
            .await,
        Err(PaymentError::InvoiceNotFound)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_same_reference_leaves_one_entry() {
    let h = harness(idle_gateway());
    let invoice = h.invoice(50000).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let payments = h.payments.clone();
            let id = invoice.id();
            tokio::spawn(async move {
                payments
                    .apply_payment(id, PaymentRequest::gateway(20000, "REF1"))
                    .await
            })
        })
        .collect();

    let mut recorded = 0;
    for task in tasks {
        let applied = task.await.unwrap().expect("every caller succeeds");
        if applied.is_new() {
            recorded += 1;
        }
    }

    assert_eq!(recorded, 1);
    let stored = h.reload(&invoice).await;
    assert_eq!(stored.payments().len(), 1);
    assert_eq!(stored.balance(), 30000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_distinct_payments_never_overshoot() {
    let policy = PaymentPolicy {
        conflict_retries: 50,
        ..PaymentPolicy::default()
    };
    let h = harness_with(idle_gateway(), policy, fast_settings());
    let invoice = h.invoice(1000).await;

    // 12 payments of 100 race for a balance of 1000
    let tasks: Vec<_> = (0..12)
        .map(|i| {
            let payments = h.payments.clone();
            let id = invoice.id();
            tokio::spawn(async move {
                payments
                    .apply_payment(id, PaymentRequest::gateway(100, format!("REF-{i}")))
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(PaymentError::ExceedsBalance { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(accepted, 10);
    assert_eq!(rejected, 2);
    let stored = h.reload(&invoice).await;
    assert_eq!(stored.amount_paid(), 1000);
    assert_eq!(stored.status(), InvoiceStatus::Paid);
}

#[tokio::test]
async fn deleted_invoice_takes_its_payments() {
    let h = harness(idle_gateway());
    let invoice = h.invoice(1000).await;
    h.payments
        .apply_payment(invoice.id(), PaymentRequest::gateway(400, "REF-GONE"))
        .await
        .unwrap();

    h.invoices
        .delete_invoice(invoice.business_id(), invoice.id())
        .await
        .unwrap();

    assert!(h.store.get(invoice.id()).await.unwrap().is_none());
    assert!(h.store.find_by_reference("REF-GONE").await.unwrap().is_none());
    assert_eq!(h.emitter.count(ActivityKind::InvoiceDeleted), 1);
}
