mod common;

use std::time::Duration;

use common::{Reply, ScriptedGateway, fast_settings, harness, harness_with};
use invoice_ledger_server::error::{PaymentError, VerificationError};
use invoice_ledger_server::models::activity::ActivityKind;
use invoice_ledger_server::models::checkout::{
    AttemptState, ChargeStatus, ConfirmationPath, GatewayCharge, VerificationOutcome,
};
use invoice_ledger_server::models::invoice::InvoiceStatus;
use invoice_ledger_server::services::payment_service::{PaymentPolicy, PaymentRequest};
use invoice_ledger_server::services::verification_service::RetryPolicy;

fn success(amount: i64) -> Reply {
    Reply::Charge(ChargeStatus::Success, amount)
}

#[tokio::test]
async fn proactive_verification_applies_the_charge() {
    let h = harness(ScriptedGateway::always(success(20000)));
    let invoice = h.invoice(50000).await;

    let attempt = h
        .verifier
        .initiate_checkout(invoice.invoice_number(), Some(20000))
        .await
        .unwrap();
    let outcome = h
        .verifier
        .confirm_payment(&attempt.reference, None)
        .await
        .unwrap();

    match outcome {
        VerificationOutcome::Verified { invoice, path } => {
            assert_eq!(path, ConfirmationPath::Proactive);
            assert_eq!(invoice.status(), InvoiceStatus::Partial);
            assert_eq!(invoice.balance(), 30000);
            assert!(invoice.has_reference(&attempt.reference));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(h.verifier.attempt(&attempt.reference).is_none());
}

#[tokio::test]
async fn transient_gateway_errors_are_retried() {
    let h = harness(ScriptedGateway::new([Reply::Unavailable], success(50000)));
    let invoice = h.invoice(50000).await;

    let attempt = h
        .verifier
        .initiate_checkout(invoice.invoice_number(), None)
        .await
        .unwrap();
    let outcome = h
        .verifier
        .confirm_payment(&attempt.reference, None)
        .await
        .unwrap();

    assert_eq!(outcome.state(), AttemptState::Verified);
    assert_eq!(outcome.invoice().unwrap().status(), InvoiceStatus::Paid);
    assert_eq!(h.gateway.calls(), 2);
}

#[tokio::test]
async fn declined_charge_fails_without_touching_the_invoice() {
    let h = harness(ScriptedGateway::always(Reply::Charge(ChargeStatus::Failed, 20000)));
    let invoice = h.invoice(50000).await;

    let attempt = h
        .verifier
        .initiate_checkout(invoice.invoice_number(), Some(20000))
        .await
        .unwrap();
    let outcome = h
        .verifier
        .confirm_payment(&attempt.reference, None)
        .await
        .unwrap();

    assert_eq!(outcome.state(), AttemptState::Failed);
    assert_eq!(h.reload(&invoice).await.balance(), 50000);
    assert_eq!(h.emitter.count(ActivityKind::PaymentRecorded), 0);
}

#[tokio::test]
async fn amount_mismatch_is_flagged_for_follow_up() {
    let h = harness(ScriptedGateway::always(success(5000)));
    let invoice = h.invoice(50000).await;

    let attempt = h
        .verifier
        .initiate_checkout(invoice.invoice_number(), Some(20000))
        .await
        .unwrap();
    let outcome = h
        .verifier
        .confirm_payment(&attempt.reference, None)
        .await
        .unwrap();

    assert_eq!(outcome.state(), AttemptState::Failed);
    assert_eq!(h.reload(&invoice).await.balance(), 50000);
    assert_eq!(h.emitter.count(ActivityKind::ChargeUnreconciled), 1);
}

#[tokio::test]
async fn polling_picks_up_a_webhook_applied_payment() {
    let mut settings = fast_settings();
    settings.verify = RetryPolicy::new(1, Duration::from_millis(1));
    settings.poll = RetryPolicy::new(50, Duration::from_millis(10));
    let h = harness_with(
        ScriptedGateway::always(Reply::Unavailable),
        PaymentPolicy::default(),
        settings,
    );
    let invoice = h.invoice(50000).await;
    let attempt = h
        .verifier
        .initiate_checkout(invoice.invoice_number(), Some(20000))
        .await
        .unwrap();

    let verifier = h.verifier.clone();
    let reference = attempt.reference.clone();
    let confirm = tokio::spawn(async move { verifier.confirm_payment(&reference, None).await });

    tokio::time::sleep(Duration::from_millis(40)).await;
    h.verifier
        .apply_webhook_charge(GatewayCharge {
            status: ChargeStatus::Success,
            amount: 20000,
            reference: attempt.reference.clone(),
        })
        .await
        .unwrap();

    let outcome = confirm.await.unwrap().unwrap();
    match outcome {
        VerificationOutcome::Verified { invoice, path } => {
            assert_eq!(path, ConfirmationPath::Polling);
            assert_eq!(invoice.balance(), 30000);
            assert_eq!(invoice.payments().len(), 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn unrelated_payment_during_polling_does_not_confirm_the_attempt() {
    let mut settings = fast_settings();
    settings.verify = RetryPolicy::new(1, Duration::from_millis(1));
    settings.poll = RetryPolicy::new(50, Duration::from_millis(10));
    let h = harness_with(
        ScriptedGateway::always(Reply::Unavailable),
        PaymentPolicy::default(),
        settings,
    );
    let invoice = h.invoice(50000).await;
    let attempt = h
        .verifier
        .initiate_checkout(invoice.invoice_number(), Some(20000))
        .await
        .unwrap();

    let verifier = h.verifier.clone();
    let reference = attempt.reference.clone();
    let confirm = tokio::spawn(async move { verifier.confirm_payment(&reference, None).await });

    tokio::time::sleep(Duration::from_millis(40)).await;
    h.payments
        .apply_payment(invoice.id(), PaymentRequest::manual(10000, "Cash"))
        .await
        .unwrap();

    let outcome = confirm.await.unwrap().unwrap();
    match outcome {
        VerificationOutcome::TimedOut { invoice } => {
            assert_eq!(invoice.balance(), 40000);
            assert!(!invoice.has_reference(&attempt.reference));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.emitter.count(ActivityKind::VerificationDelayed), 1);
    assert_eq!(
        h.verifier.attempt(&attempt.reference).map(|a| a.state),
        Some(AttemptState::TimedOut)
    );
}

#[tokio::test]
async fn cancellation_stops_polling_and_leaves_invoice_unchanged() {
    let mut settings = fast_settings();
    settings.poll = RetryPolicy::new(1000, Duration::from_millis(20));
    let h = harness_with(
        ScriptedGateway::always(Reply::Charge(ChargeStatus::Pending, 0)),
        PaymentPolicy::default(),
        settings,
    );
    let invoice = h.invoice(50000).await;
    let attempt = h
        .verifier
        .initiate_checkout(invoice.invoice_number(), Some(20000))
        .await
        .unwrap();

    let verifier = h.verifier.clone();
    let reference = attempt.reference.clone();
    let confirm = tokio::spawn(async move { verifier.confirm_payment(&reference, None).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.verifier.cancel_checkout(&attempt.reference));

    let outcome = tokio::time::timeout(Duration::from_secs(2), confirm)
        .await
        .expect("cancellation ends the loop promptly")
        .unwrap()
        .unwrap();

    assert_eq!(outcome.state(), AttemptState::Cancelled);
    assert_eq!(h.reload(&invoice).await, invoice);
}

#[tokio::test]
async fn exhausted_budget_times_out_and_recheck_can_still_verify() {
    let h = harness(ScriptedGateway::always(Reply::Unavailable));
    let invoice = h.invoice(50000).await;
    let attempt = h
        .verifier
        .initiate_checkout(invoice.invoice_number(), Some(20000))
        .await
        .unwrap();

    let outcome = h
        .verifier
        .confirm_payment(&attempt.reference, None)
        .await
        .unwrap();
    assert_eq!(outcome.state(), AttemptState::TimedOut);
    assert_eq!(h.emitter.count(ActivityKind::VerificationDelayed), 1);
    assert_eq!(
        h.verifier.attempt(&attempt.reference).map(|a| a.state),
        Some(AttemptState::TimedOut)
    );

    // the charge settles later through the provider webhook
    h.verifier
        .apply_webhook_charge(GatewayCharge {
            status: ChargeStatus::Success,
            amount: 20000,
            reference: attempt.reference.clone(),
        })
        .await
        .unwrap();

    let recheck = h
        .verifier
        .confirm_payment(&attempt.reference, None)
        .await
        .unwrap();
    match recheck {
        VerificationOutcome::Verified { path, invoice } => {
            assert_eq!(path, ConfirmationPath::AlreadyApplied);
            assert_eq!(invoice.balance(), 30000);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn unregistered_reference_is_resolved_from_its_invoice_number() {
    let h = harness(ScriptedGateway::always(success(10000)));
    let invoice = h.invoice(50000).await;
    // issued by another instance before a restart
    let reference = format!("inv_{}_1760860800000042", invoice.invoice_number());

    let outcome = h
        .verifier
        .confirm_payment(&reference, Some(10000))
        .await
        .unwrap();

    assert_eq!(outcome.state(), AttemptState::Verified);
    assert_eq!(outcome.invoice().unwrap().balance(), 40000);
}

#[tokio::test]
async fn unregistered_partial_charge_is_applied_without_expected_amount() {
    let h = harness(ScriptedGateway::always(success(20000)));
    let invoice = h.invoice(50000).await;
    let reference = format!("inv_{}_1760860800000123", invoice.invoice_number());

    let outcome = h.verifier.confirm_payment(&reference, None).await.unwrap();

    match outcome {
        VerificationOutcome::Verified { invoice, path } => {
            assert_eq!(path, ConfirmationPath::Proactive);
            assert_eq!(invoice.balance(), 30000);
            assert!(invoice.has_reference(&reference));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.emitter.count(ActivityKind::ChargeUnreconciled), 0);
}

#[tokio::test]
async fn unregistered_charge_below_minimum_is_flagged() {
    let h = harness(ScriptedGateway::always(success(50)));
    let invoice = h.invoice(50000).await;
    let reference = format!("inv_{}_1760860800000124", invoice.invoice_number());

    let outcome = h.verifier.confirm_payment(&reference, None).await.unwrap();

    assert_eq!(outcome.state(), AttemptState::Failed);
    assert_eq!(outcome.invoice().unwrap().balance(), 50000);
    assert_eq!(h.emitter.count(ActivityKind::ChargeUnreconciled), 1);
}

#[tokio::test]
async fn checkout_is_refused_for_paid_invoices() {
    let h = harness(ScriptedGateway::always(success(0)));
    let invoice = h.invoice(1000).await;
    h.payments
        .apply_payment(invoice.id(), PaymentRequest::manual(1000, "Cash"))
        .await
        .unwrap();

    assert!(matches!(
        h.verifier
            .initiate_checkout(invoice.invoice_number(), None)
            .await,
        Err(PaymentError::AlreadySettled)
    ));
}

#[tokio::test]
async fn reconcile_is_scoped_to_the_invoice() {
    let h = harness(ScriptedGateway::always(success(20000)));
    let invoice = h.invoice(50000).await;
    let other = h.invoice(50000).await;
    let attempt = h
        .verifier
        .initiate_checkout(invoice.invoice_number(), Some(20000))
        .await
        .unwrap();

    let err = h
        .verifier
        .reconcile_reference(&attempt.reference, Some(other.id()))
        .await
        .unwrap_err();
    assert!(matches!(err, VerificationError::UnknownReference(_)));

    let applied = h
        .verifier
        .reconcile_reference(&attempt.reference, Some(invoice.id()))
        .await
        .unwrap();
    assert!(applied.is_new());
    assert_eq!(applied.invoice().balance(), 30000);

    let again = h
        .verifier
        .reconcile_reference(&attempt.reference, Some(invoice.id()))
        .await
        .unwrap();
    assert!(!again.is_new());
}

#[tokio::test]
async fn owner_can_reconcile_a_reference_issued_outside_checkout() {
    let h = harness(ScriptedGateway::always(success(20000)));
    let invoice = h.invoice(50000).await;

    let err = h
        .verifier
        .reconcile_reference("PSK-EXTERNAL-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, VerificationError::UnknownReference(_)));

    let applied = h
        .verifier
        .reconcile_reference("PSK-EXTERNAL-1", Some(invoice.id()))
        .await
        .unwrap();
    assert!(applied.is_new());
    assert_eq!(applied.invoice().balance(), 30000);
    assert!(applied.invoice().has_reference("PSK-EXTERNAL-1"));
}

#[tokio::test]
async fn webhook_ignores_unsuccessful_charges() {
    let h = harness(ScriptedGateway::always(success(0)));
    let invoice = h.invoice(50000).await;

    let err = h
        .verifier
        .apply_webhook_charge(GatewayCharge {
            status: ChargeStatus::Abandoned,
            amount: 20000,
            reference: format!("inv_{}_1760860800000001", invoice.invoice_number()),
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        VerificationError::ChargeNotSuccessful(ChargeStatus::Abandoned)
    ));
    assert_eq!(h.reload(&invoice).await.balance(), 50000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn installments_across_gateway_and_cash_settle_the_invoice() {
    let h = harness(ScriptedGateway::always(success(20000)));
    let invoice = h.invoice(50000).await;
    let attempt = h
        .verifier
        .initiate_checkout(invoice.invoice_number(), Some(20000))
        .await
        .unwrap();

    // client callback, a duplicate callback and the provider webhook all race
    let callbacks: Vec<_> = (0..2)
        .map(|_| {
            let verifier = h.verifier.clone();
            let reference = attempt.reference.clone();
            tokio::spawn(async move { verifier.confirm_payment(&reference, None).await })
        })
        .collect();
    let webhook = {
        let verifier = h.verifier.clone();
        let charge = GatewayCharge {
            status: ChargeStatus::Success,
            amount: 20000,
            reference: attempt.reference.clone(),
        };
        tokio::spawn(async move { verifier.apply_webhook_charge(charge).await })
    };

    for callback in callbacks {
        let outcome = callback.await.unwrap().unwrap();
        assert_eq!(outcome.state(), AttemptState::Verified);
    }
    webhook.await.unwrap().unwrap();

    let after_gateway = h.reload(&invoice).await;
    assert_eq!(after_gateway.payments().len(), 1);
    assert_eq!(after_gateway.status(), InvoiceStatus::Partial);
    assert_eq!(after_gateway.balance(), 30000);

    let settled = h
        .invoices
        .record_manual_payment(
            invoice.business_id(),
            invoice.id(),
            invoice_ledger_server::models::invoice::ManualPaymentRequest {
                amount: 30000,
                method: "Cash".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(settled.status(), InvoiceStatus::Paid);
    assert_eq!(settled.balance(), 0);
    assert_eq!(settled.payments().len(), 2);
    assert_eq!(h.emitter.count(ActivityKind::PaymentRecorded), 2);
}
