mod common;

use chrono::Utc;
use common::*;
use pay_reconcile::domain::event::EventOutcome;
use pay_reconcile::domain::money::Money;
use pay_reconcile::domain::payment::{Confidence, Payment, PaymentState};
use pay_reconcile::domain::store::PaymentStore;

// ── 9. race_duplicate_collapses_to_one_paid ────────────────────────────────
// A client report arrives before the webhook and creates a provisional row.
// The webhook then binds the intent row. The sweep cancels the provisional.

#[tokio::test]
async fn race_duplicate_collapses_to_one_paid() {
    let h = harness();
    h.intent("REQ-42", 16.00).await;

    let early = h.manual(manual_body("PENDING", 16.00)).await;
    assert_eq!(early.outcome, EventOutcome::Applied);
    let provisional = early.payment.unwrap();
    assert_eq!(provisional.reference_confidence, Confidence::Low);
    assert_eq!(provisional.state, PaymentState::Processing);

    h.webhook(webhook_body("evt_42", "REQ-42", "PAID", 16.00)).await;
    assert_eq!(h.payments().len(), 2);

    let report = h.state.suppressor.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.clusters, 1);
    assert_eq!(report.cancelled, vec![provisional.id]);

    let keeper = h.payment_for("REQ-42").await;
    assert_eq!(keeper.state, PaymentState::Paid);
    let cancelled = h.store.get_payment(provisional.id).await.unwrap().unwrap();
    assert_eq!(cancelled.state, PaymentState::Cancelled);
    assert_eq!(
        cancelled.notes.as_deref(),
        Some(format!("duplicate of {}", keeper.id).as_str())
    );

    let audit = h.store.audit_for_payment(provisional.id).await.unwrap();
    let last = audit.last().unwrap();
    assert_eq!(last.action, "duplicate_cancelled");
    assert_eq!(last.actor, "suppressor");

    // A second sweep finds nothing left to do.
    let again = h.state.suppressor.sweep(Utc::now()).await.unwrap();
    assert!(again.cancelled.is_empty());
}

// ── 10. late_manual_report_cancels_itself_inline ───────────────────────────
// The webhook row exists first; a reference-less manual report creates a
// provisional row that the inline pass cancels straight away.

#[tokio::test]
async fn late_manual_report_cancels_itself_inline() {
    let h = harness();
    h.intent("REQ-43", 16.00).await;
    h.webhook(webhook_body("evt_43", "REQ-43", "PENDING", 16.00)).await;

    // The webhook confirmed the intent row, so the heuristic skips it.
    let report = h.manual(manual_body("PENDING", 16.00)).await;
    let provisional = report.payment.unwrap();
    assert_eq!(provisional.reference_confidence, Confidence::Low);

    let stored = h.store.get_payment(provisional.id).await.unwrap().unwrap();
    assert_eq!(stored.state, PaymentState::Cancelled);
    assert_eq!(h.payment_for("REQ-43").await.state, PaymentState::Processing);
}

// ── 11. provisional_paid_duplicate_is_cancelled ───────────────────────────
// A client claims PAID before the provider's webhook lands on the intent row.
// The claim stays provisional and the sweep collapses it onto the bound row.

#[tokio::test]
async fn provisional_paid_duplicate_is_cancelled() {
    let h = harness();
    h.intent("REQ-44", 16.00).await;
    let mut confirmed = h.state.subscribe_confirmed();

    let early = h.manual(manual_body("PAID", 16.00)).await;
    let provisional = early.payment.unwrap();
    assert_eq!(provisional.state, PaymentState::Paid);
    assert_eq!(provisional.state_confidence, Confidence::Low);
    assert!(confirmed.try_recv().is_err(), "client claim is not a confirmation");

    h.webhook(webhook_body("evt_44", "REQ-44", "PAID", 16.00)).await;
    let keeper = h.payment_for("REQ-44").await;
    assert_eq!(confirmed.try_recv().unwrap().payment_id, keeper.id);

    let report = h.state.suppressor.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.cancelled, vec![provisional.id]);
    assert!(report.left_alone.is_empty());

    let paid: Vec<_> = h
        .payments()
        .into_iter()
        .filter(|p| p.state == PaymentState::Paid)
        .collect();
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].id, keeper.id);
    let cancelled = h.store.get_payment(provisional.id).await.unwrap().unwrap();
    assert_eq!(cancelled.state, PaymentState::Cancelled);
    assert_eq!(cancelled.payment_date, None);
}

// ── 11b. settled_paid_duplicate_is_left_alone ─────────────────────────────

#[tokio::test]
async fn settled_paid_duplicate_is_left_alone() {
    let h = harness();
    h.intent("REQ-48", 16.00).await;
    h.webhook(webhook_body("evt_48", "REQ-48", "PAID", 16.00)).await;

    let stray = Payment::provisional(
        CUSTOMER,
        Money::from_major(16.00, "EUR").unwrap(),
        Utc::now(),
    );
    h.store.insert_payment(&stray).await.unwrap();
    let mut settled = stray.clone();
    settled.state = PaymentState::Paid;
    settled.state_confidence = Confidence::High;
    settled.payment_date = Some(Utc::now());
    h.store.update_payment(&settled, 0).await.unwrap().unwrap();

    let report = h.state.suppressor.sweep(Utc::now()).await.unwrap();
    assert!(report.cancelled.is_empty());
    assert_eq!(report.left_alone, vec![stray.id]);
    let still = h.store.get_payment(stray.id).await.unwrap().unwrap();
    assert_eq!(still.state, PaymentState::Paid);
}

// ── 12. two_bound_rows_are_ambiguous ───────────────────────────────────────
// Two intents with the same customer and amount are two real purchases.

#[tokio::test]
async fn two_bound_rows_are_ambiguous() {
    let h = harness();
    h.intent("REQ-45", 16.00).await;
    h.intent("REQ-46", 16.00).await;
    h.webhook(webhook_body("evt_45", "REQ-45", "PAID", 16.00)).await;
    h.webhook(webhook_body("evt_46", "REQ-46", "PENDING", 16.00)).await;

    let report = h.state.suppressor.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.ambiguous, 1);
    assert!(report.cancelled.is_empty());
    assert_eq!(h.payment_for("REQ-46").await.state, PaymentState::Processing);
}

// ── 13. different_amounts_never_cluster ────────────────────────────────────

#[tokio::test]
async fn different_amounts_never_cluster() {
    let h = harness();
    h.intent("REQ-47", 16.00).await;
    h.manual(manual_body("PENDING", 12.50)).await;
    h.webhook(webhook_body("evt_47", "REQ-47", "PAID", 16.00)).await;

    let report = h.state.suppressor.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.clusters, 0);
    assert!(
        h.payments()
            .iter()
            .all(|p| p.state != PaymentState::Cancelled)
    );
}
