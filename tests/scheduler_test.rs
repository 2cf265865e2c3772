mod common;

use chrono::{Duration, Utc};
use common::*;
use pay_reconcile::domain::error::PipelineError;
use pay_reconcile::domain::event::{Channel, EventOutcome};
use pay_reconcile::domain::payment::PaymentState;
use pay_reconcile::domain::store::{JobStatus, PaymentStore};

// ── 14. poll_exhaustion_lands_in_manual_review ─────────────────────────────
// Provider keeps answering PENDING. After max_attempts the job is parked,
// audited, and the payment stays PROCESSING.

#[tokio::test]
async fn poll_exhaustion_lands_in_manual_review() {
    let h = harness();
    h.provider
        .always(snapshot("chk_REQ-50", "REQ-50", "PENDING", 16.00));
    h.intent("REQ-50", 16.00).await;
    h.webhook(webhook_body("evt_50", "REQ-50", "PENDING", 16.00)).await;
    let payment = h.payment_for("REQ-50").await;

    let start = Utc::now();
    let mut exhausted = 0;
    for day in 1..=20 {
        let report = h.state.scheduler.tick(start + Duration::days(day)).await.unwrap();
        assert_eq!(report.polled, 1, "tick {day}");
        exhausted += report.exhausted;
    }
    assert_eq!(exhausted, 1);
    assert_eq!(h.provider.calls(), 20);

    let job = h.store.get_poll(payment.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::FailedExhausted);
    assert_eq!(job.failure_count, 20);

    let review = h.store.manual_review().await.unwrap();
    assert_eq!(review.len(), 1);
    assert_eq!(review[0].kind, "poll");
    assert_eq!(review[0].reference_id, payment.id);

    let audit = h.store.audit_for_payment(payment.id).await.unwrap();
    let last = audit.last().unwrap();
    assert_eq!(last.action, "poll_exhausted");
    assert_eq!(last.actor, "scheduler");

    assert_eq!(h.payment_for("REQ-50").await.state, PaymentState::Processing);

    // Parked jobs are not claimed again.
    let report = h.state.scheduler.tick(start + Duration::days(30)).await.unwrap();
    assert_eq!(report.polled, 0);
}

// ── 15. poll_resolves_to_paid ──────────────────────────────────────────────

#[tokio::test]
async fn poll_resolves_to_paid() {
    let h = harness();
    h.intent("REQ-51", 16.00).await;
    h.webhook(webhook_body("evt_51", "REQ-51", "PENDING", 16.00)).await;
    let mut confirmed = h.state.subscribe_confirmed();

    h.provider
        .push(Ok(snapshot("chk_REQ-51", "REQ-51", "PAID", 16.00)));
    let report = h
        .state
        .scheduler
        .tick(Utc::now() + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(report.resolved, 1);

    let p = h.payment_for("REQ-51").await;
    assert_eq!(p.state, PaymentState::Paid);
    assert_eq!(p.last_event_channel, Some(Channel::Poll));
    assert!(confirmed.try_recv().is_ok());

    let job = h.store.get_poll(p.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Resolved);
}

// ── 16. provider_outage_never_fails_a_payment ──────────────────────────────

#[tokio::test]
async fn provider_outage_never_fails_a_payment() {
    let h = harness();
    h.intent("REQ-52", 16.00).await;
    h.webhook(webhook_body("evt_52", "REQ-52", "PENDING", 16.00)).await;

    h.provider.push(Err(PipelineError::ProviderUnavailable(
        "503 from provider".into(),
    )));
    let now = Utc::now() + Duration::minutes(5);
    let report = h.state.scheduler.tick(now).await.unwrap();
    assert_eq!(report.rescheduled, 1);

    let p = h.payment_for("REQ-52").await;
    assert_eq!(p.state, PaymentState::Processing);
    let job = h.store.get_poll(p.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.failure_count, 1);
    assert!(job.last_error.unwrap().contains("503"));
    // Backoff for the second attempt is base * multiplier.
    assert_eq!(job.next_poll_at, now + Duration::seconds(30));
}

// ── 17. provider_timeout_is_transient ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn provider_timeout_is_transient() {
    let h = harness_with(MockProvider::slow(std::time::Duration::from_secs(60)), &[]);
    h.provider
        .push(Ok(snapshot("chk_REQ-53", "REQ-53", "FAILED", 16.00)));
    h.intent("REQ-53", 16.00).await;
    h.webhook(webhook_body("evt_53", "REQ-53", "PENDING", 16.00)).await;

    let report = h
        .state
        .scheduler
        .tick(Utc::now() + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(report.rescheduled, 1);

    let p = h.payment_for("REQ-53").await;
    assert_eq!(p.state, PaymentState::Processing);
    let job = h.store.get_poll(p.id).await.unwrap().unwrap();
    assert!(job.last_error.unwrap().contains("timed out"));
}

// ── 18. rematch_resolves_once_intent_exists ────────────────────────────────
// A webhook outruns intent creation: logged matched-none, then re-matched.

#[tokio::test]
async fn rematch_resolves_once_intent_exists() {
    let h = harness();
    let early = h.webhook(webhook_body("evt_60", "REQ-60", "PAID", 16.00)).await;
    assert_eq!(early.outcome, EventOutcome::MatchedNone);

    // Not due yet.
    let report = h.state.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(report.rematched, 0);

    h.intent("REQ-60", 16.00).await;
    let report = h
        .state
        .scheduler
        .tick(Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.rematched, 1);

    let p = h.payment_for("REQ-60").await;
    assert_eq!(p.state, PaymentState::Paid);
    assert!(p.webhook_confirmed);

    let logged = h.store.events_by_event_id("evt_60").await.unwrap();
    assert_eq!(logged.len(), 2);
    assert_eq!(logged[0].outcome, EventOutcome::MatchedNone);
    assert_eq!(logged[1].outcome, EventOutcome::Applied);
    assert!(h.store.manual_review().await.unwrap().is_empty());
}

// ── 19. rematch_exhaustion_lands_in_manual_review ──────────────────────────

#[tokio::test]
async fn rematch_exhaustion_lands_in_manual_review() {
    let h = harness();
    let early = h.webhook(webhook_body("evt_61", "REQ-61", "PAID", 16.00)).await;
    let log_id = early.log_id.unwrap();

    let start = Utc::now();
    let mut exhausted = 0;
    for hour in 1..=5 {
        let report = h.state.scheduler.tick(start + Duration::hours(hour)).await.unwrap();
        exhausted += report.rematch_exhausted;
    }
    assert_eq!(exhausted, 1);

    let review = h.store.manual_review().await.unwrap();
    assert_eq!(review.len(), 1);
    assert_eq!(review[0].kind, "rematch");
    assert_eq!(review[0].reference_id, log_id);
    assert_eq!(review[0].attempts, 5);

    let audit = h.store.audit_for_payment(log_id).await.unwrap();
    assert_eq!(audit.last().unwrap().action, "manual_review");

    // Re-matching logs nothing new while still unmatched.
    assert_eq!(h.store.events_by_event_id("evt_61").await.unwrap().len(), 1);
}
