mod common;

use chrono::{Duration, Utc};
use common::*;
use pay_reconcile::AppState;
use pay_reconcile::domain::audit::AuditEntry;
use pay_reconcile::domain::event::{Channel, EventOutcome, InboundEvent, ProviderEvent};
use pay_reconcile::domain::id::CheckoutReference;
use pay_reconcile::domain::money::Money;
use pay_reconcile::domain::payment::{Payment, PaymentIntent, PaymentState};
use pay_reconcile::domain::store::{InsertOutcome, JobStatus, JobUpdate, PaymentStore};
use pay_reconcile::infra::postgres::PgStore;
use pay_reconcile::services::signature::Verification;
use std::sync::Arc;

// These run against a local Postgres: cargo test --test pg_store_test -- --ignored

const DB: &str = "pay_reconcile_test_store";

async fn store() -> PgStore {
    PgStore::new(setup_pool(DB).await)
}

async fn seeded(store: &PgStore, reference: &str) -> Payment {
    let intent = PaymentIntent::new(
        CheckoutReference::new(reference).unwrap(),
        CUSTOMER,
        Money::from_major(16.0, "EUR").unwrap(),
    );
    assert!(store.insert_intent(&intent).await.unwrap());
    let payment = Payment::for_intent(&intent, Utc::now());
    assert_eq!(
        store.insert_payment(&payment).await.unwrap(),
        InsertOutcome::Inserted
    );
    payment
}

// ── 33. payment_round_trips_through_postgres ───────────────────────────────

#[tokio::test]
#[ignore = "requires Postgres on localhost:5432"]
async fn payment_round_trips_through_postgres() {
    let store = store().await;
    let payment = seeded(&store, "PG-1").await;

    let row = store.get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(row.state, PaymentState::Processing);
    assert_eq!(row.intent_id, payment.intent_id);
    assert_eq!(row.money, payment.money);
    assert_eq!(row.version, 0);

    let by_ref = store
        .find_payment_by_reference(&CheckoutReference::new("PG-1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_ref.id, payment.id);
}

// ── 34. second_row_for_reference_conflicts ─────────────────────────────────

#[tokio::test]
#[ignore = "requires Postgres on localhost:5432"]
async fn second_row_for_reference_conflicts() {
    let store = store().await;
    let first = seeded(&store, "PG-2").await;

    let mut twin = first.clone();
    twin.id = uuid::Uuid::now_v7();
    assert_eq!(
        store.insert_payment(&twin).await.unwrap(),
        InsertOutcome::Conflict
    );
}

// ── 35. stale_version_write_is_refused ─────────────────────────────────────

#[tokio::test]
#[ignore = "requires Postgres on localhost:5432"]
async fn stale_version_write_is_refused() {
    let store = store().await;
    let payment = seeded(&store, "PG-3").await;

    let mut next = payment.clone();
    next.state = PaymentState::Paid;
    let saved = store.update_payment(&next, 0).await.unwrap().unwrap();
    assert_eq!(saved.version, 1);

    next.state = PaymentState::Failed;
    assert!(store.update_payment(&next, 0).await.unwrap().is_none());
    let row = store.get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(row.state, PaymentState::Paid);
}

// ── 36. event_log_and_audit ────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires Postgres on localhost:5432"]
async fn event_log_and_audit() {
    let store = store().await;
    let payment = seeded(&store, "PG-4").await;

    let raw = serde_json::to_vec(&webhook_body("evt_pg_4", "PG-4", "PAID", 16.0)).unwrap();
    let event = InboundEvent::webhook(&raw).unwrap();
    let entry = ProviderEvent::record(
        &event,
        true,
        Some(payment.id),
        EventOutcome::Applied,
        serde_json::json!({ "state": "PAID" }),
    );
    store.append_event(&entry).await.unwrap();

    assert_eq!(
        store.applied_event_target("evt_pg_4").await.unwrap(),
        Some(payment.id)
    );
    let logged = store.get_event(entry.log_id).await.unwrap().unwrap();
    assert_eq!(logged.channel, Channel::Webhook);
    assert_eq!(logged.raw_payload, entry.raw_payload);

    store
        .append_audit(&AuditEntry::new(
            payment.id,
            Some("evt_pg_4"),
            "status_changed",
            "webhook",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    let audit = store.audit_for_payment(payment.id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].event_id.as_deref(), Some("evt_pg_4"));
}

// ── 37. poll_jobs_claim_and_park ───────────────────────────────────────────

#[tokio::test]
#[ignore = "requires Postgres on localhost:5432"]
async fn poll_jobs_claim_and_park() {
    let store = store().await;
    let payment = seeded(&store, "PG-5").await;
    let now = Utc::now();

    assert!(store.schedule_poll(payment.id, now).await.unwrap());
    assert!(!store.schedule_poll(payment.id, now).await.unwrap());

    let far = now + Duration::days(365);
    let claimed = store
        .claim_due_polls(far, far + Duration::seconds(30), 1000)
        .await
        .unwrap();
    assert!(claimed.iter().any(|j| j.payment_id == payment.id));

    // Leased: not claimable again before the lease runs out.
    let again = store
        .claim_due_polls(far, far + Duration::seconds(30), 1000)
        .await
        .unwrap();
    assert!(again.iter().all(|j| j.payment_id != payment.id));

    store
        .update_poll(
            payment.id,
            &JobUpdate::Exhausted {
                attempts: 20,
                last_error: Some("still processing".into()),
            },
        )
        .await
        .unwrap();
    let job = store.get_poll(payment.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::FailedExhausted);

    let review = store.manual_review().await.unwrap();
    assert!(
        review
            .iter()
            .any(|i| i.kind == "poll" && i.reference_id == payment.id && i.attempts == 20)
    );
}

// ── 38. engine_runs_on_postgres ────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires Postgres on localhost:5432"]
async fn engine_runs_on_postgres() {
    let store: Arc<PgStore> = Arc::new(store().await);
    let intent = PaymentIntent::new(
        CheckoutReference::new("PG-6").unwrap(),
        CUSTOMER,
        Money::from_major(16.0, "EUR").unwrap(),
    );
    store.insert_intent(&intent).await.unwrap();
    let state = AppState::new(&test_config(&[]), store.clone(), Arc::new(MockProvider::new()));

    let raw = serde_json::to_vec(&webhook_body("evt_pg_6", "PG-6", "PAID", 16.0)).unwrap();
    let verification = state.verifier.verify(
        Channel::Webhook,
        &raw,
        &signed_headers(&raw),
        state.environment,
    );
    let report = state
        .engine
        .ingest(InboundEvent::webhook(&raw).unwrap(), verification)
        .await
        .unwrap();
    assert_eq!(report.outcome, EventOutcome::Applied);

    // Replays short-circuit against the persisted log.
    let replay = state
        .engine
        .ingest(
            InboundEvent::webhook(&raw).unwrap(),
            Verification {
                ok: true,
                reason: None,
                weight: Channel::Webhook.corroboration(),
            },
        )
        .await
        .unwrap();
    assert_eq!(replay.outcome, EventOutcome::IgnoredDuplicate);

    let p = store
        .find_payment_by_intent(intent.intent_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(p.state, PaymentState::Paid);
    assert!(p.webhook_confirmed);
}
