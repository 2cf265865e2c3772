//! In-process store with the same uniqueness and version semantics as the
//! Postgres schema. Used by the test suite and for local runs without a
//! database.

use {
    crate::domain::{
        audit::AuditEntry,
        error::PipelineError,
        event::{EventOutcome, ProviderEvent},
        id::{CheckoutId, CheckoutReference, TransactionId},
        money::Money,
        payment::{Payment, PaymentIntent},
        store::{
            InsertOutcome, JobStatus, JobUpdate, ManualReviewItem, PaymentStore, PollJob,
            RematchJob,
        },
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    std::{collections::HashMap, sync::Mutex},
    uuid::Uuid,
};

#[derive(Default)]
struct Tables {
    intents: HashMap<Uuid, PaymentIntent>,
    payments: HashMap<Uuid, Payment>,
    events: Vec<ProviderEvent>,
    audit: Vec<AuditEntry>,
    polls: HashMap<Uuid, PollJob>,
    rematches: HashMap<Uuid, RematchJob>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, PipelineError> {
        let mut guard = self
            .tables
            .lock()
            .map_err(|_| PipelineError::Validation("memory store poisoned".into()))?;
        Ok(f(&mut guard))
    }

    fn find_payment(
        &self,
        pred: impl Fn(&Payment) -> bool,
    ) -> Result<Option<Payment>, PipelineError> {
        self.with(|t| t.payments.values().find(|p| pred(p)).cloned())
    }

    /// Every payment row, oldest first.
    pub fn all_payments(&self) -> Result<Vec<Payment>, PipelineError> {
        self.with(|t| {
            let mut rows: Vec<Payment> = t.payments.values().cloned().collect();
            rows.sort_by_key(|p| (p.created_at, p.id));
            rows
        })
    }

    pub fn all_events(&self) -> Result<Vec<ProviderEvent>, PipelineError> {
        self.with(|t| t.events.clone())
    }
}

fn apply_job_update(
    status: &mut JobStatus,
    attempts: &mut i32,
    next_at: &mut DateTime<Utc>,
    last_error: &mut Option<String>,
    update: &JobUpdate,
) {
    match update {
        JobUpdate::Reschedule {
            attempts: a,
            next_at: n,
            last_error: e,
        } => {
            *status = JobStatus::Pending;
            *attempts = *a;
            *next_at = *n;
            *last_error = e.clone();
        }
        JobUpdate::Resolved => *status = JobStatus::Resolved,
        JobUpdate::Exhausted {
            attempts: a,
            last_error: e,
        } => {
            *status = JobStatus::FailedExhausted;
            *attempts = *a;
            *last_error = e.clone();
        }
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_intent(&self, intent: &PaymentIntent) -> Result<bool, PipelineError> {
        self.with(|t| {
            let taken = t
                .intents
                .values()
                .any(|i| i.checkout_reference == intent.checkout_reference);
            if taken || t.intents.contains_key(&intent.intent_id) {
                return false;
            }
            t.intents.insert(intent.intent_id, intent.clone());
            true
        })
    }

    async fn find_intent_by_reference(
        &self,
        reference: &CheckoutReference,
    ) -> Result<Option<PaymentIntent>, PipelineError> {
        self.with(|t| {
            t.intents
                .values()
                .find(|i| &i.checkout_reference == reference)
                .cloned()
        })
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<InsertOutcome, PipelineError> {
        self.with(|t| {
            let conflict = t.payments.values().any(|p| {
                p.id == payment.id
                    || (payment.checkout_reference.is_some()
                        && p.checkout_reference == payment.checkout_reference)
                    || (payment.intent_id.is_some() && p.intent_id == payment.intent_id)
            });
            if conflict {
                return InsertOutcome::Conflict;
            }
            t.payments.insert(payment.id, payment.clone());
            InsertOutcome::Inserted
        })
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, PipelineError> {
        self.with(|t| t.payments.get(&id).cloned())
    }

    async fn find_payment_by_checkout_id(
        &self,
        id: &CheckoutId,
    ) -> Result<Option<Payment>, PipelineError> {
        self.find_payment(|p| p.checkout_id.as_ref() == Some(id))
    }

    async fn find_payment_by_reference(
        &self,
        reference: &CheckoutReference,
    ) -> Result<Option<Payment>, PipelineError> {
        self.find_payment(|p| p.checkout_reference.as_ref() == Some(reference))
    }

    async fn find_payment_by_transaction_id(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Payment>, PipelineError> {
        self.find_payment(|p| p.transaction_id.as_ref() == Some(id))
    }

    async fn find_payment_by_intent(
        &self,
        intent_id: Uuid,
    ) -> Result<Option<Payment>, PipelineError> {
        self.find_payment(|p| p.intent_id == Some(intent_id))
    }

    async fn find_unconfirmed_candidate(
        &self,
        customer_id: i64,
        money: &Money,
        since: DateTime<Utc>,
    ) -> Result<Option<Payment>, PipelineError> {
        self.with(|t| {
            t.payments
                .values()
                .filter(|p| {
                    p.customer_id == customer_id
                        && p.money == *money
                        && p.created_at >= since
                        && !p.webhook_confirmed
                })
                .max_by_key(|p| (p.created_at, p.id))
                .cloned()
        })
    }

    async fn list_payments_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Payment>, PipelineError> {
        self.with(|t| {
            let mut rows: Vec<Payment> = t
                .payments
                .values()
                .filter(|p| p.created_at >= since)
                .cloned()
                .collect();
            rows.sort_by_key(|p| (p.created_at, p.id));
            rows
        })
    }

    async fn update_payment(
        &self,
        next: &Payment,
        expected_version: i64,
    ) -> Result<Option<Payment>, PipelineError> {
        self.with(|t| {
            let row = t.payments.get_mut(&next.id)?;
            if row.version != expected_version {
                return None;
            }
            let mut stored = next.clone();
            stored.version = expected_version + 1;
            *row = stored.clone();
            Some(stored)
        })
    }

    async fn append_event(&self, entry: &ProviderEvent) -> Result<(), PipelineError> {
        self.with(|t| t.events.push(entry.clone()))
    }

    async fn get_event(&self, log_id: Uuid) -> Result<Option<ProviderEvent>, PipelineError> {
        self.with(|t| t.events.iter().find(|e| e.log_id == log_id).cloned())
    }

    async fn applied_event_target(&self, event_id: &str) -> Result<Option<Uuid>, PipelineError> {
        self.with(|t| {
            t.events
                .iter()
                .find(|e| e.event_id == event_id && e.outcome == EventOutcome::Applied)
                .and_then(|e| e.resolved_payment_id)
        })
    }

    async fn events_for_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<ProviderEvent>, PipelineError> {
        self.with(|t| {
            t.events
                .iter()
                .filter(|e| e.resolved_payment_id == Some(payment_id))
                .cloned()
                .collect()
        })
    }

    async fn events_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Vec<ProviderEvent>, PipelineError> {
        self.with(|t| {
            t.events
                .iter()
                .filter(|e| e.event_id == event_id)
                .cloned()
                .collect()
        })
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), PipelineError> {
        self.with(|t| t.audit.push(entry.clone()))
    }

    async fn audit_for_payment(&self, payment_id: Uuid) -> Result<Vec<AuditEntry>, PipelineError> {
        self.with(|t| {
            t.audit
                .iter()
                .filter(|a| a.entity_id == payment_id)
                .cloned()
                .collect()
        })
    }

    async fn schedule_poll(
        &self,
        payment_id: Uuid,
        next_poll_at: DateTime<Utc>,
    ) -> Result<bool, PipelineError> {
        self.with(|t| {
            if t.polls.contains_key(&payment_id) {
                return false;
            }
            t.polls.insert(
                payment_id,
                PollJob {
                    payment_id,
                    failure_count: 0,
                    next_poll_at,
                    status: JobStatus::Pending,
                    last_error: None,
                },
            );
            true
        })
    }

    async fn claim_due_polls(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PollJob>, PipelineError> {
        self.with(|t| {
            let mut due: Vec<&mut PollJob> = t
                .polls
                .values_mut()
                .filter(|j| j.status == JobStatus::Pending && j.next_poll_at <= now)
                .collect();
            due.sort_by_key(|j| j.next_poll_at);
            due.into_iter()
                .take(limit.max(0) as usize)
                .map(|j| {
                    let claimed = j.clone();
                    j.next_poll_at = lease_until;
                    claimed
                })
                .collect()
        })
    }

    async fn get_poll(&self, payment_id: Uuid) -> Result<Option<PollJob>, PipelineError> {
        self.with(|t| t.polls.get(&payment_id).cloned())
    }

    async fn update_poll(&self, payment_id: Uuid, update: &JobUpdate) -> Result<(), PipelineError> {
        self.with(|t| {
            if let Some(job) = t.polls.get_mut(&payment_id) {
                apply_job_update(
                    &mut job.status,
                    &mut job.failure_count,
                    &mut job.next_poll_at,
                    &mut job.last_error,
                    update,
                );
            }
        })
    }

    async fn enqueue_rematch(
        &self,
        log_id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.with(|t| {
            let id = Uuid::now_v7();
            t.rematches.insert(
                id,
                RematchJob {
                    id,
                    log_id,
                    attempts: 0,
                    next_attempt_at,
                    status: JobStatus::Pending,
                    last_error: None,
                },
            );
        })
    }

    async fn claim_due_rematches(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RematchJob>, PipelineError> {
        self.with(|t| {
            let mut due: Vec<&mut RematchJob> = t
                .rematches
                .values_mut()
                .filter(|j| j.status == JobStatus::Pending && j.next_attempt_at <= now)
                .collect();
            due.sort_by_key(|j| j.next_attempt_at);
            due.into_iter()
                .take(limit.max(0) as usize)
                .map(|j| {
                    let claimed = j.clone();
                    j.next_attempt_at = lease_until;
                    claimed
                })
                .collect()
        })
    }

    async fn update_rematch(&self, id: Uuid, update: &JobUpdate) -> Result<(), PipelineError> {
        self.with(|t| {
            if let Some(job) = t.rematches.get_mut(&id) {
                apply_job_update(
                    &mut job.status,
                    &mut job.attempts,
                    &mut job.next_attempt_at,
                    &mut job.last_error,
                    update,
                );
            }
        })
    }

    async fn manual_review(&self) -> Result<Vec<ManualReviewItem>, PipelineError> {
        self.with(|t| {
            let polls = t
                .polls
                .values()
                .filter(|j| j.status == JobStatus::FailedExhausted)
                .map(|j| ManualReviewItem {
                    kind: "poll",
                    reference_id: j.payment_id,
                    attempts: j.failure_count,
                    last_error: j.last_error.clone(),
                });
            let rematches = t
                .rematches
                .values()
                .filter(|j| j.status == JobStatus::FailedExhausted)
                .map(|j| ManualReviewItem {
                    kind: "rematch",
                    reference_id: j.log_id,
                    attempts: j.attempts,
                    last_error: j.last_error.clone(),
                });
            polls.chain(rematches).collect()
        })
    }
}
