pub mod audit_repo;
pub mod job_repo;
pub mod payment_repo;

use {
    crate::domain::{
        audit::AuditEntry,
        error::PipelineError,
        event::ProviderEvent,
        id::{CheckoutId, CheckoutReference, TransactionId},
        money::Money,
        payment::{Payment, PaymentIntent},
        store::{InsertOutcome, JobUpdate, ManualReviewItem, PaymentStore, PollJob, RematchJob},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_intent(&self, intent: &PaymentIntent) -> Result<bool, PipelineError> {
        payment_repo::insert_intent(&self.pool, intent).await
    }

    async fn find_intent_by_reference(
        &self,
        reference: &CheckoutReference,
    ) -> Result<Option<PaymentIntent>, PipelineError> {
        payment_repo::find_intent_by_reference(&self.pool, reference).await
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<InsertOutcome, PipelineError> {
        payment_repo::insert_payment(&self.pool, payment).await
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, PipelineError> {
        payment_repo::get_payment(&self.pool, id).await
    }

    async fn find_payment_by_checkout_id(
        &self,
        id: &CheckoutId,
    ) -> Result<Option<Payment>, PipelineError> {
        payment_repo::find_by_checkout_id(&self.pool, id).await
    }

    async fn find_payment_by_reference(
        &self,
        reference: &CheckoutReference,
    ) -> Result<Option<Payment>, PipelineError> {
        payment_repo::find_by_reference(&self.pool, reference).await
    }

    async fn find_payment_by_transaction_id(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Payment>, PipelineError> {
        payment_repo::find_by_transaction_id(&self.pool, id).await
    }

    async fn find_payment_by_intent(
        &self,
        intent_id: Uuid,
    ) -> Result<Option<Payment>, PipelineError> {
        payment_repo::find_by_intent(&self.pool, intent_id).await
    }

    async fn find_unconfirmed_candidate(
        &self,
        customer_id: i64,
        money: &Money,
        since: DateTime<Utc>,
    ) -> Result<Option<Payment>, PipelineError> {
        payment_repo::find_unconfirmed_candidate(&self.pool, customer_id, money, since).await
    }

    async fn list_payments_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Payment>, PipelineError> {
        payment_repo::list_since(&self.pool, since).await
    }

    async fn update_payment(
        &self,
        next: &Payment,
        expected_version: i64,
    ) -> Result<Option<Payment>, PipelineError> {
        payment_repo::update_payment(&self.pool, next, expected_version).await
    }

    async fn append_event(&self, entry: &ProviderEvent) -> Result<(), PipelineError> {
        audit_repo::insert_event(&self.pool, entry).await
    }

    async fn get_event(&self, log_id: Uuid) -> Result<Option<ProviderEvent>, PipelineError> {
        audit_repo::get_event(&self.pool, log_id).await
    }

    async fn applied_event_target(&self, event_id: &str) -> Result<Option<Uuid>, PipelineError> {
        audit_repo::applied_event_target(&self.pool, event_id).await
    }

    async fn events_for_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<ProviderEvent>, PipelineError> {
        audit_repo::events_for_payment(&self.pool, payment_id).await
    }

    async fn events_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Vec<ProviderEvent>, PipelineError> {
        audit_repo::events_by_event_id(&self.pool, event_id).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), PipelineError> {
        audit_repo::insert_audit_entry(&self.pool, entry).await
    }

    async fn audit_for_payment(&self, payment_id: Uuid) -> Result<Vec<AuditEntry>, PipelineError> {
        audit_repo::audit_for_payment(&self.pool, payment_id).await
    }

    async fn schedule_poll(
        &self,
        payment_id: Uuid,
        next_poll_at: DateTime<Utc>,
    ) -> Result<bool, PipelineError> {
        job_repo::schedule_poll(&self.pool, payment_id, next_poll_at).await
    }

    async fn claim_due_polls(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PollJob>, PipelineError> {
        job_repo::claim_polls(&self.pool, now, lease_until, limit).await
    }

    async fn get_poll(&self, payment_id: Uuid) -> Result<Option<PollJob>, PipelineError> {
        job_repo::get_poll(&self.pool, payment_id).await
    }

    async fn update_poll(&self, payment_id: Uuid, update: &JobUpdate) -> Result<(), PipelineError> {
        job_repo::update_poll(&self.pool, payment_id, update).await
    }

    async fn enqueue_rematch(
        &self,
        log_id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        job_repo::enqueue_rematch(&self.pool, log_id, next_attempt_at).await
    }

    async fn claim_due_rematches(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RematchJob>, PipelineError> {
        job_repo::claim_rematches(&self.pool, now, lease_until, limit).await
    }

    async fn update_rematch(&self, id: Uuid, update: &JobUpdate) -> Result<(), PipelineError> {
        job_repo::update_rematch(&self.pool, id, update).await
    }

    async fn manual_review(&self) -> Result<Vec<ManualReviewItem>, PipelineError> {
        job_repo::manual_review(&self.pool).await
    }
}
