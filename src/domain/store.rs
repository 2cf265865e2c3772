use {
    super::audit::AuditEntry,
    super::error::PipelineError,
    super::event::ProviderEvent,
    super::id::{CheckoutId, CheckoutReference, TransactionId},
    super::money::Money,
    super::payment::{Payment, PaymentIntent},
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde::Serialize,
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "resolved")]
    Resolved,
    #[serde(rename = "failed-exhausted")]
    FailedExhausted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::FailedExhausted => "failed-exhausted",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "failed-exhausted" => Ok(Self::FailedExhausted),
            other => Err(PipelineError::Validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Polling state for one payment still in `PROCESSING`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollJob {
    pub payment_id: Uuid,
    pub failure_count: i32,
    pub next_poll_at: DateTime<Utc>,
    pub status: JobStatus,
    pub last_error: Option<String>,
}

/// A `matched-none` event waiting to be matched again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RematchJob {
    pub id: Uuid,
    pub log_id: Uuid,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: JobStatus,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    Reschedule {
        attempts: i32,
        next_at: DateTime<Utc>,
        last_error: Option<String>,
    },
    Resolved,
    Exhausted {
        attempts: i32,
        last_error: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ManualReviewItem {
    pub kind: &'static str,
    pub reference_id: Uuid,
    pub attempts: i32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Unique constraint on `checkout_reference` or `intent_id` fired:
    /// another channel created the row first.
    Conflict,
}

/// Persistence for intents, payments, the event log and background jobs.
///
/// `update_payment` is the only way a payment row changes. It succeeds only
/// when the stored `version` still equals `expected_version`, and bumps it.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_intent(&self, intent: &PaymentIntent) -> Result<bool, PipelineError>;

    async fn find_intent_by_reference(
        &self,
        reference: &CheckoutReference,
    ) -> Result<Option<PaymentIntent>, PipelineError>;

    async fn insert_payment(&self, payment: &Payment) -> Result<InsertOutcome, PipelineError>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, PipelineError>;

    async fn find_payment_by_checkout_id(
        &self,
        id: &CheckoutId,
    ) -> Result<Option<Payment>, PipelineError>;

    async fn find_payment_by_reference(
        &self,
        reference: &CheckoutReference,
    ) -> Result<Option<Payment>, PipelineError>;

    async fn find_payment_by_transaction_id(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Payment>, PipelineError>;

    async fn find_payment_by_intent(&self, intent_id: Uuid)
    -> Result<Option<Payment>, PipelineError>;

    /// Most recent payment for the customer and money created at or after
    /// `since` that no webhook has confirmed.
    async fn find_unconfirmed_candidate(
        &self,
        customer_id: i64,
        money: &Money,
        since: DateTime<Utc>,
    ) -> Result<Option<Payment>, PipelineError>;

    async fn list_payments_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Payment>, PipelineError>;

    async fn update_payment(
        &self,
        next: &Payment,
        expected_version: i64,
    ) -> Result<Option<Payment>, PipelineError>;

    async fn append_event(&self, entry: &ProviderEvent) -> Result<(), PipelineError>;

    async fn get_event(&self, log_id: Uuid) -> Result<Option<ProviderEvent>, PipelineError>;

    /// Payment an `event_id` was already applied to, if any.
    async fn applied_event_target(&self, event_id: &str) -> Result<Option<Uuid>, PipelineError>;

    async fn events_for_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<ProviderEvent>, PipelineError>;

    async fn events_by_event_id(&self, event_id: &str)
    -> Result<Vec<ProviderEvent>, PipelineError>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), PipelineError>;

    async fn audit_for_payment(&self, payment_id: Uuid) -> Result<Vec<AuditEntry>, PipelineError>;

    /// Insert a pending poll job unless one exists. Returns `true` if inserted.
    async fn schedule_poll(
        &self,
        payment_id: Uuid,
        next_poll_at: DateTime<Utc>,
    ) -> Result<bool, PipelineError>;

    /// Claim due pending jobs, pushing their `next_poll_at` to `lease_until`
    /// so concurrent schedulers skip them.
    async fn claim_due_polls(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PollJob>, PipelineError>;

    async fn get_poll(&self, payment_id: Uuid) -> Result<Option<PollJob>, PipelineError>;

    async fn update_poll(&self, payment_id: Uuid, update: &JobUpdate) -> Result<(), PipelineError>;

    async fn enqueue_rematch(
        &self,
        log_id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), PipelineError>;

    async fn claim_due_rematches(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RematchJob>, PipelineError>;

    async fn update_rematch(&self, id: Uuid, update: &JobUpdate) -> Result<(), PipelineError>;

    async fn manual_review(&self) -> Result<Vec<ManualReviewItem>, PipelineError>;
}
