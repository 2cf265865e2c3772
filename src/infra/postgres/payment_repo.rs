use {
    crate::domain::{
        error::PipelineError,
        event::Channel,
        id::{CheckoutId, CheckoutReference, TransactionId},
        money::{Currency, Money, MoneyAmount},
        payment::{Confidence, Payment, PaymentIntent, PaymentState},
        store::InsertOutcome,
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const PAYMENT_COLUMNS: &str = "id, intent_id, checkout_reference, customer_id, checkout_id, \
     transaction_id, state, amount, currency, reference_confidence, state_confidence, \
     webhook_confirmed, amount_mismatch, failure_reason, notes, payment_date, \
     last_event_channel, last_event_at, version, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    intent_id: Option<Uuid>,
    checkout_reference: Option<String>,
    customer_id: i64,
    checkout_id: Option<String>,
    transaction_id: Option<String>,
    state: String,
    amount: i64,
    currency: String,
    reference_confidence: String,
    state_confidence: String,
    webhook_confirmed: bool,
    amount_mismatch: bool,
    failure_reason: Option<String>,
    notes: Option<String>,
    payment_date: Option<DateTime<Utc>>,
    last_event_channel: Option<String>,
    last_event_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = PipelineError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            intent_id: row.intent_id,
            checkout_reference: row.checkout_reference.map(CheckoutReference::new).transpose()?,
            customer_id: row.customer_id,
            checkout_id: row.checkout_id.map(CheckoutId::new).transpose()?,
            transaction_id: row.transaction_id.map(TransactionId::new).transpose()?,
            state: PaymentState::try_from(row.state.as_str())?,
            money: Money::new(
                MoneyAmount::new(row.amount)?,
                Currency::try_from(row.currency.as_str())?,
            ),
            reference_confidence: Confidence::try_from(row.reference_confidence.as_str())?,
            state_confidence: Confidence::try_from(row.state_confidence.as_str())?,
            webhook_confirmed: row.webhook_confirmed,
            amount_mismatch: row.amount_mismatch,
            failure_reason: row.failure_reason,
            notes: row.notes,
            payment_date: row.payment_date,
            last_event_channel: row
                .last_event_channel
                .as_deref()
                .map(Channel::try_from)
                .transpose()?,
            last_event_at: row.last_event_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct IntentRow {
    intent_id: Uuid,
    checkout_reference: String,
    customer_id: i64,
    amount: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<IntentRow> for PaymentIntent {
    type Error = PipelineError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        Ok(PaymentIntent {
            intent_id: row.intent_id,
            checkout_reference: CheckoutReference::new(row.checkout_reference)?,
            customer_id: row.customer_id,
            money: Money::new(
                MoneyAmount::new(row.amount)?,
                Currency::try_from(row.currency.as_str())?,
            ),
            created_at: row.created_at,
        })
    }
}

/// Returns `true` if inserted, `false` if the reference already has an intent.
pub async fn insert_intent(pool: &PgPool, intent: &PaymentIntent) -> Result<bool, PipelineError> {
    let result = sqlx::query(
        r#"
        INSERT INTO payment_intents (intent_id, checkout_reference, customer_id, amount, currency, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(intent.intent_id)
    .bind(intent.checkout_reference.as_str())
    .bind(intent.customer_id)
    .bind(intent.money.amount().cents())
    .bind(intent.money.currency().as_str())
    .bind(intent.created_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_intent_by_reference(
    pool: &PgPool,
    reference: &CheckoutReference,
) -> Result<Option<PaymentIntent>, PipelineError> {
    sqlx::query_as::<_, IntentRow>(
        "SELECT intent_id, checkout_reference, customer_id, amount, currency, created_at \
         FROM payment_intents WHERE checkout_reference = $1",
    )
    .bind(reference.as_str())
    .fetch_optional(pool)
    .await?
    .map(PaymentIntent::try_from)
    .transpose()
}

/// `ON CONFLICT DO NOTHING` without a target covers both the
/// `checkout_reference` and `intent_id` unique constraints.
pub async fn insert_payment(pool: &PgPool, p: &Payment) -> Result<InsertOutcome, PipelineError> {
    let result = sqlx::query(
        r#"
        INSERT INTO payments
            (id, intent_id, checkout_reference, customer_id, checkout_id, transaction_id,
             state, amount, currency, reference_confidence, state_confidence,
             webhook_confirmed, amount_mismatch, failure_reason, notes, payment_date,
             last_event_channel, last_event_at, version, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(p.id)
    .bind(p.intent_id)
    .bind(p.checkout_reference.as_ref().map(|r| r.as_str()))
    .bind(p.customer_id)
    .bind(p.checkout_id.as_ref().map(|c| c.as_str()))
    .bind(p.transaction_id.as_ref().map(|t| t.as_str()))
    .bind(p.state.as_str())
    .bind(p.money.amount().cents())
    .bind(p.money.currency().as_str())
    .bind(p.reference_confidence.as_str())
    .bind(p.state_confidence.as_str())
    .bind(p.webhook_confirmed)
    .bind(p.amount_mismatch)
    .bind(p.failure_reason.as_deref())
    .bind(p.notes.as_deref())
    .bind(p.payment_date)
    .bind(p.last_event_channel.map(|c| c.as_str()))
    .bind(p.last_event_at)
    .bind(p.version)
    .bind(p.created_at)
    .bind(p.updated_at)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        Ok(InsertOutcome::Inserted)
    } else {
        Ok(InsertOutcome::Conflict)
    }
}

async fn fetch_one_by(
    pool: &PgPool,
    column: &str,
    value: &str,
) -> Result<Option<Payment>, PipelineError> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE {column} = $1 LIMIT 1");
    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(value)
        .fetch_optional(pool)
        .await?
        .map(Payment::try_from)
        .transpose()
}

pub async fn get_payment(pool: &PgPool, id: Uuid) -> Result<Option<Payment>, PipelineError> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(Payment::try_from)
        .transpose()
}

pub async fn find_by_checkout_id(
    pool: &PgPool,
    id: &CheckoutId,
) -> Result<Option<Payment>, PipelineError> {
    fetch_one_by(pool, "checkout_id", id.as_str()).await
}

pub async fn find_by_reference(
    pool: &PgPool,
    reference: &CheckoutReference,
) -> Result<Option<Payment>, PipelineError> {
    fetch_one_by(pool, "checkout_reference", reference.as_str()).await
}

pub async fn find_by_transaction_id(
    pool: &PgPool,
    id: &TransactionId,
) -> Result<Option<Payment>, PipelineError> {
    fetch_one_by(pool, "transaction_id", id.as_str()).await
}

pub async fn find_by_intent(
    pool: &PgPool,
    intent_id: Uuid,
) -> Result<Option<Payment>, PipelineError> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE intent_id = $1");
    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(intent_id)
        .fetch_optional(pool)
        .await?
        .map(Payment::try_from)
        .transpose()
}

pub async fn find_unconfirmed_candidate(
    pool: &PgPool,
    customer_id: i64,
    money: &Money,
    since: DateTime<Utc>,
) -> Result<Option<Payment>, PipelineError> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments \
         WHERE customer_id = $1 AND amount = $2 AND currency = $3 \
           AND created_at >= $4 AND NOT webhook_confirmed \
         ORDER BY created_at DESC, id DESC LIMIT 1"
    );
    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(customer_id)
        .bind(money.amount().cents())
        .bind(money.currency().as_str())
        .bind(since)
        .fetch_optional(pool)
        .await?
        .map(Payment::try_from)
        .transpose()
}

pub async fn list_since(pool: &PgPool, since: DateTime<Utc>) -> Result<Vec<Payment>, PipelineError> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE created_at >= $1 ORDER BY created_at, id"
    );
    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(since)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(Payment::try_from)
        .collect()
}

/// Conditional write keyed on `version`. `None` means another writer got
/// there first and the caller must re-read.
pub async fn update_payment(
    pool: &PgPool,
    next: &Payment,
    expected_version: i64,
) -> Result<Option<Payment>, PipelineError> {
    let sql = format!(
        r#"
        UPDATE payments
        SET state = $3, checkout_id = $4, transaction_id = $5, state_confidence = $6,
            webhook_confirmed = $7, amount_mismatch = $8, failure_reason = $9, notes = $10,
            payment_date = $11, last_event_channel = $12, last_event_at = $13,
            version = version + 1, updated_at = $14
        WHERE id = $1 AND version = $2
        RETURNING {PAYMENT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(next.id)
        .bind(expected_version)
        .bind(next.state.as_str())
        .bind(next.checkout_id.as_ref().map(|c| c.as_str()))
        .bind(next.transaction_id.as_ref().map(|t| t.as_str()))
        .bind(next.state_confidence.as_str())
        .bind(next.webhook_confirmed)
        .bind(next.amount_mismatch)
        .bind(next.failure_reason.as_deref())
        .bind(next.notes.as_deref())
        .bind(next.payment_date)
        .bind(next.last_event_channel.map(|c| c.as_str()))
        .bind(next.last_event_at)
        .bind(next.updated_at)
        .fetch_optional(pool)
        .await?
        .map(Payment::try_from)
        .transpose()
}
