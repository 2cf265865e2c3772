use {
    crate::domain::{
        audit::AuditEntry,
        error::PipelineError,
        event::{Channel, EventOutcome, ProviderEvent},
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const EVENT_COLUMNS: &str =
    "log_id, event_id, channel, raw_payload, received_at, verified, resolved_payment_id, outcome, detail";

#[derive(sqlx::FromRow)]
struct EventRow {
    log_id: Uuid,
    event_id: String,
    channel: String,
    raw_payload: serde_json::Value,
    received_at: DateTime<Utc>,
    verified: bool,
    resolved_payment_id: Option<Uuid>,
    outcome: String,
    detail: serde_json::Value,
}

impl TryFrom<EventRow> for ProviderEvent {
    type Error = PipelineError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(ProviderEvent {
            log_id: row.log_id,
            event_id: row.event_id,
            channel: Channel::try_from(row.channel.as_str())?,
            raw_payload: row.raw_payload,
            received_at: row.received_at,
            verified: row.verified,
            resolved_payment_id: row.resolved_payment_id,
            outcome: EventOutcome::try_from(row.outcome.as_str())?,
            detail: row.detail,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    entity_id: Uuid,
    event_id: Option<String>,
    action: String,
    actor: String,
    detail: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        AuditEntry {
            id: row.id,
            entity_id: row.entity_id,
            event_id: row.event_id,
            action: row.action,
            actor: row.actor,
            detail: row.detail,
            created_at: row.created_at,
        }
    }
}

/// Append-only; every delivery gets its own row, duplicates included.
pub async fn insert_event(pool: &PgPool, entry: &ProviderEvent) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO provider_events
            (log_id, event_id, channel, raw_payload, received_at, verified,
             resolved_payment_id, outcome, detail)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(entry.log_id)
    .bind(&entry.event_id)
    .bind(entry.channel.as_str())
    .bind(&entry.raw_payload)
    .bind(entry.received_at)
    .bind(entry.verified)
    .bind(entry.resolved_payment_id)
    .bind(entry.outcome.as_str())
    .bind(&entry.detail)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_event(pool: &PgPool, log_id: Uuid) -> Result<Option<ProviderEvent>, PipelineError> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM provider_events WHERE log_id = $1");
    sqlx::query_as::<_, EventRow>(&sql)
        .bind(log_id)
        .fetch_optional(pool)
        .await?
        .map(ProviderEvent::try_from)
        .transpose()
}

pub async fn applied_event_target(
    pool: &PgPool,
    event_id: &str,
) -> Result<Option<Uuid>, PipelineError> {
    let row: Option<Option<Uuid>> = sqlx::query_scalar(
        "SELECT resolved_payment_id FROM provider_events \
         WHERE event_id = $1 AND outcome = 'applied' ORDER BY received_at LIMIT 1",
    )
    .bind(event_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.flatten())
}

pub async fn events_for_payment(
    pool: &PgPool,
    payment_id: Uuid,
) -> Result<Vec<ProviderEvent>, PipelineError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM provider_events WHERE resolved_payment_id = $1 ORDER BY received_at, log_id"
    );
    sqlx::query_as::<_, EventRow>(&sql)
        .bind(payment_id)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(ProviderEvent::try_from)
        .collect()
}

pub async fn events_by_event_id(
    pool: &PgPool,
    event_id: &str,
) -> Result<Vec<ProviderEvent>, PipelineError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM provider_events WHERE event_id = $1 ORDER BY received_at, log_id"
    );
    sqlx::query_as::<_, EventRow>(&sql)
        .bind(event_id)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(ProviderEvent::try_from)
        .collect()
}

pub async fn insert_audit_entry(pool: &PgPool, entry: &AuditEntry) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, entity_id, event_id, action, actor, detail, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.id)
    .bind(entry.entity_id)
    .bind(entry.event_id.as_deref())
    .bind(&entry.action)
    .bind(&entry.actor)
    .bind(&entry.detail)
    .bind(entry.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn audit_for_payment(
    pool: &PgPool,
    payment_id: Uuid,
) -> Result<Vec<AuditEntry>, PipelineError> {
    let rows = sqlx::query_as::<_, AuditRow>(
        "SELECT id, entity_id, event_id, action, actor, detail, created_at \
         FROM audit_log WHERE entity_id = $1 ORDER BY created_at, id",
    )
    .bind(payment_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(AuditEntry::from).collect())
}
