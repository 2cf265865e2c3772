use {
    crate::domain::{
        error::PipelineError,
        store::{JobStatus, JobUpdate, ManualReviewItem, PollJob, RematchJob},
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

#[derive(sqlx::FromRow)]
struct PollRow {
    payment_id: Uuid,
    failure_count: i32,
    next_poll_at: DateTime<Utc>,
    status: String,
    last_error: Option<String>,
}

impl TryFrom<PollRow> for PollJob {
    type Error = PipelineError;

    fn try_from(row: PollRow) -> Result<Self, Self::Error> {
        Ok(PollJob {
            payment_id: row.payment_id,
            failure_count: row.failure_count,
            next_poll_at: row.next_poll_at,
            status: JobStatus::try_from(row.status.as_str())?,
            last_error: row.last_error,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RematchRow {
    id: Uuid,
    log_id: Uuid,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    status: String,
    last_error: Option<String>,
}

impl TryFrom<RematchRow> for RematchJob {
    type Error = PipelineError;

    fn try_from(row: RematchRow) -> Result<Self, Self::Error> {
        Ok(RematchJob {
            id: row.id,
            log_id: row.log_id,
            attempts: row.attempts,
            next_attempt_at: row.next_attempt_at,
            status: JobStatus::try_from(row.status.as_str())?,
            last_error: row.last_error,
        })
    }
}

/// Returns `true` if inserted, `false` if the payment already has a job.
pub async fn schedule_poll(
    pool: &PgPool,
    payment_id: Uuid,
    next_poll_at: DateTime<Utc>,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(
        r#"
        INSERT INTO poll_jobs (payment_id, next_poll_at)
        VALUES ($1, $2)
        ON CONFLICT (payment_id) DO NOTHING
        "#,
    )
    .bind(payment_id)
    .bind(next_poll_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Claim up to `limit` due jobs. SKIP LOCKED plus the lease keeps two
/// schedulers from polling the same checkout.
pub async fn claim_polls(
    pool: &PgPool,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<PollJob>, PipelineError> {
    let rows = sqlx::query_as::<_, PollRow>(
        r#"
        UPDATE poll_jobs
        SET next_poll_at = $2, updated_at = now()
        WHERE payment_id IN (
            SELECT payment_id FROM poll_jobs
            WHERE status = 'pending' AND next_poll_at <= $1
            ORDER BY next_poll_at
            LIMIT $3
            FOR UPDATE SKIP LOCKED
        )
        RETURNING payment_id, failure_count, next_poll_at, status, last_error
        "#,
    )
    .bind(now)
    .bind(lease_until)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(PollJob::try_from).collect()
}

pub async fn get_poll(pool: &PgPool, payment_id: Uuid) -> Result<Option<PollJob>, PipelineError> {
    sqlx::query_as::<_, PollRow>(
        "SELECT payment_id, failure_count, next_poll_at, status, last_error \
         FROM poll_jobs WHERE payment_id = $1",
    )
    .bind(payment_id)
    .fetch_optional(pool)
    .await?
    .map(PollJob::try_from)
    .transpose()
}

pub async fn update_poll(
    pool: &PgPool,
    payment_id: Uuid,
    update: &JobUpdate,
) -> Result<(), PipelineError> {
    match update {
        JobUpdate::Reschedule {
            attempts,
            next_at,
            last_error,
        } => {
            sqlx::query(
                "UPDATE poll_jobs SET status = 'pending', failure_count = $2, next_poll_at = $3, \
                 last_error = $4, updated_at = now() WHERE payment_id = $1",
            )
            .bind(payment_id)
            .bind(attempts)
            .bind(next_at)
            .bind(last_error.as_deref())
            .execute(pool)
            .await?;
        }
        JobUpdate::Resolved => {
            sqlx::query(
                "UPDATE poll_jobs SET status = 'resolved', updated_at = now() WHERE payment_id = $1",
            )
            .bind(payment_id)
            .execute(pool)
            .await?;
        }
        JobUpdate::Exhausted {
            attempts,
            last_error,
        } => {
            sqlx::query(
                "UPDATE poll_jobs SET status = 'failed-exhausted', failure_count = $2, \
                 last_error = $3, updated_at = now() WHERE payment_id = $1",
            )
            .bind(payment_id)
            .bind(attempts)
            .bind(last_error.as_deref())
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

pub async fn enqueue_rematch(
    pool: &PgPool,
    log_id: Uuid,
    next_attempt_at: DateTime<Utc>,
) -> Result<(), PipelineError> {
    sqlx::query("INSERT INTO rematch_jobs (id, log_id, next_attempt_at) VALUES ($1, $2, $3)")
        .bind(Uuid::now_v7())
        .bind(log_id)
        .bind(next_attempt_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn claim_rematches(
    pool: &PgPool,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<RematchJob>, PipelineError> {
    let rows = sqlx::query_as::<_, RematchRow>(
        r#"
        UPDATE rematch_jobs
        SET next_attempt_at = $2, updated_at = now()
        WHERE id IN (
            SELECT id FROM rematch_jobs
            WHERE status = 'pending' AND next_attempt_at <= $1
            ORDER BY next_attempt_at
            LIMIT $3
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, log_id, attempts, next_attempt_at, status, last_error
        "#,
    )
    .bind(now)
    .bind(lease_until)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(RematchJob::try_from).collect()
}

pub async fn update_rematch(pool: &PgPool, id: Uuid, update: &JobUpdate) -> Result<(), PipelineError> {
    match update {
        JobUpdate::Reschedule {
            attempts,
            next_at,
            last_error,
        } => {
            sqlx::query(
                "UPDATE rematch_jobs SET status = 'pending', attempts = $2, next_attempt_at = $3, \
                 last_error = $4, updated_at = now() WHERE id = $1",
            )
            .bind(id)
            .bind(attempts)
            .bind(next_at)
            .bind(last_error.as_deref())
            .execute(pool)
            .await?;
        }
        JobUpdate::Resolved => {
            sqlx::query("UPDATE rematch_jobs SET status = 'resolved', updated_at = now() WHERE id = $1")
                .bind(id)
                .execute(pool)
                .await?;
        }
        JobUpdate::Exhausted {
            attempts,
            last_error,
        } => {
            sqlx::query(
                "UPDATE rematch_jobs SET status = 'failed-exhausted', attempts = $2, \
                 last_error = $3, updated_at = now() WHERE id = $1",
            )
            .bind(id)
            .bind(attempts)
            .bind(last_error.as_deref())
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

pub async fn manual_review(pool: &PgPool) -> Result<Vec<ManualReviewItem>, PipelineError> {
    let polls: Vec<(Uuid, i32, Option<String>)> = sqlx::query_as(
        "SELECT payment_id, failure_count, last_error FROM poll_jobs \
         WHERE status = 'failed-exhausted' ORDER BY updated_at",
    )
    .fetch_all(pool)
    .await?;

    let rematches: Vec<(Uuid, i32, Option<String>)> = sqlx::query_as(
        "SELECT log_id, attempts, last_error FROM rematch_jobs \
         WHERE status = 'failed-exhausted' ORDER BY updated_at",
    )
    .fetch_all(pool)
    .await?;

    let items = polls
        .into_iter()
        .map(|(reference_id, attempts, last_error)| ManualReviewItem {
            kind: "poll",
            reference_id,
            attempts,
            last_error,
        })
        .chain(
            rematches
                .into_iter()
                .map(|(reference_id, attempts, last_error)| ManualReviewItem {
                    kind: "rematch",
                    reference_id,
                    attempts,
                    last_error,
                }),
        )
        .collect();
    Ok(items)
}
