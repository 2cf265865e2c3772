use {
    crate::{
        config::PollSettings,
        domain::{
            audit::AuditEntry,
            error::PipelineError,
            event::{Channel, InboundEvent},
            provider::PaymentProvider,
            store::{JobUpdate, PaymentStore, PollJob, RematchJob},
        },
        services::{pipeline::Engine, signature::Verification},
    },
    chrono::{DateTime, Utc},
    serde::Serialize,
    std::{sync::Arc, time::Duration},
};

const BATCH: i64 = 10;

/// `delay(n) = min(base * multiplier^n, max_delay)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_settings(settings: &PollSettings) -> Self {
        Self {
            base: settings.base_delay,
            multiplier: settings.multiplier,
            max_delay: settings.max_delay,
            max_attempts: settings.max_attempts,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.base.as_secs_f64() * exp;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Fixed-delay retry for the re-match queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RematchPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TickReport {
    pub polled: usize,
    pub resolved: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    pub rematched: usize,
    pub rematch_exhausted: usize,
}

/// Drives the poll channel and the re-match queue.
pub struct RetryScheduler {
    store: Arc<dyn PaymentStore>,
    provider: Arc<dyn PaymentProvider>,
    engine: Arc<Engine>,
    backoff: BackoffPolicy,
    rematch: RematchPolicy,
    provider_timeout: Duration,
}

pub fn chrono_delay(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}

enum PollResult {
    Resolved,
    Unresolved(String),
}

impl RetryScheduler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        provider: Arc<dyn PaymentProvider>,
        engine: Arc<Engine>,
        backoff: BackoffPolicy,
        rematch: RematchPolicy,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            engine,
            backoff,
            rematch,
            provider_timeout,
        }
    }

    /// One pass over due poll jobs, then due re-match items.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, PipelineError> {
        let mut report = TickReport::default();
        // Claimed jobs stay invisible until the lease runs out, so a crashed
        // tick is picked up again later.
        let lease_until = now + chrono_delay(self.provider_timeout * 3);

        let jobs = self.store.claim_due_polls(now, lease_until, BATCH).await?;
        for job in jobs {
            report.polled += 1;
            let result = match self.poll_once(&job).await {
                Ok(r) => r,
                Err(e) => PollResult::Unresolved(e.to_string()),
            };
            match result {
                PollResult::Resolved => {
                    self.store.update_poll(job.payment_id, &JobUpdate::Resolved).await?;
                    report.resolved += 1;
                }
                PollResult::Unresolved(error) => {
                    if self.poll_unresolved(&job, error, now).await? {
                        report.exhausted += 1;
                    } else {
                        report.rescheduled += 1;
                    }
                }
            }
        }

        let rematches = self
            .store
            .claim_due_rematches(now, lease_until, BATCH)
            .await?;
        for job in rematches {
            match self.engine.rematch(job.log_id).await {
                Ok(Some(_)) => {
                    self.store.update_rematch(job.id, &JobUpdate::Resolved).await?;
                    report.rematched += 1;
                }
                Ok(None) => {
                    if self
                        .rematch_unresolved(&job, "still matches nothing".into(), now)
                        .await?
                    {
                        report.rematch_exhausted += 1;
                    }
                }
                Err(e) => {
                    if self.rematch_unresolved(&job, e.to_string(), now).await? {
                        report.rematch_exhausted += 1;
                    }
                }
            }
        }

        if report != TickReport::default() {
            tracing::debug!(?report, "scheduler tick");
        }
        Ok(report)
    }

    async fn poll_once(&self, job: &PollJob) -> Result<PollResult, PipelineError> {
        let Some(payment) = self.store.get_payment(job.payment_id).await? else {
            tracing::warn!(payment_id = %job.payment_id, "poll job for missing payment, resolving");
            return Ok(PollResult::Resolved);
        };
        if payment.is_settled() {
            return Ok(PollResult::Resolved);
        }
        let Some(checkout_id) = payment.checkout_id.clone() else {
            return Ok(PollResult::Unresolved("checkout_id not known yet".into()));
        };

        let fetched =
            tokio::time::timeout(self.provider_timeout, self.provider.fetch_checkout(&checkout_id))
                .await;
        let snapshot = match fetched {
            Ok(Ok(snapshot)) => snapshot,
            // Transient: never a FAILED payment.
            Ok(Err(e)) => return Ok(PollResult::Unresolved(e.to_string())),
            Err(_) => {
                return Ok(PollResult::Unresolved(format!(
                    "provider timed out after {:?}",
                    self.provider_timeout
                )));
            }
        };

        let event = InboundEvent::poll(snapshot)?;
        let verification = Verification {
            ok: true,
            reason: None,
            weight: Channel::Poll.corroboration(),
        };
        let report = self.engine.ingest(event, verification).await?;

        let terminal = match self.store.get_payment(job.payment_id).await? {
            Some(p) => p.is_settled(),
            None => true,
        };
        if terminal {
            Ok(PollResult::Resolved)
        } else {
            Ok(PollResult::Unresolved(format!(
                "provider still reports processing ({})",
                report.outcome
            )))
        }
    }

    /// Returns `true` when the job is now exhausted.
    async fn poll_unresolved(
        &self,
        job: &PollJob,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<bool, PipelineError> {
        let attempts = job.failure_count + 1;
        if attempts as u32 >= self.backoff.max_attempts {
            tracing::warn!(
                payment_id = %job.payment_id,
                attempts,
                last_error = %error,
                "poll attempts exhausted, moved to manual review"
            );
            self.store
                .update_poll(
                    job.payment_id,
                    &JobUpdate::Exhausted {
                        attempts,
                        last_error: Some(error.clone()),
                    },
                )
                .await?;
            self.store
                .append_audit(&AuditEntry::new(
                    job.payment_id,
                    None,
                    "poll_exhausted",
                    "scheduler",
                    serde_json::json!({ "attempts": attempts, "last_error": error }),
                ))
                .await?;
            return Ok(true);
        }

        let next_at = now + chrono_delay(self.backoff.delay(attempts as u32));
        self.store
            .update_poll(
                job.payment_id,
                &JobUpdate::Reschedule {
                    attempts,
                    next_at,
                    last_error: Some(error),
                },
            )
            .await?;
        Ok(false)
    }

    async fn rematch_unresolved(
        &self,
        job: &RematchJob,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<bool, PipelineError> {
        let attempts = job.attempts + 1;
        if attempts as u32 >= self.rematch.max_attempts {
            tracing::warn!(
                log_id = %job.log_id,
                attempts,
                last_error = %error,
                "re-match attempts exhausted, moved to manual review"
            );
            self.store
                .update_rematch(
                    job.id,
                    &JobUpdate::Exhausted {
                        attempts,
                        last_error: Some(error.clone()),
                    },
                )
                .await?;
            self.store
                .append_audit(&AuditEntry::new(
                    job.log_id,
                    None,
                    "manual_review",
                    "scheduler",
                    serde_json::json!({ "attempts": attempts, "last_error": error }),
                ))
                .await?;
            return Ok(true);
        }

        self.store
            .update_rematch(
                job.id,
                &JobUpdate::Reschedule {
                    attempts,
                    next_at: now + chrono_delay(self.rematch.delay),
                    last_error: Some(error),
                },
            )
            .await?;
        Ok(false)
    }
}
