use {
    crate::{
        domain::{
            error::{PipelineError, SignatureFailure},
            event::{Channel, EventOutcome, InboundEvent, ProviderEvent, ProviderPayload},
            payment::{Actor, Confidence, Decision, Payment, PaymentState, Transition},
            store::PaymentStore,
        },
        services::{
            matcher::{MatchOutcome, PaymentMatcher},
            normalizer::normalize,
            reconciler::Reconciler,
            signature::Verification,
            suppressor::DuplicateSuppressor,
        },
    },
    chrono::Utc,
    serde::Serialize,
    std::sync::Arc,
    uuid::Uuid,
};

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub log_id: Option<Uuid>,
    pub outcome: EventOutcome,
    pub payment: Option<Payment>,
}

impl IngestReport {
    pub fn state(&self) -> Option<PaymentState> {
        self.payment.as_ref().map(|p| p.state)
    }
}

/// Whether a `matched-none` result goes to the re-match queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnUnmatched {
    Enqueue,
    Drop,
}

/// Normalizer → Matcher → Reconciler → Event Log, shared by every channel.
pub struct Engine {
    store: Arc<dyn PaymentStore>,
    matcher: PaymentMatcher,
    reconciler: Arc<Reconciler>,
    suppressor: Arc<DuplicateSuppressor>,
    first_poll_delay: chrono::Duration,
    rematch_delay: chrono::Duration,
}

impl Engine {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        matcher: PaymentMatcher,
        reconciler: Arc<Reconciler>,
        suppressor: Arc<DuplicateSuppressor>,
        first_poll_delay: chrono::Duration,
        rematch_delay: chrono::Duration,
    ) -> Self {
        Self {
            store,
            matcher,
            reconciler,
            suppressor,
            first_poll_delay,
            rematch_delay,
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Log a delivery that failed authenticity checks. The payment store is
    /// not touched.
    pub async fn reject(
        &self,
        channel: Channel,
        raw_body: &[u8],
        reason: SignatureFailure,
    ) -> Result<Uuid, PipelineError> {
        let entry = ProviderEvent::rejected(
            channel,
            raw_body,
            false,
            serde_json::json!({ "reason": reason.as_str() }),
        );
        self.store.append_event(&entry).await?;
        Ok(entry.log_id)
    }

    /// Log a delivery that passed authenticity but could not be parsed.
    pub async fn reject_malformed(
        &self,
        channel: Channel,
        raw_body: &[u8],
        verified: bool,
        error: &PipelineError,
    ) -> Result<Uuid, PipelineError> {
        let entry = ProviderEvent::rejected(
            channel,
            raw_body,
            verified,
            serde_json::json!({ "reason": "malformed", "error": error.to_string() }),
        );
        self.store.append_event(&entry).await?;
        Ok(entry.log_id)
    }

    pub async fn ingest(
        &self,
        event: InboundEvent,
        verification: Verification,
    ) -> Result<IngestReport, PipelineError> {
        self.process(event, verification, OnUnmatched::Enqueue).await
    }

    /// Retry matching for an event logged as `matched-none`. Returns the
    /// report once it resolves, `None` while it still matches nothing.
    pub async fn rematch(&self, log_id: Uuid) -> Result<Option<IngestReport>, PipelineError> {
        let entry = self
            .store
            .get_event(log_id)
            .await?
            .ok_or_else(|| PipelineError::Validation(format!("event log row {log_id} missing")))?;
        let event = InboundEvent::from_log(&entry)?;
        let verification = Verification {
            ok: entry.verified,
            reason: None,
            weight: entry.channel.corroboration(),
        };
        let report = self.process(event, verification, OnUnmatched::Drop).await?;
        Ok((report.outcome != EventOutcome::MatchedNone).then_some(report))
    }

    async fn process(
        &self,
        event: InboundEvent,
        verification: Verification,
        on_unmatched: OnUnmatched,
    ) -> Result<IngestReport, PipelineError> {
        let channel = event.channel();
        let now = Utc::now();

        if let Some(payment_id) = self
            .store
            .applied_event_target(event.event_id.as_str())
            .await?
        {
            tracing::info!(event_id = %event.event_id, %payment_id, "event already applied");
            let payment = self.store.get_payment(payment_id).await?;
            let log_id = self
                .log(
                    &event,
                    verification,
                    Some(payment_id),
                    EventOutcome::IgnoredDuplicate,
                    serde_json::json!({ "reason": "replay" }),
                )
                .await?;
            return Ok(IngestReport {
                log_id: Some(log_id),
                outcome: EventOutcome::IgnoredDuplicate,
                payment,
            });
        }

        let normalized = normalize(
            event.facts.status.as_deref(),
            event.facts.event_type.as_deref(),
        );

        let (payment, match_confidence, created) =
            match self.matcher.resolve(channel, &event.facts, now).await? {
                MatchOutcome::Matched {
                    payment,
                    confidence,
                    created,
                } => (payment, confidence, created),
                MatchOutcome::NotFound(reason) => {
                    return self.unmatched(&event, verification, reason, on_unmatched).await;
                }
            };

        let status_confidence = if normalized.low_confidence {
            Confidence::Low
        } else {
            Confidence::High
        };
        let confidence = match_confidence.min(status_confidence);
        let transition = Transition {
            target: normalized.state,
            confidence,
            corroboration: verification.weight,
            actor: Actor::Channel(channel),
            event_id: Some(event.event_id.clone()),
            checkout_id: event.facts.checkout_id.clone(),
            transaction_id: event.facts.transaction_id.clone(),
            money: event.facts.money,
            failure_reason: event.facts.failure_reason.clone(),
            notes: None,
        };

        let result = self.reconciler.apply(payment.id, &transition).await?;
        let outcome = match result.decision {
            Decision::Apply | Decision::Corroborate => EventOutcome::Applied,
            // The event that created the row counts as applied.
            Decision::IgnoreDuplicate if created => EventOutcome::Applied,
            Decision::IgnoreDuplicate => EventOutcome::IgnoredDuplicate,
            Decision::IgnoreStale => EventOutcome::IgnoredStale,
        };

        let mut detail = serde_json::json!({
            "state": normalized.state.as_str(),
            "confidence": confidence.as_str(),
            "corroboration": verification.weight.as_str(),
            "created": created,
            "amount_mismatch": result.amount_mismatch,
        });
        if let Some(unmapped) = &normalized.unmapped {
            detail["unmapped"] = serde_json::json!({
                "status": unmapped.status,
                "event_type": unmapped.event_type,
            });
        }
        if let ProviderPayload::Redirect { params, .. } = &event.payload {
            detail["query_status"] = serde_json::json!(params.status);
        }

        let log_id = self
            .log(&event, verification, Some(payment.id), outcome, detail)
            .await?;

        tracing::info!(
            event_id = %event.event_id,
            payment_id = %payment.id,
            channel = %channel,
            outcome = %outcome,
            state = %result.payment.state,
            "event reconciled"
        );

        if confidence == Confidence::Low {
            if let Err(e) = self.suppressor.suppress_around(&result.payment).await {
                tracing::error!(payment_id = %payment.id, error = %e, "inline suppression failed");
            }
        }

        if created && !result.payment.is_settled() {
            self.store
                .schedule_poll(payment.id, now + self.first_poll_delay)
                .await?;
        }

        Ok(IngestReport {
            log_id: Some(log_id),
            outcome,
            payment: Some(result.payment),
        })
    }

    async fn unmatched(
        &self,
        event: &InboundEvent,
        verification: Verification,
        reason: String,
        on_unmatched: OnUnmatched,
    ) -> Result<IngestReport, PipelineError> {
        if on_unmatched == OnUnmatched::Drop {
            return Ok(IngestReport {
                log_id: None,
                outcome: EventOutcome::MatchedNone,
                payment: None,
            });
        }

        tracing::warn!(event_id = %event.event_id, channel = %event.channel(), %reason, "event matched no payment");
        let log_id = self
            .log(
                event,
                verification,
                None,
                EventOutcome::MatchedNone,
                serde_json::json!({ "reason": reason }),
            )
            .await?;
        self.store
            .enqueue_rematch(log_id, Utc::now() + self.rematch_delay)
            .await?;
        Ok(IngestReport {
            log_id: Some(log_id),
            outcome: EventOutcome::MatchedNone,
            payment: None,
        })
    }

    async fn log(
        &self,
        event: &InboundEvent,
        verification: Verification,
        payment_id: Option<Uuid>,
        outcome: EventOutcome,
        detail: serde_json::Value,
    ) -> Result<Uuid, PipelineError> {
        let entry = ProviderEvent::record(event, verification.ok, payment_id, outcome, detail);
        self.store.append_event(&entry).await?;
        Ok(entry.log_id)
    }
}
