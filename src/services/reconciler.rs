use {
    crate::domain::{
        audit::AuditEntry,
        error::PipelineError,
        payment::{
            Actor, Decision, Payment, PaymentConfirmed, PaymentState, Plan, Transition,
        },
        store::PaymentStore,
    },
    chrono::Utc,
    std::sync::Arc,
    tokio::sync::broadcast,
    uuid::Uuid,
};

#[derive(Debug, Clone)]
pub struct ReconcileResult {
    pub decision: Decision,
    /// The row as stored after this call.
    pub payment: Payment,
    pub amount_mismatch: bool,
}

/// Applies transitions to payment rows with read / decide / conditional-write.
///
/// Racing writers for one payment retry against the fresh row; writers for
/// different payments never wait on each other.
pub struct Reconciler {
    store: Arc<dyn PaymentStore>,
    max_retries: u32,
    publisher: broadcast::Sender<PaymentConfirmed>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        max_retries: u32,
        publisher: broadcast::Sender<PaymentConfirmed>,
    ) -> Self {
        Self {
            store,
            max_retries,
            publisher,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaymentConfirmed> {
        self.publisher.subscribe()
    }

    pub async fn apply(
        &self,
        payment_id: Uuid,
        transition: &Transition,
    ) -> Result<ReconcileResult, PipelineError> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let current = self
                .store
                .get_payment(payment_id)
                .await?
                .ok_or_else(|| PipelineError::MatchNotFound(format!("payment {payment_id}")))?;

            let plan = current.plan(transition, Utc::now());
            let Some(next) = plan.next.clone() else {
                self.audit_decision(&current, &current, transition, &plan)
                    .await?;
                return Ok(ReconcileResult {
                    decision: plan.decision,
                    payment: current,
                    amount_mismatch: plan.amount_mismatch,
                });
            };

            match self.store.update_payment(&next, current.version).await? {
                Some(saved) => {
                    self.audit_decision(&current, &saved, transition, &plan)
                        .await?;
                    if is_confirmed_paid(&saved) && !is_confirmed_paid(&current) {
                        self.publish(&saved);
                    }
                    return Ok(ReconcileResult {
                        decision: plan.decision,
                        payment: saved,
                        amount_mismatch: plan.amount_mismatch,
                    });
                }
                None if attempts > self.max_retries => {
                    tracing::error!(%payment_id, attempts, "version conflict retries exhausted");
                    return Err(PipelineError::ConcurrencyConflict {
                        payment_id,
                        attempts,
                    });
                }
                None => {
                    tracing::debug!(%payment_id, attempts, "version conflict, re-reading");
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    async fn audit_decision(
        &self,
        before: &Payment,
        after: &Payment,
        transition: &Transition,
        plan: &Plan,
    ) -> Result<(), PipelineError> {
        let event_id = transition.event_id.as_ref().map(|e| e.as_str());
        let actor = transition.actor.as_str();

        let action = match (plan.decision, transition.actor) {
            (Decision::Apply, Actor::Suppressor) => "duplicate_cancelled",
            (Decision::Apply, _) => "status_changed",
            (Decision::Corroborate, _) => "status_corroborated",
            (Decision::IgnoreDuplicate, _) => "ignored_duplicate",
            (Decision::IgnoreStale, _) => "ignored_stale",
        };
        let detail = serde_json::json!({
            "old_state": before.state.as_str(),
            "new_state": after.state.as_str(),
            "target": transition.target.as_str(),
            "confidence": transition.confidence.as_str(),
            "corroboration": transition.corroboration.as_str(),
            "current_confidence": before.state_confidence.as_str(),
            "version": after.version,
            "notes": transition.notes,
        });
        self.store
            .append_audit(&AuditEntry::new(before.id, event_id, action, actor, detail))
            .await?;

        if plan.decision == Decision::IgnoreStale {
            tracing::info!(
                payment_id = %before.id,
                from = %before.state,
                to = %transition.target,
                actor,
                "stale transition ignored"
            );
        }

        if after.amount_mismatch && !before.amount_mismatch {
            let reported = transition.money.map(|m| m.to_string());
            tracing::warn!(
                payment_id = %before.id,
                expected = %before.money,
                reported = ?reported,
                "amount mismatch"
            );
            let detail = serde_json::json!({
                "expected": before.money.to_string(),
                "reported": reported,
            });
            self.store
                .append_audit(&AuditEntry::new(
                    before.id,
                    event_id,
                    "amount_mismatch",
                    actor,
                    detail,
                ))
                .await?;
        }
        Ok(())
    }

    fn publish(&self, payment: &Payment) {
        let Some(event) = PaymentConfirmed::from_payment(payment) else {
            return;
        };
        tracing::info!(payment_id = %payment.id, "payment confirmed");
        // No subscribers is fine; the row is the source of truth.
        let _ = self.publisher.send(event);
    }

    /// Whether the intent may start a new checkout: no payment yet, or its
    /// payment ended in `FAILED` / `CANCELLED`.
    pub async fn intent_retry_eligible(&self, intent_id: Uuid) -> Result<bool, PipelineError> {
        Ok(match self.store.find_payment_by_intent(intent_id).await? {
            None => true,
            Some(p) => matches!(p.state, PaymentState::Failed | PaymentState::Cancelled),
        })
    }
}

/// Low-confidence `PAID` is provisional and never leaves the engine.
fn is_confirmed_paid(payment: &Payment) -> bool {
    payment.state == PaymentState::Paid && payment.is_settled()
}
