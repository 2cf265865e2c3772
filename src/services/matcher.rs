use {
    crate::domain::{
        error::PipelineError,
        event::{Channel, EventFacts},
        id::CheckoutReference,
        payment::{Confidence, Payment},
        store::{InsertOutcome, PaymentStore},
    },
    chrono::{DateTime, Utc},
    std::sync::Arc,
};

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched {
        payment: Payment,
        confidence: Confidence,
        /// The row did not exist before this event.
        created: bool,
    },
    NotFound(String),
}

/// Resolves an event to the payment it reports on.
pub struct PaymentMatcher {
    store: Arc<dyn PaymentStore>,
    match_window: chrono::Duration,
}

impl PaymentMatcher {
    pub fn new(store: Arc<dyn PaymentStore>, match_window: chrono::Duration) -> Self {
        Self {
            store,
            match_window,
        }
    }

    pub async fn resolve(
        &self,
        channel: Channel,
        facts: &EventFacts,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome, PipelineError> {
        let outcome = self.resolve_uncapped(channel, facts, now).await?;
        // Manual reports are client-side claims and never bind firmly.
        Ok(match outcome {
            MatchOutcome::Matched {
                payment,
                confidence,
                created,
            } if channel == Channel::Manual => MatchOutcome::Matched {
                payment,
                confidence: confidence.min(Confidence::Low),
                created,
            },
            other => other,
        })
    }

    async fn resolve_uncapped(
        &self,
        channel: Channel,
        facts: &EventFacts,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome, PipelineError> {
        if let Some(checkout_id) = &facts.checkout_id {
            if let Some(payment) = self.store.find_payment_by_checkout_id(checkout_id).await? {
                return Ok(matched(payment, Confidence::High, false));
            }
        }

        if let Some(reference) = &facts.checkout_reference {
            if let Some(outcome) = self.by_reference(reference, now).await? {
                return Ok(outcome);
            }
        }

        if let Some(transaction_id) = &facts.transaction_id {
            if let Some(payment) = self
                .store
                .find_payment_by_transaction_id(transaction_id)
                .await?
            {
                return Ok(matched(payment, Confidence::High, false));
            }
        }

        if facts.has_identifiers() {
            return Ok(MatchOutcome::NotFound(format!(
                "no payment or intent for checkout_id={:?} reference={:?} transaction_id={:?}",
                facts.checkout_id.as_ref().map(|c| c.as_str()),
                facts.checkout_reference.as_ref().map(|r| r.as_str()),
                facts.transaction_id.as_ref().map(|t| t.as_str()),
            )));
        }

        self.heuristic(channel, facts, now).await
    }

    /// Existing payment for the reference, else a new one bound to its intent.
    async fn by_reference(
        &self,
        reference: &CheckoutReference,
        now: DateTime<Utc>,
    ) -> Result<Option<MatchOutcome>, PipelineError> {
        if let Some(payment) = self.store.find_payment_by_reference(reference).await? {
            return Ok(Some(matched(payment, Confidence::High, false)));
        }
        let Some(intent) = self.store.find_intent_by_reference(reference).await? else {
            return Ok(None);
        };

        let payment = Payment::for_intent(&intent, now);
        match self.store.insert_payment(&payment).await? {
            InsertOutcome::Inserted => {
                tracing::info!(
                    payment_id = %payment.id,
                    intent_id = %intent.intent_id,
                    reference = %reference,
                    "payment created for intent"
                );
                Ok(Some(matched(payment, Confidence::High, true)))
            }
            InsertOutcome::Conflict => {
                // Another channel won the insert; use its row.
                let winner = match self.store.find_payment_by_reference(reference).await? {
                    Some(p) => Some(p),
                    None => self.store.find_payment_by_intent(intent.intent_id).await?,
                };
                Ok(winner.map(|p| matched(p, Confidence::High, false)))
            }
        }
    }

    async fn heuristic(
        &self,
        channel: Channel,
        facts: &EventFacts,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome, PipelineError> {
        let (Some(customer_id), Some(money)) = (facts.customer_id, facts.money) else {
            return Ok(MatchOutcome::NotFound(
                "no identifiers and no customer/amount to match on".into(),
            ));
        };

        let since = now - self.match_window;
        if let Some(payment) = self
            .store
            .find_unconfirmed_candidate(customer_id, &money, since)
            .await?
        {
            tracing::info!(
                payment_id = %payment.id,
                customer_id,
                money = %money,
                "heuristic match, low confidence"
            );
            return Ok(matched(payment, Confidence::Low, false));
        }

        if channel != Channel::Manual {
            return Ok(MatchOutcome::NotFound(format!(
                "no unconfirmed payment for customer {customer_id} / {money} in window"
            )));
        }

        let payment = Payment::provisional(customer_id, money, now);
        self.store.insert_payment(&payment).await?;
        tracing::info!(
            payment_id = %payment.id,
            customer_id,
            money = %money,
            "provisional payment created from manual report"
        );
        Ok(matched(payment, Confidence::Low, true))
    }
}

fn matched(payment: Payment, confidence: Confidence, created: bool) -> MatchOutcome {
    MatchOutcome::Matched {
        payment,
        confidence,
        created,
    }
}
