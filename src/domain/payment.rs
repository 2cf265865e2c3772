use {
    super::error::PipelineError,
    super::event::{Channel, Corroboration},
    super::id::{CheckoutId, CheckoutReference, EventId, TransactionId},
    super::money::Money,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Processing,
    Paid,
    Failed,
    Cancelled,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Higher wins. `Failed` and `Cancelled` share a rank, so neither can
    /// replace the other, and nothing replaces `Paid`.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Processing => 0,
            Self::Failed | Self::Cancelled => 1,
            Self::Paid => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }

    pub fn can_transition_to(&self, target: &PaymentState) -> bool {
        target.precedence() > self.precedence()
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PaymentState {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "PROCESSING" => Ok(Self::Processing),
            "PAID" => Ok(Self::Paid),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(PipelineError::Validation(format!(
                "unknown payment state: {other}"
            ))),
        }
    }
}

/// How firmly an event (or a row) is tied to a provider identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }

    pub fn min(self, other: Confidence) -> Confidence {
        if self == Confidence::Low || other == Confidence::Low {
            Confidence::Low
        } else {
            Confidence::High
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Confidence {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            other => Err(PipelineError::Validation(format!(
                "unknown confidence: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PaymentIntent {
    pub intent_id: Uuid,
    pub checkout_reference: CheckoutReference,
    pub customer_id: i64,
    pub money: Money,
    pub created_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn new(checkout_reference: CheckoutReference, customer_id: i64, money: Money) -> Self {
        Self {
            intent_id: Uuid::now_v7(),
            checkout_reference,
            customer_id,
            money,
            created_at: Utc::now(),
        }
    }
}

/// Authoritative payment record. `version` increments on every write.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Payment {
    pub id: Uuid,
    pub intent_id: Option<Uuid>,
    pub checkout_reference: Option<CheckoutReference>,
    pub customer_id: i64,
    pub checkout_id: Option<CheckoutId>,
    pub transaction_id: Option<TransactionId>,
    pub state: PaymentState,
    pub money: Money,
    pub reference_confidence: Confidence,
    pub state_confidence: Confidence,
    pub webhook_confirmed: bool,
    pub amount_mismatch: bool,
    pub failure_reason: Option<String>,
    pub notes: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub last_event_channel: Option<Channel>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Bound 1:1 to an intent through its checkout reference.
    pub fn for_intent(intent: &PaymentIntent, now: DateTime<Utc>) -> Self {
        Self::blank(
            Some(intent.intent_id),
            Some(intent.checkout_reference.clone()),
            intent.customer_id,
            intent.money,
            Confidence::High,
            now,
        )
    }

    /// Created by a channel that carried no provider reference.
    pub fn provisional(customer_id: i64, money: Money, now: DateTime<Utc>) -> Self {
        Self::blank(None, None, customer_id, money, Confidence::Low, now)
    }

    fn blank(
        intent_id: Option<Uuid>,
        checkout_reference: Option<CheckoutReference>,
        customer_id: i64,
        money: Money,
        reference_confidence: Confidence,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            intent_id,
            checkout_reference,
            customer_id,
            checkout_id: None,
            transaction_id: None,
            state: PaymentState::Processing,
            money,
            reference_confidence,
            state_confidence: Confidence::Low,
            webhook_confirmed: false,
            amount_mismatch: false,
            failure_reason: None,
            notes: None,
            payment_date: None,
            last_event_channel: None,
            last_event_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A terminal state reached through a high-confidence event. Anything
    /// short of that is provisional and may still be replaced.
    pub fn is_settled(&self) -> bool {
        self.state.is_terminal() && self.state_confidence == Confidence::High
    }

    pub fn decide(&self, transition: &Transition) -> Decision {
        let high = transition.confidence == Confidence::High;
        if transition.target == self.state {
            if high && self.state.is_terminal() && !self.is_settled() {
                return Decision::Corroborate;
            }
            return Decision::IgnoreDuplicate;
        }
        if self.is_settled() && !high {
            return Decision::IgnoreStale;
        }
        if self.state.is_terminal() && !self.is_settled() && high {
            return Decision::Apply;
        }
        if self.state.can_transition_to(&transition.target) {
            Decision::Apply
        } else {
            Decision::IgnoreStale
        }
    }

    /// Decide and compute the row that should replace this one. `next` is
    /// `None` when nothing about the row changes.
    pub fn plan(&self, transition: &Transition, now: DateTime<Utc>) -> Plan {
        let decision = self.decide(transition);
        let mut next = self.clone();
        let mut changed = false;

        if decision == Decision::Corroborate {
            next.state_confidence = Confidence::High;
            changed = true;
        }
        if decision == Decision::Apply {
            next.state = transition.target;
            next.state_confidence = transition.confidence;
            // Leaving a provisional PAID drops its date.
            match transition.target {
                PaymentState::Paid => next.payment_date = Some(now),
                PaymentState::Processing => next.payment_date = None,
                PaymentState::Failed | PaymentState::Cancelled => {
                    next.payment_date = None;
                    if transition.failure_reason.is_some() {
                        next.failure_reason = transition.failure_reason.clone();
                    }
                    if transition.notes.is_some() {
                        next.notes = transition.notes.clone();
                    }
                }
            }
            changed = true;
        }

        if next.checkout_id.is_none() && transition.checkout_id.is_some() {
            next.checkout_id = transition.checkout_id.clone();
            changed = true;
        }
        if next.transaction_id.is_none() && transition.transaction_id.is_some() {
            next.transaction_id = transition.transaction_id.clone();
            changed = true;
        }
        if !next.webhook_confirmed
            && transition.corroboration == Corroboration::Strong
            && transition.confidence == Confidence::High
        {
            next.webhook_confirmed = true;
            changed = true;
        }

        let amount_mismatch = transition
            .money
            .is_some_and(|reported| !self.money.matches(&reported));
        if amount_mismatch && !next.amount_mismatch {
            next.amount_mismatch = true;
            changed = true;
        }

        if changed {
            if let Actor::Channel(channel) = transition.actor {
                next.last_event_channel = Some(channel);
                next.last_event_at = Some(now);
            }
            next.updated_at = now;
        }

        Plan {
            decision,
            next: changed.then_some(next),
            amount_mismatch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Apply,
    /// Same state, now backed by a high-confidence event.
    Corroborate,
    IgnoreDuplicate,
    IgnoreStale,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub decision: Decision,
    pub next: Option<Payment>,
    pub amount_mismatch: bool,
}

/// Who asked for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Channel(Channel),
    Suppressor,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channel(c) => c.as_str(),
            Self::Suppressor => "suppressor",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A requested state change plus whatever metadata the event carried.
#[derive(Debug, Clone)]
pub struct Transition {
    pub target: PaymentState,
    pub confidence: Confidence,
    pub corroboration: Corroboration,
    pub actor: Actor,
    pub event_id: Option<EventId>,
    pub checkout_id: Option<CheckoutId>,
    pub transaction_id: Option<TransactionId>,
    pub money: Option<Money>,
    pub failure_reason: Option<String>,
    pub notes: Option<String>,
}

impl Transition {
    /// `keeper_confidence` is the keeper's reference confidence. Only a
    /// high-confidence keeper may displace a provisional `PAID` duplicate.
    pub fn cancel_duplicate(keeper: Uuid, keeper_confidence: Confidence) -> Self {
        Self {
            target: PaymentState::Cancelled,
            confidence: keeper_confidence,
            corroboration: Corroboration::Weak,
            actor: Actor::Suppressor,
            event_id: None,
            checkout_id: None,
            transaction_id: None,
            money: None,
            failure_reason: None,
            notes: Some(format!("duplicate of {keeper}")),
        }
    }
}

/// Outbound signal for the booking/invoice and notification collaborators.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PaymentConfirmed {
    pub payment_id: Uuid,
    pub intent_id: Option<Uuid>,
    pub amount: i64,
    pub currency: String,
    pub payment_date: DateTime<Utc>,
}

impl PaymentConfirmed {
    pub fn from_payment(payment: &Payment) -> Option<Self> {
        let payment_date = payment.payment_date?;
        Some(Self {
            payment_id: payment.id,
            intent_id: payment.intent_id,
            amount: payment.money.amount().cents(),
            currency: payment.money.currency().as_str().to_string(),
            payment_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Currency, MoneyAmount};

    fn money() -> Money {
        Money::new(MoneyAmount::new(1600).unwrap(), Currency::Eur)
    }

    fn transition(target: PaymentState, confidence: Confidence) -> Transition {
        Transition {
            target,
            confidence,
            corroboration: Corroboration::Strong,
            actor: Actor::Channel(Channel::Webhook),
            event_id: None,
            checkout_id: None,
            transaction_id: None,
            money: None,
            failure_reason: None,
            notes: None,
        }
    }

    #[test]
    fn paid_is_never_downgraded() {
        let mut p = Payment::provisional(7, money(), Utc::now());
        p.state = PaymentState::Paid;
        p.state_confidence = Confidence::High;
        for target in [PaymentState::Processing, PaymentState::Failed, PaymentState::Cancelled] {
            assert_eq!(
                p.decide(&transition(target, Confidence::High)),
                Decision::IgnoreStale
            );
        }
    }

    #[test]
    fn low_confidence_cannot_override_high_confidence_terminal() {
        let mut p = Payment::provisional(7, money(), Utc::now());
        p.state = PaymentState::Failed;
        p.state_confidence = Confidence::High;
        assert_eq!(
            p.decide(&transition(PaymentState::Paid, Confidence::Low)),
            Decision::IgnoreStale
        );
        assert_eq!(
            p.decide(&transition(PaymentState::Paid, Confidence::High)),
            Decision::Apply
        );
    }

    #[test]
    fn plan_backfills_ids_without_state_change() {
        let p = Payment::provisional(7, money(), Utc::now());
        let mut t = transition(PaymentState::Processing, Confidence::High);
        t.checkout_id = Some(CheckoutId::new("chk_1").unwrap());
        let plan = p.plan(&t, Utc::now());
        assert_eq!(plan.decision, Decision::IgnoreDuplicate);
        let next = plan.next.unwrap();
        assert_eq!(next.checkout_id.unwrap().as_str(), "chk_1");
        assert!(next.webhook_confirmed);
    }

    #[test]
    fn plan_flags_amount_mismatch() {
        let p = Payment::provisional(7, money(), Utc::now());
        let mut t = transition(PaymentState::Paid, Confidence::High);
        t.money = Some(Money::from_major(15.00, "EUR").unwrap());
        let plan = p.plan(&t, Utc::now());
        assert!(plan.amount_mismatch);
        let next = plan.next.unwrap();
        assert!(next.amount_mismatch);
        assert_eq!(next.state, PaymentState::Paid);
        assert!(next.payment_date.is_some());
    }

    #[test]
    fn high_confidence_replaces_provisional_terminal_state() {
        let mut p = Payment::provisional(7, money(), Utc::now());
        p.state = PaymentState::Paid;
        p.state_confidence = Confidence::Low;
        p.payment_date = Some(Utc::now());
        assert!(!p.is_settled());

        assert_eq!(
            p.decide(&transition(PaymentState::Failed, Confidence::Low)),
            Decision::IgnoreStale
        );
        let plan = p.plan(&transition(PaymentState::Failed, Confidence::High), Utc::now());
        assert_eq!(plan.decision, Decision::Apply);
        let next = plan.next.unwrap();
        assert_eq!(next.state, PaymentState::Failed);
        assert!(next.is_settled());
        assert_eq!(next.payment_date, None);
    }

    #[test]
    fn high_confidence_corroborates_provisional_paid() {
        let mut p = Payment::provisional(7, money(), Utc::now());
        p.state = PaymentState::Paid;
        let plan = p.plan(&transition(PaymentState::Paid, Confidence::High), Utc::now());
        assert_eq!(plan.decision, Decision::Corroborate);
        let next = plan.next.unwrap();
        assert_eq!(next.state_confidence, Confidence::High);
        assert!(next.is_settled());

        assert_eq!(
            next.decide(&transition(PaymentState::Paid, Confidence::High)),
            Decision::IgnoreDuplicate
        );
    }
}
