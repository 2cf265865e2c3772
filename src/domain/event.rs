use {
    super::error::PipelineError,
    super::id::{CheckoutId, CheckoutReference, EventId, TransactionId},
    super::money::Money,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Webhook,
    Redirect,
    Poll,
    Manual,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Redirect => "redirect",
            Self::Poll => "poll",
            Self::Manual => "manual",
        }
    }

    /// Only signed webhooks corroborate strongly.
    pub fn corroboration(&self) -> Corroboration {
        match self {
            Self::Webhook => Corroboration::Strong,
            Self::Redirect | Self::Poll | Self::Manual => Corroboration::Weak,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Channel {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "webhook" => Ok(Self::Webhook),
            "redirect" => Ok(Self::Redirect),
            "poll" => Ok(Self::Poll),
            "manual" => Ok(Self::Manual),
            other => Err(PipelineError::Validation(format!("unknown channel: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Corroboration {
    Strong,
    Weak,
}

impl Corroboration {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::Weak => "weak",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventOutcome {
    #[serde(rename = "applied")]
    Applied,
    #[serde(rename = "ignored-duplicate")]
    IgnoredDuplicate,
    #[serde(rename = "ignored-stale")]
    IgnoredStale,
    #[serde(rename = "matched-none")]
    MatchedNone,
    #[serde(rename = "rejected")]
    Rejected,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::IgnoredDuplicate => "ignored-duplicate",
            Self::IgnoredStale => "ignored-stale",
            Self::MatchedNone => "matched-none",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for EventOutcome {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "applied" => Ok(Self::Applied),
            "ignored-duplicate" => Ok(Self::IgnoredDuplicate),
            "ignored-stale" => Ok(Self::IgnoredStale),
            "matched-none" => Ok(Self::MatchedNone),
            "rejected" => Ok(Self::Rejected),
            other => Err(PipelineError::Validation(format!("unknown outcome: {other}"))),
        }
    }
}

// ── Wire schemas, one per channel ──────────────────────────────────────────

/// Provider webhook body. Unknown fields stay in `raw_payload` only.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "reference")]
    pub checkout_reference: Option<String>,
    #[serde(default)]
    pub checkout_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// Query parameters of the browser return URL.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RedirectParams {
    #[serde(default)]
    pub checkout_id: Option<String>,
    #[serde(default, alias = "reference")]
    pub checkout_reference: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Provider answer to `GET /checkouts/{checkout_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSnapshot {
    pub checkout_id: String,
    #[serde(default)]
    pub checkout_reference: Option<String>,
    pub status: String,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Client-side "simulate webhook" call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualReport {
    pub customer_id: i64,
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default, alias = "reference")]
    pub checkout_reference: Option<String>,
    #[serde(default)]
    pub checkout_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ProviderPayload {
    Webhook(WebhookPayload),
    Redirect {
        params: RedirectParams,
        snapshot: Option<CheckoutSnapshot>,
    },
    Poll(CheckoutSnapshot),
    Manual(ManualReport),
}

impl ProviderPayload {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Webhook(_) => Channel::Webhook,
            Self::Redirect { .. } => Channel::Redirect,
            Self::Poll(_) => Channel::Poll,
            Self::Manual(_) => Channel::Manual,
        }
    }

    /// Validate the typed payload into the facts control flow relies on.
    pub fn facts(&self) -> Result<EventFacts, PipelineError> {
        match self {
            Self::Webhook(w) => Ok(EventFacts {
                checkout_reference: opt_id(&w.checkout_reference, CheckoutReference::new)?,
                checkout_id: opt_id(&w.checkout_id, CheckoutId::new)?,
                transaction_id: opt_id(&w.transaction_id, TransactionId::new)?,
                status: non_blank(&w.status),
                event_type: non_blank(&w.event_type),
                money: opt_money(w.amount, &w.currency)?,
                customer_id: w.customer_id,
                failure_reason: non_blank(&w.failure_reason),
            }),
            Self::Redirect { params, snapshot } => {
                let snap = snapshot.as_ref();
                let reference = snap
                    .and_then(|s| s.checkout_reference.clone())
                    .or_else(|| params.checkout_reference.clone());
                let checkout_id = snap
                    .map(|s| s.checkout_id.clone())
                    .or_else(|| params.checkout_id.clone());
                Ok(EventFacts {
                    checkout_reference: opt_id(&reference, CheckoutReference::new)?,
                    checkout_id: opt_id(&checkout_id, CheckoutId::new)?,
                    transaction_id: opt_id(
                        &snap.and_then(|s| s.transaction_id.clone()),
                        TransactionId::new,
                    )?,
                    // The query-string status is audit-only.
                    status: snap.map(|s| s.status.clone()),
                    event_type: None,
                    money: match snap {
                        Some(s) => opt_money(s.amount, &s.currency)?,
                        None => None,
                    },
                    customer_id: None,
                    failure_reason: None,
                })
            }
            Self::Poll(s) => Ok(EventFacts {
                checkout_reference: opt_id(&s.checkout_reference, CheckoutReference::new)?,
                checkout_id: Some(CheckoutId::new(s.checkout_id.clone())?),
                transaction_id: opt_id(&s.transaction_id, TransactionId::new)?,
                status: non_blank(&Some(s.status.clone())),
                event_type: None,
                money: opt_money(s.amount, &s.currency)?,
                customer_id: None,
                failure_reason: None,
            }),
            Self::Manual(m) => Ok(EventFacts {
                checkout_reference: opt_id(&m.checkout_reference, CheckoutReference::new)?,
                checkout_id: opt_id(&m.checkout_id, CheckoutId::new)?,
                transaction_id: opt_id(&m.transaction_id, TransactionId::new)?,
                status: non_blank(&m.status),
                event_type: non_blank(&m.event_type),
                money: Some(Money::from_major(m.amount, &m.currency)?),
                customer_id: Some(m.customer_id),
                failure_reason: None,
            }),
        }
    }
}

fn non_blank(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn opt_id<T>(
    raw: &Option<String>,
    ctor: impl Fn(String) -> Result<T, PipelineError>,
) -> Result<Option<T>, PipelineError> {
    non_blank(raw).map(ctor).transpose()
}

fn opt_money(amount: Option<f64>, currency: &Option<String>) -> Result<Option<Money>, PipelineError> {
    match (amount, non_blank(currency)) {
        (Some(a), Some(c)) => Money::from_major(a, &c).map(Some),
        _ => Ok(None),
    }
}

/// Validated, channel-independent view of an event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFacts {
    pub checkout_reference: Option<CheckoutReference>,
    pub checkout_id: Option<CheckoutId>,
    pub transaction_id: Option<TransactionId>,
    pub status: Option<String>,
    pub event_type: Option<String>,
    pub money: Option<Money>,
    pub customer_id: Option<i64>,
    pub failure_reason: Option<String>,
}

impl EventFacts {
    pub fn has_identifiers(&self) -> bool {
        self.checkout_reference.is_some()
            || self.checkout_id.is_some()
            || self.transaction_id.is_some()
    }
}

/// An event as it enters the engine, before matching.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub event_id: EventId,
    pub payload: ProviderPayload,
    pub facts: EventFacts,
    pub raw_payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    fn build(
        event_id: EventId,
        payload: ProviderPayload,
        raw_payload: serde_json::Value,
    ) -> Result<Self, PipelineError> {
        let facts = payload
            .facts()
            .map_err(|e| PipelineError::MalformedEvent(e.to_string()))?;
        Ok(Self {
            event_id,
            payload,
            facts,
            raw_payload,
            received_at: Utc::now(),
        })
    }

    pub fn webhook(raw_body: &[u8]) -> Result<Self, PipelineError> {
        let raw: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| PipelineError::MalformedEvent(format!("webhook body: {e}")))?;
        Self::webhook_from_value(raw, raw_body)
    }

    fn webhook_from_value(raw: serde_json::Value, raw_body: &[u8]) -> Result<Self, PipelineError> {
        let payload: WebhookPayload = serde_json::from_value(raw.clone())
            .map_err(|e| PipelineError::MalformedEvent(format!("webhook schema: {e}")))?;
        if non_blank(&payload.event_type).is_none() && non_blank(&payload.status).is_none() {
            return Err(PipelineError::MalformedEvent(
                "webhook carries neither event_type nor status".into(),
            ));
        }
        let event_id = match non_blank(&payload.id) {
            Some(id) => EventId::new(id)
                .map_err(|e| PipelineError::MalformedEvent(e.to_string()))?,
            None => EventId::derive(Channel::Webhook, raw_body),
        };
        Self::build(event_id, ProviderPayload::Webhook(payload), raw)
    }

    pub fn redirect(
        params: RedirectParams,
        snapshot: Option<CheckoutSnapshot>,
    ) -> Result<Self, PipelineError> {
        let raw = serde_json::json!({ "query": params, "provider": snapshot });
        let event_id = EventId::derive(Channel::Redirect, raw.to_string().as_bytes());
        Self::build(event_id, ProviderPayload::Redirect { params, snapshot }, raw)
    }

    pub fn poll(snapshot: CheckoutSnapshot) -> Result<Self, PipelineError> {
        let raw = serde_json::to_value(&snapshot)?;
        let event_id = EventId::derive(Channel::Poll, raw.to_string().as_bytes());
        Self::build(event_id, ProviderPayload::Poll(snapshot), raw)
    }

    pub fn manual(raw_body: &[u8]) -> Result<Self, PipelineError> {
        let raw: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| PipelineError::MalformedEvent(format!("manual body: {e}")))?;
        let report: ManualReport = serde_json::from_value(raw.clone())
            .map_err(|e| PipelineError::MalformedEvent(format!("manual schema: {e}")))?;
        let event_id = EventId::derive(Channel::Manual, raw_body);
        Self::build(event_id, ProviderPayload::Manual(report), raw)
    }

    /// Rebuild an event from its event-log row, for delayed re-matching.
    pub fn from_log(entry: &ProviderEvent) -> Result<Self, PipelineError> {
        let event_id = EventId::new(entry.event_id.clone())?;
        let raw = entry.raw_payload.clone();
        let mut event = match entry.channel {
            Channel::Webhook => {
                let bytes = serde_json::to_vec(&raw)?;
                Self::webhook_from_value(raw, &bytes)?
            }
            Channel::Redirect => {
                let params: RedirectParams =
                    serde_json::from_value(raw.get("query").cloned().unwrap_or_default())
                        .unwrap_or_default();
                let snapshot: Option<CheckoutSnapshot> = raw
                    .get("provider")
                    .cloned()
                    .filter(|v| !v.is_null())
                    .map(serde_json::from_value)
                    .transpose()?;
                Self::redirect(params, snapshot)?
            }
            Channel::Poll => Self::poll(serde_json::from_value(raw)?)?,
            Channel::Manual => Self::manual(&serde_json::to_vec(&raw)?)?,
        };
        event.event_id = event_id;
        event.received_at = entry.received_at;
        Ok(event)
    }

    pub fn channel(&self) -> Channel {
        self.payload.channel()
    }
}

/// Event-log row. Immutable once written; every delivery gets its own row.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderEvent {
    pub log_id: Uuid,
    pub event_id: String,
    pub channel: Channel,
    pub raw_payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub verified: bool,
    pub resolved_payment_id: Option<Uuid>,
    pub outcome: EventOutcome,
    pub detail: serde_json::Value,
}

impl ProviderEvent {
    pub fn record(
        event: &InboundEvent,
        verified: bool,
        resolved_payment_id: Option<Uuid>,
        outcome: EventOutcome,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            log_id: Uuid::now_v7(),
            event_id: event.event_id.as_str().to_string(),
            channel: event.channel(),
            raw_payload: event.raw_payload.clone(),
            received_at: event.received_at,
            verified,
            resolved_payment_id,
            outcome,
            detail,
        }
    }

    /// For deliveries rejected before they could be parsed.
    pub fn rejected(
        channel: Channel,
        raw_body: &[u8],
        verified: bool,
        detail: serde_json::Value,
    ) -> Self {
        let raw_payload = serde_json::from_slice(raw_body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(raw_body).into_owned())
        });
        Self {
            log_id: Uuid::now_v7(),
            event_id: EventId::derive(channel, raw_body).as_str().to_string(),
            channel,
            raw_payload,
            received_at: Utc::now(),
            verified,
            resolved_payment_id: None,
            outcome: EventOutcome::Rejected,
            detail,
        }
    }
}
