use crate::domain::{error::UnmappedStatus, payment::PaymentState};

const STATUS_TABLE: &[(&str, PaymentState)] = &[
    ("PENDING", PaymentState::Processing),
    ("PROCESSING", PaymentState::Processing),
    ("IN_PROGRESS", PaymentState::Processing),
    ("CREATED", PaymentState::Processing),
    ("PAID", PaymentState::Paid),
    ("SUCCESSFUL", PaymentState::Paid),
    ("SUCCESS", PaymentState::Paid),
    ("SUCCEEDED", PaymentState::Paid),
    ("COMPLETED", PaymentState::Paid),
    ("CAPTURED", PaymentState::Paid),
    ("FAILED", PaymentState::Failed),
    ("FAILURE", PaymentState::Failed),
    ("DECLINED", PaymentState::Failed),
    ("ERROR", PaymentState::Failed),
    ("EXPIRED", PaymentState::Failed),
    ("CANCELLED", PaymentState::Cancelled),
    ("CANCELED", PaymentState::Cancelled),
    ("VOIDED", PaymentState::Cancelled),
    ("ABANDONED", PaymentState::Cancelled),
];

const EVENT_TYPE_TABLE: &[(&str, PaymentState)] = &[
    ("checkout.completed", PaymentState::Paid),
    ("checkout.paid", PaymentState::Paid),
    ("payment.succeeded", PaymentState::Paid),
    ("transaction.successful", PaymentState::Paid),
    ("checkout.failed", PaymentState::Failed),
    ("payment.failed", PaymentState::Failed),
    ("transaction.failed", PaymentState::Failed),
    ("checkout.cancelled", PaymentState::Cancelled),
    ("checkout.canceled", PaymentState::Cancelled),
    ("checkout.expired", PaymentState::Cancelled),
    ("checkout.created", PaymentState::Processing),
    ("checkout.pending", PaymentState::Processing),
];

/// Event types that only say "something changed" and defer to the status.
const SNAPSHOT_EVENT_TYPES: &[&str] = &[
    "checkout_status_changed",
    "checkout.status_changed",
    "checkout.updated",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub state: PaymentState,
    pub low_confidence: bool,
    pub unmapped: Option<UnmappedStatus>,
}

fn lookup(table: &[(&str, PaymentState)], raw: &str) -> Option<PaymentState> {
    let raw = raw.trim();
    table
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(raw))
        .map(|(_, state)| *state)
}

fn is_snapshot(event_type: &str) -> bool {
    let event_type = event_type.trim();
    SNAPSHOT_EVENT_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(event_type))
}

/// Map a provider status / event type pair to a canonical state.
///
/// A classifying event type wins over the status; snapshot event types and
/// a missing event type defer to it. An event type in neither table is
/// unmapped whatever the status says. Anything unmapped comes back as
/// low-confidence `PROCESSING` with the raw values attached.
pub fn normalize(status: Option<&str>, event_type: Option<&str>) -> Normalized {
    let by_status = || status.and_then(|s| lookup(STATUS_TABLE, s));
    let resolved = match event_type.map(str::trim).filter(|t| !t.is_empty()) {
        None => by_status(),
        Some(t) if is_snapshot(t) => by_status(),
        Some(t) => lookup(EVENT_TYPE_TABLE, t),
    };

    match resolved {
        Some(state) => Normalized {
            state,
            low_confidence: false,
            unmapped: None,
        },
        None => {
            let unmapped = UnmappedStatus {
                status: status.map(str::to_string),
                event_type: event_type.map(str::to_string),
            };
            tracing::warn!(%unmapped, "unmapped provider status, treating as PROCESSING");
            Normalized {
                state: PaymentState::Processing,
                low_confidence: true,
                unmapped: Some(unmapped),
            }
        }
    }
}
