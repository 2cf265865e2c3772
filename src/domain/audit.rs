use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    uuid::Uuid,
};

/// One transition decision, written next to the event log.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub event_id: Option<String>,
    pub action: String,
    pub actor: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity_id: Uuid,
        event_id: Option<&str>,
        action: &str,
        actor: &str,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            entity_id,
            event_id: event_id.map(str::to_string),
            action: action.to_string(),
            actor: actor.to_string(),
            detail,
            created_at: Utc::now(),
        }
    }
}
