use {
    derive_more::Display,
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
};

use super::{error::PipelineError, event::Channel};

const MAX_ID_LEN: usize = 255;

fn validated(kind: &str, id: String) -> Result<String, PipelineError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Validation(format!("{kind} must not be empty")));
    }
    if trimmed.len() > MAX_ID_LEN {
        return Err(PipelineError::Validation(format!(
            "{kind} longer than {MAX_ID_LEN} chars"
        )));
    }
    Ok(trimmed.to_string())
}

/// Client-generated correlation string echoed back by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckoutReference(String);

impl CheckoutReference {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        validated("checkout_reference", id.into()).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Provider-assigned checkout identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckoutId(String);

impl CheckoutId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        validated("checkout_id", id.into()).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        validated("transaction_id", id.into()).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Event identifier: the provider's own id when it sends one, otherwise a
/// digest of the channel and raw payload (`drv_<hex>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        validated("event_id", id.into()).map(Self)
    }

    pub fn derive(channel: Channel, raw: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(channel.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(raw);
        Self(format!("drv_{}", hex::encode(hasher.finalize())))
    }

    pub fn is_derived(&self) -> bool {
        self.0.starts_with("drv_")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_are_stable_per_channel() {
        let a = EventId::derive(Channel::Redirect, b"checkout_id=c1");
        let b = EventId::derive(Channel::Redirect, b"checkout_id=c1");
        let c = EventId::derive(Channel::Manual, b"checkout_id=c1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_derived());
    }

    #[test]
    fn blank_reference_rejected() {
        assert!(CheckoutReference::new("   ").is_err());
        assert_eq!(CheckoutReference::new(" REQ-42 ").unwrap().as_str(), "REQ-42");
    }
}
