use {derive_more::Display, thiserror::Error, uuid::Uuid};

/// Why an inbound delivery failed authenticity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SignatureFailure {
    #[display("missing_signature")]
    MissingSignature,
    #[display("bad_digest")]
    BadDigest,
    #[display("unknown_secret_for_environment")]
    UnknownSecretForEnvironment,
}

impl SignatureFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingSignature => "missing_signature",
            Self::BadDigest => "bad_digest",
            Self::UnknownSecretForEnvironment => "unknown_secret_for_environment",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("authenticity: {0}")]
    Authenticity(SignatureFailure),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("no payment or intent matches: {0}")]
    MatchNotFound(String),

    #[error("payment {payment_id} still conflicting after {attempts} attempts")]
    ConcurrencyConflict { payment_id: Uuid, attempts: u32 },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Transient failures are retried on the caller's own schedule and never
    /// recorded as a payment outcome.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::ConcurrencyConflict { .. } | Self::Database(_)
        )
    }
}

/// A provider status or event type missing from the normalizer tables.
/// Never fatal: the event proceeds as low-confidence `PROCESSING`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unmapped provider status {status:?} / event type {event_type:?}")]
pub struct UnmappedStatus {
    pub status: Option<String>,
    pub event_type: Option<String>,
}
