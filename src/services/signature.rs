//! Authenticity checks for inbound deliveries.
//!
//! Only webhooks carry a signature. Redirect and poll events are trusted
//! because the engine itself fetched the status from the provider, and
//! manual events are accepted as-is; all three get weak corroboration.

use {
    crate::{
        config::{Config, Environment, Secret},
        domain::{
            error::SignatureFailure,
            event::{Channel, Corroboration},
        },
    },
    axum::http::HeaderMap,
    hmac::{Hmac, Mac},
    sha2::Sha256,
    subtle::ConstantTimeEq,
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub ok: bool,
    pub reason: Option<SignatureFailure>,
    pub weight: Corroboration,
}

impl Verification {
    fn pass(weight: Corroboration) -> Self {
        Self {
            ok: true,
            reason: None,
            weight,
        }
    }

    fn fail(reason: SignatureFailure) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            weight: Corroboration::Weak,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    sandbox: Option<Secret<String>>,
    production: Option<Secret<String>>,
    header: String,
}

impl SignatureVerifier {
    pub fn new(
        sandbox: Option<Secret<String>>,
        production: Option<Secret<String>>,
        header: impl Into<String>,
    ) -> Self {
        Self {
            sandbox,
            production,
            header: header.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.webhook_secret_sandbox.clone(),
            config.webhook_secret_production.clone(),
            config.signature_header.clone(),
        )
    }

    fn secret_for(&self, environment: Environment) -> Option<&Secret<String>> {
        match environment {
            Environment::Sandbox => self.sandbox.as_ref(),
            Environment::Production => self.production.as_ref(),
        }
    }

    /// Never errors: every malformed header ends up as a failure reason.
    pub fn verify(
        &self,
        channel: Channel,
        raw_body: &[u8],
        headers: &HeaderMap,
        environment: Environment,
    ) -> Verification {
        if channel != Channel::Webhook {
            return Verification::pass(Corroboration::Weak);
        }

        let verification = self.verify_webhook(raw_body, headers, environment);
        if let Some(reason) = verification.reason {
            tracing::warn!(
                channel = %channel,
                environment = %environment,
                reason = %reason,
                "webhook signature rejected"
            );
        }
        verification
    }

    fn verify_webhook(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        environment: Environment,
    ) -> Verification {
        let Some(secret) = self.secret_for(environment) else {
            return Verification::fail(SignatureFailure::UnknownSecretForEnvironment);
        };

        let provided = headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let Some(provided) = provided else {
            return Verification::fail(SignatureFailure::MissingSignature);
        };
        let provided = provided.strip_prefix("sha256=").unwrap_or(provided);

        let expected = sign(secret.reveal(), raw_body);
        if expected
            .as_bytes()
            .ct_eq(provided.to_ascii_lowercase().as_bytes())
            .into()
        {
            Verification::pass(Corroboration::Strong)
        } else {
            Verification::fail(SignatureFailure::BadDigest)
        }
    }
}

/// Hex HMAC-SHA256 of `body`, the value a provider puts in the signature
/// header.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
