use {
    std::{env, fmt, net::SocketAddr, str::FromStr, time::Duration},
    thiserror::Error,
};

const DEFAULT_PROVIDER_API_BASE: &str = "https://api.sumup.com/v0.1";
const DEFAULT_SIGNATURE_HEADER: &str = "x-payload-signature";
const DEFAULT_RETURN_SUCCESS_URL: &str = "/payment/success";
const DEFAULT_RETURN_FAILURE_URL: &str = "/payment/failure";
const DEFAULT_RETURN_PROCESSING_URL: &str = "/payment/processing";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Wraps a credential so `Debug` and `Display` never print it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn reveal(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Provider account a deployment talks to. Each has its own webhook secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            other => Err(ConfigError::Invalid {
                key: "PAYMENT_ENVIRONMENT",
                reason: format!("expected sandbox or production, got {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub tick: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnUrls {
    pub success: String,
    pub failure: String,
    pub processing: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Secret<String>,
    pub environment: Environment,
    pub webhook_secret_sandbox: Option<Secret<String>>,
    pub webhook_secret_production: Option<Secret<String>>,
    pub provider_api_key: Secret<String>,
    pub bind_addr: SocketAddr,
    pub provider_api_base: String,
    pub signature_header: String,
    pub provider_timeout: Duration,
    /// Heuristic matcher lookback for events without identifiers.
    pub match_window: chrono::Duration,
    pub suppress_window: chrono::Duration,
    pub sweep_lookback: chrono::Duration,
    pub sweep_interval: Duration,
    pub poll: PollSettings,
    pub reconcile_max_retries: u32,
    pub rematch_max_attempts: u32,
    pub rematch_delay: Duration,
    pub return_urls: ReturnUrls,
}

impl Config {
    /// Read the process environment. Call `dotenvy::dotenv()` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let environment: Environment = required("PAYMENT_ENVIRONMENT")?.parse()?;
        let webhook_secret_sandbox = get("WEBHOOK_SECRET_SANDBOX").map(Secret::new);
        let webhook_secret_production = get("WEBHOOK_SECRET_PRODUCTION").map(Secret::new);
        match environment {
            Environment::Sandbox if webhook_secret_sandbox.is_none() => {
                return Err(ConfigError::Missing("WEBHOOK_SECRET_SANDBOX"));
            }
            Environment::Production if webhook_secret_production.is_none() => {
                return Err(ConfigError::Missing("WEBHOOK_SECRET_PRODUCTION"));
            }
            _ => {}
        }

        let bind_addr = parsed("BIND_ADDR", get("BIND_ADDR"), SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let multiplier: f64 = parsed("POLL_MULTIPLIER", get("POLL_MULTIPLIER"), 2.0)?;
        if !(multiplier.is_finite() && multiplier >= 1.0) {
            return Err(ConfigError::Invalid {
                key: "POLL_MULTIPLIER",
                reason: "must be a finite number >= 1".into(),
            });
        }
        let secs = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            parsed(key, get(key), default).map(Duration::from_secs)
        };
        let count = |key: &'static str, default: u32| parsed(key, get(key), default);

        Ok(Self {
            database_url: Secret::new(required("DATABASE_URL")?),
            environment,
            webhook_secret_sandbox,
            webhook_secret_production,
            provider_api_key: Secret::new(required("PROVIDER_API_KEY")?),
            bind_addr,
            provider_api_base: get("PROVIDER_API_BASE")
                .unwrap_or_else(|| DEFAULT_PROVIDER_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            signature_header: get("SIGNATURE_HEADER")
                .unwrap_or_else(|| DEFAULT_SIGNATURE_HEADER.to_string())
                .to_ascii_lowercase(),
            provider_timeout: secs("PROVIDER_TIMEOUT_SECS", 10)?,
            match_window: chrono::Duration::minutes(parsed(
                "MATCH_WINDOW_MINUTES",
                get("MATCH_WINDOW_MINUTES"),
                60,
            )?),
            suppress_window: chrono::Duration::minutes(parsed(
                "SUPPRESS_WINDOW_MINUTES",
                get("SUPPRESS_WINDOW_MINUTES"),
                60,
            )?),
            sweep_lookback: chrono::Duration::hours(parsed(
                "SWEEP_LOOKBACK_HOURS",
                get("SWEEP_LOOKBACK_HOURS"),
                48,
            )?),
            sweep_interval: secs("SWEEP_INTERVAL_SECS", 300)?,
            poll: PollSettings {
                base_delay: secs("POLL_BASE_DELAY_SECS", 15)?,
                multiplier,
                max_delay: secs("POLL_MAX_DELAY_SECS", 1800)?,
                max_attempts: count("POLL_MAX_ATTEMPTS", 20)?,
                tick: secs("POLL_TICK_SECS", 5)?,
            },
            reconcile_max_retries: count("RECONCILE_MAX_RETRIES", 5)?,
            rematch_max_attempts: count("REMATCH_MAX_ATTEMPTS", 5)?,
            rematch_delay: secs("REMATCH_DELAY_SECS", 60)?,
            return_urls: ReturnUrls {
                success: get("RETURN_SUCCESS_URL")
                    .unwrap_or_else(|| DEFAULT_RETURN_SUCCESS_URL.into()),
                failure: get("RETURN_FAILURE_URL")
                    .unwrap_or_else(|| DEFAULT_RETURN_FAILURE_URL.into()),
                processing: get("RETURN_PROCESSING_URL")
                    .unwrap_or_else(|| DEFAULT_RETURN_PROCESSING_URL.into()),
            },
        })
    }
}

fn parsed<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        Some(v) => v.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
