use {
    super::error::PipelineError,
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Amount in minor units (cents). Providers report major units with two
/// decimals, so one minor unit is the rounding tolerance between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MoneyAmount(i64);

pub const ROUNDING_TOLERANCE_CENTS: i64 = 1;

impl MoneyAmount {
    pub fn new(cents: i64) -> Result<Self, PipelineError> {
        if cents < 0 {
            return Err(PipelineError::Validation(format!(
                "MoneyAmount cannot be negative, got: {cents}"
            )));
        }
        Ok(Self(cents))
    }

    /// Convert a provider decimal (`16.00`) into cents.
    pub fn from_major(major: f64) -> Result<Self, PipelineError> {
        if !major.is_finite() {
            return Err(PipelineError::Validation(format!(
                "amount is not a finite number: {major}"
            )));
        }
        let cents = (major * 100.0).round();
        if cents > i64::MAX as f64 {
            return Err(PipelineError::Validation("amount exceeds storage capacity".into()));
        }
        Self::new(cents as i64)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn within_tolerance(&self, other: MoneyAmount) -> bool {
        (self.0 - other.0).abs() <= ROUNDING_TOLERANCE_CENTS
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Usd,
    Gbp,
    Chf,
    Sek,
    Nok,
    Dkk,
    Pln,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eur => "EUR",
            Self::Usd => "USD",
            Self::Gbp => "GBP",
            Self::Chf => "CHF",
            Self::Sek => "SEK",
            Self::Nok => "NOK",
            Self::Dkk => "DKK",
            Self::Pln => "PLN",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Currency {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EUR" => Ok(Self::Eur),
            "USD" => Ok(Self::Usd),
            "GBP" => Ok(Self::Gbp),
            "CHF" => Ok(Self::Chf),
            "SEK" => Ok(Self::Sek),
            "NOK" => Ok(Self::Nok),
            "DKK" => Ok(Self::Dkk),
            "PLN" => Ok(Self::Pln),
            other => Err(PipelineError::Validation(format!(
                "unknown currency: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: MoneyAmount,
    currency: Currency,
}

impl Money {
    pub fn new(amount: MoneyAmount, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn from_major(major: f64, currency: &str) -> Result<Self, PipelineError> {
        Ok(Self::new(
            MoneyAmount::from_major(major)?,
            Currency::try_from(currency)?,
        ))
    }

    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Same currency and amounts within provider rounding.
    pub fn matches(&self, other: &Money) -> bool {
        self.currency == other.currency && self.amount.within_tolerance(other.amount)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_units_round_to_cents() {
        assert_eq!(MoneyAmount::from_major(16.0).unwrap().cents(), 1600);
        assert_eq!(MoneyAmount::from_major(0.1 + 0.2).unwrap().cents(), 30);
        assert!(MoneyAmount::from_major(-1.0).is_err());
        assert!(MoneyAmount::from_major(f64::NAN).is_err());
    }

    #[test]
    fn tolerance_is_one_minor_unit() {
        let a = Money::from_major(16.00, "eur").unwrap();
        let b = Money::from_major(16.01, "EUR").unwrap();
        let c = Money::from_major(16.02, "EUR").unwrap();
        let d = Money::from_major(16.00, "USD").unwrap();
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
        assert!(!a.matches(&d));
    }
}
