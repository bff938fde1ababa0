use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ApplicationError;

/// Looks up how many units of `target` one unit of `base` buys.
#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    async fn rate(&self, base: &str, target: &str) -> Result<Decimal, ApplicationError>;
}

#[async_trait]
impl<T> ExchangeRateProvider for Arc<T>
where
    T: ExchangeRateProvider + ?Sized,
{
    async fn rate(&self, base: &str, target: &str) -> Result<Decimal, ApplicationError> {
        (**self).rate(base, target).await
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub rate: Decimal,
    pub normalized_amount: Decimal,
    pub fallback_used: bool,
}

/// Converts submitted amounts into the company currency.
///
/// Lookup failures are never surfaced: the rate degrades to 1 and a warning is logged.
/// A converted amount that does not fit a `Decimal` is a validation error.
#[derive(Clone, Debug)]
pub struct CurrencyNormalizer<R> {
    provider: R,
}

impl<R> CurrencyNormalizer<R>
where
    R: ExchangeRateProvider,
{
    pub fn new(provider: R) -> Self {
        Self { provider }
    }

    pub async fn normalize(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<Conversion, ApplicationError> {
        let from = normalize_code(from);
        let to = normalize_code(to);

        if from == to {
            return Ok(Conversion {
                rate: Decimal::ONE,
                normalized_amount: amount,
                fallback_used: false,
            });
        }

        let (rate, fallback_used) = match self.provider.rate(&from, &to).await {
            Ok(rate) if rate > Decimal::ZERO => (rate, false),
            Ok(rate) => {
                warn!(
                    event_name = "currency.rate_fallback",
                    base = %from,
                    target = %to,
                    rate = %rate,
                    "exchange rate provider returned a non-positive rate; using 1.0"
                );
                (Decimal::ONE, true)
            }
            Err(error) => {
                warn!(
                    event_name = "currency.rate_fallback",
                    base = %from,
                    target = %to,
                    error = %error,
                    "exchange rate lookup failed; using 1.0"
                );
                (Decimal::ONE, true)
            }
        };

        let normalized_amount = amount.checked_mul(rate).ok_or_else(|| {
            ApplicationError::Validation(format!(
                "amount out of range: {amount} {from} at rate {rate} overflows {to}"
            ))
        })?;
        Ok(Conversion { rate, normalized_amount, fallback_used })
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Static rate table, keyed by `(base, target)`.
#[derive(Clone, Debug, Default)]
pub struct FixedRateProvider {
    rates: HashMap<(String, String), Decimal>,
}

impl FixedRateProvider {
    pub fn with_rate(mut self, base: &str, target: &str, rate: Decimal) -> Self {
        self.rates.insert((normalize_code(base), normalize_code(target)), rate);
        self
    }
}

#[async_trait]
impl ExchangeRateProvider for FixedRateProvider {
    async fn rate(&self, base: &str, target: &str) -> Result<Decimal, ApplicationError> {
        self.rates.get(&(normalize_code(base), normalize_code(target))).copied().ok_or_else(|| {
            ApplicationError::Integration(format!("no fixed rate configured for {base}->{target}"))
        })
    }
}

/// Used when external lookups are disabled; every conversion falls back to 1.0.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableRateProvider;

#[async_trait]
impl ExchangeRateProvider for UnavailableRateProvider {
    async fn rate(&self, base: &str, target: &str) -> Result<Decimal, ApplicationError> {
        Err(ApplicationError::Integration(format!(
            "exchange rate lookups are disabled ({base}->{target})"
        )))
    }
}

/// A country and the ISO codes of the currencies it uses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryCurrencies {
    pub name: String,
    pub currencies: Vec<String>,
}

/// Lists countries with their currencies, used to pick a company currency.
#[async_trait]
pub trait CountryDirectory: Send + Sync {
    async fn countries(&self) -> Result<Vec<CountryCurrencies>, ApplicationError>;
}

#[async_trait]
impl<T> CountryDirectory for Arc<T>
where
    T: CountryDirectory + ?Sized,
{
    async fn countries(&self) -> Result<Vec<CountryCurrencies>, ApplicationError> {
        (**self).countries().await
    }
}

/// First listed currency of `country`, matched on name without regard to case.
pub fn currency_for_country(countries: &[CountryCurrencies], country: &str) -> Option<String> {
    let country = country.trim();
    countries
        .iter()
        .find(|entry| entry.name.eq_ignore_ascii_case(country))
        .and_then(|entry| entry.currencies.first())
        .map(|code| normalize_code(code))
}

#[derive(Clone, Debug, Default)]
pub struct FixedCountryDirectory {
    countries: Vec<CountryCurrencies>,
}

impl FixedCountryDirectory {
    pub fn with_country(mut self, name: &str, currencies: &[&str]) -> Self {
        self.countries.push(CountryCurrencies {
            name: name.to_string(),
            currencies: currencies.iter().map(|code| normalize_code(code)).collect(),
        });
        self
    }
}

#[async_trait]
impl CountryDirectory for FixedCountryDirectory {
    async fn countries(&self) -> Result<Vec<CountryCurrencies>, ApplicationError> {
        Ok(self.countries.clone())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableCountryDirectory;

#[async_trait]
impl CountryDirectory for UnavailableCountryDirectory {
    async fn countries(&self) -> Result<Vec<CountryCurrencies>, ApplicationError> {
        Err(ApplicationError::Integration("country lookups are disabled".to_string()))
    }
}
