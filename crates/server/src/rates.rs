//! HTTP exchange-rate lookups against an exchangerate-api compatible endpoint, and country
//! listings from a restcountries compatible one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use receiptpath_core::config::CurrencyConfig;
use receiptpath_core::currency::{
    normalize_code, CountryCurrencies, CountryDirectory, ExchangeRateProvider,
    UnavailableCountryDirectory, UnavailableRateProvider,
};
use receiptpath_core::errors::ApplicationError;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    #[serde(default)]
    rates: HashMap<String, f64>,
}

/// Fetches `{base_url}/{BASE}` and reads `rates[TARGET]` from the JSON body.
#[derive(Clone, Debug)]
pub struct ExchangeRateApiClient {
    client: Client,
    base_url: String,
}

impl ExchangeRateApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApplicationError> {
        let client = Client::builder().timeout(timeout).build().map_err(|error| {
            ApplicationError::Configuration(format!("failed to build exchange rate client: {error}"))
        })?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &CurrencyConfig) -> Result<Self, ApplicationError> {
        Self::new(config.base_url.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl ExchangeRateProvider for ExchangeRateApiClient {
    async fn rate(&self, base: &str, target: &str) -> Result<Decimal, ApplicationError> {
        let base = normalize_code(base);
        let target = normalize_code(target);
        let url = format!("{}/{}", self.base_url, base);

        let response = self.client.get(&url).send().await.map_err(|error| {
            ApplicationError::Integration(format!("exchange rate request failed: {error}"))
        })?;
        if !response.status().is_success() {
            return Err(ApplicationError::Integration(format!(
                "exchange rate endpoint returned {}",
                response.status()
            )));
        }

        let body: LatestRatesResponse = response.json().await.map_err(|error| {
            ApplicationError::Integration(format!("failed to decode exchange rate response: {error}"))
        })?;
        let rate = body.rates.get(&target).copied().ok_or_else(|| {
            ApplicationError::Integration(format!("no {target} rate published for base {base}"))
        })?;
        let rate = Decimal::try_from(rate).map_err(|error| {
            ApplicationError::Integration(format!("rate {rate} for {base}->{target}: {error}"))
        })?;

        debug!(event_name = "currency.rate_fetched", base = %base, target = %target, rate = %rate);
        Ok(rate)
    }
}

/// Picks the live client or, when lookups are disabled, a provider that always falls back.
pub fn rate_provider(
    config: &CurrencyConfig,
) -> Result<Arc<dyn ExchangeRateProvider>, ApplicationError> {
    if config.enabled {
        Ok(Arc::new(ExchangeRateApiClient::from_config(config)?))
    } else {
        Ok(Arc::new(UnavailableRateProvider))
    }
}

#[derive(Debug, Deserialize)]
struct RestCountry {
    #[serde(default)]
    name: Option<RestCountryName>,
    #[serde(default)]
    currencies: Option<BTreeMap<String, IgnoredAny>>,
}

#[derive(Debug, Deserialize)]
struct RestCountryName {
    common: Option<String>,
}

/// Fetches the configured countries URL and keeps each country's common name and currency codes.
#[derive(Clone, Debug)]
pub struct RestCountriesClient {
    client: Client,
    url: String,
}

impl RestCountriesClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ApplicationError> {
        let client = Client::builder().timeout(timeout).build().map_err(|error| {
            ApplicationError::Configuration(format!("failed to build country client: {error}"))
        })?;
        Ok(Self { client, url: url.into() })
    }

    pub fn from_config(config: &CurrencyConfig) -> Result<Self, ApplicationError> {
        Self::new(config.countries_url.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl CountryDirectory for RestCountriesClient {
    async fn countries(&self) -> Result<Vec<CountryCurrencies>, ApplicationError> {
        let response = self.client.get(&self.url).send().await.map_err(|error| {
            ApplicationError::Integration(format!("country request failed: {error}"))
        })?;
        if !response.status().is_success() {
            return Err(ApplicationError::Integration(format!(
                "country endpoint returned {}",
                response.status()
            )));
        }

        let body: Vec<RestCountry> = response.json().await.map_err(|error| {
            ApplicationError::Integration(format!("failed to decode country response: {error}"))
        })?;
        let mut countries: Vec<CountryCurrencies> = body
            .into_iter()
            .filter_map(|country| {
                let name = country.name.and_then(|name| name.common)?;
                let currencies = country
                    .currencies
                    .map(|codes| codes.into_keys().map(|code| normalize_code(&code)).collect())
                    .unwrap_or_default();
                Some(CountryCurrencies { name, currencies })
            })
            .collect();
        countries.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(event_name = "currency.countries_fetched", count = countries.len());
        Ok(countries)
    }
}

/// Picks the live country client or, when lookups are disabled, one that always fails.
pub fn country_directory(
    config: &CurrencyConfig,
) -> Result<Arc<dyn CountryDirectory>, ApplicationError> {
    if config.enabled {
        Ok(Arc::new(RestCountriesClient::from_config(config)?))
    } else {
        Ok(Arc::new(UnavailableCountryDirectory))
    }
}
