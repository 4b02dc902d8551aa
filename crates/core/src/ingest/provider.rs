use crate::config::Settings;
use crate::domain::fault::Fault;
use crate::ingest::{alpha_vantage, fmp, yahoo};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::time::Duration;

// Yahoo rejects requests without a browser-like user agent.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/120.0.0.0 Safari/537.36";

pub const DEFAULT_CHAIN: [&str; 3] = [yahoo::NAME, alpha_vantage::NAME, fmp::NAME];

/// One live-price source. Implementations own their batch size and the transform from their
/// response shape to a price.
#[async_trait::async_trait]
pub trait PriceProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn chunk_size(&self) -> usize;

    async fn fetch_price(&self, ticker: &str) -> Result<f64>;
}

/// Closing prices for past dates, used to pin a baseline to the recommendation date.
#[async_trait::async_trait]
pub trait HistoricalPriceSource: Send + Sync {
    async fn close_near(&self, ticker: &str, date: NaiveDate) -> Result<Option<f64>>;
}

pub fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub(crate) fn positive_price(v: f64, what: &str) -> Result<f64> {
    anyhow::ensure!(v.is_finite() && v > 0.0, "{what} is not a positive price: {v}");
    Ok(round_cents(v))
}

#[derive(Debug, Clone)]
pub struct HttpJsonClient {
    http: reqwest::Client,
    retries: u32,
}

impl HttpJsonClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.provider_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build price provider http client")?;

        Ok(Self {
            http,
            retries: settings.provider_retries.max(1),
        })
    }

    async fn get_once(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        let res = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .context("price provider request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read provider response")?;

        if !status.is_success() {
            anyhow::bail!("provider HTTP {status}: {}", truncate(&text, 200));
        }

        serde_json::from_str::<Value>(&text)
            .with_context(|| format!("provider response is not valid JSON: {}", truncate(&text, 200)))
    }

    /// GET with exponential backoff (1s, 2s, ...) between attempts.
    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_once(url, query).await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::debug!(attempt, ?backoff, error = %err, "price request failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Builds the ordered provider chain. With `PRICE_PROVIDERS` unset, keyed providers without a
/// key are left out; an explicit list must be fully satisfiable.
pub fn build_price_chain(settings: &Settings) -> Result<Vec<Box<dyn PriceProvider>>> {
    let http = HttpJsonClient::from_settings(settings)?;

    let explicit = settings.price_providers.is_some();
    let names: Vec<String> = match &settings.price_providers {
        Some(list) => list
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => DEFAULT_CHAIN.iter().map(|s| s.to_string()).collect(),
    };

    let mut chain: Vec<Box<dyn PriceProvider>> = Vec::with_capacity(names.len());
    for name in &names {
        match name.as_str() {
            yahoo::NAME => chain.push(Box::new(yahoo::YahooProvider::new(
                http.clone(),
                settings.chunk_size,
            ))),
            alpha_vantage::NAME => {
                if !explicit && settings.alpha_vantage_api_key.is_none() {
                    continue;
                }
                let key = settings.require_alpha_vantage_api_key()?;
                chain.push(Box::new(alpha_vantage::AlphaVantageProvider::new(
                    http.clone(),
                    key,
                )));
            }
            fmp::NAME => {
                if !explicit && settings.fmp_api_key.is_none() {
                    continue;
                }
                let key = settings.require_fmp_api_key()?;
                chain.push(Box::new(fmp::FmpProvider::new(
                    http.clone(),
                    key,
                    settings.chunk_size,
                )));
            }
            other => {
                return Err(Fault::Config(format!("unknown price provider {other:?}")).into());
            }
        }
    }

    if chain.is_empty() {
        return Err(Fault::Config("no price providers configured".to_string()).into());
    }

    tracing::debug!(
        providers = ?chain.iter().map(|p| p.provider_name()).collect::<Vec<_>>(),
        "price provider chain"
    );
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::FallbackPolicy;

    fn settings(providers: Option<&str>, av_key: Option<&str>) -> Settings {
        Settings {
            catalog_path: "stocks.json".into(),
            videos_path: "videos.json".into(),
            channels_path: "channels.json".into(),
            analysis_path: None,
            price_providers: providers.map(str::to_string),
            alpha_vantage_api_key: av_key.map(str::to_string),
            fmp_api_key: None,
            sentry_dsn: None,
            chunk_size: 4,
            fallback_policy: FallbackPolicy::default(),
            provider_timeout_secs: 5,
            provider_retries: 1,
            chunk_delay_ms: 0,
            historical_baseline: false,
        }
    }

    fn names(chain: &[Box<dyn PriceProvider>]) -> Vec<&'static str> {
        chain.iter().map(|p| p.provider_name()).collect()
    }

    #[test]
    fn default_chain_skips_keyless_providers() {
        let chain = build_price_chain(&settings(None, None)).unwrap();
        assert_eq!(names(&chain), vec!["yahoo"]);

        let chain = build_price_chain(&settings(None, Some("k"))).unwrap();
        assert_eq!(names(&chain), vec!["yahoo", "alpha_vantage"]);
        assert_eq!(chain[0].chunk_size(), 4);
        assert_eq!(chain[1].chunk_size(), 1);
    }

    #[test]
    fn explicit_chain_requires_keys() {
        let err = build_price_chain(&settings(Some("alpha_vantage,yahoo"), None))
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<Fault>(), Some(Fault::Config(_))));

        let chain = build_price_chain(&settings(Some(" Alpha_Vantage , yahoo"), Some("k"))).unwrap();
        assert_eq!(names(&chain), vec!["alpha_vantage", "yahoo"]);
    }

    #[test]
    fn unknown_or_empty_chain_is_rejected() {
        assert!(build_price_chain(&settings(Some("bloomberg"), None)).is_err());
        assert!(build_price_chain(&settings(Some(" , "), None)).is_err());
    }

    #[test]
    fn prices_are_rounded_to_cents() {
        assert_eq!(round_cents(123.456), 123.46);
        assert!(positive_price(0.0, "x").is_err());
        assert!(positive_price(f64::NAN, "x").is_err());
    }
}
