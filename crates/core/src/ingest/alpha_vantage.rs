use crate::ingest::provider::{positive_price, HttpJsonClient, PriceProvider};
use anyhow::{Context, Result};
use serde_json::Value;

pub const NAME: &str = "alpha_vantage";

const BASE_URL: &str = "https://www.alphavantage.co/query";

// The free tier allows a handful of calls per minute, so requests go out one at a time.
const CHUNK_SIZE: usize = 1;

#[derive(Debug, Clone)]
pub struct AlphaVantageProvider {
    http: HttpJsonClient,
    base_url: String,
    api_key: String,
}

impl AlphaVantageProvider {
    pub fn new(http: HttpJsonClient, api_key: &str) -> Self {
        let base_url =
            std::env::var("ALPHA_VANTAGE_BASE_URL").unwrap_or_else(|_| BASE_URL.to_string());
        Self {
            http,
            base_url,
            api_key: api_key.to_string(),
        }
    }
}

/// `"Global Quote"."05. price"`, which Alpha Vantage sends as a string.
pub fn price_from_global_quote(v: &Value) -> Result<f64> {
    // Throttled or rejected calls come back as 200 with a note instead of a quote.
    for key in ["Note", "Information", "Error Message"] {
        if let Some(msg) = v.get(key).and_then(Value::as_str) {
            anyhow::bail!("Alpha Vantage: {msg}");
        }
    }

    let raw = v
        .get("Global Quote")
        .and_then(|q| q.get("05. price"))
        .context("Alpha Vantage response has no Global Quote price")?;
    let price = match raw {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Alpha Vantage price {s:?} is not a number"))?,
        Value::Number(n) => n.as_f64().context("Alpha Vantage price out of range")?,
        other => anyhow::bail!("Alpha Vantage price has unexpected type: {other}"),
    };
    positive_price(price, "Alpha Vantage price")
}

#[async_trait::async_trait]
impl PriceProvider for AlphaVantageProvider {
    fn provider_name(&self) -> &'static str {
        NAME
    }

    fn chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    async fn fetch_price(&self, ticker: &str) -> Result<f64> {
        let v = self
            .http
            .get_json(
                &self.base_url,
                &[
                    ("function", "GLOBAL_QUOTE".to_string()),
                    ("symbol", ticker.to_string()),
                    ("apikey", self.api_key.clone()),
                ],
            )
            .await?;
        price_from_global_quote(&v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_price() {
        let v = json!({"Global Quote": {"01. symbol": "MA", "05. price": "571.2300"}});
        assert_eq!(price_from_global_quote(&v).unwrap(), 571.23);
    }

    #[test]
    fn rate_limit_note_is_an_error() {
        let v = json!({"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute"});
        assert!(price_from_global_quote(&v).is_err());
    }

    #[test]
    fn empty_quote_is_an_error() {
        assert!(price_from_global_quote(&json!({"Global Quote": {}})).is_err());
        assert!(price_from_global_quote(&json!({"Global Quote": {"05. price": "n/a"}})).is_err());
    }
}
