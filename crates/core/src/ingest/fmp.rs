use crate::ingest::provider::{positive_price, HttpJsonClient, PriceProvider};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

pub const NAME: &str = "fmp";

const BASE_URL: &str = "https://financialmodelingprep.com/api/v3";

/// Financial Modeling Prep quote endpoint.
#[derive(Debug, Clone)]
pub struct FmpProvider {
    http: HttpJsonClient,
    base_url: String,
    api_key: String,
    chunk_size: usize,
}

impl FmpProvider {
    pub fn new(http: HttpJsonClient, api_key: &str, chunk_size: usize) -> Self {
        let base_url = std::env::var("FMP_BASE_URL").unwrap_or_else(|_| BASE_URL.to_string());
        Self {
            http,
            base_url,
            api_key: api_key.to_string(),
            chunk_size: chunk_size.max(1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FmpQuote {
    symbol: String,
    price: Option<f64>,
}

/// Price of `ticker` from a quote array; FMP answers unknown symbols with `[]`.
pub fn price_from_quote(v: &Value, ticker: &str) -> Result<f64> {
    let quotes: Vec<FmpQuote> =
        serde_json::from_value(v.clone()).context("unexpected FMP quote shape")?;
    let quote = quotes
        .iter()
        .find(|q| q.symbol.eq_ignore_ascii_case(ticker))
        .with_context(|| format!("FMP returned no quote for {ticker}"))?;
    let price = quote
        .price
        .with_context(|| format!("FMP quote for {ticker} has no price"))?;
    positive_price(price, "FMP price")
}

#[async_trait::async_trait]
impl PriceProvider for FmpProvider {
    fn provider_name(&self) -> &'static str {
        NAME
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    async fn fetch_price(&self, ticker: &str) -> Result<f64> {
        let url = format!("{}/quote/{ticker}", self.base_url.trim_end_matches('/'));
        let v = self
            .http
            .get_json(&url, &[("apikey", self.api_key.clone())])
            .await?;
        price_from_quote(&v, ticker)
    }
}
