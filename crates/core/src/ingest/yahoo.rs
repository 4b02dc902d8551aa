use crate::ingest::provider::{
    positive_price, round_cents, HistoricalPriceSource, HttpJsonClient, PriceProvider,
};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use serde_json::Value;

pub const NAME: &str = "yahoo";

const BASE_URL: &str = "https://query1.finance.yahoo.com";

// Window around the recommendation date so weekends and holidays still hit a trading day.
const HISTORY_DAYS_BEFORE: i64 = 5;
const HISTORY_DAYS_AFTER: i64 = 2;

/// Yahoo Finance v8 chart API. No key required.
#[derive(Debug, Clone)]
pub struct YahooProvider {
    http: HttpJsonClient,
    base_url: String,
    chunk_size: usize,
}

impl YahooProvider {
    pub fn new(http: HttpJsonClient, chunk_size: usize) -> Self {
        let base_url = std::env::var("YAHOO_BASE_URL").unwrap_or_else(|_| BASE_URL.to_string());
        Self {
            http,
            base_url,
            chunk_size: chunk_size.max(1),
        }
    }

    fn chart_url(&self, ticker: &str) -> String {
        format!(
            "{}/v8/finance/chart/{ticker}",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    regular_market_price: Option<f64>,
    #[serde(default)]
    chart_previous_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

fn first_chart(v: &Value) -> Result<ChartData> {
    let data: ChartResponse =
        serde_json::from_value(v.clone()).context("unexpected Yahoo chart shape")?;
    if let Some(err) = data.chart.error.filter(|e| !e.is_null()) {
        anyhow::bail!("Yahoo error: {err}");
    }
    data.chart
        .result
        .and_then(|r| r.into_iter().next())
        .context("empty Yahoo chart result")
}

/// Current price from a chart response: regular market price, else the previous close.
pub fn price_from_chart(v: &Value) -> Result<f64> {
    let meta = first_chart(v)?.meta;
    let price = meta
        .regular_market_price
        .or(meta.chart_previous_close)
        .context("Yahoo chart has no price")?;
    positive_price(price, "Yahoo regularMarketPrice")
}

/// The non-null daily close whose timestamp is closest to `target_ts`.
pub fn closest_close(v: &Value, target_ts: i64) -> Result<Option<f64>> {
    let chart = first_chart(v)?;
    let closes = chart
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .map(|q| q.close)
        .unwrap_or_default();

    let best = chart
        .timestamp
        .iter()
        .zip(closes)
        .filter_map(|(ts, close)| close.map(|c| ((ts - target_ts).abs(), c)))
        .filter(|(_, c)| c.is_finite() && *c > 0.0)
        .min_by_key(|(diff, _)| *diff)
        .map(|(_, c)| round_cents(c));
    Ok(best)
}

#[async_trait::async_trait]
impl PriceProvider for YahooProvider {
    fn provider_name(&self) -> &'static str {
        NAME
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    async fn fetch_price(&self, ticker: &str) -> Result<f64> {
        let v = self
            .http
            .get_json(
                &self.chart_url(ticker),
                &[("range", "1d".to_string()), ("interval", "1d".to_string())],
            )
            .await?;
        price_from_chart(&v)
    }
}

#[async_trait::async_trait]
impl HistoricalPriceSource for YahooProvider {
    async fn close_near(&self, ticker: &str, date: NaiveDate) -> Result<Option<f64>> {
        let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp());
        let target = midnight(date).context("invalid date")?;
        let start = midnight(date - Duration::days(HISTORY_DAYS_BEFORE)).context("invalid date")?;
        let end = midnight(date + Duration::days(HISTORY_DAYS_AFTER)).context("invalid date")?;

        let v = self
            .http
            .get_json(
                &self.chart_url(ticker),
                &[
                    ("period1", start.to_string()),
                    ("period2", end.to_string()),
                    ("interval", "1d".to_string()),
                ],
            )
            .await?;
        closest_close(&v, target)
    }
}
