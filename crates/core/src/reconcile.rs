//! Live price reconciliation through the ordered provider chain.
//!
//! Each provider pass splits the tracked tickers into chunks. Requests inside a chunk run
//! concurrently and are all awaited (a failure never cancels its siblings); chunks run one
//! after another. Whatever is still unpriced at the end resolves to the catalog price.

use crate::domain::fault::Fault;
use crate::ingest::provider::PriceProvider;
use crate::storage::catalog::Catalog;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const MAX_LOGGED_FAILURES: usize = 10;

/// When to stop walking down the provider chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// The first provider that prices any ticker ends the chain, even for tickers it missed.
    #[default]
    StopOnFirstSuccess,
    /// Each later provider is asked only for the tickers still missing.
    PerTicker,
}

impl std::str::FromStr for FallbackPolicy {
    type Err = Fault;

    fn from_str(s: &str) -> Result<Self, Fault> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop_on_first_success" => Ok(FallbackPolicy::StopOnFirstSuccess),
            "per_ticker" => Ok(FallbackPolicy::PerTicker),
            other => Err(Fault::Config(format!(
                "PRICE_FALLBACK_POLICY must be stop_on_first_success or per_ticker (got {other:?})"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub policy: FallbackPolicy,
    /// Pause between consecutive chunks of one provider pass.
    pub chunk_delay: Duration,
}

/// Where a resolved price came from, so readers can tell fresh, stale and absent data apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PriceSource {
    Live { provider: String },
    /// Every provider missed; the catalog's last automation price is shown.
    Fallback,
    /// Nothing fetched yet, neither now nor in an earlier run.
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub price: f64,
    #[serde(flatten)]
    pub source: PriceSource,
}

impl PriceQuote {
    pub fn known_price(&self) -> Option<f64> {
        match self.source {
            PriceSource::NoData => None,
            _ => Some(self.price),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.source, PriceSource::Live { .. })
    }
}

/// Ticker → price for one reconciliation cycle. Built fresh by every call to
/// [`reconcile_prices`] and never shared between cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LivePriceCache {
    prices: BTreeMap<String, PriceQuote>,
}

impl LivePriceCache {
    pub fn get(&self, ticker: &str) -> Option<&PriceQuote> {
        self.prices.get(ticker)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PriceQuote)> {
        self.prices.iter()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn summary(&self) -> PriceSummary {
        let mut out = PriceSummary::default();
        for quote in self.prices.values() {
            match quote.source {
                PriceSource::Live { .. } => out.live += 1,
                PriceSource::Fallback => out.fallback += 1,
                PriceSource::NoData => out.no_data += 1,
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriceSummary {
    pub live: usize,
    pub fallback: usize,
    pub no_data: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderPass {
    pub provider: &'static str,
    pub attempted: usize,
    pub succeeded: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub passes: Vec<ProviderPass>,
    pub faults: Vec<Fault>,
}

struct PassOutcome {
    prices: Vec<(String, f64)>,
    faults: Vec<Fault>,
    chunks: usize,
}

async fn run_provider_pass(
    provider: &dyn PriceProvider,
    tickers: &[String],
    chunk_delay: Duration,
) -> PassOutcome {
    let name = provider.provider_name();
    let chunk_size = provider.chunk_size().max(1);

    let mut out = PassOutcome {
        prices: Vec::new(),
        faults: Vec::new(),
        chunks: 0,
    };

    for (idx, chunk) in tickers.chunks(chunk_size).enumerate() {
        if idx != 0 && !chunk_delay.is_zero() {
            tokio::time::sleep(chunk_delay).await;
        }

        let t0 = Instant::now();
        let results =
            futures::future::join_all(chunk.iter().map(|t| provider.fetch_price(t))).await;
        out.chunks += 1;

        let mut chunk_ok = 0usize;
        for (ticker, res) in chunk.iter().zip(results) {
            match res {
                Ok(price) => {
                    chunk_ok += 1;
                    out.prices.push((ticker.clone(), price));
                }
                Err(err) => {
                    if out.faults.len() < MAX_LOGGED_FAILURES {
                        tracing::warn!(provider = name, %ticker, error = %err, "price fetch failed");
                    }
                    out.faults.push(Fault::DataFetch {
                        provider: name.to_string(),
                        ticker: ticker.clone(),
                        detail: format!("{err:#}"),
                    });
                }
            }
        }

        tracing::debug!(
            provider = name,
            chunk = idx,
            chunk_size = chunk.len(),
            succeeded = chunk_ok,
            elapsed_ms = t0.elapsed().as_millis(),
            "price chunk settled"
        );
    }

    out
}

/// Resolves a price for every tracked ticker in `catalog`.
pub async fn reconcile_prices(
    catalog: &Catalog,
    providers: &[Box<dyn PriceProvider>],
    opts: &ReconcileOptions,
) -> (LivePriceCache, ReconcileReport) {
    let universe = catalog.tickers();
    let mut live: BTreeMap<String, (f64, &'static str)> = BTreeMap::new();
    let mut report = ReconcileReport::default();

    for provider in providers {
        let pending: Vec<String> = universe
            .iter()
            .filter(|t| !live.contains_key(*t))
            .cloned()
            .collect();
        if pending.is_empty() {
            break;
        }

        let outcome = run_provider_pass(provider.as_ref(), &pending, opts.chunk_delay).await;
        let succeeded = outcome.prices.len();

        tracing::info!(
            provider = provider.provider_name(),
            attempted = pending.len(),
            succeeded,
            failures = outcome.faults.len(),
            "price provider pass complete"
        );

        report.passes.push(ProviderPass {
            provider: provider.provider_name(),
            attempted: pending.len(),
            succeeded,
            chunks: outcome.chunks,
        });
        report.faults.extend(outcome.faults);
        for (ticker, price) in outcome.prices {
            live.insert(ticker, (price, provider.provider_name()));
        }

        if succeeded > 0 && opts.policy == FallbackPolicy::StopOnFirstSuccess {
            break;
        }
    }

    let mut cache = LivePriceCache::default();
    for record in catalog.records() {
        let quote = match live.get(&record.ticker) {
            Some((price, provider)) => PriceQuote {
                price: *price,
                source: PriceSource::Live {
                    provider: provider.to_string(),
                },
            },
            None if record.automation_price.is_finite() && record.automation_price > 0.0 => {
                PriceQuote {
                    price: record.automation_price,
                    source: PriceSource::Fallback,
                }
            }
            None => PriceQuote {
                price: record.automation_price,
                source: PriceSource::NoData,
            },
        };
        cache.prices.insert(record.ticker.clone(), quote);
    }

    (cache, report)
}

/// Percent change from baseline. `None` unless both prices are known and the baseline is a
/// nonzero number.
pub fn pnl_pct(baseline: Option<f64>, live: Option<f64>) -> Option<f64> {
    let baseline = baseline.filter(|b| b.is_finite() && *b != 0.0)?;
    let live = live.filter(|l| l.is_finite())?;
    let pct = (live - baseline) / baseline * 100.0;
    pct.is_finite().then_some(pct)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriceUpdate {
    pub refreshed: Vec<String>,
    pub baselines_set: Vec<String>,
}

/// Writes live prices back: each becomes the new automation price, and the baseline for any
/// record that has none yet. Fallback prices change nothing.
pub fn apply_live_prices(catalog: &mut Catalog, cache: &LivePriceCache) -> PriceUpdate {
    let mut update = PriceUpdate::default();

    for record in catalog.records_mut() {
        let Some(quote) = cache.get(&record.ticker).filter(|q| q.is_live()) else {
            continue;
        };
        record.automation_price = quote.price;
        update.refreshed.push(record.ticker.clone());
        if record.freeze_baseline(quote.price) {
            update.baselines_set.push(record.ticker.clone());
        }
    }

    update
}
