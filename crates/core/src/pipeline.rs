//! One end-to-end run over the catalog files.
//!
//! Configuration is checked before the lock is taken and before any file is touched. The
//! catalog is rewritten only after every phase has finished.

use crate::config::Settings;
use crate::discovery::merge_discoveries;
use crate::domain::fault::Fault;
use crate::ingest::analysis::{load_analysis, merge_analysis};
use crate::ingest::provider::{
    build_price_chain, HistoricalPriceSource, HttpJsonClient, PriceProvider,
};
use crate::ingest::yahoo::YahooProvider;
use crate::reconcile::{apply_live_prices, reconcile_prices, PriceSummary, ReconcileOptions};
use crate::scoring::score_record;
use crate::storage::catalog::{load_catalog, save_catalog, Catalog};
use crate::storage::channels::load_channel_config;
use crate::storage::lock::{release_catalog_lock, try_acquire_catalog_lock};
use crate::storage::videos::load_videos;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

const HISTORY_SOURCE: &str = "yahoo_history";

#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub catalog: PathBuf,
    pub videos: PathBuf,
    pub channels: PathBuf,
    pub analysis: Option<PathBuf>,
}

impl PipelinePaths {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            catalog: settings.catalog_path.clone(),
            videos: settings.videos_path.clone(),
            channels: settings.channels_path.clone(),
            analysis: settings.analysis_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub as_of_date: NaiveDate,
    /// Run every phase but leave the catalog file alone.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub as_of_date: NaiveDate,
    pub added_tickers: Vec<String>,
    pub merged_analysis: Vec<String>,
    pub scored: usize,
    pub baselines_set: Vec<String>,
    pub prices_refreshed: Vec<String>,
    pub faults: Vec<Fault>,
    pub price_summary: PriceSummary,
    pub written: bool,
}

pub struct Pipeline {
    paths: PipelinePaths,
    providers: Vec<Box<dyn PriceProvider>>,
    history: Option<Box<dyn HistoricalPriceSource>>,
    history_chunk_size: usize,
    reconcile: ReconcileOptions,
}

impl Pipeline {
    pub fn new(
        paths: PipelinePaths,
        providers: Vec<Box<dyn PriceProvider>>,
        history: Option<Box<dyn HistoricalPriceSource>>,
        reconcile: ReconcileOptions,
    ) -> Self {
        Self {
            paths,
            providers,
            history,
            history_chunk_size: 4,
            reconcile,
        }
    }

    /// Builds the provider chain from settings. Missing credentials surface here as
    /// `Fault::Config`, before anything is read or locked.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let providers = build_price_chain(settings)?;
        let history: Option<Box<dyn HistoricalPriceSource>> = if settings.historical_baseline {
            let http = HttpJsonClient::from_settings(settings)?;
            Some(Box::new(YahooProvider::new(http, settings.chunk_size)))
        } else {
            None
        };

        let mut pipeline = Self::new(
            PipelinePaths::from_settings(settings),
            providers,
            history,
            ReconcileOptions {
                policy: settings.fallback_policy,
                chunk_delay: Duration::from_millis(settings.chunk_delay_ms),
            },
        );
        pipeline.history_chunk_size = settings.chunk_size.max(1);
        Ok(pipeline)
    }

    pub fn paths(&self) -> &PipelinePaths {
        &self.paths
    }

    /// Runs once. Returns `Ok(None)` when another run holds the catalog lock.
    pub async fn run(&self, opts: RunOptions) -> anyhow::Result<Option<RunReport>> {
        let channels = load_channel_config(&self.paths.channels)?;

        if !try_acquire_catalog_lock(&self.paths.catalog)? {
            tracing::warn!(
                catalog = %self.paths.catalog.display(),
                "catalog lock not acquired; another run in progress"
            );
            return Ok(None);
        }

        let result = self.run_locked(opts, &channels).await;

        if let Err(err) = release_catalog_lock(&self.paths.catalog) {
            tracing::warn!(error = %err, "failed to release catalog lock");
        }
        result.map(Some)
    }

    async fn run_locked(
        &self,
        opts: RunOptions,
        channels: &crate::domain::channel::ChannelConfig,
    ) -> anyhow::Result<RunReport> {
        let run_id = Uuid::new_v4();
        let mut faults = Vec::new();

        let (mut catalog, catalog_faults) = load_catalog(&self.paths.catalog)?;
        faults.extend(catalog_faults);
        let (videos, video_faults) = load_videos(&self.paths.videos)?;
        faults.extend(video_faults);

        tracing::info!(
            %run_id,
            as_of_date = %opts.as_of_date,
            tracked = catalog.len(),
            quarantined = catalog.quarantined_len(),
            videos = videos.len(),
            "pipeline run started"
        );

        let discovery = merge_discoveries(&mut catalog, &videos, channels);

        let mut merged_analysis = Vec::new();
        if let Some(path) = &self.paths.analysis {
            let (analyses, analysis_faults) = load_analysis(path)?;
            faults.extend(analysis_faults);
            let (merged, merge_faults) = merge_analysis(&mut catalog, &analyses);
            faults.extend(merge_faults);
            merged_analysis = merged;
        }

        let mut scored = 0usize;
        for record in catalog.records() {
            match score_record(record) {
                Ok(_) => scored += 1,
                Err(fault) => {
                    tracing::debug!(ticker = %record.ticker, error = %fault, "record excluded from scoring");
                    faults.push(fault);
                }
            }
        }

        let (cache, price_report) =
            reconcile_prices(&catalog, &self.providers, &self.reconcile).await;
        faults.extend(price_report.faults);

        let mut baselines_set = self.capture_historical_baselines(&mut catalog, &mut faults).await;

        let update = apply_live_prices(&mut catalog, &cache);
        for ticker in &update.refreshed {
            if let Some(record) = catalog.get_mut(ticker) {
                record.last_updated = opts.as_of_date;
            }
        }
        baselines_set.extend(update.baselines_set);
        baselines_set.sort();

        let written = if opts.dry_run {
            tracing::info!(%run_id, "dry-run; catalog not written");
            false
        } else {
            save_catalog(&self.paths.catalog, &catalog)?;
            true
        };

        Ok(RunReport {
            run_id,
            as_of_date: opts.as_of_date,
            added_tickers: discovery.added,
            merged_analysis,
            scored,
            baselines_set,
            prices_refreshed: update.refreshed,
            faults,
            price_summary: cache.summary(),
            written,
        })
    }

    /// Pins still-missing baselines to the close nearest each record's recommendation date.
    async fn capture_historical_baselines(
        &self,
        catalog: &mut Catalog,
        faults: &mut Vec<Fault>,
    ) -> Vec<String> {
        let Some(history) = self.history.as_deref() else {
            return Vec::new();
        };

        let pending: Vec<(String, NaiveDate)> = catalog
            .records()
            .filter(|r| r.baseline_price.is_none())
            .map(|r| (r.ticker.clone(), r.recommended_date))
            .collect();

        let mut set = Vec::new();
        for chunk in pending.chunks(self.history_chunk_size.max(1)) {
            let results = futures::future::join_all(
                chunk
                    .iter()
                    .map(|(ticker, date)| history.close_near(ticker, *date)),
            )
            .await;

            for ((ticker, date), res) in chunk.iter().zip(results) {
                match res {
                    Ok(Some(close)) => {
                        if let Some(record) = catalog.get_mut(ticker) {
                            if record.freeze_baseline(close) {
                                tracing::info!(%ticker, %date, baseline = close, "baseline pinned to historical close");
                                set.push(ticker.clone());
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(%ticker, %date, "no historical close near recommendation date");
                    }
                    Err(err) => faults.push(Fault::DataFetch {
                        provider: HISTORY_SOURCE.to_string(),
                        ticker: ticker.clone(),
                        detail: format!("{err:#}"),
                    }),
                }
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::path::Path;

    struct FixedPrices {
        name: &'static str,
        prices: HashMap<String, f64>,
    }

    #[async_trait::async_trait]
    impl PriceProvider for FixedPrices {
        fn provider_name(&self) -> &'static str {
            self.name
        }

        fn chunk_size(&self) -> usize {
            2
        }

        async fn fetch_price(&self, ticker: &str) -> Result<f64> {
            self.prices
                .get(ticker)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("{ticker} not found"))
        }
    }

    struct FixedHistory(HashMap<String, f64>);

    #[async_trait::async_trait]
    impl HistoricalPriceSource for FixedHistory {
        async fn close_near(&self, ticker: &str, _date: NaiveDate) -> Result<Option<f64>> {
            Ok(self.0.get(ticker).copied())
        }
    }

    fn prices(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    fn write(path: &Path, v: Value) {
        std::fs::write(path, serde_json::to_string_pretty(&v).unwrap()).unwrap();
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        paths: PipelinePaths,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let paths = PipelinePaths {
            catalog: dir.path().join("data").join("stocks.json"),
            videos: dir.path().join("videos.json"),
            channels: dir.path().join("channels.json"),
            analysis: None,
        };
        std::fs::create_dir_all(dir.path().join("data")).unwrap();

        write(
            &paths.channels,
            json!({"channels": [{"id": "alpha", "name": "Alpha Show", "enabled": true}]}),
        );
        write(
            &paths.videos,
            json!([
                {"videoId": "v1", "channelId": "alpha", "channelName": "Alpha Show",
                 "publishedAt": "2025-11-20T14:00:00Z", "tickersMentioned": ["nvda", "KO"]},
                {"videoId": "v2", "publishedAt": "bad date"}
            ]),
        );
        write(
            &paths.catalog,
            json!([{
                "ticker": "KO", "name": "Coca-Cola", "category": "Dividend",
                "baselinePrice": 58.0, "automationPrice": 60.0,
                "fcfQuality": 4, "roicStrength": 4, "revenueDurability": 5,
                "balanceSheetStrength": 4, "insiderActivity": 3, "valueRank": 3, "expectedReturn": 3,
                "source": "Alpha Show", "recommendedDate": "2025-10-01", "lastUpdated": "2025-10-01"
            }]),
        );

        Fixture { _dir: dir, paths }
    }

    fn pipeline(paths: &PipelinePaths, live: &[(&str, f64)], history: Option<&[(&str, f64)]>) -> Pipeline {
        let providers: Vec<Box<dyn PriceProvider>> = vec![Box::new(FixedPrices {
            name: "fixed",
            prices: prices(live),
        })];
        let history = history
            .map(|h| Box::new(FixedHistory(prices(h))) as Box<dyn HistoricalPriceSource>);
        Pipeline::new(paths.clone(), providers, history, ReconcileOptions::default())
    }

    fn opts(dry_run: bool) -> RunOptions {
        RunOptions {
            as_of_date: date("2025-12-01"),
            dry_run,
        }
    }

    #[tokio::test]
    async fn full_run_discovers_prices_and_writes() {
        let fx = fixture();
        let p = pipeline(&fx.paths, &[("KO", 61.5), ("NVDA", 180.0)], Some(&[("NVDA", 178.25)]));

        let report = p.run(opts(false)).await.unwrap().unwrap();
        assert_eq!(report.added_tickers, vec!["NVDA"]);
        assert_eq!(report.scored, 1);
        assert_eq!(report.baselines_set, vec!["NVDA"]);
        assert_eq!(report.price_summary, PriceSummary { live: 2, fallback: 0, no_data: 0 });
        assert!(report.written);
        // Bad video plus NVDA's pending scores.
        assert_eq!(report.faults.len(), 2);

        let (catalog, faults) = load_catalog(&fx.paths.catalog).unwrap();
        assert!(faults.is_empty());
        let ko = catalog.get("KO").unwrap();
        assert_eq!(ko.baseline_price, Some(58.0));
        assert_eq!(ko.automation_price, 61.5);
        assert_eq!(ko.last_updated, date("2025-12-01"));

        let nvda = catalog.get("NVDA").unwrap();
        assert_eq!(nvda.baseline_price, Some(178.25));
        assert_eq!(nvda.automation_price, 180.0);
        assert_eq!(nvda.source, "Alpha Show");
        assert_eq!(nvda.recommended_date, date("2025-11-20"));

        assert!(!fx.paths.catalog.with_extension("json.lock").exists());
    }

    #[tokio::test]
    async fn live_price_becomes_baseline_without_history() {
        let fx = fixture();
        let p = pipeline(&fx.paths, &[("NVDA", 180.0)], None);

        let report = p.run(opts(false)).await.unwrap().unwrap();
        assert_eq!(report.baselines_set, vec!["NVDA"]);

        let (catalog, _) = load_catalog(&fx.paths.catalog).unwrap();
        assert_eq!(catalog.get("NVDA").unwrap().baseline_price, Some(180.0));
        // KO fell back to its catalog price and is unchanged.
        assert_eq!(catalog.get("KO").unwrap().automation_price, 60.0);
        assert_eq!(catalog.get("KO").unwrap().last_updated, date("2025-10-01"));
    }

    #[tokio::test]
    async fn failed_fetches_never_set_a_baseline() {
        let fx = fixture();
        let p = pipeline(&fx.paths, &[], None);

        let report = p.run(opts(false)).await.unwrap().unwrap();
        assert!(report.baselines_set.is_empty());
        assert_eq!(report.price_summary, PriceSummary { live: 0, fallback: 1, no_data: 1 });

        let (catalog, _) = load_catalog(&fx.paths.catalog).unwrap();
        assert_eq!(catalog.get("NVDA").unwrap().baseline_price, None);
    }

    #[tokio::test]
    async fn baseline_survives_later_runs() {
        let fx = fixture();
        pipeline(&fx.paths, &[("NVDA", 180.0)], None)
            .run(opts(false))
            .await
            .unwrap();
        pipeline(&fx.paths, &[("NVDA", 90.0), ("KO", 10.0)], Some(&[("NVDA", 1.0), ("KO", 1.0)]))
            .run(opts(false))
            .await
            .unwrap();

        let (catalog, _) = load_catalog(&fx.paths.catalog).unwrap();
        assert_eq!(catalog.get("NVDA").unwrap().baseline_price, Some(180.0));
        assert_eq!(catalog.get("NVDA").unwrap().automation_price, 90.0);
        assert_eq!(catalog.get("KO").unwrap().baseline_price, Some(58.0));
    }

    #[tokio::test]
    async fn dry_run_leaves_catalog_untouched() {
        let fx = fixture();
        let before = std::fs::read_to_string(&fx.paths.catalog).unwrap();

        let report = pipeline(&fx.paths, &[("NVDA", 180.0)], None)
            .run(opts(true))
            .await
            .unwrap()
            .unwrap();
        assert!(!report.written);
        assert_eq!(report.added_tickers, vec!["NVDA"]);
        assert_eq!(std::fs::read_to_string(&fx.paths.catalog).unwrap(), before);
    }

    #[tokio::test]
    async fn config_fault_stops_before_any_write() {
        let fx = fixture();
        write(
            &fx.paths.channels,
            json!({"channels": [{"id": "alpha", "name": "Alpha Show", "enabled": false}]}),
        );
        let before = std::fs::read_to_string(&fx.paths.catalog).unwrap();

        let err = pipeline(&fx.paths, &[("NVDA", 180.0)], None)
            .run(opts(false))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Fault>(), Some(Fault::Config(_))));
        assert_eq!(std::fs::read_to_string(&fx.paths.catalog).unwrap(), before);
    }

    #[tokio::test]
    async fn held_lock_skips_the_run() {
        let fx = fixture();
        assert!(try_acquire_catalog_lock(&fx.paths.catalog).unwrap());
        let before = std::fs::read_to_string(&fx.paths.catalog).unwrap();

        let out = pipeline(&fx.paths, &[("NVDA", 180.0)], None)
            .run(opts(false))
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(std::fs::read_to_string(&fx.paths.catalog).unwrap(), before);
    }

    #[tokio::test]
    async fn analysis_output_is_merged_and_scored() {
        let mut fx = fixture();
        let analysis = fx.paths.videos.with_file_name("analysis.json");
        let body = json!([{
            "ticker": "NVDA", "name": "NVIDIA", "category": "Growth", "price": 181.0,
            "dcf": {"conservative": {"low": 120, "high": 140}, "base": "150-170", "aggressive": "190-230"},
            "fcfQuality": 5, "roicStrength": 5, "revenueDurability": 4,
            "balanceSheetStrength": 5, "insiderActivity": 2, "valueRank": 3, "expectedReturn": 4,
            "lastUpdated": "2025-11-30"
        }]);
        std::fs::write(&analysis, format!("```json\n{body}\n```")).unwrap();
        fx.paths.analysis = Some(analysis);

        let report = pipeline(&fx.paths, &[], None).run(opts(false)).await.unwrap().unwrap();
        assert_eq!(report.merged_analysis, vec!["NVDA"]);
        assert_eq!(report.scored, 2);

        let (catalog, _) = load_catalog(&fx.paths.catalog).unwrap();
        let nvda = catalog.get("NVDA").unwrap();
        assert_eq!(nvda.name, "NVIDIA");
        assert_eq!(nvda.automation_price, 181.0);
        assert_eq!(nvda.baseline_price, None);
        assert_eq!(nvda.source, "Alpha Show");
    }
}
