use anyhow::Context;
use clap::Parser;
use picks_core::domain::fault::Fault;
use picks_core::pipeline::{Pipeline, RunOptions, RunReport};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "picks_worker")]
struct Args {
    /// Date stamped on refreshed records (YYYY-MM-DD). Defaults to today (UTC).
    #[arg(long)]
    as_of_date: Option<String>,

    /// Run every phase except writing the catalog.
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    catalog: Option<PathBuf>,

    #[arg(long)]
    videos: Option<PathBuf>,

    #[arg(long)]
    channels: Option<PathBuf>,

    /// Analysis output to merge (JSON array, code fences allowed).
    #[arg(long)]
    analysis: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = picks_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let as_of_date = resolve_as_of_date(args.as_of_date.as_deref())?;

    if let Some(path) = args.catalog {
        settings.catalog_path = path;
    }
    if let Some(path) = args.videos {
        settings.videos_path = path;
    }
    if let Some(path) = args.channels {
        settings.channels_path = path;
    }
    if args.analysis.is_some() {
        settings.analysis_path = args.analysis;
    }

    let result = match Pipeline::from_settings(&settings) {
        Ok(pipeline) => {
            pipeline
                .run(RunOptions {
                    as_of_date,
                    dry_run: args.dry_run,
                })
                .await
        }
        Err(err) => Err(err),
    };

    match result {
        Ok(Some(report)) => {
            log_report(&report);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            if let Some(Fault::Config(detail)) = err.downcast_ref::<Fault>() {
                tracing::error!(%as_of_date, %detail, "configuration fault; catalog left untouched");
            } else {
                tracing::error!(%as_of_date, error = %format!("{err:#}"), "pipeline run failed");
            }
            Err(err)
        }
    }
}

fn log_report(report: &RunReport) {
    let data_fetch = report
        .faults
        .iter()
        .filter(|f| matches!(f, Fault::DataFetch { .. }))
        .count();
    let malformed = report
        .faults
        .iter()
        .filter(|f| matches!(f, Fault::MalformedRecord { .. }))
        .count();
    let computation = report
        .faults
        .iter()
        .filter(|f| matches!(f, Fault::Computation { .. }))
        .count();

    tracing::info!(
        run_id = %report.run_id,
        as_of_date = %report.as_of_date,
        added = report.added_tickers.len(),
        merged_analysis = report.merged_analysis.len(),
        scored = report.scored,
        baselines_set = report.baselines_set.len(),
        live = report.price_summary.live,
        fallback = report.price_summary.fallback,
        no_data = report.price_summary.no_data,
        data_fetch,
        malformed,
        computation,
        written = report.written,
        "pipeline run complete"
    );

    if !report.added_tickers.is_empty() {
        tracing::info!(tickers = ?report.added_tickers, "new tickers added");
    }
    for fault in report.faults.iter().filter(|f| !matches!(f, Fault::DataFetch { .. })) {
        tracing::warn!(%fault, "record fault");
    }
}

fn init_sentry(settings: &picks_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

fn resolve_as_of_date(as_of_date_arg: Option<&str>) -> anyhow::Result<chrono::NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("--as-of-date must be YYYY-MM-DD (got {s:?})"));
    }
    Ok(chrono::Utc::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_as_of_date() {
        let d = resolve_as_of_date(Some("2025-12-01")).unwrap();
        assert_eq!(d, chrono::NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert!(resolve_as_of_date(Some("12/01/2025")).is_err());
    }

    #[test]
    fn cli_accepts_path_overrides() {
        let args = Args::parse_from([
            "picks_worker",
            "--dry-run",
            "--catalog",
            "/tmp/stocks.json",
            "--as-of-date",
            "2025-12-01",
        ]);
        assert!(args.dry_run);
        assert_eq!(args.catalog, Some(PathBuf::from("/tmp/stocks.json")));
        assert_eq!(args.as_of_date.as_deref(), Some("2025-12-01"));
    }
}
