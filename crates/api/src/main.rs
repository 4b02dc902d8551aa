use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use picks_core::domain::stock::normalize_ticker;
use picks_core::domain::video::VideoRecord;
use picks_core::ingest::provider::{build_price_chain, PriceProvider};
use picks_core::performance::{aggregate_channels, build_views, ChannelPerformance, StockView};
use picks_core::reconcile::{reconcile_prices, PriceSummary, ReconcileOptions};
use picks_core::storage::catalog::{load_catalog, Catalog};
use picks_core::storage::channels::load_channel_config;
use picks_core::storage::videos::load_videos;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = picks_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    // Without a usable chain every price resolves to the catalog value.
    let providers: Vec<Box<dyn PriceProvider>> = match build_price_chain(&settings) {
        Ok(chain) => chain,
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %format!("{e:#}"), "price providers unavailable; serving catalog prices only");
            Vec::new()
        }
    };

    let state = AppState {
        catalog_path: settings.catalog_path.clone(),
        videos_path: settings.videos_path.clone(),
        channels_path: settings.channels_path.clone(),
        providers: Arc::new(providers),
        reconcile: ReconcileOptions {
            policy: settings.fallback_policy,
            chunk_delay: Duration::from_millis(settings.chunk_delay_ms),
        },
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/stocks", get(get_stocks))
        .route("/stocks/:ticker", get(get_stock))
        .route("/channels", get(get_channels))
        .route("/videos", get(get_videos))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    catalog_path: PathBuf,
    videos_path: PathBuf,
    channels_path: PathBuf,
    providers: Arc<Vec<Box<dyn PriceProvider>>>,
    reconcile: ReconcileOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StocksResponse {
    prices: PriceSummary,
    stocks: Vec<StockView>,
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %format!("{e:#}"), "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Views over `catalog` priced by a fresh reconciliation cycle.
async fn priced_views(state: &AppState, catalog: Catalog) -> (Vec<StockView>, PriceSummary) {
    let (cache, report) = reconcile_prices(&catalog, &state.providers, &state.reconcile).await;
    if !report.faults.is_empty() {
        tracing::debug!(failures = report.faults.len(), "some live prices unavailable");
    }
    (build_views(&catalog, &cache), cache.summary())
}

/// A missing catalog file puts the feed in degraded mode (503).
fn read_catalog(state: &AppState) -> Result<Catalog, StatusCode> {
    if !state.catalog_path.exists() {
        tracing::warn!(path = %state.catalog_path.display(), "catalog missing; degraded mode");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let (catalog, faults) = load_catalog(&state.catalog_path).map_err(internal)?;
    if !faults.is_empty() {
        tracing::warn!(quarantined = faults.len(), "catalog has malformed records");
    }
    Ok(catalog)
}

async fn get_stocks(State(state): State<AppState>) -> Result<Json<StocksResponse>, StatusCode> {
    let catalog = read_catalog(&state)?;
    let (stocks, prices) = priced_views(&state, catalog).await;
    Ok(Json(StocksResponse { prices, stocks }))
}

async fn get_stock(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<StockView>, StatusCode> {
    let catalog = read_catalog(&state)?;
    let record = catalog
        .get(&normalize_ticker(&ticker))
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)?;

    let single = Catalog::from_records(vec![record]).map_err(internal)?;
    let (views, _) = priced_views(&state, single).await;
    views.into_iter().next().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn get_channels(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChannelPerformance>>, StatusCode> {
    let channels = load_channel_config(&state.channels_path).map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %format!("{e:#}"), "channel configuration unusable");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let catalog = read_catalog(&state)?;
    let (views, _) = priced_views(&state, catalog).await;
    Ok(Json(aggregate_channels(&views, &channels.enabled_names())))
}

async fn get_videos(State(state): State<AppState>) -> Result<Json<Vec<VideoRecord>>, StatusCode> {
    if !state.videos_path.exists() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let (videos, faults) = load_videos(&state.videos_path).map_err(internal)?;
    if !faults.is_empty() {
        tracing::warn!(skipped = faults.len(), "video feed has malformed entries");
    }
    Ok(Json(videos))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
