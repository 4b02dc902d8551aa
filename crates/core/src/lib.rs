pub mod discovery;
pub mod domain;
pub mod ingest;
pub mod performance;
pub mod pipeline;
pub mod reconcile;
pub mod scoring;
pub mod storage;

pub mod config {
    use crate::domain::fault::Fault;
    use crate::reconcile::FallbackPolicy;
    use anyhow::Context;
    use std::path::PathBuf;

    const DEFAULT_CATALOG_PATH: &str = "data/stocks.json";
    const DEFAULT_VIDEOS_PATH: &str = "data/youtube_videos.json";
    const DEFAULT_CHANNELS_PATH: &str = "config/channels.json";
    const DEFAULT_CHUNK_SIZE: usize = 4;
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_RETRIES: u32 = 2;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub catalog_path: PathBuf,
        pub videos_path: PathBuf,
        pub channels_path: PathBuf,
        pub analysis_path: Option<PathBuf>,
        pub price_providers: Option<String>,
        pub alpha_vantage_api_key: Option<String>,
        pub fmp_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub chunk_size: usize,
        pub fallback_policy: FallbackPolicy,
        pub provider_timeout_secs: u64,
        pub provider_retries: u32,
        pub chunk_delay_ms: u64,
        pub historical_baseline: bool,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let fallback_policy = match env_nonempty("PRICE_FALLBACK_POLICY") {
                Some(s) => s.parse::<FallbackPolicy>()?,
                None => FallbackPolicy::default(),
            };

            let chunk_size = env_parse::<usize>("PRICE_CHUNK_SIZE").unwrap_or(DEFAULT_CHUNK_SIZE);
            if chunk_size == 0 {
                return Err(Fault::Config("PRICE_CHUNK_SIZE must be >= 1".to_string()).into());
            }

            Ok(Self {
                catalog_path: env_nonempty("CATALOG_PATH")
                    .unwrap_or_else(|| DEFAULT_CATALOG_PATH.to_string())
                    .into(),
                videos_path: env_nonempty("VIDEOS_PATH")
                    .unwrap_or_else(|| DEFAULT_VIDEOS_PATH.to_string())
                    .into(),
                channels_path: env_nonempty("CHANNELS_PATH")
                    .unwrap_or_else(|| DEFAULT_CHANNELS_PATH.to_string())
                    .into(),
                analysis_path: env_nonempty("ANALYSIS_PATH").map(PathBuf::from),
                price_providers: env_nonempty("PRICE_PROVIDERS"),
                alpha_vantage_api_key: env_nonempty("ALPHA_VANTAGE_API_KEY"),
                fmp_api_key: env_nonempty("FINANCIAL_MODELING_PREP_API_KEY"),
                sentry_dsn: env_nonempty("SENTRY_DSN"),
                chunk_size,
                fallback_policy,
                provider_timeout_secs: env_parse("PRICE_PROVIDER_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
                provider_retries: env_parse::<u32>("PRICE_PROVIDER_RETRIES")
                    .unwrap_or(DEFAULT_RETRIES)
                    .max(1),
                chunk_delay_ms: env_parse("PRICE_CHUNK_DELAY_MS").unwrap_or(0),
                historical_baseline: env_parse("HISTORICAL_BASELINE").unwrap_or(true),
            })
        }

        pub fn require_alpha_vantage_api_key(&self) -> anyhow::Result<&str> {
            self.alpha_vantage_api_key
                .as_deref()
                .ok_or_else(|| Fault::Config("ALPHA_VANTAGE_API_KEY is required".to_string()))
                .context("alpha_vantage provider is configured")
        }

        pub fn require_fmp_api_key(&self) -> anyhow::Result<&str> {
            self.fmp_api_key
                .as_deref()
                .ok_or_else(|| {
                    Fault::Config("FINANCIAL_MODELING_PREP_API_KEY is required".to_string())
                })
                .context("fmp provider is configured")
        }
    }

    fn env_nonempty(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
        env_nonempty(key).and_then(|s| s.parse::<T>().ok())
    }
}
