use crate::domain::stock::normalize_ticker;
use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const UNKNOWN_CHANNEL_NAME: &str = "Unknown";
pub const UNKNOWN_CHANNEL_ID: &str = "unknown";

/// Video entry as written by the scraper. Channel attribution may be missing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVideo {
    pub video_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub title: String,
    pub published_at: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default, alias = "mentioned")]
    pub tickers_mentioned: Vec<String>,
    #[serde(default, alias = "recommended")]
    pub tickers_recommended: Vec<String>,
    #[serde(default, alias = "bought")]
    pub tickers_bought: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub video_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub title: String,
    pub published_at: NaiveDate,
    pub summary: String,
    pub key_insights: Vec<String>,
    pub tickers_mentioned: BTreeSet<String>,
    pub tickers_recommended: BTreeSet<String>,
    pub tickers_bought: BTreeSet<String>,
}

impl RawVideo {
    pub fn validate_and_into_record(self) -> anyhow::Result<VideoRecord> {
        let video_id = self.video_id.trim().to_string();
        anyhow::ensure!(!video_id.is_empty(), "videoId must be non-empty");

        let published_at = parse_published_at(&self.published_at)
            .with_context(|| format!("video {video_id} has an unusable publishedAt"))?;

        let channel_name = self
            .channel_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_CHANNEL_NAME.to_string());
        let channel_id = self
            .channel_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_CHANNEL_ID.to_string());

        Ok(VideoRecord {
            video_id,
            channel_id,
            channel_name,
            title: self.title,
            published_at,
            summary: self.summary,
            key_insights: self.key_insights,
            tickers_mentioned: ticker_set(&self.tickers_mentioned),
            tickers_recommended: ticker_set(&self.tickers_recommended),
            tickers_bought: ticker_set(&self.tickers_bought),
        })
    }
}

impl VideoRecord {
    /// Union of mentioned, recommended and bought tickers.
    pub fn all_tickers(&self) -> BTreeSet<&str> {
        self.tickers_mentioned
            .iter()
            .chain(&self.tickers_recommended)
            .chain(&self.tickers_bought)
            .map(String::as_str)
            .collect()
    }
}

fn ticker_set(raw: &[String]) -> BTreeSet<String> {
    raw.iter()
        .map(|t| normalize_ticker(t))
        .filter(|t| !t.is_empty())
        .collect()
}

// Accepts plain dates and RFC 3339 timestamps; only the date part matters.
fn parse_published_at(s: &str) -> anyhow::Result<NaiveDate> {
    let s = s.trim();
    let date_part = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .with_context(|| format!("expected YYYY-MM-DD, got {s:?}"))
}
