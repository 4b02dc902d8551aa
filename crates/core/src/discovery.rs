//! Reconciles tickers seen in the video feed against the catalog.
//!
//! New tickers get a placeholder record attributed to the earliest video that mentioned them.
//! Existing records are left exactly as they are, so the merge is idempotent.

use crate::domain::channel::ChannelConfig;
use crate::domain::stock::StockRecord;
use crate::domain::video::VideoRecord;
use crate::storage::catalog::Catalog;
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstMention {
    pub published_at: NaiveDate,
    pub channel_id: String,
    pub channel_name: String,
    pub video_id: String,
    pub mention_count: usize,
}

impl FirstMention {
    // Earliest date wins; equal dates fall back to the smaller channel id, then video id,
    // so the result does not depend on feed order.
    fn rank(&self) -> (NaiveDate, &str, &str) {
        (self.published_at, &self.channel_id, &self.video_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub added: Vec<String>,
    pub already_tracked: Vec<String>,
    pub skipped_videos: usize,
}

/// Earliest attribution per normalized ticker across videos from enabled channels. Videos with
/// no channel attribution still count, under the unknown placeholder.
pub fn first_mentions(
    videos: &[VideoRecord],
    channels: &ChannelConfig,
) -> (BTreeMap<String, FirstMention>, usize) {
    let mut out: BTreeMap<String, FirstMention> = BTreeMap::new();
    let mut skipped = 0usize;

    for video in videos {
        if !channels.feeds_discovery(&video.channel_id) {
            skipped += 1;
            tracing::debug!(video_id = %video.video_id, channel_id = %video.channel_id, "skipping video from channel that is not enabled");
            continue;
        }

        for ticker in video.all_tickers() {
            let candidate = FirstMention {
                published_at: video.published_at,
                channel_id: video.channel_id.clone(),
                channel_name: video.channel_name.clone(),
                video_id: video.video_id.clone(),
                mention_count: 1,
            };

            match out.get_mut(ticker) {
                None => {
                    out.insert(ticker.to_string(), candidate);
                }
                Some(current) => {
                    let count = current.mention_count + 1;
                    if candidate.rank() < current.rank() {
                        *current = candidate;
                    }
                    current.mention_count = count;
                }
            }
        }
    }

    (out, skipped)
}

/// Adds a record for every ticker the catalog does not know yet. New records are appended in
/// ticker order; existing records are never modified.
pub fn merge_discoveries(
    catalog: &mut Catalog,
    videos: &[VideoRecord],
    channels: &ChannelConfig,
) -> DiscoveryReport {
    let (mentions, skipped_videos) = first_mentions(videos, channels);
    let mut report = DiscoveryReport {
        skipped_videos,
        ..DiscoveryReport::default()
    };

    for (ticker, mention) in mentions {
        if catalog.contains(&ticker) {
            report.already_tracked.push(ticker);
            continue;
        }

        let record = StockRecord::discovered(&ticker, &mention.channel_name, mention.published_at);
        if catalog.insert(record) {
            tracing::info!(
                %ticker,
                channel = %mention.channel_name,
                first_mentioned = %mention.published_at,
                mentions = mention.mention_count,
                "discovered new ticker"
            );
            report.added.push(ticker);
        }
    }

    report
}
