//! Per-stock view models and the per-channel rollup built from them.

use crate::domain::fault::Fault;
use crate::domain::stock::{Category, Dcf};
use crate::reconcile::{pnl_pct, LivePriceCache, PriceQuote, PriceSource};
use crate::scoring::{score_record, ScoreCard};
use crate::storage::catalog::Catalog;
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One catalog record after scoring and price reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockView {
    pub ticker: String,
    pub name: String,
    pub category: Category,
    pub source: String,
    pub recommended_date: NaiveDate,
    pub last_updated: NaiveDate,
    pub baseline_price: Option<f64>,
    pub live_price: PriceQuote,
    pub pnl_pct: Option<f64>,
    pub dcf: Dcf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_fault: Option<Fault>,
}

/// Builds a view for every valid catalog record, in catalog order. Records the cache does not
/// cover resolve to their catalog price so no row is ever left without one.
pub fn build_views(catalog: &Catalog, cache: &LivePriceCache) -> Vec<StockView> {
    catalog
        .records()
        .map(|record| {
            let live_price = cache.get(&record.ticker).cloned().unwrap_or_else(|| PriceQuote {
                price: record.automation_price,
                source: if record.automation_price > 0.0 {
                    PriceSource::Fallback
                } else {
                    PriceSource::NoData
                },
            });
            let (score, score_fault) = match score_record(record) {
                Ok(card) => (Some(card), None),
                Err(fault) => (None, Some(fault)),
            };

            StockView {
                ticker: record.ticker.clone(),
                name: record.name.clone(),
                category: record.category,
                source: record.source.clone(),
                recommended_date: record.recommended_date,
                last_updated: record.last_updated,
                baseline_price: record.baseline_price,
                pnl_pct: pnl_pct(record.baseline_price, live_price.known_price()),
                live_price,
                dcf: record.dcf,
                score,
                score_fault,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPerformance {
    pub channel: String,
    pub total: usize,
    pub dividend: usize,
    pub growth: usize,
    pub winners: usize,
    pub losers: usize,
    /// Percent of all stocks (not just priced ones) with PnL >= 0. Zero for an empty channel.
    pub win_rate: u32,
    pub avg_pnl_pct: Option<f64>,
    pub avg_undervaluation_score: Option<f64>,
    pub avg_quality_summary: Option<f64>,
}

#[derive(Default)]
struct Acc {
    total: usize,
    dividend: usize,
    growth: usize,
    pnl: Vec<f64>,
    scores: Vec<f64>,
    quality: Vec<f64>,
}

fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    Some(xs.iter().sum::<f64>() / xs.len() as f64)
}

/// Groups views by source channel. Every name in `channels` gets a row even with no stocks.
pub fn aggregate_channels(views: &[StockView], channels: &[String]) -> Vec<ChannelPerformance> {
    let mut groups: BTreeMap<&str, Acc> = channels
        .iter()
        .map(|name| (name.as_str(), Acc::default()))
        .collect();

    for view in views {
        let acc = groups.entry(view.source.as_str()).or_default();
        acc.total += 1;
        match view.category {
            Category::Dividend => acc.dividend += 1,
            Category::Growth => acc.growth += 1,
        }
        if let Some(pnl) = view.pnl_pct {
            acc.pnl.push(pnl);
        }
        if let Some(card) = &view.score {
            acc.scores.push(f64::from(card.undervaluation_score));
            acc.quality.push(card.quality_summary);
        }
    }

    let mut out: Vec<ChannelPerformance> = groups
        .into_iter()
        .map(|(channel, acc)| {
            let winners = acc.pnl.iter().filter(|p| **p >= 0.0).count();
            let win_rate = if acc.total == 0 {
                0
            } else {
                (winners as f64 / acc.total as f64 * 100.0).round() as u32
            };
            ChannelPerformance {
                channel: channel.to_string(),
                total: acc.total,
                dividend: acc.dividend,
                growth: acc.growth,
                winners,
                losers: acc.pnl.len() - winners,
                win_rate,
                avg_pnl_pct: mean(&acc.pnl),
                avg_undervaluation_score: mean(&acc.scores),
                avg_quality_summary: mean(&acc.quality),
            }
        })
        .collect();

    out.sort_by(|a, b| {
        let by_pnl = match (a.avg_pnl_pct, b.avg_pnl_pct) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_pnl.then_with(|| a.channel.cmp(&b.channel))
    });
    out
}
