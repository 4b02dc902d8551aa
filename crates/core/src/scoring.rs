//! Undervaluation score and risk tier from the seven 1-5 factor scores.

use crate::domain::fault::Fault;
use crate::domain::stock::{FactorScores, StockRecord};
use serde::Serialize;
use serde_json::Number;

pub const WEIGHT_VALUE_RANK: f64 = 0.25;
pub const WEIGHT_EXPECTED_RETURN: f64 = 0.20;
pub const WEIGHT_FCF_QUALITY: f64 = 0.15;
pub const WEIGHT_ROIC_STRENGTH: f64 = 0.15;
pub const WEIGHT_BALANCE_SHEET_STRENGTH: f64 = 0.10;
pub const WEIGHT_REVENUE_DURABILITY: f64 = 0.10;
pub const WEIGHT_INSIDER_ACTIVITY: f64 = 0.05;

const POINTS_PER_STEP: f64 = 20.0;

const LOW_RISK_MIN_QUALITY: f64 = 4.3;
const MODERATE_RISK_MIN_QUALITY: f64 = 3.3;
const HIGH_RISK_MIN_QUALITY: f64 = 2.5;

/// Factor scores that passed validation: each is an integer in 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Factors {
    pub fcf_quality: u8,
    pub roic_strength: u8,
    pub revenue_durability: u8,
    pub balance_sheet_strength: u8,
    pub insider_activity: u8,
    pub value_rank: u8,
    pub expected_return: u8,
}

impl Factors {
    pub fn try_from_scores(scores: &FactorScores) -> Result<Self, String> {
        if scores.is_pending() {
            return Err("factor scores are pending analysis".to_string());
        }
        Ok(Self {
            fcf_quality: checked("fcfQuality", scores.fcf_quality.as_ref())?,
            roic_strength: checked("roicStrength", scores.roic_strength.as_ref())?,
            revenue_durability: checked("revenueDurability", scores.revenue_durability.as_ref())?,
            balance_sheet_strength: checked(
                "balanceSheetStrength",
                scores.balance_sheet_strength.as_ref(),
            )?,
            insider_activity: checked("insiderActivity", scores.insider_activity.as_ref())?,
            value_rank: checked("valueRank", scores.value_rank.as_ref())?,
            expected_return: checked("expectedReturn", scores.expected_return.as_ref())?,
        })
    }
}

fn checked(name: &str, value: Option<&Number>) -> Result<u8, String> {
    let n = value.ok_or_else(|| format!("{name} is missing"))?;
    let v = n
        .as_f64()
        .ok_or_else(|| format!("{name} is not a number ({n})"))?;
    if v.fract() != 0.0 {
        return Err(format!("{name} must be an integer (got {n})"));
    }
    if !(1.0..=5.0).contains(&v) {
        return Err(format!("{name} must be between 1 and 5 (got {n})"));
    }
    Ok(v as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskTier {
    Low,
    Moderate,
    High,
    Speculative,
}

impl RiskTier {
    /// Thresholds are inclusive at the lower bound.
    pub fn from_avg_quality(avg_quality: f64) -> Self {
        if avg_quality >= LOW_RISK_MIN_QUALITY {
            RiskTier::Low
        } else if avg_quality >= MODERATE_RISK_MIN_QUALITY {
            RiskTier::Moderate
        } else if avg_quality >= HIGH_RISK_MIN_QUALITY {
            RiskTier::High
        } else {
            RiskTier::Speculative
        }
    }
}

/// Weighted composite on a 100-point basis, in 20..=100.
pub fn undervaluation_score(f: &Factors) -> u32 {
    let weighted = [
        (f.value_rank, WEIGHT_VALUE_RANK),
        (f.expected_return, WEIGHT_EXPECTED_RETURN),
        (f.fcf_quality, WEIGHT_FCF_QUALITY),
        (f.roic_strength, WEIGHT_ROIC_STRENGTH),
        (f.balance_sheet_strength, WEIGHT_BALANCE_SHEET_STRENGTH),
        (f.revenue_durability, WEIGHT_REVENUE_DURABILITY),
        (f.insider_activity, WEIGHT_INSIDER_ACTIVITY),
    ]
    .iter()
    .map(|(score, weight)| f64::from(*score) * POINTS_PER_STEP * weight)
    .sum::<f64>();

    weighted.round() as u32
}

pub fn avg_quality(f: &Factors) -> f64 {
    let sum = u32::from(f.fcf_quality)
        + u32::from(f.roic_strength)
        + u32::from(f.revenue_durability)
        + u32::from(f.balance_sheet_strength);
    f64::from(sum) / 4.0
}

/// Display aggregate: mean of FCF quality and ROIC strength, one decimal.
pub fn quality_summary(f: &Factors) -> f64 {
    let mean = f64::from(u32::from(f.fcf_quality) + u32::from(f.roic_strength)) / 2.0;
    (mean * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCard {
    pub undervaluation_score: u32,
    pub risk_tier: RiskTier,
    pub avg_quality: f64,
    pub quality_summary: f64,
}

impl ScoreCard {
    pub fn from_factors(f: &Factors) -> Self {
        let avg = avg_quality(f);
        Self {
            undervaluation_score: undervaluation_score(f),
            risk_tier: RiskTier::from_avg_quality(avg),
            avg_quality: avg,
            quality_summary: quality_summary(f),
        }
    }
}

/// Scores one record. Invalid inputs yield a `Computation` fault for that ticker only.
pub fn score_record(record: &StockRecord) -> Result<ScoreCard, Fault> {
    Factors::try_from_scores(&record.factors)
        .map(|f| ScoreCard::from_factors(&f))
        .map_err(|detail| Fault::Computation {
            ticker: record.ticker.clone(),
            detail,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn factors(
        value_rank: u8,
        expected_return: u8,
        fcf_quality: u8,
        roic_strength: u8,
        balance_sheet_strength: u8,
        revenue_durability: u8,
        insider_activity: u8,
    ) -> Factors {
        Factors {
            fcf_quality,
            roic_strength,
            revenue_durability,
            balance_sheet_strength,
            insider_activity,
            value_rank,
            expected_return,
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let total = WEIGHT_VALUE_RANK
            + WEIGHT_EXPECTED_RETURN
            + WEIGHT_FCF_QUALITY
            + WEIGHT_ROIC_STRENGTH
            + WEIGHT_BALANCE_SHEET_STRENGTH
            + WEIGHT_REVENUE_DURABILITY
            + WEIGHT_INSIDER_ACTIVITY;
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn score_bounds() {
        assert_eq!(undervaluation_score(&factors(5, 5, 5, 5, 5, 5, 5)), 100);
        assert_eq!(undervaluation_score(&factors(1, 1, 1, 1, 1, 1, 1)), 20);
    }

    #[test]
    fn mixed_factors_score() {
        // 25 + 20 + 9 + 9 + 6 + 6 + 3
        assert_eq!(undervaluation_score(&factors(5, 5, 3, 3, 3, 3, 3)), 78);
    }

    #[test]
    fn risk_tier_boundaries() {
        assert_eq!(RiskTier::from_avg_quality(4.3), RiskTier::Low);
        assert_eq!(RiskTier::from_avg_quality(4.299999), RiskTier::Moderate);
        assert_eq!(RiskTier::from_avg_quality(3.3), RiskTier::Moderate);
        assert_eq!(RiskTier::from_avg_quality(2.5), RiskTier::High);
        assert_eq!(RiskTier::from_avg_quality(2.499999), RiskTier::Speculative);
        assert_eq!(RiskTier::from_avg_quality(5.0), RiskTier::Low);
        assert_eq!(RiskTier::from_avg_quality(1.0), RiskTier::Speculative);
    }

    #[test]
    fn quality_aggregates() {
        let f = factors(3, 3, 4, 5, 2, 3, 1);
        assert_eq!(avg_quality(&f), 3.5);
        assert_eq!(quality_summary(&f), 4.5);
        assert_eq!(ScoreCard::from_factors(&f).risk_tier, RiskTier::Moderate);
    }

    #[test]
    fn invalid_record_is_a_computation_fault() {
        let mut rec =
            StockRecord::discovered("XYZ", "Chan", NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        let err = score_record(&rec).unwrap_err();
        assert!(matches!(err, Fault::Computation { ref ticker, .. } if ticker == "XYZ"));

        rec.factors = FactorScores::uniform(4);
        rec.factors.value_rank = serde_json::from_value(json!(0)).unwrap();
        assert!(score_record(&rec).is_err());

        rec.factors.value_rank = serde_json::from_value(json!(2.5)).unwrap();
        assert!(score_record(&rec).is_err());

        rec.factors.value_rank = serde_json::from_value(json!(2)).unwrap();
        let card = score_record(&rec).unwrap();
        assert_eq!(card.undervaluation_score, 70);
    }

    #[test]
    fn integral_floats_are_accepted() {
        let mut scores = FactorScores::uniform(3);
        scores.fcf_quality = serde_json::from_value(json!(3.0)).unwrap();
        assert_eq!(Factors::try_from_scores(&scores).unwrap().fcf_quality, 3);
    }
}
