use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;

/// Catalog key form of a ticker: trimmed and upper-cased.
pub fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Dividend,
    #[default]
    Growth,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Dividend => f.write_str("Dividend"),
            Category::Growth => f.write_str("Growth"),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim() {
            "Dividend" => Ok(Category::Dividend),
            "Growth" => Ok(Category::Growth),
            other => anyhow::bail!("category must be Dividend or Growth (got {other:?})"),
        }
    }
}

/// A (low, high) per-share intrinsic value estimate in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DcfRangeRepr")]
pub struct DcfRange {
    pub low: f64,
    pub high: f64,
}

// Older catalogs store ranges as "450-500" strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum DcfRangeRepr {
    Object { low: f64, high: f64 },
    Legacy(String),
}

impl TryFrom<DcfRangeRepr> for DcfRange {
    type Error = String;

    fn try_from(repr: DcfRangeRepr) -> Result<Self, Self::Error> {
        match repr {
            DcfRangeRepr::Object { low, high } => Ok(DcfRange { low, high }),
            DcfRangeRepr::Legacy(s) => parse_legacy_range(&s),
        }
    }
}

fn parse_legacy_range(s: &str) -> Result<DcfRange, String> {
    let cleaned: String = s.chars().filter(|c| !matches!(c, '$' | ',' | ' ')).collect();
    let (low, high) = cleaned
        .split_once('-')
        .ok_or_else(|| format!("DCF range must look like \"low-high\" (got {s:?})"))?;
    let low = low
        .parse::<f64>()
        .map_err(|e| format!("invalid DCF low {low:?}: {e}"))?;
    let high = high
        .parse::<f64>()
        .map_err(|e| format!("invalid DCF high {high:?}: {e}"))?;
    Ok(DcfRange { low, high })
}

impl DcfRange {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.low.is_finite() && self.high.is_finite(),
            "DCF bounds must be finite"
        );
        anyhow::ensure!(self.low >= 0.0, "DCF low must be >= 0 (got {})", self.low);
        anyhow::ensure!(
            self.low <= self.high,
            "DCF low must not exceed high ({} > {})",
            self.low,
            self.high
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dcf {
    pub conservative: DcfRange,
    pub base: DcfRange,
    pub aggressive: DcfRange,
}

impl Dcf {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (label, range) in [
            ("conservative", &self.conservative),
            ("base", &self.base),
            ("aggressive", &self.aggressive),
        ] {
            range
                .validate()
                .map_err(|e| anyhow::anyhow!("dcf.{label}: {e}"))?;
        }
        Ok(())
    }
}

/// The seven factor scores exactly as supplied. `None` means the analysis has not run yet;
/// range checks happen when the record is scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorScores {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fcf_quality: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roic_strength: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue_durability: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_sheet_strength: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insider_activity: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_rank: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_return: Option<Number>,
}

impl FactorScores {
    /// Every factor set to the same score.
    pub fn uniform(score: u8) -> Self {
        let n = || Some(Number::from(score));
        Self {
            fcf_quality: n(),
            roic_strength: n(),
            revenue_durability: n(),
            balance_sheet_strength: n(),
            insider_activity: n(),
            value_rank: n(),
            expected_return: n(),
        }
    }

    pub fn named(&self) -> [(&'static str, Option<&Number>); 7] {
        [
            ("fcfQuality", self.fcf_quality.as_ref()),
            ("roicStrength", self.roic_strength.as_ref()),
            ("revenueDurability", self.revenue_durability.as_ref()),
            ("balanceSheetStrength", self.balance_sheet_strength.as_ref()),
            ("insiderActivity", self.insider_activity.as_ref()),
            ("valueRank", self.value_rank.as_ref()),
            ("expectedReturn", self.expected_return.as_ref()),
        ]
    }

    pub fn is_pending(&self) -> bool {
        self.named().iter().all(|(_, v)| v.is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRecord {
    pub ticker: String,
    pub name: String,
    #[serde(default)]
    pub category: Category,
    /// Set once, on the first successful fetch; never overwritten afterwards.
    #[serde(default, alias = "initialPrice")]
    pub baseline_price: Option<f64>,
    #[serde(default, alias = "price")]
    pub automation_price: f64,
    #[serde(default)]
    pub dcf: Dcf,
    #[serde(flatten)]
    pub factors: FactorScores,
    pub source: String,
    pub recommended_date: NaiveDate,
    pub last_updated: NaiveDate,
}

impl StockRecord {
    /// A fresh record for a ticker first seen in the video feed. Category, name and scores are
    /// placeholders until the analysis output is merged.
    pub fn discovered(ticker: &str, source: &str, recommended_date: NaiveDate) -> Self {
        let ticker = normalize_ticker(ticker);
        Self {
            name: format!("{ticker} (pending analysis)"),
            ticker,
            category: Category::default(),
            baseline_price: None,
            automation_price: 0.0,
            dcf: Dcf::default(),
            factors: FactorScores::default(),
            source: source.to_string(),
            recommended_date,
            last_updated: recommended_date,
        }
    }

    /// Records the baseline if none exists yet. Returns whether it was set.
    pub fn freeze_baseline(&mut self, price: f64) -> bool {
        if self.baseline_price.is_some() || !price.is_finite() || price <= 0.0 {
            return false;
        }
        self.baseline_price = Some(price);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn reads_legacy_catalog_shape() {
        let v = json!({
            "category": "Dividend",
            "ticker": "COST",
            "name": "Costco",
            "price": 912.5,
            "initialPrice": 880.0,
            "recommendedDate": "2025-09-19",
            "dcf": {"conservative": "700-800", "base": "$850-950", "aggressive": {"low": 1000.0, "high": 1100.0}},
            "fcfQuality": 4,
            "roicStrength": 5,
            "revenueDurability": 5,
            "balanceSheetStrength": 4,
            "insiderActivity": 3,
            "valueRank": 2,
            "expectedReturn": 3,
            "lastUpdated": "2025-12-01",
            "source": "The Joseph Carlson Show",
            "sourceDetails": {"isBought": true}
        });

        let rec: StockRecord = serde_json::from_value(v).unwrap();
        assert_eq!(rec.category, Category::Dividend);
        assert_eq!(rec.baseline_price, Some(880.0));
        assert_eq!(rec.automation_price, 912.5);
        assert_eq!(rec.dcf.conservative, DcfRange { low: 700.0, high: 800.0 });
        assert_eq!(rec.dcf.base, DcfRange { low: 850.0, high: 950.0 });
        assert_eq!(rec.factors.roic_strength, Some(Number::from(5)));
        assert_eq!(rec.recommended_date, date(2025, 9, 19));
    }

    #[test]
    fn writes_canonical_keys() {
        let rec = StockRecord::discovered(" nvda ", "Chan", date(2025, 11, 26));
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["ticker"], "NVDA");
        assert_eq!(v["baselinePrice"], serde_json::Value::Null);
        assert_eq!(v["automationPrice"], 0.0);
        assert_eq!(v["dcf"]["base"], json!({"low": 0.0, "high": 0.0}));
        assert!(v.get("fcfQuality").is_none());
        assert!(rec.factors.is_pending());
    }

    #[test]
    fn baseline_is_set_only_once() {
        let mut rec = StockRecord::discovered("AMD", "Chan", date(2025, 11, 25));
        assert!(!rec.freeze_baseline(0.0));
        assert!(rec.freeze_baseline(120.0));
        assert!(!rec.freeze_baseline(150.0));
        assert_eq!(rec.baseline_price, Some(120.0));
    }

    #[test]
    fn dcf_validation_rejects_inverted_range() {
        let dcf = Dcf {
            base: DcfRange { low: 10.0, high: 5.0 },
            ..Dcf::default()
        };
        assert!(dcf.validate().is_err());
        assert!(Dcf::default().validate().is_ok());
    }

    #[test]
    fn legacy_range_must_have_two_bounds() {
        let res = serde_json::from_value::<DcfRange>(json!("500"));
        assert!(res.is_err());
    }
}
