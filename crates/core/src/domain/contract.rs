use crate::domain::stock::{normalize_ticker, Category, Dcf, FactorScores, StockRecord};
use crate::scoring::Factors;
use anyhow::{ensure, Context};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One entry of the analysis output. Nothing here is trusted until `validate` passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutput {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    pub category: String,
    pub price: f64,
    pub dcf: Dcf,
    #[serde(flatten)]
    pub factors: FactorScores,
    pub last_updated: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAnalysis {
    pub ticker: String,
    pub name: Option<String>,
    pub category: Category,
    pub price: f64,
    pub dcf: Dcf,
    pub factors: FactorScores,
    pub last_updated: NaiveDate,
}

impl AnalysisOutput {
    pub fn validate(self) -> anyhow::Result<ValidatedAnalysis> {
        let ticker = normalize_ticker(&self.ticker);
        ensure!(!ticker.is_empty(), "ticker must be non-empty");

        let category = self.category.parse::<Category>()?;

        ensure!(
            self.price.is_finite() && self.price > 0.0,
            "price must be a positive number (got {})",
            self.price
        );

        self.dcf.validate()?;

        Factors::try_from_scores(&self.factors)
            .map_err(anyhow::Error::msg)
            .context("factor scores")?;

        let name = self
            .name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(ValidatedAnalysis {
            ticker,
            name,
            category,
            price: self.price,
            dcf: self.dcf,
            factors: self.factors,
            last_updated: self.last_updated,
        })
    }
}

impl ValidatedAnalysis {
    /// Refreshes the analysed fields. Baseline, source and recommendation date stay as they are.
    pub fn apply_to(&self, record: &mut StockRecord) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        record.category = self.category;
        record.automation_price = self.price;
        record.dcf = self.dcf;
        record.factors = self.factors.clone();
        record.last_updated = self.last_updated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(v: serde_json::Value) -> AnalysisOutput {
        serde_json::from_value(v).unwrap()
    }

    fn valid_json() -> serde_json::Value {
        json!({
            "ticker": "duol",
            "name": "Duolingo",
            "category": "Growth",
            "price": 310.25,
            "dcf": {
                "conservative": "250-280",
                "base": "300-340",
                "aggressive": "380-420"
            },
            "fcfQuality": 4,
            "roicStrength": 3,
            "revenueDurability": 4,
            "balanceSheetStrength": 5,
            "insiderActivity": 2,
            "valueRank": 3,
            "expectedReturn": 4,
            "lastUpdated": "2025-12-01"
        })
    }

    #[test]
    fn merges_analysis_without_touching_provenance() {
        let validated = output(valid_json()).validate().unwrap();
        assert_eq!(validated.ticker, "DUOL");

        let recommended = NaiveDate::from_ymd_opt(2025, 11, 20).unwrap();
        let mut rec = StockRecord::discovered("DUOL", "Chan", recommended);
        rec.baseline_price = Some(290.0);

        validated.apply_to(&mut rec);
        assert_eq!(rec.name, "Duolingo");
        assert_eq!(rec.automation_price, 310.25);
        assert_eq!(rec.baseline_price, Some(290.0));
        assert_eq!(rec.source, "Chan");
        assert_eq!(rec.recommended_date, recommended);
        assert_eq!(rec.dcf.base.high, 340.0);
    }

    #[test]
    fn rejects_out_of_range_score() {
        let mut v = valid_json();
        v["valueRank"] = json!(6);
        assert!(output(v).validate().is_err());
    }

    #[test]
    fn rejects_fractional_score() {
        let mut v = valid_json();
        v["fcfQuality"] = json!(3.5);
        assert!(output(v).validate().is_err());
    }

    #[test]
    fn rejects_missing_score() {
        let mut v = valid_json();
        v.as_object_mut().unwrap().remove("insiderActivity");
        assert!(output(v).validate().is_err());
    }

    #[test]
    fn rejects_unknown_category_and_bad_price() {
        let mut v = valid_json();
        v["category"] = json!("Value");
        assert!(output(v).validate().is_err());

        let mut v = valid_json();
        v["price"] = json!(0.0);
        assert!(output(v).validate().is_err());
    }
}
