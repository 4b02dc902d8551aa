use crate::domain::contract::{AnalysisOutput, ValidatedAnalysis};
use crate::domain::fault::{Fault, RecordKind};
use crate::storage::catalog::Catalog;
use anyhow::Context;
use serde_json::Value;
use std::path::Path;

/// Strips Markdown fences, or falls back to the outermost `[...]`, from analysis output.
pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// Parses the whole document; entries that fail the contract are reported and skipped.
pub fn parse_analysis(text: &str) -> anyhow::Result<(Vec<ValidatedAnalysis>, Vec<Fault>)> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let values = serde_json::from_str::<Vec<Value>>(&json_str)
        .context("analysis output is not a JSON array")?;

    let mut out = Vec::with_capacity(values.len());
    let mut faults = Vec::new();
    for (idx, value) in values.into_iter().enumerate() {
        let key = value
            .get("ticker")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_uppercase())
            .unwrap_or_else(|| format!("#{idx}"));

        let validated = serde_json::from_value::<AnalysisOutput>(value)
            .context("entry does not match the analysis contract")
            .and_then(AnalysisOutput::validate);
        match validated {
            Ok(v) => out.push(v),
            Err(err) => {
                faults.push(Fault::malformed(RecordKind::Analysis, key, format!("{err:#}")))
            }
        }
    }
    Ok((out, faults))
}

pub fn load_analysis(path: &Path) -> anyhow::Result<(Vec<ValidatedAnalysis>, Vec<Fault>)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read analysis output {}", path.display()))?;
    parse_analysis(&text)
}

/// Applies validated analysis to catalog records. Analysis for untracked tickers is reported.
pub fn merge_analysis(
    catalog: &mut Catalog,
    analyses: &[ValidatedAnalysis],
) -> (Vec<String>, Vec<Fault>) {
    let mut merged = Vec::new();
    let mut faults = Vec::new();

    for analysis in analyses {
        match catalog.get_mut(&analysis.ticker) {
            Some(record) => {
                analysis.apply_to(record);
                merged.push(analysis.ticker.clone());
            }
            None => faults.push(Fault::malformed(
                RecordKind::Analysis,
                analysis.ticker.clone(),
                "ticker is not tracked in the catalog",
            )),
        }
    }

    (merged, faults)
}
