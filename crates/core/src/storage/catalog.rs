use crate::domain::fault::{Fault, RecordKind};
use crate::domain::stock::{normalize_ticker, StockRecord};
use anyhow::Context;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
enum CatalogEntry {
    Valid(StockRecord),
    /// Failed schema validation on load. Kept verbatim (key order included) so a rewrite never
    /// drops it.
    Quarantined(Value),
}

/// Ordered stock records keyed by normalized ticker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
    /// Tickers named by quarantined entries. Still tracked, so they are never re-added.
    quarantined_keys: HashSet<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<StockRecord>) -> anyhow::Result<Self> {
        let mut out = Self::new();
        for rec in records {
            let ticker = rec.ticker.clone();
            anyhow::ensure!(out.insert(rec), "duplicate ticker {ticker}");
        }
        Ok(out)
    }

    /// Validates each element on its own; bad elements are quarantined and reported.
    pub fn from_values(values: Vec<Value>) -> (Self, Vec<Fault>) {
        let mut out = Self::new();
        let mut faults = Vec::new();

        for (idx, value) in values.into_iter().enumerate() {
            let ticker = value
                .get("ticker")
                .and_then(Value::as_str)
                .map(normalize_ticker)
                .filter(|t| !t.is_empty());
            let key = ticker.clone().unwrap_or_else(|| format!("#{idx}"));

            match parse_record(value.clone()) {
                Ok(rec) if out.index.contains_key(&rec.ticker) => {
                    faults.push(Fault::malformed(RecordKind::Stock, key, "duplicate ticker"));
                    out.quarantine(ticker, value);
                }
                Ok(rec) => {
                    out.index.insert(rec.ticker.clone(), out.entries.len());
                    out.entries.push(CatalogEntry::Valid(rec));
                }
                Err(err) => {
                    faults.push(Fault::malformed(RecordKind::Stock, key, format!("{err:#}")));
                    out.quarantine(ticker, value);
                }
            }
        }

        (out, faults)
    }

    fn quarantine(&mut self, ticker: Option<String>, value: Value) {
        if let Some(ticker) = ticker {
            self.quarantined_keys.insert(ticker);
        }
        self.entries.push(CatalogEntry::Quarantined(value));
    }

    pub fn to_values(&self) -> anyhow::Result<Vec<Value>> {
        self.entries
            .iter()
            .map(|entry| match entry {
                CatalogEntry::Valid(rec) => serde_json::to_value(rec)
                    .with_context(|| format!("failed to serialize {}", rec.ticker)),
                CatalogEntry::Quarantined(v) => Ok(v.clone()),
            })
            .collect()
    }

    /// True for valid records and for quarantined entries that still name a ticker.
    pub fn contains(&self, ticker: &str) -> bool {
        let ticker = normalize_ticker(ticker);
        self.index.contains_key(&ticker) || self.quarantined_keys.contains(&ticker)
    }

    pub fn get(&self, ticker: &str) -> Option<&StockRecord> {
        let idx = *self.index.get(&normalize_ticker(ticker))?;
        match &self.entries[idx] {
            CatalogEntry::Valid(rec) => Some(rec),
            CatalogEntry::Quarantined(_) => None,
        }
    }

    pub fn get_mut(&mut self, ticker: &str) -> Option<&mut StockRecord> {
        let idx = *self.index.get(&normalize_ticker(ticker))?;
        match &mut self.entries[idx] {
            CatalogEntry::Valid(rec) => Some(rec),
            CatalogEntry::Quarantined(_) => None,
        }
    }

    /// Appends a new record. An existing ticker, quarantined or not, is never replaced; returns
    /// false instead.
    pub fn insert(&mut self, mut record: StockRecord) -> bool {
        record.ticker = normalize_ticker(&record.ticker);
        if record.ticker.is_empty() || self.contains(&record.ticker) {
            return false;
        }
        self.index.insert(record.ticker.clone(), self.entries.len());
        self.entries.push(CatalogEntry::Valid(record));
        true
    }

    pub fn records(&self) -> impl Iterator<Item = &StockRecord> {
        self.entries.iter().filter_map(|entry| match entry {
            CatalogEntry::Valid(rec) => Some(rec),
            CatalogEntry::Quarantined(_) => None,
        })
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut StockRecord> {
        self.entries.iter_mut().filter_map(|entry| match entry {
            CatalogEntry::Valid(rec) => Some(rec),
            CatalogEntry::Quarantined(_) => None,
        })
    }

    /// Tracked tickers in catalog order.
    pub fn tickers(&self) -> Vec<String> {
        self.records().map(|r| r.ticker.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn quarantined_len(&self) -> usize {
        self.entries.len() - self.index.len()
    }
}

fn parse_record(value: Value) -> anyhow::Result<StockRecord> {
    let mut rec: StockRecord =
        serde_json::from_value(value).context("stock record does not match the catalog schema")?;
    rec.ticker = normalize_ticker(&rec.ticker);
    anyhow::ensure!(!rec.ticker.is_empty(), "ticker must be non-empty");
    anyhow::ensure!(!rec.source.trim().is_empty(), "source must be non-empty");
    if let Some(baseline) = rec.baseline_price {
        anyhow::ensure!(
            baseline.is_finite() && baseline >= 0.0,
            "baselinePrice must be a non-negative number (got {baseline})"
        );
    }
    Ok(rec)
}

/// A missing file is an empty catalog; anything else that is not a JSON array is an error.
pub fn load_catalog(path: &Path) -> anyhow::Result<(Catalog, Vec<Fault>)> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "catalog file not found; starting empty");
        return Ok((Catalog::new(), Vec::new()));
    }
    let values: Vec<Value> = super::read_json(path)
        .with_context(|| format!("catalog {} must be a JSON array", path.display()))?;
    Ok(Catalog::from_values(values))
}

pub fn save_catalog(path: &Path, catalog: &Catalog) -> anyhow::Result<()> {
    let values = catalog.to_values()?;
    super::write_json_atomic(path, &values)
}
