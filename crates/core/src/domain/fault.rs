use serde::Serialize;
use std::fmt;

/// Non-fatal problems are collected into the run report; only `Config` aborts a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Fault {
    DataFetch {
        provider: String,
        ticker: String,
        detail: String,
    },
    MalformedRecord {
        record: RecordKind,
        key: String,
        detail: String,
    },
    Config(String),
    Computation {
        ticker: String,
        detail: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Stock,
    Video,
    Channel,
    Analysis,
}

impl Fault {
    pub fn malformed(record: RecordKind, key: impl Into<String>, detail: impl fmt::Display) -> Self {
        Fault::MalformedRecord {
            record,
            key: key.into(),
            detail: detail.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Fault::Config(_))
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::DataFetch {
                provider,
                ticker,
                detail,
            } => write!(f, "price fetch failed (provider={provider}, ticker={ticker}): {detail}"),
            Fault::MalformedRecord {
                record,
                key,
                detail,
            } => write!(f, "malformed {record:?} record (key={key}): {detail}"),
            Fault::Config(detail) => write!(f, "configuration error: {detail}"),
            Fault::Computation { ticker, detail } => {
                write!(f, "cannot score {ticker}: {detail}")
            }
        }
    }
}

impl std::error::Error for Fault {}
