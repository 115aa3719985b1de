//! Batch ingestion: raw rows from one source through normalization and
//! reconciliation into persisted customers and orders.

pub mod csv;
pub mod pipeline;
pub mod report;
pub mod rows;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use pipeline::IngestionPipeline;
pub use report::{IngestionReport, RejectionCounts, RowDiagnostic, RowOutcome};

pub const DEFAULT_CHUNK_SIZE: usize = 50;
/// Upper bound on the order count a single CSV row may declare.
pub const DEFAULT_MAX_ORDERS_PER_ROW: u32 = 1000;

/// Failures that abort a whole run. Row-level problems never surface here.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("source data could not be parsed: {0}")]
    Unparsable(String),
    #[error("source is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("source unreachable: {0}")]
    Unreachable(String),
    #[error("source rejected credentials: {0}")]
    Unauthenticated(String),
    #[error("source is not configured: {0}")]
    NotConfigured(String),
}

/// A remote feed of order objects, delivered as untrusted JSON.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_orders(&self) -> Result<Vec<Value>, SourceError>;
}

/// How repeated CSV imports of the same data behave.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsvImportMode {
    /// Every import adds the row's declared history again.
    #[default]
    Additive,
    /// Rows already imported (same phone, customer-since and last-order dates) are skipped.
    NaturalKey,
}

impl CsvImportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Additive => "additive",
            Self::NaturalKey => "natural_key",
        }
    }
}

impl std::str::FromStr for CsvImportMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "additive" => Ok(Self::Additive),
            "natural_key" | "natural-key" => Ok(Self::NaturalKey),
            other => Err(format!("unsupported csv import mode `{other}`")),
        }
    }
}

/// Whether an API run consults and advances the stored high-water mark.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Incremental,
    /// Backfill from the historical feed; only reference uniqueness applies.
    Historical,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestSettings {
    pub chunk_size: usize,
    pub csv_mode: CsvImportMode,
    pub max_orders_per_row: u32,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            csv_mode: CsvImportMode::Additive,
            max_orders_per_row: DEFAULT_MAX_ORDERS_PER_ROW,
        }
    }
}
