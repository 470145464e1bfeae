#![warn(missing_docs)]
//! pacebench Report - Documents, Serialization and Aggregation
//!
//! - `BenchmarkDocument` / `ConcurrencyDocument`: one per invocation
//! - `to_json` / `from_document`: checked (de)serialization
//! - `aggregate_*`: cross-run summaries grouped by runtime identity
//! - Plain-text rendering for the terminal

mod aggregate;
mod document;
mod render;

pub use aggregate::{
    CaseSummary, ConcurrencySummaryEntry, StrategySummary, Summary, SummaryEntries, SummaryEntry,
    SummarySuite, aggregate_concurrency_documents, aggregate_documents,
    aggregate_documents_against, compare_identities,
};
pub use document::{
    BenchmarkDocument, ConcurrencyDocument, Document, DocumentKey, DocumentKind,
    ROUND_TRIP_TOLERANCE, from_document, to_json,
};
pub use render::{
    format_benchmark_document, format_concurrency_document, format_concurrency_summary,
    format_micro_summary,
};

use thiserror::Error;

/// Errors raised while building, reading or aggregating documents
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReportError {
    /// Input is not a valid document
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// Serialized output did not parse back to an equal document
    #[error("document changed across a serialization round trip: {0}")]
    RoundTripMismatch(String),

    /// Aggregation was asked to summarize nothing
    #[error("no result documents to aggregate")]
    NoInputData,

    /// The serializer itself failed
    #[error("serialization failed: {0}")]
    Serialize(String),

    /// Statistics over an empty sample set
    #[error(transparent)]
    Stats(#[from] pacebench_stats::StatsError),
}

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Pretty JSON
    Json,
    /// Human-readable terminal tables
    #[default]
    Human,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
