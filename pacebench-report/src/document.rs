//! Result Documents
//!
//! One document per invocation, immutable once built. Serialization is
//! checked: the emitted JSON is parsed back and compared field by field
//! before it is handed out, so a document that would not survive a reload is
//! never persisted.

use crate::ReportError;
use pacebench_core::{ConcurrencyTaskResult, RunResult, RuntimeContext, RuntimeIdentity};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Relative tolerance of the post-serialization equality check
pub const ROUND_TRIP_TOLERANCE: f64 = 1e-12;

/// Behavior shared by every persisted document
pub trait Document: Serialize + DeserializeOwned {
    /// Kind of document, used for naming
    const KIND: DocumentKind;

    /// Runtime that produced the document
    fn identity(&self) -> &RuntimeIdentity;

    /// Structural invariants serde cannot express
    fn check_invariants(&self) -> Result<(), String>;

    /// Equality with floats compared to within `tolerance`
    fn approx_eq(&self, other: &Self, tolerance: f64) -> bool;

    /// Sink key derived from the identity
    fn key(&self) -> DocumentKey {
        DocumentKey::new(Self::KIND, self.identity())
    }
}

/// Micro-benchmark results of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkDocument {
    /// Producing runtime
    #[serde(flatten)]
    pub runtime: RuntimeIdentity,
    /// Workload calls per repeat
    pub iterations: u32,
    /// Timed batches per case
    pub repeat: u32,
    /// Results keyed by case name
    pub cases: BTreeMap<String, RunResult>,
}

impl BenchmarkDocument {
    /// Assemble a document from measured cases
    pub fn new(ctx: &RuntimeContext, iterations: u32, repeat: u32, results: Vec<RunResult>) -> Self {
        Self {
            runtime: ctx.identity().clone(),
            iterations,
            repeat,
            cases: results
                .into_iter()
                .map(|result| (result.case_name.clone(), result))
                .collect(),
        }
    }
}

impl Document for BenchmarkDocument {
    const KIND: DocumentKind = DocumentKind::Benchmarks;

    fn identity(&self) -> &RuntimeIdentity {
        &self.runtime
    }

    fn check_invariants(&self) -> Result<(), String> {
        if self.iterations == 0 || self.repeat == 0 {
            return Err(format!(
                "iterations ({}) and repeat ({}) must be at least 1",
                self.iterations, self.repeat
            ));
        }
        for (name, result) in &self.cases {
            if *name != result.case_name {
                return Err(format!(
                    "case keyed `{name}` is named `{}`",
                    result.case_name
                ));
            }
            result.check_invariants()?;
        }
        Ok(())
    }

    fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.runtime == other.runtime
            && self.iterations == other.iterations
            && self.repeat == other.repeat
            && self.cases.len() == other.cases.len()
            && self.cases.iter().zip(&other.cases).all(|((ka, a), (kb, b))| {
                ka == kb && a.approx_eq(b, tolerance)
            })
    }
}

/// Concurrency comparison results of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyDocument {
    /// Producing runtime
    #[serde(flatten)]
    pub runtime: RuntimeIdentity,
    /// Tasks per strategy
    pub tasks: usize,
    /// Workers per strategy
    pub workers: usize,
    /// One entry per (workload kind, strategy), in comparison order
    pub results: Vec<ConcurrencyTaskResult>,
}

impl ConcurrencyDocument {
    /// Assemble a document from comparator output
    pub fn new(
        ctx: &RuntimeContext,
        tasks: usize,
        workers: usize,
        results: Vec<ConcurrencyTaskResult>,
    ) -> Self {
        Self {
            runtime: ctx.identity().clone(),
            tasks,
            workers,
            results,
        }
    }
}

impl Document for ConcurrencyDocument {
    const KIND: DocumentKind = DocumentKind::Concurrency;

    fn identity(&self) -> &RuntimeIdentity {
        &self.runtime
    }

    fn check_invariants(&self) -> Result<(), String> {
        if self.tasks == 0 || self.workers == 0 {
            return Err(format!(
                "tasks ({}) and workers ({}) must be at least 1",
                self.tasks, self.workers
            ));
        }
        self.results
            .iter()
            .try_for_each(ConcurrencyTaskResult::check_invariants)
    }

    fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.runtime == other.runtime
            && self.tasks == other.tasks
            && self.workers == other.workers
            && self.results.len() == other.results.len()
            && self
                .results
                .iter()
                .zip(&other.results)
                .all(|(a, b)| a.approx_eq(b, tolerance))
    }
}

/// Serialize `doc` as pretty JSON, verifying it parses back to an equal
/// document.
pub fn to_json<D: Document>(doc: &D) -> Result<String, ReportError> {
    doc.check_invariants()
        .map_err(ReportError::MalformedDocument)?;

    let json = serde_json::to_string_pretty(doc).map_err(|e| ReportError::Serialize(e.to_string()))?;

    let reparsed: D =
        serde_json::from_str(&json).map_err(|e| ReportError::RoundTripMismatch(e.to_string()))?;
    if !doc.approx_eq(&reparsed, ROUND_TRIP_TOLERANCE) {
        return Err(ReportError::RoundTripMismatch(format!(
            "{} document for {} changed after reload",
            D::KIND,
            doc.identity()
        )));
    }

    tracing::debug!(key = %doc.key(), bytes = json.len(), "serialized document");
    Ok(json)
}

/// Parse a document, rejecting anything that breaks its invariants.
///
/// Unknown fields are ignored; missing required fields are not.
pub fn from_document<D: Document>(bytes: &[u8]) -> Result<D, ReportError> {
    let doc: D = serde_json::from_slice(bytes)
        .map_err(|e| ReportError::MalformedDocument(e.to_string()))?;
    doc.check_invariants()
        .map_err(ReportError::MalformedDocument)?;
    Ok(doc)
}

/// Which runner produced a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// Micro-benchmark results
    Benchmarks,
    /// Concurrency comparison results
    Concurrency,
}

impl DocumentKind {
    /// File-name prefix
    pub fn prefix(self) -> &'static str {
        match self {
            DocumentKind::Benchmarks => "benchmarks",
            DocumentKind::Concurrency => "concurrency",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Sink key: `<kind>-<impl>-<version>[-nogil]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    kind: DocumentKind,
    slug: String,
}

impl DocumentKey {
    /// Key for a document of `kind` produced by `identity`
    pub fn new(kind: DocumentKind, identity: &RuntimeIdentity) -> Self {
        Self {
            kind,
            slug: identity.slug(),
        }
    }

    /// Document kind
    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// `<key>.json`
    pub fn file_name(&self) -> String {
        format!("{self}.json")
    }

    /// Kind of document a file name belongs to, judged by its prefix
    pub fn kind_of_file(file_name: &str) -> Option<DocumentKind> {
        [DocumentKind::Benchmarks, DocumentKind::Concurrency]
            .into_iter()
            .find(|kind| {
                file_name
                    .strip_prefix(kind.prefix())
                    .is_some_and(|rest| rest.starts_with('-') && rest.ends_with(".json"))
            })
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.slug)
    }
}
