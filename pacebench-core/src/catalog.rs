//! Workload Catalog
//!
//! Workloads register themselves with `inventory::submit!` and are discovered
//! by name at runtime. Worker processes resolve the same names from their own
//! copy of the registry, so a name is all that crosses a process boundary.

use regex::Regex;
use thiserror::Error;

/// Signature every workload implements: pure, deterministic for a fixed
/// param, and callable from several threads at once.
pub type WorkloadFn = fn(u64) -> Result<i64, WorkloadError>;

/// Failure reported by a workload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkloadError {
    /// The parameter is outside the workload's domain
    #[error("invalid parameter {param}: {reason}")]
    InvalidParam {
        /// Offending parameter
        param: u64,
        /// Why it was rejected
        reason: &'static str,
    },

    /// The workload could not produce a value
    #[error("{0}")]
    Failed(String),
}

/// What the value returned by a workload represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// A computed number (e.g. a Fibonacci term)
    Value,
    /// A count of produced items (e.g. primes found)
    Count,
    /// An opaque checksum folding the whole computation
    Checksum,
}

/// Which runner picks up a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Suite {
    /// Timed by the measurement engine
    Micro,
    /// Used as a task by the concurrency comparator
    Concurrency,
    /// Failure injection for exercising error paths
    Diagnostic,
}

/// A named workload plus its metadata
#[derive(Debug, Clone, Copy)]
pub struct WorkloadCase {
    /// Unique name used for discovery and in result documents
    pub name: &'static str,
    /// One-line description
    pub description: &'static str,
    /// The workload itself
    pub callable: WorkloadFn,
    /// Parameter used when the caller does not supply one
    pub default_param: u64,
    /// Meaning of the returned value
    pub shape: ResultShape,
    /// Runner that owns this entry
    pub suite: Suite,
    /// Known result for `default_param`, when it is cheap to state
    pub expected: Option<i64>,
}

impl WorkloadCase {
    /// Const constructor usable inside `inventory::submit!`
    pub const fn new(
        name: &'static str,
        description: &'static str,
        callable: WorkloadFn,
        default_param: u64,
        shape: ResultShape,
        suite: Suite,
    ) -> Self {
        Self {
            name,
            description,
            callable,
            default_param,
            shape,
            suite,
            expected: None,
        }
    }

    /// Attach the known result for `default_param`
    pub const fn expecting(mut self, value: i64) -> Self {
        self.expected = Some(value);
        self
    }

    /// Invoke the workload once
    #[inline]
    pub fn call(&self, param: u64) -> Result<i64, WorkloadError> {
        (self.callable)(param)
    }

    /// Run the default parameter once and compare against `expected`.
    ///
    /// Returns `Ok(None)` when no expectation is declared.
    pub fn verify_default(&self) -> Result<Option<bool>, WorkloadError> {
        let value = self.call(self.default_param)?;
        Ok(self.expected.map(|expected| expected == value))
    }
}

inventory::collect!(WorkloadCase);

/// A resolved set of workloads, sorted by name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    cases: Vec<WorkloadCase>,
}

impl Catalog {
    /// Collect every workload registered in this binary
    pub fn discover() -> Self {
        Self::from_cases(inventory::iter::<WorkloadCase>.into_iter().copied())
    }

    /// Build a catalog from explicit cases (tests, embedding).
    ///
    /// A later case with a duplicate name replaces the earlier one.
    pub fn from_cases(cases: impl IntoIterator<Item = WorkloadCase>) -> Self {
        let mut cases: Vec<WorkloadCase> = cases.into_iter().collect();
        cases.sort_by(|a, b| a.name.cmp(b.name));
        cases.reverse();
        cases.dedup_by(|later, earlier| later.name == earlier.name);
        cases.reverse();
        Self { cases }
    }

    /// Look a workload up by name
    pub fn get(&self, name: &str) -> Option<&WorkloadCase> {
        self.cases
            .binary_search_by(|case| case.name.cmp(name))
            .ok()
            .map(|idx| &self.cases[idx])
    }

    /// All cases, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = &WorkloadCase> {
        self.cases.iter()
    }

    /// Cases of `suite`, optionally restricted to names matching `filter`
    pub fn select(&self, suite: Suite, filter: Option<&Regex>) -> Vec<WorkloadCase> {
        self.cases
            .iter()
            .filter(|case| case.suite == suite)
            .filter(|case| filter.is_none_or(|re| re.is_match(case.name)))
            .copied()
            .collect()
    }

    /// Number of cases
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Whether the catalog has no cases
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(_: u64) -> Result<i64, WorkloadError> {
        Ok(7)
    }

    fn identity(param: u64) -> Result<i64, WorkloadError> {
        Ok(param as i64)
    }

    #[test]
    fn test_discover_finds_builtin_workloads() {
        let catalog = Catalog::discover();
        for name in [
            "fibonacci_40",
            "fibonacci_rec_32",
            "prime_sieve_5000",
            "json_roundtrip_500",
            "bubble_sort_10000",
            "threaded_trig_4x20000",
            "count_primes",
            "io_wait",
        ] {
            assert!(catalog.get(name).is_some(), "missing workload {name}");
        }
    }

    #[test]
    fn test_discover_is_sorted() {
        let catalog = Catalog::discover();
        let names: Vec<&str> = catalog.iter().map(|c| c.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_select_by_suite_and_filter() {
        let catalog = Catalog::discover();
        let micro = catalog.select(Suite::Micro, None);
        assert_eq!(micro.len(), 6);
        assert!(micro.iter().all(|c| c.suite == Suite::Micro));

        let re = Regex::new("^fibonacci").unwrap();
        let fib = catalog.select(Suite::Micro, Some(&re));
        assert_eq!(fib.len(), 2);
    }

    #[test]
    fn test_from_cases_last_duplicate_wins() {
        let catalog = Catalog::from_cases([
            WorkloadCase::new("a", "", constant, 1, ResultShape::Value, Suite::Micro),
            WorkloadCase::new("a", "", identity, 9, ResultShape::Value, Suite::Micro),
            WorkloadCase::new("b", "", constant, 1, ResultShape::Value, Suite::Micro),
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("a").unwrap().default_param, 9);
        assert!(catalog.get("c").is_none());
    }

    #[test]
    fn test_verify_default() {
        let with = WorkloadCase::new("x", "", identity, 5, ResultShape::Value, Suite::Micro)
            .expecting(5);
        assert_eq!(with.verify_default(), Ok(Some(true)));

        let wrong = WorkloadCase::new("y", "", identity, 5, ResultShape::Value, Suite::Micro)
            .expecting(6);
        assert_eq!(wrong.verify_default(), Ok(Some(false)));

        let without = WorkloadCase::new("z", "", identity, 5, ResultShape::Value, Suite::Micro);
        assert_eq!(without.verify_default(), Ok(None));
    }
}
