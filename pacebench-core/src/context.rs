//! Runtime Context
//!
//! Identity fields written into every document are resolved once at startup
//! and passed around explicitly. Whether the runtime serializes shared-memory
//! workers ("lock mode") is answered by a [`LockModeProbe`], so embedders
//! and tests can report their own behavior without touching process state.

use serde::{Deserialize, Deserializer, Serialize};

/// Whether shared-memory workers can execute CPU-bound code in parallel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// A global lock serializes workers
    Serialized,
    /// Workers run truly in parallel
    Parallel,
    /// The probe could not tell
    Undetermined,
}

impl LockMode {
    /// Tri-state written to documents as `gil_disabled`
    pub fn gil_disabled(self) -> Option<bool> {
        match self {
            LockMode::Serialized => Some(false),
            LockMode::Parallel => Some(true),
            LockMode::Undetermined => None,
        }
    }

    /// Inverse of [`LockMode::gil_disabled`]
    pub fn from_gil_disabled(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => LockMode::Parallel,
            Some(false) => LockMode::Serialized,
            None => LockMode::Undetermined,
        }
    }
}

/// Capability query for the runtime's lock mode
pub trait LockModeProbe: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Determine the lock mode. Called once per document.
    fn probe(&self) -> LockMode;
}

/// Native OS threads: parallel whenever more than one CPU is available.
///
/// On a single CPU nothing distinguishes "parallel" from "serialized", so
/// the answer is `Undetermined`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeThreadsProbe;

impl LockModeProbe for NativeThreadsProbe {
    fn name(&self) -> &'static str {
        "native-threads"
    }

    fn probe(&self) -> LockMode {
        match std::thread::available_parallelism() {
            Ok(n) if n.get() > 1 => LockMode::Parallel,
            _ => LockMode::Undetermined,
        }
    }
}

/// Environment override in the style of `PYTHON_GIL`: `"0"` means the lock is
/// off (parallel), `"1"` means it is on (serialized). Anything else defers
/// to the fallback probe.
pub struct EnvProbe<P> {
    var: String,
    fallback: P,
}

impl<P: LockModeProbe> EnvProbe<P> {
    /// Probe reading `var`, deferring to `fallback`
    pub fn new(var: impl Into<String>, fallback: P) -> Self {
        Self {
            var: var.into(),
            fallback,
        }
    }

    fn interpret(value: Option<&str>) -> Option<LockMode> {
        match value.map(str::trim) {
            Some("0") => Some(LockMode::Parallel),
            Some("1") => Some(LockMode::Serialized),
            _ => None,
        }
    }
}

impl<P: LockModeProbe> LockModeProbe for EnvProbe<P> {
    fn name(&self) -> &'static str {
        "env"
    }

    fn probe(&self) -> LockMode {
        let value = std::env::var(&self.var).ok();
        Self::interpret(value.as_deref()).unwrap_or_else(|| self.fallback.probe())
    }
}

/// A probe with a predetermined answer
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub LockMode);

impl LockModeProbe for FixedProbe {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn probe(&self) -> LockMode {
        self.0
    }
}

/// Identity of the runtime that produced a document.
///
/// Field names on the wire are stable and shared with documents produced by
/// other runtimes, hence the `python_` prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuntimeIdentity {
    /// Implementation name (e.g. "Rust", "CPython")
    #[serde(rename = "python_implementation")]
    pub implementation: String,
    /// Implementation version string
    #[serde(rename = "python_version")]
    pub version: String,
    /// Lock mode tri-state; the key is required even when null
    #[serde(deserialize_with = "required_nullable")]
    pub gil_disabled: Option<bool>,
}

impl RuntimeIdentity {
    /// Identity with explicit fields
    pub fn new(
        implementation: impl Into<String>,
        version: impl Into<String>,
        gil_disabled: Option<bool>,
    ) -> Self {
        Self {
            implementation: implementation.into(),
            version: version.into(),
            gil_disabled,
        }
    }

    /// `impl-version[-nogil]`, lowercased implementation. Unique per identity
    /// for the two non-null lock modes and used to key persisted documents.
    pub fn slug(&self) -> String {
        let suffix = match self.gil_disabled {
            Some(true) => "-nogil",
            _ => "",
        };
        format!(
            "{}-{}{}",
            self.implementation.to_lowercase().replace(char::is_whitespace, "_"),
            self.version,
            suffix
        )
    }
}

impl std::fmt::Display for RuntimeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.gil_disabled {
            Some(true) => "parallel",
            Some(false) => "serialized",
            None => "lock mode unknown",
        };
        write!(f, "{} {} ({})", self.implementation, self.version, mode)
    }
}

fn required_nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

/// Immutable per-run context handed to document construction
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeContext {
    identity: RuntimeIdentity,
    lock_mode: LockMode,
    probe: &'static str,
}

impl RuntimeContext {
    /// Default implementation label for this binary
    pub const NATIVE_IMPLEMENTATION: &'static str = "Rust";

    /// Resolve the context, invoking `probe` exactly once
    pub fn resolve(
        implementation: impl Into<String>,
        version: impl Into<String>,
        probe: &dyn LockModeProbe,
    ) -> Self {
        let lock_mode = probe.probe();
        tracing::debug!(probe = probe.name(), ?lock_mode, "resolved lock mode");
        Self {
            identity: RuntimeIdentity::new(implementation, version, lock_mode.gil_disabled()),
            lock_mode,
            probe: probe.name(),
        }
    }

    /// Context for this binary: implementation "Rust", version
    /// `<crate version>+<profile>`
    pub fn native(probe: &dyn LockModeProbe) -> Self {
        Self::resolve(Self::NATIVE_IMPLEMENTATION, Self::native_version(), probe)
    }

    /// Version label of this binary
    pub fn native_version() -> String {
        let profile = if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        };
        format!("{}+{}", env!("CARGO_PKG_VERSION"), profile)
    }

    /// Identity written into documents
    pub fn identity(&self) -> &RuntimeIdentity {
        &self.identity
    }

    /// Lock mode reported by the probe
    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    /// Name of the probe that answered
    pub fn probe_name(&self) -> &'static str {
        self.probe
    }
}
