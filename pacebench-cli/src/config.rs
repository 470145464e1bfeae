//! Configuration loading from pacebench.toml
//!
//! Configuration can be specified in a `pacebench.toml` file in the project
//! root. The file is discovered by walking up from the current directory;
//! command-line flags override whatever it sets.

use pacebench_core::{
    EnvProbe, FixedProbe, LockMode, LockModeProbe, NativeThreadsProbe, RuntimeContext, StrategyKind,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// File name looked up by [`PacebenchConfig::discover`]
pub const CONFIG_FILE: &str = "pacebench.toml";

/// Environment variable consulted by the automatic lock-mode probe
pub const LOCK_MODE_ENV: &str = "PACEBENCH_GIL";

/// pacebench configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PacebenchConfig {
    /// Micro-benchmark settings
    #[serde(default)]
    pub micro: MicroConfig,
    /// Concurrency comparison settings
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Runtime identity overrides
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Micro-benchmark settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroConfig {
    /// Workload calls per timed batch
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Timed batches per case
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    /// Regex restricting which cases run
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for MicroConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            repeat: default_repeat(),
            filter: None,
        }
    }
}

fn default_iterations() -> u32 {
    10
}
fn default_repeat() -> u32 {
    5
}

/// Concurrency comparison settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Tasks per strategy
    #[serde(default = "default_tasks")]
    pub tasks: usize,
    /// Workers per strategy
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-task limit for worker processes (e.g. "30s"); unset means none
    #[serde(default)]
    pub worker_timeout: Option<String>,
    /// Serialize threaded task bodies behind one lock
    #[serde(default)]
    pub global_lock: bool,
    /// Parameter of the CPU-bound task (prime-count limit)
    #[serde(default)]
    pub cpu_param: Option<u64>,
    /// Sleep of the IO-bound task in milliseconds
    #[serde(default)]
    pub io_param_ms: Option<u64>,
    /// Strategies reported as unsupported without running
    #[serde(default)]
    pub disabled_strategies: Vec<StrategyKind>,
    /// Worker binary for the multiprocess strategy; defaults to this executable
    #[serde(default)]
    pub worker_binary: Option<String>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            tasks: default_tasks(),
            workers: default_workers(),
            worker_timeout: None,
            global_lock: false,
            cpu_param: None,
            io_param_ms: None,
            disabled_strategies: Vec::new(),
            worker_binary: None,
        }
    }
}

fn default_tasks() -> usize {
    24
}
fn default_workers() -> usize {
    4
}

impl ConcurrencyConfig {
    /// Parsed `worker_timeout`
    pub fn worker_timeout(&self) -> anyhow::Result<Option<Duration>> {
        self.worker_timeout
            .as_deref()
            .map(|s| PacebenchConfig::parse_duration(s).map(Duration::from_nanos))
            .transpose()
    }
}

/// How the lock mode recorded in documents is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LockModeSetting {
    /// `PACEBENCH_GIL` if set, else inspect the host
    #[default]
    Auto,
    /// Record a serialized runtime
    Serialized,
    /// Record a parallel runtime
    Parallel,
    /// Record `null`
    Unknown,
}

/// Runtime identity overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Implementation label (default "Rust")
    #[serde(default)]
    pub implementation: Option<String>,
    /// Version label (default `<crate version>+<profile>`)
    #[serde(default)]
    pub version: Option<String>,
    /// Lock mode source
    #[serde(default)]
    pub lock_mode: LockModeSetting,
}

impl RuntimeConfig {
    /// Probe matching this configuration. An emulated global lock makes the
    /// answer "serialized" and cannot be combined with `parallel`.
    pub fn probe(&self, global_lock: bool) -> anyhow::Result<Box<dyn LockModeProbe>> {
        Ok(match self.lock_mode {
            LockModeSetting::Parallel if global_lock => {
                return Err(anyhow::anyhow!(
                    "lock_mode = \"parallel\" conflicts with the global lock"
                ));
            }
            _ if global_lock => Box::new(FixedProbe(LockMode::Serialized)),
            LockModeSetting::Auto => Box::new(EnvProbe::new(LOCK_MODE_ENV, NativeThreadsProbe)),
            LockModeSetting::Serialized => Box::new(FixedProbe(LockMode::Serialized)),
            LockModeSetting::Parallel => Box::new(FixedProbe(LockMode::Parallel)),
            LockModeSetting::Unknown => Box::new(FixedProbe(LockMode::Undetermined)),
        })
    }

    /// Resolve the runtime context, probing once
    pub fn resolve(&self, global_lock: bool) -> anyhow::Result<RuntimeContext> {
        let probe = self.probe(global_lock)?;
        Ok(RuntimeContext::resolve(
            self.implementation
                .clone()
                .unwrap_or_else(|| RuntimeContext::NATIVE_IMPLEMENTATION.to_string()),
            self.version
                .clone()
                .unwrap_or_else(RuntimeContext::native_version),
            probe.as_ref(),
        ))
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving documents and summaries
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Terminal output format: "human" or "json"
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            format: default_format(),
        }
    }
}

fn default_output_dir() -> String {
    "target/pacebench".to_string()
}
fn default_format() -> String {
    "human".to_string()
}

impl PacebenchConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => {
                        tracing::debug!(path = %config_path.display(), "loaded configuration");
                        Some(config)
                    }
                    Err(e) => {
                        tracing::warn!(path = %config_path.display(), "ignoring unreadable configuration: {e}");
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# pacebench Configuration

[micro]
# Workload calls per timed batch
iterations = 10
# Timed batches per case
repeat = 5
# Only run cases whose name matches this regex (uncomment to enable)
# filter = "^fibonacci"

[concurrency]
# Tasks per strategy
tasks = 24
# Workers per strategy
workers = 4
# Per-task limit for worker processes (uncomment to enable)
# worker_timeout = "30s"
# Serialize threaded task bodies behind one lock
global_lock = false
# Prime-count limit of the CPU-bound task (uncomment to override)
# cpu_param = 200000
# Sleep of the IO-bound task in milliseconds (uncomment to override)
# io_param_ms = 20
# Strategies to report as unsupported without running
disabled_strategies = []

[runtime]
# Identity recorded in documents (uncomment to override)
# implementation = "Rust"
# version = "0.1.0"
# Lock mode: auto, serialized, parallel or unknown
lock_mode = "auto"

[output]
# Directory receiving documents and summaries
directory = "target/pacebench"
# Terminal output format: human or json
format = "human"
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m") to nanoseconds
    pub fn parse_duration(s: &str) -> anyhow::Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        // Find where the number ends and unit begins
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Duration must be non-negative: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok((value * multiplier as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PacebenchConfig::default();
        assert_eq!(config.micro.iterations, 10);
        assert_eq!(config.micro.repeat, 5);
        assert_eq!(config.concurrency.tasks, 24);
        assert_eq!(config.concurrency.workers, 4);
        assert!(!config.concurrency.global_lock);
        assert_eq!(config.concurrency.worker_timeout().unwrap(), None);
        assert_eq!(config.runtime.lock_mode, LockModeSetting::Auto);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(PacebenchConfig::parse_duration("3s").unwrap(), 3_000_000_000);
        assert_eq!(PacebenchConfig::parse_duration("500ms").unwrap(), 500_000_000);
        assert_eq!(PacebenchConfig::parse_duration("100us").unwrap(), 100_000);
        assert_eq!(PacebenchConfig::parse_duration("1000ns").unwrap(), 1000);
        assert_eq!(PacebenchConfig::parse_duration("2m").unwrap(), 120_000_000_000);
        assert_eq!(PacebenchConfig::parse_duration("1.5s").unwrap(), 1_500_000_000);
        assert_eq!(PacebenchConfig::parse_duration("7").unwrap(), 7_000_000_000);
        assert!(PacebenchConfig::parse_duration("").is_err());
        assert!(PacebenchConfig::parse_duration("3 fortnights").is_err());
        assert!(PacebenchConfig::parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [micro]
            iterations = 3
            filter = "sieve"

            [concurrency]
            worker_timeout = "250ms"
            disabled_strategies = ["multiprocess", "subinterpreter"]

            [runtime]
            implementation = "CPython"
            lock_mode = "parallel"
        "#;

        let config: PacebenchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.micro.iterations, 3);
        assert_eq!(config.micro.filter.as_deref(), Some("sieve"));
        assert_eq!(
            config.concurrency.worker_timeout().unwrap(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            config.concurrency.disabled_strategies,
            vec![StrategyKind::Multiprocess, StrategyKind::Subinterpreter]
        );
        assert_eq!(config.runtime.lock_mode, LockModeSetting::Parallel);
        // Defaults should still apply
        assert_eq!(config.micro.repeat, 5);
        assert_eq!(config.output.directory, "target/pacebench");
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let toml_str = r#"
            [concurrency]
            disabled_strategies = ["fibers"]
        "#;
        assert!(toml::from_str::<PacebenchConfig>(toml_str).is_err());
    }

    #[test]
    fn test_default_toml_parses() {
        let default_toml = PacebenchConfig::default_toml();
        let config: PacebenchConfig = toml::from_str(&default_toml).unwrap();
        assert_eq!(config.micro.iterations, 10);
        assert_eq!(config.output.format, "human");
    }

    #[test]
    fn test_runtime_resolution() {
        let runtime = RuntimeConfig {
            implementation: Some("CPython".to_string()),
            version: Some("3.14.0".to_string()),
            lock_mode: LockModeSetting::Unknown,
        };
        let ctx = runtime.resolve(false).unwrap();
        assert_eq!(ctx.identity().implementation, "CPython");
        assert_eq!(ctx.identity().gil_disabled, None);

        let native = RuntimeConfig::default().resolve(true).unwrap();
        assert_eq!(native.identity().implementation, "Rust");
        assert_eq!(native.lock_mode(), LockMode::Serialized);
    }

    #[test]
    fn test_global_lock_overrides_unknown_and_rejects_parallel() {
        let unknown = RuntimeConfig {
            lock_mode: LockModeSetting::Unknown,
            ..RuntimeConfig::default()
        };
        assert_eq!(unknown.resolve(true).unwrap().lock_mode(), LockMode::Serialized);

        let parallel = RuntimeConfig {
            lock_mode: LockModeSetting::Parallel,
            ..RuntimeConfig::default()
        };
        assert!(parallel.resolve(true).is_err());
        assert_eq!(parallel.resolve(false).unwrap().lock_mode(), LockMode::Parallel);
    }
}
