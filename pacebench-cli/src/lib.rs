#![warn(missing_docs)]
//! pacebench CLI Library
//!
//! Command-line front end of pacebench plus the pieces that only make sense
//! in a host binary: the concurrency comparator, the worker-process
//! supervisor and `pacebench.toml` configuration.
//!
//! # Example
//!
//! ```ignore
//! fn main() -> anyhow::Result<()> {
//!     pacebench_cli::run()
//! }
//! ```

mod comparator;
mod config;
mod micro;
#[cfg(unix)]
mod supervisor;

pub use comparator::{
    Availability, Comparator, Disabled, IsolateStrategy, MultiprocessStrategy, ResultSink,
    SequentialStrategy, Strategies, Strategy, StrategyOptions, StrategyRun, TaskPlan, TaskQueue,
    ThreadedStrategy, run_concurrency, standard_workloads,
};
pub use config::*;
pub use micro::{measure_catalog, measure_catalog_with_progress, select_micro_cases};
#[cfg(unix)]
pub use supervisor::{PING_TIMEOUT, SupervisorError, TaskReply, WorkerHandle, WorkerLauncher};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use pacebench_core::{
    Catalog, LockMode, RuntimeContext, RuntimeIdentity, StrategyKind, Suite, WorkerMain,
};
use pacebench_report::{
    BenchmarkDocument, ConcurrencyDocument, Document, DocumentKey, DocumentKind, OutputFormat,
    Summary, aggregate_concurrency_documents, aggregate_documents, aggregate_documents_against,
    format_benchmark_document, format_concurrency_document, format_concurrency_summary,
    format_micro_summary, from_document, to_json,
};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// pacebench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "pacebench")]
#[command(author, version, about = "pacebench - workload benchmarks and concurrency strategy comparison")]
pub struct Cli {
    /// Subcommand; defaults to `list`
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: nearest pacebench.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Internal: Run as worker process (used by the multiprocess strategy)
    #[arg(long, hide = true)]
    pub pacebench_worker: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all registered workloads
    List,
    /// Measure micro-benchmark workloads and write a benchmark document
    Micro(MicroArgs),
    /// Compare execution strategies and write a concurrency document
    Concurrency(ConcurrencyArgs),
    /// Aggregate documents from several runs
    Summarize(SummarizeArgs),
    /// Write a default pacebench.toml into the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Where results go
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Directory receiving result documents
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Terminal output format: human or json
    #[arg(long)]
    pub format: Option<String>,
}

/// `micro` options
#[derive(Args, Debug, Clone, Default)]
pub struct MicroArgs {
    /// Only run cases whose name matches this regex
    pub filter: Option<String>,

    /// Workload calls per timed batch
    #[arg(long, short = 'i')]
    pub iterations: Option<u32>,

    /// Timed batches per case
    #[arg(long, short = 'r')]
    pub repeat: Option<u32>,

    /// Output options
    #[command(flatten)]
    pub output: OutputArgs,
}

/// `concurrency` options
#[derive(Args, Debug, Clone, Default)]
pub struct ConcurrencyArgs {
    /// Tasks per strategy
    #[arg(long, short = 't')]
    pub tasks: Option<usize>,

    /// Workers per strategy
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Per-task limit for worker processes (e.g. "30s", "500ms")
    #[arg(long)]
    pub worker_timeout: Option<String>,

    /// Serialize threaded task bodies behind one lock
    #[arg(long)]
    pub global_lock: bool,

    /// Report a strategy as unsupported without running it (repeatable)
    #[arg(long = "disable", value_name = "STRATEGY")]
    pub disable: Vec<StrategyKind>,

    /// Prime-count limit of the CPU-bound task
    #[arg(long)]
    pub cpu_param: Option<u64>,

    /// Sleep of the IO-bound task in milliseconds
    #[arg(long)]
    pub io_param_ms: Option<u64>,

    /// Worker binary for the multiprocess strategy (default: this executable)
    #[arg(long)]
    pub worker_binary: Option<PathBuf>,

    /// Output options
    #[command(flatten)]
    pub output: OutputArgs,
}

/// Document family to summarize
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuiteArg {
    /// Benchmark documents
    #[default]
    Micro,
    /// Concurrency documents
    Concurrency,
}

/// `summarize` options
#[derive(Args, Debug, Clone, Default)]
pub struct SummarizeArgs {
    /// Directory holding result documents (default: the output directory)
    pub dir: Option<PathBuf>,

    /// Which documents to aggregate
    #[arg(long, value_enum, default_value_t = SuiteArg::Micro)]
    pub suite: SuiteArg,

    /// Implementation whose means the others are compared to
    #[arg(long, requires = "baseline_version")]
    pub baseline_implementation: Option<String>,

    /// Version of the baseline implementation
    #[arg(long, requires = "baseline_implementation")]
    pub baseline_version: Option<String>,

    /// Pick the baseline run with the interpreter lock disabled
    #[arg(long)]
    pub baseline_nogil: bool,

    /// Summary file (default: <dir>/summary-<suite>.json)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Terminal output format: human or json
    #[arg(long)]
    pub format: Option<String>,
}

/// Run the pacebench CLI with the process arguments.
///
/// # Returns
/// Returns `Ok(())` on success, or an error if something goes wrong.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the pacebench CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    // Worker mode first: its stdout may be the IPC channel
    if cli.pacebench_worker {
        return run_worker_mode();
    }

    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => PacebenchConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => PacebenchConfig::discover().unwrap_or_default(),
    };

    match cli.command {
        None | Some(Commands::List) => list_workloads(),
        Some(Commands::Micro(ref args)) => run_micro(args, &config).map(|_| ()),
        Some(Commands::Concurrency(ref args)) => run_concurrency_command(args, &config).map(|_| ()),
        Some(Commands::Summarize(ref args)) => run_summarize(args, &config).map(|_| ()),
        Some(Commands::Init { force }) => init_config(force),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        "pacebench=debug"
    } else {
        "pacebench=info"
    };
    // A second initialization in the same process keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run as a worker process (IPC mode)
fn run_worker_mode() -> anyhow::Result<()> {
    let mut worker = WorkerMain::new();
    worker
        .run()
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}

fn list_workloads() -> anyhow::Result<()> {
    let catalog = Catalog::discover();
    println!("pacebench workloads:");

    for suite in [Suite::Micro, Suite::Concurrency, Suite::Diagnostic] {
        let cases = catalog.select(suite, None);
        if cases.is_empty() {
            continue;
        }
        println!("├── {suite:?}");
        for case in cases {
            println!(
                "│   ├── {} (param {}) {}",
                case.name, case.default_param, case.description
            );
        }
    }

    println!("{} workloads found.", catalog.len());
    Ok(())
}

fn output_format(arg: Option<&str>, config: &PacebenchConfig) -> OutputFormat {
    let raw = arg.unwrap_or(&config.output.format);
    raw.parse().unwrap_or_else(|e| {
        tracing::warn!("{e}; falling back to human output");
        OutputFormat::Human
    })
}

fn output_dir(arg: Option<&Path>, config: &PacebenchConfig) -> PathBuf {
    arg.map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.output.directory))
}

/// Validate `doc` and write it to `<dir>/<key>.json`
pub fn write_document<D: Document>(dir: &Path, doc: &D) -> anyhow::Result<PathBuf> {
    let json = to_json(doc)?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(doc.key().file_name());
    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "document written");
    Ok(path)
}

/// Measure micro workloads and persist the document. Returns its path, or
/// `None` when no workload matched.
pub fn run_micro(args: &MicroArgs, config: &PacebenchConfig) -> anyhow::Result<Option<PathBuf>> {
    let iterations = args.iterations.unwrap_or(config.micro.iterations);
    let repeat = args.repeat.unwrap_or(config.micro.repeat);
    let filter = args
        .filter
        .as_deref()
        .or(config.micro.filter.as_deref())
        .map(Regex::new)
        .transpose()
        .context("invalid workload filter")?;
    let format = output_format(args.output.format.as_deref(), config);

    let catalog = Catalog::discover();
    if select_micro_cases(&catalog, filter.as_ref()).is_empty() {
        println!("No workloads found.");
        return Ok(None);
    }

    let ctx = config.runtime.resolve(false)?;
    println!(
        "Running micro workloads on {} ({} iterations x {} repeats)...\n",
        ctx.identity(),
        iterations,
        repeat
    );
    let doc: BenchmarkDocument =
        measure_catalog_with_progress(&catalog, &ctx, iterations, repeat, filter.as_ref())?;

    let path = write_document(&output_dir(args.output.output_dir.as_deref(), config), &doc)?;
    match format {
        OutputFormat::Json => println!("{}", to_json(&doc)?),
        OutputFormat::Human => {
            print!("{}", format_benchmark_document(&doc));
            println!("\nResults written to: {}", path.display());
        }
    }
    Ok(Some(path))
}

/// Strategy options from flags layered over `pacebench.toml`
pub fn strategy_options(
    args: &ConcurrencyArgs,
    config: &PacebenchConfig,
) -> anyhow::Result<StrategyOptions> {
    let worker_timeout = match &args.worker_timeout {
        Some(raw) => Some(Duration::from_nanos(PacebenchConfig::parse_duration(raw)?)),
        None => config.concurrency.worker_timeout()?,
    };

    let mut disabled = config.concurrency.disabled_strategies.clone();
    for kind in &args.disable {
        if !disabled.contains(kind) {
            disabled.push(*kind);
        }
    }

    Ok(StrategyOptions {
        global_lock: args.global_lock || config.concurrency.global_lock,
        worker_binary: args
            .worker_binary
            .clone()
            .or_else(|| config.concurrency.worker_binary.as_ref().map(PathBuf::from)),
        worker_timeout,
        disabled,
    })
}

/// Runtime context and strategy options of a concurrency run.
///
/// The recorded lock mode and the threaded strategy's lock follow one
/// setting: a requested global lock records `serialized`, and a runtime
/// resolved as serialized engages the lock.
pub fn concurrency_setup(
    args: &ConcurrencyArgs,
    config: &PacebenchConfig,
) -> anyhow::Result<(RuntimeContext, StrategyOptions)> {
    let mut options = strategy_options(args, config)?;
    let ctx = config.runtime.resolve(options.global_lock)?;
    options.global_lock = ctx.lock_mode() == LockMode::Serialized;
    Ok((ctx, options))
}

/// Compare strategies on both workload kinds and persist the document
pub fn run_concurrency_command(
    args: &ConcurrencyArgs,
    config: &PacebenchConfig,
) -> anyhow::Result<PathBuf> {
    let tasks = args.tasks.unwrap_or(config.concurrency.tasks);
    let workers = args.workers.unwrap_or(config.concurrency.workers);
    let (ctx, options) = concurrency_setup(args, config)?;
    let format = output_format(args.output.format.as_deref(), config);

    let catalog = Catalog::discover();
    let workloads = standard_workloads(
        &catalog,
        args.cpu_param.or(config.concurrency.cpu_param),
        args.io_param_ms.or(config.concurrency.io_param_ms),
    )?;

    println!(
        "Comparing strategies on {} ({} tasks, {} workers)...\n",
        ctx.identity(),
        tasks,
        workers
    );
    let comparator = Comparator::standard(&options);
    let doc: ConcurrencyDocument = run_concurrency(&ctx, &comparator, &workloads, tasks, workers)?;

    let path = write_document(&output_dir(args.output.output_dir.as_deref(), config), &doc)?;
    match format {
        OutputFormat::Json => println!("{}", to_json(&doc)?),
        OutputFormat::Human => {
            print!("{}", format_concurrency_document(&doc));
            println!("\nResults written to: {}", path.display());
        }
    }
    Ok(path)
}

/// Documents of `kind` found directly in `dir`, sorted by file name.
/// Unreadable or malformed files are skipped with a warning.
pub fn load_documents<D: Document>(dir: &Path, kind: DocumentKind) -> anyhow::Result<Vec<D>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .and_then(DocumentKey::kind_of_file)
                == Some(kind)
        })
        .collect();
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        let parsed = std::fs::read(&path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| from_document::<D>(&bytes).map_err(anyhow::Error::from));
        match parsed {
            Ok(doc) => docs.push(doc),
            Err(e) => tracing::warn!(path = %path.display(), "skipping document: {e}"),
        }
    }
    Ok(docs)
}

/// Identity among `identities` matching the requested baseline. With
/// `nogil` unset, a run whose lock was not disabled is preferred.
pub fn pick_baseline<'a>(
    identities: impl IntoIterator<Item = &'a RuntimeIdentity>,
    implementation: &str,
    version: &str,
    nogil: bool,
) -> Option<RuntimeIdentity> {
    let candidates: Vec<&RuntimeIdentity> = identities
        .into_iter()
        .filter(|id| id.implementation == implementation && id.version == version)
        .collect();
    candidates
        .iter()
        .copied()
        .find(|id| (id.gil_disabled == Some(true)) == nogil)
        .or_else(|| candidates.first().copied())
        .cloned()
}

/// Aggregate persisted documents and write the summary. Returns its path.
pub fn run_summarize(args: &SummarizeArgs, config: &PacebenchConfig) -> anyhow::Result<PathBuf> {
    let dir = output_dir(args.dir.as_deref(), config);
    let format = output_format(args.format.as_deref(), config);

    let (summary, text, suite_name) = match args.suite {
        SuiteArg::Micro => {
            let docs: Vec<BenchmarkDocument> = load_documents(&dir, DocumentKind::Benchmarks)?;
            let baseline = match (&args.baseline_implementation, &args.baseline_version) {
                (Some(implementation), Some(version)) => {
                    let found = pick_baseline(
                        docs.iter().map(|d| &d.runtime),
                        implementation,
                        version,
                        args.baseline_nogil,
                    );
                    if found.is_none() {
                        tracing::warn!(%implementation, %version, "no document matches the baseline");
                    }
                    found
                }
                _ => None,
            };
            let entries = match &baseline {
                Some(baseline) => aggregate_documents_against(&docs, baseline)?,
                None => aggregate_documents(&docs)?,
            };
            let text = format_micro_summary(&entries);
            (Summary::micro(entries), text, "micro")
        }
        SuiteArg::Concurrency => {
            let docs: Vec<ConcurrencyDocument> =
                load_documents(&dir, DocumentKind::Concurrency)?;
            let entries = aggregate_concurrency_documents(&docs)?;
            let text = format_concurrency_summary(&entries);
            (Summary::concurrency(entries), text, "concurrency")
        }
    };

    let json = summary.to_json()?;
    let path = args
        .output
        .clone()
        .unwrap_or_else(|| dir.join(format!("summary-{suite_name}.json")));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &json).with_context(|| format!("failed to write {}", path.display()))?;

    match format {
        OutputFormat::Json => println!("{json}"),
        OutputFormat::Human => {
            print!("{text}");
            println!("Summary written to: {}", path.display());
        }
    }
    Ok(path)
}

fn init_config(force: bool) -> anyhow::Result<()> {
    let path = PathBuf::from(CONFIG_FILE);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(&path, PacebenchConfig::default_toml())?;
    println!("Wrote {}", path.display());
    Ok(())
}
