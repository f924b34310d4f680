//! CLI binary for docmill.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, wires up progress display and ctrl-c handling, and
//! prints results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use docmill::store::local::LocalDirStore;
use docmill::{
    CheckpointStore, ContentKind, MirrorTransform, Pipeline, PipelineConfig, PipelineProgress,
    ProgressHandle, RunRequest, SharedBackendFactory,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a live bar plus per-item log lines. Items resolve
/// out of order under concurrency, so every method may be called from any
/// worker's completion.
struct CliProgress {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start
        let spinner = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner);
        bar.set_prefix("Enumerating");
        bar.set_message("listing corpus…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgress for CliProgress {
    fn on_run_start(&self, total_items: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} items  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total_items as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Processing");
        self.bar.reset_eta();
    }

    fn on_item_start(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn on_item_skipped(&self, name: &str) {
        self.bar
            .println(format!("  {} {}  {}", dim("⏭"), name, dim("already processed")));
        self.bar.inc(1);
    }

    fn on_item_complete(&self, name: &str, artifacts: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            name,
            dim(&format!(
                "{artifacts} artifact{}",
                if artifacts == 1 { "" } else { "s" }
            )),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, name: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        // Truncate very long error messages to keep output tidy.
        let msg = if error.len() > 100 {
            format!("{}\u{2026}", &error[..99])
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), name, red(&msg)));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, succeeded: usize, skipped: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} processed, {} skipped",
                green("✔"),
                bold(&succeeded.to_string()),
                skipped
            );
        } else {
            eprintln!(
                "{} {} processed, {} skipped, {} failed",
                cyan("⚠"),
                bold(&succeeded.to_string()),
                skipped,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process every PDF under ./corpus into ./corpus/converted
  docmill run --root ./corpus --dest converted

  # Re-run later: checkpointed items are skipped, failures retried
  docmill run --root ./corpus --dest converted

  # See what remains without touching anything
  docmill plan --root ./corpus

  # Images instead of PDFs, more workers, tighter flushes
  docmill run --root ./scans --kind image --workers 8 --flush-every 10

  # Machine-readable run report
  docmill run --root ./corpus --json > report.json

  # Checkpoint bookkeeping
  docmill status
  docmill reset --yes

STATE FILES:
  docmill_state/checkpoint.json   durable skip-set (ids of completed items)
  docmill_state/results.json      accumulated result records

  Both are replaced atomically on every flush; deleting the checkpoint
  makes the next run re-process the whole corpus (the destination probe
  still skips items whose output folders are already populated).

ENVIRONMENT VARIABLES:
  DOCMILL_ROOT, DOCMILL_KIND, DOCMILL_DEST, DOCMILL_WORKERS,
  DOCMILL_MAX_RETRIES, DOCMILL_RETRY_DELAY_MS, DOCMILL_FLUSH_EVERY,
  DOCMILL_CHECKPOINT, DOCMILL_RESULTS — each mirrors the flag of the
  same name.
"#;

/// Checkpointed, idempotent batch conversion over a document corpus.
#[derive(Parser, Debug)]
#[command(
    name = "docmill",
    version,
    about = "Checkpointed, idempotent batch conversion over a document corpus",
    long_about = "Walks a corpus of PDFs or scans organised as <root>/<period>/<batch>/, \
converts each pending item with bounded parallelism and retries, and checkpoints progress \
so a crash or re-run never redoes completed work.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCMILL_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCMILL_QUIET", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process pending items in the corpus.
    Run(RunArgs),
    /// Show what a run would do, without processing anything.
    Plan(PlanArgs),
    /// Show checkpoint and result-accumulator statistics.
    Status(StateArgs),
    /// Clear the checkpoint so the next run re-processes everything.
    Reset(ResetArgs),
}

#[derive(Args, Debug)]
struct CorpusArgs {
    /// Corpus root directory: <root>/<period>/<batch>/<documents>.
    #[arg(long, env = "DOCMILL_ROOT")]
    root: PathBuf,

    /// Content kind to enumerate: pdf or image.
    #[arg(long, env = "DOCMILL_KIND", value_enum, default_value = "pdf")]
    kind: KindArg,
}

#[derive(Args, Debug)]
struct StateArgs {
    /// Durable skip-set location.
    #[arg(
        long,
        env = "DOCMILL_CHECKPOINT",
        default_value = "docmill_state/checkpoint.json"
    )]
    checkpoint: PathBuf,

    /// Accumulated result records location.
    #[arg(
        long,
        env = "DOCMILL_RESULTS",
        default_value = "docmill_state/results.json"
    )]
    results: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    #[command(flatten)]
    state: StateArgs,

    /// Destination folder name, created under the corpus root.
    #[arg(long, env = "DOCMILL_DEST", default_value = "converted")]
    dest: String,

    /// Items processed concurrently.
    #[arg(long, env = "DOCMILL_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Retries per operation on transient failures.
    #[arg(long, env = "DOCMILL_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Initial retry delay in milliseconds (doubles per attempt).
    #[arg(long, env = "DOCMILL_RETRY_DELAY_MS", default_value_t = 500)]
    retry_delay_ms: u64,

    /// Flush the checkpoint every N completed items.
    #[arg(long, env = "DOCMILL_FLUSH_EVERY", default_value_t = 50)]
    flush_every: usize,

    /// Disable the destination-folder probe (the checkpoint set still
    /// applies).
    #[arg(long, env = "DOCMILL_NO_SKIP_EXISTING")]
    no_skip_existing: bool,

    /// Write the run report as JSON to this file.
    #[arg(long, env = "DOCMILL_REPORT")]
    report: Option<PathBuf>,

    /// Print the run report as JSON to stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "DOCMILL_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    #[command(flatten)]
    state: StateArgs,

    /// Print every pending item instead of the first 20.
    #[arg(long)]
    all: bool,
}

#[derive(Args, Debug)]
struct ResetArgs {
    #[command(flatten)]
    state: StateArgs,

    /// Confirm the reset (required).
    #[arg(long)]
    yes: bool,

    /// Also delete the accumulated result records.
    #[arg(long)]
    include_results: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Pdf,
    Image,
}

impl From<KindArg> for ContentKind {
    fn from(v: KindArg) -> Self {
        match v {
            KindArg::Pdf => ContentKind::Pdf,
            KindArg::Image => ContentKind::Image,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar provides the per-item feedback that matters, so
    // library INFO logs are suppressed while it is active; --verbose always
    // wins.
    let show_progress = matches!(&cli.command, Command::Run(a) if !a.no_progress && !a.json)
        && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Run(args) => cmd_run(args, cli.quiet, show_progress).await,
        Command::Plan(args) => cmd_plan(args).await,
        Command::Status(args) => cmd_status(args).await,
        Command::Reset(args) => cmd_reset(args),
    }
}

fn build_config(args: &RunArgs) -> Result<PipelineConfig> {
    PipelineConfig::builder()
        .max_workers(args.workers)
        .max_retries(args.max_retries)
        .retry_base_delay_ms(args.retry_delay_ms)
        .flush_interval(args.flush_every)
        .skip_existing(!args.no_skip_existing)
        .checkpoint_path(&args.state.checkpoint)
        .results_path(&args.state.results)
        .build()
        .context("invalid configuration")
}

async fn open_pipeline(
    corpus: &CorpusArgs,
    config: PipelineConfig,
) -> Result<(Pipeline, RunRequest)> {
    if !corpus.root.is_dir() {
        bail!(
            "corpus root '{}' is not a directory",
            corpus.root.display()
        );
    }
    let checkpoint = CheckpointStore::open(&config.checkpoint_path, &config.results_path)
        .await
        .context("failed to open the checkpoint store")?;
    let backend = Arc::new(LocalDirStore::new(&corpus.root));
    let factory = Arc::new(SharedBackendFactory::new(backend, &config));
    let pipeline = Pipeline::new(
        config,
        factory,
        Arc::new(MirrorTransform),
        Arc::new(checkpoint),
    );
    let request = RunRequest {
        root_id: String::new(), // the local store addresses its root as ""
        kind: corpus.kind.into(),
        dest_folder: None,
    };
    Ok((pipeline, request))
}

async fn cmd_run(args: RunArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let config = build_config(&args)?;
    let (mut pipeline, mut request) = open_pipeline(&args.corpus, config).await?;
    request.dest_folder = Some(args.dest.clone());

    if show_progress {
        let progress: ProgressHandle = CliProgress::new();
        pipeline = pipeline.with_progress(progress);
    }

    // Ctrl-c stops dispatching new items; resolved work is flushed before
    // the report is assembled.
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let report = pipeline
        .run_until(&request, shutdown)
        .await
        .context("run failed")?;

    if let Some(ref path) = args.report {
        let json = serde_json::to_vec_pretty(&report).context("failed to serialise report")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialise report")?
        );
        return Ok(());
    }

    if !quiet {
        let s = &report.stats;
        eprintln!(
            "{}  {} enumerated  {} succeeded  {} skipped  {} failed  {} artifacts  {}",
            if s.failed == 0 { green("✔") } else { cyan("⚠") },
            s.enumerated,
            bold(&s.succeeded.to_string()),
            s.skipped,
            if s.failed == 0 {
                s.failed.to_string()
            } else {
                red(&s.failed.to_string())
            },
            s.artifacts_produced,
            dim(&format!("{:.1}s", s.duration_seconds)),
        );
        for failure in &report.failures {
            eprintln!("   {} {} — {}", red("✗"), failure.name, failure.reason);
        }
        if report.interrupted {
            eprintln!("{}", cyan("⚠ interrupted — completed work was checkpointed"));
        }
    }
    Ok(())
}

async fn cmd_plan(args: PlanArgs) -> Result<()> {
    let config = PipelineConfig::builder()
        .checkpoint_path(&args.state.checkpoint)
        .results_path(&args.state.results)
        .build()
        .context("invalid configuration")?;
    let (pipeline, request) = open_pipeline(&args.corpus, config).await?;
    let plan = pipeline.plan(&request).await.context("plan failed")?;

    println!(
        "{} items enumerated, {} already processed, {} pending",
        plan.total,
        plan.already_processed,
        bold(&plan.pending.len().to_string()),
    );
    let shown = if args.all {
        plan.pending.len()
    } else {
        plan.pending.len().min(20)
    };
    for item in &plan.pending[..shown] {
        println!("  {}  {}", dim(&item.parent_path.join("/")), item.name);
    }
    if shown < plan.pending.len() {
        println!(
            "  {} and {} more (use --all to list everything)",
            dim("…"),
            plan.pending.len() - shown
        );
    }
    Ok(())
}

async fn cmd_status(args: StateArgs) -> Result<()> {
    let checkpoint = CheckpointStore::open(&args.checkpoint, &args.results)
        .await
        .context("failed to open the checkpoint store")?;
    println!("checkpoint: {}", args.checkpoint.display());
    println!("  processed items: {}", checkpoint.processed_count());
    if let Some(updated) = read_last_updated(&args.checkpoint) {
        println!("  last updated:    {updated}");
    }
    println!("results:    {}", args.results.display());
    println!("  records:         {}", checkpoint.record_count());
    Ok(())
}

/// Pull `last_updated` out of the checkpoint file without assuming the
/// rest of it parses.
fn read_last_updated(path: &PathBuf) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("last_updated")?.as_str().map(str::to_string)
}

fn cmd_reset(args: ResetArgs) -> Result<()> {
    if !args.yes {
        bail!("refusing to reset without --yes");
    }
    for (path, wanted) in [
        (&args.state.checkpoint, true),
        (&args.state.results, args.include_results),
    ] {
        if !wanted {
            continue;
        }
        match std::fs::remove_file(path) {
            Ok(()) => println!("removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                println!("{} was already absent", path.display())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", path.display()))
            }
        }
    }
    Ok(())
}
