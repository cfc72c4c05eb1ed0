//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use recrawl_fetch::FetchStrategy;
use recrawl_pipeline::{Harvester, LinkHarvester, PageMetaHarvester, Pipeline, Reconciler};
use recrawl_shared::{PipelineConfig, Status, TrackedRecord, init_config, load_config};
use recrawl_store::{PageCache, RecordStore};
use serde_json::json;
use tracing::info;
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// recrawl: keep tracked web pages fresh on a schedule.
#[derive(Parser)]
#[command(
    name = "recrawl",
    version,
    about = "Track web pages, refresh the stale ones, and reconcile what they yield.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process every record that is due for a refresh.
    Run(RunArgs),

    /// Add URLs to the record store.
    Seed {
        /// Record database path.
        #[arg(long, default_value = "var/records.db")]
        db: PathBuf,

        /// URLs to track, one record each.
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// List tracked records and their statuses.
    List {
        /// Record database path.
        #[arg(long, default_value = "var/records.db")]
        db: PathBuf,
    },

    /// Show recent batch runs.
    History {
        /// Record database path.
        #[arg(long, default_value = "var/records.db")]
        db: PathBuf,

        /// Number of runs to show.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for `recrawl run`.
#[derive(clap::Args)]
pub(crate) struct RunArgs {
    /// Record database path.
    #[arg(long, default_value = "var/records.db")]
    pub db: PathBuf,

    /// Page cache database path.
    #[arg(long, default_value = "var/cache.db")]
    pub cache: PathBuf,

    /// Child record database path (links mode only).
    #[arg(long, default_value = "var/children.db")]
    pub children: PathBuf,

    /// What to harvest from each page.
    #[arg(long, value_enum, default_value = "page-meta")]
    pub mode: Mode,

    /// Render pages in headless Chrome instead of plain HTTP.
    #[arg(long)]
    pub use_browser: bool,

    /// Concurrent workers (HTTP batches only).
    #[arg(long)]
    pub workers: Option<u32>,

    /// Process at most this many due records.
    #[arg(long)]
    pub limit: Option<u32>,

    /// Override the refresh interval in hours.
    #[arg(long)]
    pub refresh_hours: Option<u64>,

    /// Fetch live even when a cached copy is still fresh.
    #[arg(long)]
    pub ignore_cache: bool,

    /// Do not write fetched pages back to the cache.
    #[arg(long)]
    pub no_update_cache: bool,

    /// Stop the batch at the first item-level failure.
    #[arg(long)]
    pub fail_fast: bool,
}

/// What `recrawl run` harvests from each fetched page.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum Mode {
    /// Merge page metadata (title, description) into the record itself.
    PageMeta,
    /// Fan out one child record per outgoing link.
    Links,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "recrawl=info",
        1 => "recrawl=debug",
        _ => "recrawl=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Seed { db, urls } => cmd_seed(&db, &urls).await,
        Command::List { db } => cmd_list(&db).await,
        Command::History { db, limit } => cmd_history(&db, limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config()?;
    let mut pipeline_config = PipelineConfig::from(&config);

    // CLI flags win over the config file.
    if args.use_browser {
        pipeline_config.use_browser = true;
    }
    if let Some(workers) = args.workers {
        pipeline_config.worker_count = workers;
    }
    if let Some(hours) = args.refresh_hours {
        pipeline_config.refresh_interval = chrono::Duration::hours(hours as i64);
    }
    if args.ignore_cache {
        pipeline_config.ignore_cache = true;
    }
    if args.no_update_cache {
        pipeline_config.update_cache = false;
    }
    if args.fail_fast {
        pipeline_config.ignore_error = false;
    }

    let store = Arc::new(RecordStore::open(&args.db).await?);
    let cache = Arc::new(PageCache::open(&args.cache).await?);
    let strategy = FetchStrategy::new(cache.clone(), &config.http)?;

    let (harvester, reconciler): (Arc<dyn Harvester>, Reconciler) = match args.mode {
        Mode::PageMeta => (Arc::new(PageMetaHarvester), Reconciler::Single),
        Mode::Links => (
            Arc::new(LinkHarvester),
            Reconciler::FanOut {
                child_store: Arc::new(RecordStore::open(&args.children).await?),
                counter_field: "link_count".to_string(),
            },
        ),
    };

    let pipeline = Pipeline::new(
        pipeline_config,
        config.browser.clone(),
        store,
        cache,
        strategy,
        harvester,
        reconciler,
    );

    let tasks = pipeline.due_tasks(args.limit).await?;
    if tasks.is_empty() {
        println!("No records are due for a refresh.");
        return Ok(());
    }

    info!(due = tasks.len(), mode = ?args.mode, "starting batch");

    let started = Instant::now();
    let progress = CliProgress::new();
    progress.update(format!("Harvesting {} records...", tasks.len()));

    let outcome = pipeline.run_batch(tasks).await;
    progress.finish();
    let report = outcome?;

    println!();
    println!("  Batch complete!");
    println!("  Run:       {}", report.run_id);
    println!("  Processed: {}", report.items.len());
    for (status, count) in report.status_counts() {
        println!("    {status:<15} {count}");
    }
    if report.error_count() > 0 {
        println!("  Errors:    {}", report.error_count());
    }
    if report.skipped > 0 {
        println!("  Skipped:   {}", report.skipped);
    }
    println!("  Time:      {:.1}s", started.elapsed().as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_seed(db: &Path, urls: &[String]) -> Result<()> {
    let store = RecordStore::open(db).await?;

    let mut records = Vec::with_capacity(urls.len());
    for raw in urls {
        let parsed = Url::parse(raw).map_err(|e| eyre!("invalid URL '{raw}': {e}"))?;
        records.push(TrackedRecord::new(parsed.as_str()).with_field("url", json!(parsed.as_str())));
    }

    // Insert-or-ignore: re-seeding never resets an existing record.
    let inserted = store.insert_records(&records).await?;
    let existing = records.len() as u64 - inserted;

    info!(inserted, existing, "seeded records");
    println!("Seeded {inserted} new records ({existing} already tracked).");

    Ok(())
}

async fn cmd_list(db: &Path) -> Result<()> {
    let store = RecordStore::open(db).await?;
    let records = store.list_records().await?;

    if records.is_empty() {
        println!("No tracked records.");
        return Ok(());
    }

    println!("{:<16} {:<17} ID", "STATUS", "EDITED");
    for record in &records {
        let status = record.status_kind().map(|s| s.name()).unwrap_or("unknown");
        let edited = if record.edited_at.timestamp() == 0 {
            "never".to_string()
        } else {
            record.edited_at.format("%Y-%m-%d %H:%M").to_string()
        };
        println!("{status:<16} {edited:<17} {}", record.id);
    }

    println!();
    let counts = store.count_by_status().await?;
    let summary: Vec<String> = counts
        .iter()
        .map(|(code, count)| {
            let name = Status::from_code(*code).map(|s| s.name()).unwrap_or("unknown");
            format!("{count} {name}")
        })
        .collect();
    println!("{} records ({})", records.len(), summary.join(", "));

    Ok(())
}

async fn cmd_history(db: &Path, limit: u32) -> Result<()> {
    let store = RecordStore::open(db).await?;
    let runs = store.list_batch_runs(Some(limit)).await?;

    if runs.is_empty() {
        println!("No batch runs recorded.");
        return Ok(());
    }

    for run in &runs {
        let finished = match run.finished_at {
            Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "unfinished".to_string(),
        };
        println!(
            "{}  started {}  finished {}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            finished
        );
        if let Some(stats) = &run.stats_json {
            println!("    {stats}");
        }
    }

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress
// ---------------------------------------------------------------------------

/// Spinner shown while a batch runs.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn update(&self, msg: String) {
        self.spinner.set_message(msg);
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}
