//! Quantline CLI: run the market-data pipeline and inspect its output.
//!
//! Commands:
//! - `run`: fetch, transform, validate and save one symbol
//! - `plan`: print the execution order the scheduler would use
//! - `report`: print the persisted run report and latest metrics
//! - `config`: print the resolved configuration as TOML

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quantline_core::data::RawStore;
use quantline_runner::config::{PipelineConfig, SourceConfig};
use quantline_runner::scheduler::{RunObserver, StageError, TaskStatus};
use quantline_runner::storage::{
    parse_range, read_latest_metrics, read_run_report, read_validation_report,
};
use quantline_runner::PipelineRunner;

#[derive(Parser)]
#[command(
    name = "quantline",
    about = "Quantline: scheduled market-data pipeline"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when absent.
    #[arg(long, env = "QUANTLINE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once.
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Print the run report as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the task execution order without running anything.
    Plan {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the most recent persisted run report for a symbol.
    Report {
        /// Symbol to report on. Defaults to the configured symbol.
        #[arg(long)]
        symbol: Option<String>,

        /// Output directory of a specific run instead of the latest one.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Print the run report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the resolved configuration as TOML.
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Command-line overrides applied on top of the config file.
#[derive(Args)]
struct Overrides {
    /// Ticker symbol (e.g. SPY).
    #[arg(long)]
    symbol: Option<String>,

    /// Start date (YYYY-MM-DD).
    #[arg(long)]
    start: Option<String>,

    /// End date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end: Option<String>,

    /// Use deterministic synthetic data instead of Yahoo Finance.
    #[arg(long, default_value_t = false, conflicts_with = "csv")]
    synthetic: bool,

    /// Import bars from a CSV file instead of Yahoo Finance.
    #[arg(long)]
    csv: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(symbol) = self.symbol {
            config.data.symbol = symbol.to_uppercase();
        }
        if let Some(start) = self.start.as_deref() {
            config.data.start_date = parse_date(start)?;
        }
        if let Some(end) = self.end.as_deref() {
            config.data.end_date = Some(parse_date(end)?);
        }
        if self.synthetic {
            config.data.source = SourceConfig::Synthetic;
        } else if let Some(path) = self.csv {
            config.data.source = SourceConfig::Csv { path };
        }
        config.validate()?;
        Ok(())
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quantline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run { overrides, json } => {
            overrides.apply(&mut config)?;
            run_pipeline(config, json).await
        }
        Commands::Plan { overrides } => {
            overrides.apply(&mut config)?;
            print_plan(config)
        }
        Commands::Report { symbol, dir, json } => print_report(&config, symbol, dir, json),
        Commands::Config { overrides } => {
            overrides.apply(&mut config)?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Prints one line per task transition.
struct ConsoleProgress;

impl RunObserver for ConsoleProgress {
    fn task_started(&self, task: &str, attempt_budget: u32) {
        eprintln!("[{task}] started (up to {attempt_budget} attempts)");
    }

    fn attempt_failed(&self, task: &str, attempt: u32, error: &StageError) {
        eprintln!("[{task}] attempt {attempt} failed: {error}");
    }

    fn task_finished(&self, task: &str, status: TaskStatus, attempts: u32) {
        eprintln!("[{task}] {status} after {attempts} attempt(s)");
    }
}

async fn run_pipeline(config: PipelineConfig, json: bool) -> Result<()> {
    let runner = PipelineRunner::new(config)?.with_observer(Arc::new(ConsoleProgress));
    let outcome = runner.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    } else {
        print!("{}", outcome.report.summary());
        if let Some(path) = &outcome.run_report_path {
            println!("Run report: {}", path.display());
        }
        if let Some(storage) = outcome.storage() {
            println!("Analysis:   {}", storage.analysis.display());
        }
    }
    if let Some(err) = &outcome.report_error {
        eprintln!("Run report was not written: {err}");
    }

    if let Some((task, failure)) = outcome.first_failure() {
        eprintln!("Pipeline failed at '{task}': {failure}");
        std::process::exit(1);
    }
    if !outcome.success() {
        bail!("pipeline did not complete");
    }
    if outcome.report_error.is_some() {
        bail!("pipeline succeeded but its run report was not persisted");
    }
    Ok(())
}

fn print_plan(config: PipelineConfig) -> Result<()> {
    let runner = PipelineRunner::new(config)?;
    let graph = runner.build_graph()?;
    let (start, end) = runner.date_range();
    let settings = &runner.config().pipeline;

    println!(
        "Plan for {} ({start} to {end}), {} worker(s):",
        runner.config().data.symbol,
        settings.workers
    );
    for (i, name) in graph.topological_order().into_iter().enumerate() {
        let Some(task) = graph.task(name) else {
            continue;
        };
        let deps = if task.dependencies().is_empty() {
            "-".to_string()
        } else {
            task.dependencies().join(", ")
        };
        println!(
            "  {}. {:<10} priority={:<6} attempts={} timeout={}s after: {deps}",
            i + 1,
            name,
            task.priority().to_string(),
            task.retry_policy().max_attempts,
            task.timeout().as_secs(),
        );
    }
    Ok(())
}

fn print_report(
    config: &PipelineConfig,
    symbol: Option<String>,
    dir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let symbol = symbol
        .map(|s| s.to_uppercase())
        .unwrap_or_else(|| config.data.symbol.clone());
    let store = quantline_runner::ProcessedStore::new(&config.data.processed_dir);
    let dir = match dir.or_else(|| store.latest_run_dir(&symbol)) {
        Some(dir) => dir,
        None => bail!(
            "no runs found for {symbol} under {}",
            store.symbol_dir(&symbol).display()
        ),
    };

    let report = read_run_report(&dir)
        .with_context(|| format!("reading run report in {}", dir.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Output: {}", dir.display());
    print!("{}", report.summary());

    // Present only when save succeeded.
    if let Ok(latest) = read_latest_metrics(&dir) {
        println!();
        println!("--- Latest ({}) ---", latest.date);
        println!("Last Price:     {:.2}", latest.last_price);
        if let Some(r) = latest.daily_return {
            println!("Daily Return:   {:.2}%", r * 100.0);
        }
        if let Some(rsi) = latest.current_rsi {
            println!("RSI:            {rsi:.1}");
        }
        if let Some(regime) = latest.market_regime {
            println!("Regime:         {regime}");
        }
        if let Some(vol) = latest.volatility {
            println!("Volatility:     {:.4}", vol);
        }
    }
    if let Ok(validation) = read_validation_report(&dir) {
        for warning in &validation.warnings {
            println!("WARNING: {warning}");
        }
    }

    let range = dir
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(parse_range);
    if let Some((start, end)) = range {
        let raw = RawStore::new(&config.data.raw_dir);
        if let Some(meta) = raw.meta(&symbol, start, end) {
            println!();
            println!(
                "Raw: {} bars from {} (hash {}), fetched {}",
                meta.bar_count, meta.source, meta.data_hash, meta.cached_at
            );
        }
    }
    Ok(())
}
