//! Backfill CLI: plan, run, and history commands.
//!
//! Commands:
//! - `plan`: print the periods each configured iterator would produce
//! - `run`: render and execute every query for every period
//! - `history`: list journaled executions for a config

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use backfill_core::{parse_date, RoundCoordinator};
use backfill_runner::{
    BackfillConfig, BackfillRunner, DryRunExecutor, FileExecutor, QueryExecutor, ResumePlan,
    RunHistory, SCRIPT_VERSION_ENV,
};

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "backfill=info,backfill_core=info,backfill_runner=info";

#[derive(Parser)]
#[command(name = "backfill", about = "Run date-parameterized queries over periods")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the periods each configured iterator would produce.
    Plan {
        /// Path to the backfill TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Start date (YYYY-MM-DD). Overrides the config; defaults to today.
        #[arg(long)]
        start: Option<String>,
    },
    /// Execute every query for every period.
    Run {
        /// Path to the backfill TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Start date (YYYY-MM-DD). Overrides the config; defaults to today.
        #[arg(long)]
        start: Option<String>,

        /// Where rendered statements go.
        #[arg(long, value_enum, default_value_t = ExecutorKind::DryRun)]
        executor: ExecutorKind,

        /// Output directory for `--executor files`.
        #[arg(long, default_value = "backfill-out")]
        output_dir: PathBuf,

        /// Continue an interrupted run from the configured history file.
        #[arg(long, default_value_t = false)]
        resume: bool,
    },
    /// List journaled executions for a config.
    History {
        /// Path to the backfill TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Show entries from every run, not just this config's.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExecutorKind {
    /// Log statements without running them.
    DryRun,
    /// Write one .sql file per statement.
    Files,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { config, start } => run_plan(&config, start.as_deref()),
        Commands::Run {
            config,
            start,
            executor,
            output_dir,
            resume,
        } => run_backfill(&config, start.as_deref(), executor, output_dir, resume),
        Commands::History { config, all } => run_history(&config, all),
    }
}

/// Load the config, applying a `--start` override to `[backfill]`.
fn load_config(path: &Path, start: Option<&str>) -> Result<BackfillConfig> {
    let mut config = BackfillConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(start) = start {
        let date = parse_date(start).with_context(|| format!("invalid --start '{start}'"))?;
        config.backfill.start_date = Some(date);
    }
    Ok(config)
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn run_plan(path: &Path, start: Option<&str>) -> Result<()> {
    let mut config = load_config(path, start)?;
    config.backfill.log_periods = false;
    let fiscal = config.load_fiscal()?;
    let iterators = config.build_iterators(today(), fiscal)?;
    if iterators.is_empty() {
        println!("No iterators configured: `run` executes each query once.");
        return Ok(());
    }

    println!("Run id: {}", config.run_id()?);
    for (index, mut iter) in iterators.into_iter().enumerate() {
        println!(
            "\n[{index}] {} {} x{} from {}",
            iter.kind(),
            iter.direction(),
            iter.iteration_count(),
            config.start_date(index, today())
        );
        while let Some(bundle) = iter.advance()? {
            println!(
                "  {:>3}  {}  {} .. {}  (expanded {} .. {})",
                iter.completed_count(),
                bundle.year_month,
                bundle.start_date,
                bundle.end_date,
                bundle.start_date_expanded,
                bundle.end_date_expanded
            );
        }
    }
    Ok(())
}

fn run_backfill(
    path: &Path,
    start: Option<&str>,
    executor: ExecutorKind,
    output_dir: PathBuf,
    resume: bool,
) -> Result<()> {
    let mut config = load_config(path, start)?;
    let run_id = config.run_id()?;
    let script_version = config.script_version(std::env::var(SCRIPT_VERSION_ENV).ok());
    let queries = config.load_queries(script_version.as_deref())?;
    let history = config.history_path().map(RunHistory::new);

    if resume {
        let Some(history) = &history else {
            bail!("--resume needs `runner.history` in the config");
        };
        let last_table = match queries.last() {
            Some(q) => q.table_name().to_string(),
            None => bail!("config defines no queries"),
        };
        apply_resume(&mut config, history, &run_id, &last_table)?;
    }

    let executor: Box<dyn QueryExecutor> = match executor {
        ExecutorKind::DryRun => Box::new(DryRunExecutor::new()),
        ExecutorKind::Files => Box::new(FileExecutor::new(output_dir)),
    };
    let mut runner = BackfillRunner::new(queries, executor);
    if let Some(history) = history {
        runner = runner.with_history(history, run_id.clone());
    }

    let mut params = config.params.clone();
    tracing::info!(run_id = %run_id, script_version = ?script_version, "starting backfill");

    if config.iterators.is_empty() {
        runner.run_once(&params)?;
        return Ok(());
    }

    let fiscal = config.load_fiscal()?;
    let iterators = config.build_iterators(today(), fiscal)?;
    let mut coordinator = RoundCoordinator::new(iterators)?;
    let summary = runner.run(&mut params, &mut coordinator)?;

    println!(
        "Backfill complete: {} round(s), {} statement(s), periods per iterator {:?}",
        summary.rounds,
        runner.executed(),
        summary.advances
    );
    Ok(())
}

/// Rewrite each iterator's start and count from the journal. The run id is
/// computed before this so resumed entries keep the same id.
fn apply_resume(
    config: &mut BackfillConfig,
    history: &RunHistory,
    run_id: &str,
    last_table: &str,
) -> Result<()> {
    let entries = history.read_run(run_id)?;
    let fallback_start = today();
    for index in 0..config.iterators.len() {
        let direction = config.iterators[index]
            .direction
            .unwrap_or(config.backfill.direction);
        let start = config.start_date(index, fallback_start);
        let iter = &mut config.iterators[index];
        let Some(plan) = ResumePlan::from_history(
            &entries,
            run_id,
            index,
            iter.kind,
            direction,
            last_table,
            iter.iterations,
        ) else {
            tracing::info!(index, "no completed periods in history, starting from {start}");
            continue;
        };
        tracing::info!(
            index,
            completed = plan.completed,
            remaining = plan.remaining,
            "resuming from {}",
            plan.next_start
        );
        iter.start_date = Some(plan.next_start);
        iter.iterations = plan.remaining;
        iter.complete_periods = Some(false);
    }
    Ok(())
}

fn run_history(path: &Path, all: bool) -> Result<()> {
    let config = load_config(path, None)?;
    let Some(history_path) = config.history_path() else {
        bail!("config has no `runner.history` file");
    };
    let history = RunHistory::new(history_path);
    let run_id = config.run_id()?;
    let entries = if all {
        history.read_all()?
    } else {
        history.read_run(&run_id)?
    };

    if entries.is_empty() {
        println!("No history entries in {}", history.path().display());
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:<8} {:<10} {:<10} {:>10}",
        "table", "period", "month", "start", "end", "elapsed"
    );
    for e in &entries {
        println!(
            "{:<20} {:<12} {:<8} {:<10} {:<10} {:>8}ms",
            e.table, e.period_tag, e.year_month, e.start_date, e.end_date, e.elapsed_ms
        );
    }
    println!("\n{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}
