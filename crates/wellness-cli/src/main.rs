use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use wellness_api::{load_report_config, PlanRequest, ReportConfig, WellnessApi};
use wellness_core::reference_catalog;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const LOG_FILTER_ENV: &str = "WELLNESS_LOG";

#[derive(Debug, Parser)]
#[command(name = "wk")]
#[command(about = "Wellness planner CLI")]
struct Cli {
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Order CSV records by a numeric column.
    Rank(RankArgs),
    /// Choose the best intervention subset for a budget.
    Plan(PlanArgs),
    /// Print the built-in intervention catalog.
    Catalog,
    /// Build the full wellness report for a CSV population.
    Report(ReportArgs),
}

#[derive(Debug, Args)]
struct RankArgs {
    #[arg(long)]
    records: PathBuf,
    /// Defaults to the configured risk field.
    #[arg(long)]
    field: Option<String>,
    #[arg(long, default_value_t = false)]
    ascending: bool,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct PlanArgs {
    #[arg(long)]
    catalog: Option<PathBuf>,
    #[arg(long, allow_hyphen_values = true)]
    budget: i64,
    #[arg(long)]
    max_states: Option<usize>,
}

#[derive(Debug, Args)]
struct ReportArgs {
    #[arg(long)]
    records: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, allow_hyphen_values = true)]
    budget: Option<i64>,
}

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);
    tracing::debug!(command = ?cli.command, "dispatching command");

    match cli.command {
        Command::Rank(args) => run_rank(args),
        Command::Plan(args) => run_plan(args),
        Command::Catalog => run_catalog(),
        Command::Report(args) => run_report(args),
    }
}

fn run_rank(args: RankArgs) -> Result<()> {
    let api = WellnessApi::default();
    let response = api.rank_file(&args.records, args.field, !args.ascending, args.limit)?;
    emit_json(serde_json::to_value(&response).context("failed to serialize ranking")?)
}

fn run_plan(args: PlanArgs) -> Result<()> {
    let catalog = args.catalog.as_deref().map(wellness_source::load_catalog).transpose()?;
    let api = WellnessApi::default();
    let plan = api.plan(PlanRequest {
        catalog,
        budget: Some(args.budget),
        max_states: args.max_states,
    })?;
    emit_json(serde_json::to_value(&plan).context("failed to serialize investment plan")?)
}

fn run_catalog() -> Result<()> {
    emit_json(serde_json::json!({ "items": reference_catalog() }))
}

fn run_report(args: ReportArgs) -> Result<()> {
    let mut config = match args.config.as_deref() {
        Some(path) => load_report_config(path)?,
        None => ReportConfig::default(),
    };
    if let Some(budget) = args.budget {
        config.budget = budget;
    }

    let report = WellnessApi::new(config).report_file(&args.records)?;
    emit_json(serde_json::to_value(&report).context("failed to serialize wellness report")?)
}
