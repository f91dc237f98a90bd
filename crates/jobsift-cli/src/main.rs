use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use jobsift_core::RunMode;
use jobsift_pipeline::{
    render_summary, Pipeline, PipelineConfig, PipelineError, ReportFormat, RunOptions,
};
use jobsift_store::PgJobStore;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jobsift")]
#[command(about = "JobSift contract listing pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute one full pipeline run.
    Run(RunArgs),
    /// Run the pipeline on the configured cron schedule until interrupted.
    Schedule,
}

#[derive(Debug, Args, Default)]
struct RunArgs {
    /// Compute every count and report without writing to the store.
    #[arg(long)]
    dry_run: bool,
    /// Start from an empty scrape instead of invoking the scraper.
    #[arg(long)]
    skip_scraping: bool,
    /// Skip the stale-record cleanup phase.
    #[arg(long)]
    skip_cleanup: bool,
    /// Cap the number of records imported this run.
    #[arg(long)]
    limit: Option<u64>,
    /// Run date stamped on the report artifacts (YYYY-MM-DD).
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Which report artifacts to write.
    #[arg(long, value_enum, default_value_t = FormatArg::Both)]
    format: FormatArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum FormatArg {
    Json,
    Text,
    #[default]
    Both,
}

impl From<FormatArg> for ReportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => ReportFormat::Structured,
            FormatArg::Text => ReportFormat::Human,
            FormatArg::Both => ReportFormat::Both,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    let outcome = match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run_once(config, args).await,
        Commands::Schedule => run_scheduled(config).await,
    };

    match outcome {
        Ok(code) => code,
        Err(run_error) => {
            error!(%run_error, "pipeline invocation failed");
            eprintln!("error: {run_error:#}");
            ExitCode::FAILURE
        }
    }
}

fn build_pipeline(config: &PipelineConfig) -> Result<(Pipeline, PgJobStore)> {
    let store = PgJobStore::connect_lazy(&config.database_url)?;
    let pipeline = Pipeline::new(config.clone(), Arc::new(store.clone()))?;
    Ok((pipeline, store))
}

async fn run_once(config: PipelineConfig, args: RunArgs) -> Result<ExitCode> {
    let (pipeline, store) = build_pipeline(&config)?;
    store
        .ensure_schema()
        .await
        .context("preparing job_records schema")?;

    let opts = RunOptions {
        mode: if args.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Live
        },
        skip_scraping: args.skip_scraping,
        skip_cleanup: args.skip_cleanup,
        limit: args.limit,
        run_date: args.date,
        format: args.format.into(),
    };

    let interrupt = async {
        if let Err(signal_error) = tokio::signal::ctrl_c().await {
            warn!(%signal_error, "could not listen for interrupt");
            std::future::pending::<()>().await;
        }
    };

    match pipeline.run_with_shutdown(opts, interrupt).await {
        Ok(outcome) => {
            println!("{}", render_summary(&outcome.result));
            if outcome.is_fatal() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(PipelineError::LockConflict { owner_id }) => {
            eprintln!("another pipeline run holds the lock (owner {owner_id})");
            Ok(ExitCode::FAILURE)
        }
        Err(PipelineError::Interrupted) => {
            warn!("interrupt received; lock released, exiting");
            Ok(ExitCode::FAILURE)
        }
        Err(PipelineError::Other(other)) => Err(other),
    }
}

async fn run_scheduled(config: PipelineConfig) -> Result<ExitCode> {
    let (pipeline, store) = build_pipeline(&config)?;
    store
        .ensure_schema()
        .await
        .context("preparing job_records schema")?;

    info!(cron = %config.sync_cron, "starting scheduler");
    let scheduler = pipeline.build_scheduler().await?;
    scheduler.start().await.context("starting scheduler")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    info!("interrupt received; shutting down scheduler");
    Ok(ExitCode::SUCCESS)
}
