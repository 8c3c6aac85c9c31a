//! Command-line interface for ccms.
//!
//! Provides commands for running the review pipeline, checking status,
//! listing runs, resuming runs parked on human review, resolving review
//! tickets, inspecting config layers and reading run metrics.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::{
    FabricContentGenerator, FileConfigStore, FileResearchProvider, MediaPlanProducer,
    TemplateSeoProducer, WordPressPublisher,
};
use crate::config::ResolvedConfig;
use crate::core::{
    cancellation, HumanReviewGateway, MetricsRecorder, PipelineOrchestrator, SqliteMetricsStore,
};
use crate::domain::{PipelineRun, RunRequest, RunState, StageStatus};

pub mod config;
pub mod review;

/// Upper bound on waiting for the run's metrics write before exiting
const METRICS_FLUSH_LIMIT: Duration = Duration::from_secs(5);

/// ccms - Multi-tenant casino review pipeline orchestrator
#[derive(Parser, Debug)]
#[command(name = "ccms")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline for one (tenant, item, locale)
    Run {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        item: String,

        #[arg(long)]
        locale: String,

        /// Run every stage but never call the publisher
        #[arg(long)]
        dry_run: bool,

        /// Ignore the compliance decision (non-production only)
        #[arg(long)]
        skip_compliance: bool,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,

        #[arg(long)]
        json: bool,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Continue a run parked on human review
    Resume {
        /// Run ID to resume
        run_id: String,
    },

    /// Manage human review tickets
    Review {
        #[command(subcommand)]
        command: review::ReviewCommands,
    },

    /// Inspect and override config layers
    Config {
        #[command(subcommand)]
        command: config::ConfigCommands,
    },

    /// Show recorded run metrics
    Metrics {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                tenant,
                item,
                locale,
                dry_run,
                skip_compliance,
                json,
            } => {
                let request = RunRequest::new(tenant, item, locale)
                    .with_dry_run(dry_run)
                    .with_skip_compliance(skip_compliance);
                run_pipeline(request, json).await
            }
            Commands::Status { run_id, json } => show_status(&run_id, json).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Resume { run_id } => resume_run(&run_id).await,
            Commands::Review { command } => review::execute(command).await,
            Commands::Config { command } => config::execute(command).await,
            Commands::Metrics { limit } => show_metrics(limit).await,
        }
    }
}

/// Wire the default file/subprocess/HTTP collaborators from resolved config
pub(crate) fn build_orchestrator(require_publisher: bool) -> Result<PipelineOrchestrator> {
    let cfg = crate::config::config()?;

    let content = match &cfg.fabric_binary {
        Some(binary) => FabricContentGenerator::with_binary_path(binary),
        None => FabricContentGenerator::new(),
    };

    PipelineOrchestrator::builder()
        .config_store(Arc::new(FileConfigStore::new(crate::config::config_store_dir()?)))
        .research(Arc::new(FileResearchProvider::new(crate::config::research_dir()?)))
        .content(Arc::new(content))
        .seo(Arc::new(TemplateSeoProducer::new()))
        .media(Arc::new(MediaPlanProducer::new()))
        .publisher(Arc::new(wordpress_publisher(cfg, require_publisher)?))
        .review_gateway(HumanReviewGateway::new(crate::config::review_log_path()?))
        .metrics(MetricsRecorder::sqlite(crate::config::metrics_db_path()?))
        .settings(cfg.settings.clone())
        .runs_dir(crate::config::runs_dir()?)
        .build()
        .context("Invalid pipeline wiring")
}

/// Env vars win over the config file; the password only comes from env
fn wordpress_publisher(cfg: &ResolvedConfig, required: bool) -> Result<WordPressPublisher> {
    let url = std::env::var("WORDPRESS_URL").ok().or_else(|| cfg.wordpress.url.clone());
    let username = std::env::var("WORDPRESS_USERNAME")
        .ok()
        .or_else(|| cfg.wordpress.username.clone());
    let password = std::env::var("WORDPRESS_APP_PASSWORD").ok();

    match (url, username, password) {
        (Some(url), Some(username), Some(password)) => {
            Ok(WordPressPublisher::new(url, username, password))
        }
        _ if required => anyhow::bail!(
            "WordPress is not configured. Set WORDPRESS_URL, WORDPRESS_USERNAME and \
             WORDPRESS_APP_PASSWORD (or wordpress.url/username in .ccms/config.yaml), \
             or use --dry-run"
        ),
        _ => {
            debug!("WordPress not configured; publisher unused for this command");
            Ok(WordPressPublisher::new("http://wordpress.invalid", "", ""))
        }
    }
}

fn parse_run_id(run_id_str: &str) -> Result<Uuid> {
    Uuid::parse_str(run_id_str).with_context(|| format!("Invalid run ID: {}", run_id_str))
}

/// Run the pipeline and exit with the run's exit code
async fn run_pipeline(request: RunRequest, json: bool) -> Result<()> {
    let orchestrator = build_orchestrator(!request.dry_run)?;

    let (cancel_handle, cancel_token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling at the next stage boundary");
            cancel_handle.cancel();
        }
    });

    let run = orchestrator.run_with_cancel(request, cancel_token).await?;
    report_run(&run, json)?;
    exit_after_metrics(&orchestrator, run.exit_code()).await
}

/// `process::exit` does not wait for blocking tasks, so drain metrics first
async fn exit_after_metrics(orchestrator: &PipelineOrchestrator, code: i32) -> Result<()> {
    orchestrator.flush_metrics(METRICS_FLUSH_LIMIT).await;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Show the status of a run
async fn show_status(run_id_str: &str, json: bool) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;
    let orchestrator = build_orchestrator(false)?;
    let run = orchestrator.status(run_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run.result())?);
        return Ok(());
    }

    println!("Run ID: {}", run.id);
    println!(
        "Request: {}/{} ({}){}",
        run.request.tenant_id,
        run.request.item_id,
        run.request.locale,
        if run.request.dry_run { " [dry run]" } else { "" }
    );
    println!("State: {}", state_label(&run.state));
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    if let Some(report) = &run.pipeline_state.report {
        println!("Compliance: {}", report.summary());
    }
    if let Some(receipt) = &run.pipeline_state.receipt {
        println!("Published: {} ({})", receipt.url, receipt.external_id);
    }
    print_stages(&run);

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let orchestrator = build_orchestrator(false)?;
    let runs = orchestrator.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!(
        "{:<38} {:<12} {:<16} {:<8} {:<16} {:>6}",
        "RUN ID", "TENANT", "ITEM", "LOCALE", "STATE", "SCORE"
    );
    println!("{}", "-".repeat(101));

    for run in runs {
        let score = run
            .pipeline_state
            .report
            .as_ref()
            .map(|r| format!("{:.2}", r.overall_score))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<12} {:<16} {:<8} {:<16} {:>6}",
            run.id,
            run.request.tenant_id,
            run.request.item_id,
            run.request.locale,
            state_label(&run.state),
            score
        );
    }

    Ok(())
}

/// Resume a run parked on human review
async fn resume_run(run_id_str: &str) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;
    let orchestrator = build_orchestrator(true)?;
    let run = orchestrator.resume(run_id).await?;

    report_run(&run, false)?;
    exit_after_metrics(&orchestrator, run.exit_code()).await
}

async fn show_metrics(limit: usize) -> Result<()> {
    let store = SqliteMetricsStore::new(crate::config::metrics_db_path()?);
    let summaries = tokio::task::spawn_blocking(move || store.recent(limit))
        .await
        .context("Metrics query task failed")??;

    if summaries.is_empty() {
        println!("No metrics recorded");
        return Ok(());
    }

    println!(
        "{:<38} {:<12} {:<16} {:<16} {:>6} {:>10}",
        "RUN ID", "TENANT", "ITEM", "OUTCOME", "SCORE", "DURATION"
    );
    println!("{}", "-".repeat(103));
    for s in summaries {
        println!(
            "{:<38} {:<12} {:<16} {:<16} {:>6} {:>8}ms",
            s.run_id,
            s.tenant_id,
            s.item_id,
            s.failure_kind.as_deref().unwrap_or(s.outcome.as_str()),
            s.overall_score.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string()),
            s.total_duration_ms
        );
    }

    Ok(())
}

fn state_label(state: &RunState) -> String {
    match state {
        RunState::Running => "running".to_string(),
        RunState::AwaitingReview { .. } => "awaiting-review".to_string(),
        RunState::Completed => "completed".to_string(),
        RunState::Aborted { kind, .. } => format!("aborted ({:?})", kind),
    }
}

fn print_stages(run: &PipelineRun) {
    println!("\nStages:");
    for stage in &run.stages {
        let marker = match stage.status {
            StageStatus::Completed => "ok",
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "FAILED",
            StageStatus::Running | StageStatus::Pending => "..",
        };
        print!(
            "  {:<13} {:>8}ms  attempts={}  {}",
            stage.stage.as_str(),
            stage.duration_ms,
            stage.attempts,
            marker
        );
        match &stage.error {
            Some(error) => println!("  {}", error),
            None => println!(),
        }
    }
}

/// Print the outcome of a run (stdout for results, stderr for status lines)
fn report_run(run: &PipelineRun, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&run.result())?);
        return Ok(());
    }

    if let Some(report) = &run.pipeline_state.report {
        println!("Compliance: {}", report.summary());
        for result in &report.results {
            println!("  {:<10} {:>5.2}", result.category.as_str(), result.score);
        }
        for issue in &report.blocking_issues {
            println!("  BLOCKING: {}", issue);
        }
        for warning in &report.warnings {
            println!("  warning:  {}", warning);
        }
    }
    print_stages(run);

    match &run.state {
        RunState::Completed => match &run.pipeline_state.receipt {
            Some(receipt) => eprintln!(
                "\n[Run {} published as {} ({})]",
                run.id, receipt.external_id, receipt.url
            ),
            None => eprintln!("\n[Run {} completed (dry run, nothing published)]", run.id),
        },
        RunState::AwaitingReview { ticket_id } => {
            eprintln!(
                "\n[Run {} awaiting human review: ticket {}]\n  ccms review approve {}\n  ccms resume {}",
                run.id, ticket_id, ticket_id, run.id
            );
        }
        RunState::Aborted { reason, .. } => {
            eprintln!("\n[Run {} aborted: {}]", run.id, reason);
        }
        RunState::Running => {
            eprintln!("\n[Run {} still running]", run.id);
        }
    }

    Ok(())
}
