//! Command-line interface for runbookpilot.
//!
//! Provides commands for running and validating playbooks, listing the
//! configured adapters and health checking them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use crate::config::{load_config, ResolvedConfig};
use crate::core::{ApprovalGate, AutoApprove, ConsoleApproval, Orchestrator, Playbook, RunOptions};
use crate::domain::{AutomationLevel, PlaybookRun, RunState, StepOutcome, StepStatus};

/// runbookpilot - Security playbook orchestrator
#[derive(Parser, Debug)]
#[command(name = "runbookpilot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (overrides RUNBOOKPILOT_CONFIG and discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging and step outputs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a playbook
    Run {
        /// Playbook file (YAML or JSON)
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Downgrade every production step to dry-run
        #[arg(long)]
        dry_run: bool,

        /// Automation level (defaults to the config file's, else 1)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=2))]
        automation_level: Option<u8>,

        /// Allow fully automated (L2) runs
        #[arg(long)]
        enable_l2: bool,

        /// Approve every prompt without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Validate a playbook against the configured adapters
    Validate {
        /// Playbook file (YAML or JSON)
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List configured adapters and their capabilities
    List {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Health check every configured adapter
    Health {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;

        match self.command {
            Commands::Run {
                input,
                format,
                dry_run,
                automation_level,
                enable_l2,
                yes,
            } => {
                let level = match automation_level {
                    Some(level) => AutomationLevel::try_from(level).map_err(anyhow::Error::msg)?,
                    None => config.automation_level,
                };
                let options = RunOptions {
                    automation_level: level,
                    enable_l2: enable_l2 || config.enable_l2,
                    dry_run,
                    verbose: self.verbose,
                };
                let approval: Arc<dyn ApprovalGate> = if yes {
                    Arc::new(AutoApprove)
                } else {
                    Arc::new(ConsoleApproval)
                };
                run_playbook(config, &input, format, options, approval).await
            }
            Commands::Validate { input, format } => validate_playbook(config, &input, format),
            Commands::List { format } => list_adapters(config, format),
            Commands::Health { format } => health(config, format).await,
        }
    }
}

fn build_orchestrator(config: ResolvedConfig, options: RunOptions) -> Result<Orchestrator> {
    if let Some(path) = &config.config_file {
        tracing::debug!(path = %path.display(), adapters = config.adapters.len(), "Using config file");
    }
    Orchestrator::from_configs(config.adapters, options)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// Run a playbook file
async fn run_playbook(
    config: ResolvedConfig,
    path: &Path,
    format: OutputFormat,
    options: RunOptions,
    approval: Arc<dyn ApprovalGate>,
) -> Result<()> {
    let playbook = Playbook::from_file(path)?;
    let orchestrator = build_orchestrator(config, options)?.with_approval(approval);

    let run = orchestrator.run_playbook(&playbook).await?;

    match format {
        OutputFormat::Json => print_json(&run)?,
        OutputFormat::Text => print_run(&run),
    }

    if !run.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Succeeded => "ok",
        StepStatus::Failed => "failed",
        StepStatus::FailedContinued => "failed (continued)",
        StepStatus::Skipped => "skipped",
    }
}

fn print_outcome(outcome: &StepOutcome) {
    let detail = outcome
        .result
        .as_ref()
        .and_then(|r| r.error.as_ref())
        .map(|e| format!("  {}: {}", e.code, e.message))
        .or_else(|| outcome.note.as_ref().map(|n| format!("  {}", n)))
        .unwrap_or_default();

    println!(
        "  {:<24} {:<12} {:<18} {:<10} {}{}",
        outcome.step,
        outcome.mode,
        format!("{}.{}", outcome.adapter, outcome.action),
        status_label(outcome.status),
        outcome.attempts,
        detail
    );
}

fn print_run(run: &PlaybookRun) {
    println!("Run ID: {}", run.id);
    println!("Playbook: {}", run.playbook_name);
    println!("Automation level: {}", run.automation_level);
    println!("\nSteps:");
    for outcome in &run.steps {
        print_outcome(outcome);
    }

    if !run.rollbacks.is_empty() {
        println!("\nRollbacks:");
        for outcome in &run.rollbacks {
            print_outcome(outcome);
        }
    }

    match &run.state {
        RunState::Completed => eprintln!("\n[Run {} completed successfully]", run.id),
        RunState::Failed { step, error } => {
            eprintln!("\n[Run {} failed at step '{}': {}]", run.id, step, error)
        }
        RunState::Aborted { step, reason } => {
            eprintln!("\n[Run {} aborted at step '{}': {}]", run.id, step, reason)
        }
        RunState::Running => eprintln!("\n[Run {} still running]", run.id),
    }
}

/// Validate a playbook file without running it
fn validate_playbook(config: ResolvedConfig, path: &Path, format: OutputFormat) -> Result<()> {
    let playbook = Playbook::from_file(path)?;
    let orchestrator = build_orchestrator(config, RunOptions::default())?;
    let problems = orchestrator.validate_playbook(&playbook, true);

    match format {
        OutputFormat::Json => print_json(&json!({
            "playbook": playbook.name,
            "valid": problems.is_empty(),
            "errors": problems,
        }))?,
        OutputFormat::Text => {
            if problems.is_empty() {
                println!("Playbook '{}' is valid ({} steps)", playbook.name, playbook.steps.len());
            } else {
                println!("Playbook '{}' has {} problem(s):", playbook.name, problems.len());
                for problem in &problems {
                    println!("  - {}", problem);
                }
            }
        }
    }

    if !problems.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// List configured adapters
fn list_adapters(config: ResolvedConfig, format: OutputFormat) -> Result<()> {
    let orchestrator = build_orchestrator(config, RunOptions::default())?;
    let adapters = orchestrator.adapters();

    if format == OutputFormat::Json {
        return print_json(&adapters);
    }

    if adapters.is_empty() {
        println!("No adapters configured");
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:<8} {:<5} {:<9} {}",
        "NAME", "TYPE", "ENABLED", "SIM", "ROLLBACK", "ACTIONS"
    );
    println!("{}", "-".repeat(90));
    for adapter in adapters {
        let caps = adapter.capabilities;
        println!(
            "{:<20} {:<12} {:<8} {:<5} {:<9} {}",
            adapter.name,
            adapter.adapter_type,
            adapter.enabled,
            caps.supports_simulation,
            caps.supports_rollback,
            caps.supported_actions.join(", ")
        );
    }
    Ok(())
}

/// Health check every adapter
async fn health(config: ResolvedConfig, format: OutputFormat) -> Result<()> {
    let orchestrator = build_orchestrator(config, RunOptions::default())?;
    let report = orchestrator.health().await;

    match format {
        OutputFormat::Json => {
            let entries: Vec<_> = report
                .iter()
                .map(|(name, status)| json!({ "adapter": name, "health": status }))
                .collect();
            print_json(&entries)?;
        }
        OutputFormat::Text => {
            if report.is_empty() {
                println!("No adapters configured");
            }
            for (name, status) in &report {
                println!(
                    "{:<20} {:<10} {:>6}ms  {}",
                    name, status.status, status.latency_ms, status.message
                );
            }
        }
    }
    Ok(())
}
