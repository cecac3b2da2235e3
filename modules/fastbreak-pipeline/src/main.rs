use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fastbreak_common::{Config, Scope, Stage, StageStatus};
use fastbreak_pipeline::orchestrator::{Orchestrator, RunOptions};
use fastbreak_pipeline::wiring::default_collectors;
use fastbreak_pipeline::{CompletionTracker, PipelineError};
use fastbreak_store::GameStore;

#[derive(Parser)]
#[command(name = "fastbreak", about = "NBA data pipeline orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full stage sequence over a scope.
    Run {
        /// Season label, e.g. 2024-25.
        #[arg(long, conflicts_with_all = ["games", "incomplete"])]
        season: Option<String>,
        /// Explicit game ids (repeatable).
        #[arg(long = "game")]
        games: Vec<String>,
        /// Everything the store reports as incomplete, any season.
        #[arg(long)]
        incomplete: bool,
        /// Restrict the run to a subset of stages (repeatable).
        #[arg(long = "stage")]
        stages: Vec<String>,
    },
    /// Apply database migrations and exit.
    Migrate,
    /// Repair tooling: set one completion flag by hand.
    Mark {
        stage: String,
        entity_id: String,
        status: String,
        /// Allow downgrading a final flag.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fastbreak=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let store = GameStore::connect(&config.database_url).await?;
    store.migrate().await?;

    match cli.command {
        Command::Migrate => {
            info!("Migrations applied");
            Ok(ExitCode::SUCCESS)
        }
        Command::Mark {
            stage,
            entity_id,
            status,
            force,
        } => {
            let stage = Stage::from_key(&stage)
                .ok_or_else(|| anyhow::anyhow!("unknown stage {stage:?}"))?;
            let status = StageStatus::from_key(&status)
                .ok_or_else(|| anyhow::anyhow!("unknown status {status:?}"))?;
            store.mark(stage, &entity_id, status, force).await?;
            info!(stage = %stage, entity_id, status = %status, "Flag updated");
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            season,
            games,
            incomplete,
            stages,
        } => {
            let scope = match (season, games, incomplete) {
                (Some(season), _, _) => Scope::Season(season),
                (None, games, false) if !games.is_empty() => Scope::Games(games),
                _ => Scope::Incomplete,
            };
            let stages = stages
                .iter()
                .map(|s| {
                    Stage::from_key(s).ok_or_else(|| anyhow::anyhow!("unknown stage {s:?}"))
                })
                .collect::<Result<Vec<_>>>()?;

            let tracker: Arc<dyn CompletionTracker> = Arc::new(store);
            let collectors = default_collectors(&config, tracker.clone());
            let options = RunOptions::from_config(&config).with_stages(stages);
            let orchestrator = Orchestrator::new(tracker, collectors, options);

            // Ctrl-C finishes the current chunk, then stops cleanly.
            let cancel = orchestrator.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Shutdown requested, stopping after the current chunk");
                    cancel.cancel();
                }
            });

            match orchestrator.run(&scope).await {
                Ok(report) => Ok(ExitCode::from(report.exit_code() as u8)),
                Err(PipelineError::LeaseHeld) => {
                    error!("Another run is already in progress");
                    Ok(ExitCode::from(2))
                }
                Err(e) => {
                    error!(error = %e, "Run failed");
                    Ok(ExitCode::from(2))
                }
            }
        }
    }
}
