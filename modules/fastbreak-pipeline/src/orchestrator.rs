//! The orchestrator owns one run: take the lease, walk the nine stages in
//! order, persist the report and timeline, release the lease.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use fastbreak_common::{Config, Scope, Stage};
use fastbreak_sources::StageCollector;
use fastbreak_store::RunRow;

use crate::error::{PipelineError, Result};
use crate::report::RunReport;
use crate::run_log::{EventKind, RunLog};
use crate::runner::StageRunner;
use crate::traits::CompletionTracker;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub chunk_size: usize,
    pub chunk_workers: usize,
    pub reattempt_partial: bool,
    pub lease_ttl_secs: i64,
    /// Stages to execute this run. Order still follows the pipeline; this
    /// only filters. Dependency gating is unaffected, so limiting stages
    /// never lets an entity skip ahead.
    pub stages: Vec<Stage>,
}

impl RunOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            chunk_workers: cfg.chunk_workers,
            reattempt_partial: cfg.reattempt_partial,
            lease_ttl_secs: cfg.lease_ttl_secs,
            stages: Stage::ALL.to_vec(),
        }
    }

    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        if !stages.is_empty() {
            self.stages = stages;
        }
        self
    }
}

pub struct Orchestrator {
    tracker: Arc<dyn CompletionTracker>,
    collectors: HashMap<Stage, Arc<dyn StageCollector>>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        tracker: Arc<dyn CompletionTracker>,
        collectors: HashMap<Stage, Arc<dyn StageCollector>>,
        options: RunOptions,
    ) -> Self {
        Self {
            tracker,
            collectors,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Token for shutdown wiring; cancelling it stops the run between chunks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one full pipeline run over `scope`.
    pub async fn run(&self, scope: &Scope) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let lease_key = scope.lease_key();

        if !self
            .tracker
            .acquire_lease(&lease_key, run_id, self.options.lease_ttl_secs)
            .await?
        {
            warn!(scope = %scope, "Lease held by another run, refusing to start");
            return Err(PipelineError::LeaseHeld);
        }

        let started_at = Utc::now();
        info!(run_id = %run_id, scope = %scope, "Run starting");

        let mut log = RunLog::new();
        log.push(EventKind::RunStarted {
            scope: scope.to_string(),
        });
        let mut report = RunReport::new(run_id, scope.to_string(), started_at);

        let runner = StageRunner::new(
            self.tracker.clone(),
            self.options.chunk_size,
            self.options.chunk_workers,
            self.options.reattempt_partial,
            self.cancel.clone(),
        );

        let mut aborted = false;
        for stage in Stage::ALL {
            if !self.options.stages.contains(&stage) {
                continue;
            }
            if self.cancel.is_cancelled() {
                warn!(run_id = %run_id, stage = %stage, "Cancelled, remaining stages skipped");
                break;
            }
            let Some(collector) = self.collectors.get(&stage) else {
                warn!(stage = %stage, "No collector wired, stage skipped");
                continue;
            };
            match runner
                .run_stage(stage, scope, collector.as_ref(), &mut log)
                .await
            {
                Ok(stage_report) => report.stages.push(stage_report),
                Err(e) => {
                    // Storage faults make every later stage's bookkeeping
                    // untrustworthy; stop here rather than guess.
                    error!(run_id = %run_id, stage = %stage, error = %e, "Run aborted");
                    aborted = true;
                    break;
                }
            }
        }

        report.finish(aborted);
        // A cancelled run never reached the later stages; it finished
        // cleanly but the requested work is not done.
        let expected = Stage::ALL
            .iter()
            .filter(|&&s| self.options.stages.contains(&s) && self.collectors.contains_key(&s))
            .count();
        if !aborted
            && report.stages.len() < expected
            && report.status == crate::report::OverallStatus::Complete
        {
            report.status = crate::report::OverallStatus::Incomplete;
        }
        log.push(EventKind::RunFinished {
            status: report.status.as_str().to_string(),
        });

        let row = RunRow {
            run_id,
            scope: scope.to_string(),
            started_at,
            report: serde_json::to_value(&report).unwrap_or(serde_json::Value::Null),
            events: log.to_json(),
        };
        if let Err(e) = self.tracker.save_run(&row).await {
            warn!(run_id = %run_id, error = %e, "Failed to persist run log");
        }
        if let Err(e) = self.tracker.release_lease(&lease_key, run_id).await {
            warn!(run_id = %run_id, error = %e, "Failed to release lease");
        }

        info!(
            run_id = %run_id,
            status = report.status.as_str(),
            stages = report.stages.len(),
            "Run finished"
        );
        Ok(report)
    }
}
