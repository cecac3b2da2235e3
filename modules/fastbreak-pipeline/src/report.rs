use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use fastbreak_common::Stage;

/// Per-stage tally for one run.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Entities selected for this stage.
    pub attempted: usize,
    /// Entities whose flag reached `final`.
    pub finalized: usize,
    /// Entities stored with a partial record.
    pub partial: usize,
    /// Entities whose collection failed outright.
    pub failed: usize,
    /// Entities never attempted because the stage stopped early.
    pub skipped: usize,
    /// The source call budget ran out mid-stage.
    pub stopped_early: bool,
}

impl StageReport {
    pub fn new(stage: Stage, attempted: usize) -> Self {
        Self {
            stage,
            attempted,
            finalized: 0,
            partial: 0,
            failed: 0,
            skipped: 0,
            stopped_early: false,
        }
    }

    /// Whether this stage left work behind for a later run.
    pub fn unfinished(&self) -> bool {
        self.partial > 0 || self.failed > 0 || self.skipped > 0 || self.stopped_early
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every selected entity finalized.
    Complete,
    /// The run finished but some entities remain partial, failed or skipped.
    Incomplete,
    /// A storage fault ended the run before the stage sequence finished.
    Aborted,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Complete => "complete",
            OverallStatus::Incomplete => "incomplete",
            OverallStatus::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scope: String,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    pub status: OverallStatus,
}

impl RunReport {
    pub fn new(run_id: Uuid, scope: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            scope,
            started_at,
            stages: Vec::new(),
            status: OverallStatus::Complete,
        }
    }

    pub fn finish(&mut self, aborted: bool) {
        self.status = if aborted {
            OverallStatus::Aborted
        } else if self.stages.iter().any(StageReport::unfinished) {
            OverallStatus::Incomplete
        } else {
            OverallStatus::Complete
        };
    }

    /// Process exit code: 0 all done, 1 work remains, 2 aborted or refused.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            OverallStatus::Complete => 0,
            OverallStatus::Incomplete => 1,
            OverallStatus::Aborted => 2,
        }
    }
}
