//! Run log — ordered JSON timeline of everything a run did, persisted as a
//! row in `pipeline_runs` next to the final report.

use chrono::{DateTime, Utc};
use serde::Serialize;

use fastbreak_common::Stage;

pub struct RunLog {
    events: Vec<RunEvent>,
    seq: u32,
}

#[derive(Serialize)]
struct RunEvent {
    seq: u32,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        scope: String,
    },
    StageStarted {
        stage: Stage,
        pending: usize,
    },
    ChunkApplied {
        stage: Stage,
        chunk: usize,
        records: usize,
        marks: usize,
    },
    EntityFailed {
        stage: Stage,
        entity_id: String,
        error: String,
    },
    BudgetStopped {
        stage: Stage,
        source: String,
        remaining: usize,
    },
    StageFinished {
        stage: Stage,
        finalized: usize,
        partial: usize,
        failed: usize,
        skipped: usize,
    },
    RunFinished {
        status: String,
    },
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            seq: 0,
        }
    }

    pub fn push(&mut self, kind: EventKind) {
        self.seq += 1;
        self.events.push(RunEvent {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
    }

    /// The full timeline as a JSON array, for the `pipeline_runs` row.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.events).unwrap_or_else(|_| serde_json::json!([]))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}
