use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::{GameStatus, Stage, StageStatus};

/// The set of entities a pipeline run targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Scope {
    /// Every game in a season, e.g. "2024-2025".
    Season(String),
    /// An explicit list of game ids.
    Games(Vec<String>),
    /// Whatever the store reports as incomplete, any season.
    Incomplete,
}

impl Scope {
    /// Key used for the run lease. Overlapping scopes share a single lease —
    /// simpler to reason about than per-entity leases, and the pipeline is
    /// cheap enough to serialize whole runs.
    pub fn lease_key(&self) -> String {
        "pipeline".to_string()
    }

    /// The synthetic entity the schedule stage operates on, if this scope
    /// names a season.
    pub fn season(&self) -> Option<&str> {
        match self {
            Scope::Season(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Season(s) => write!(f, "season:{s}"),
            Scope::Games(ids) => write!(f, "games[{}]", ids.len()),
            Scope::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// One game as discovered by the schedule feed. The schedule stage's record
/// payload is a list of these; the store expands them into game rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledGame {
    pub game_id: String,
    pub season: String,
    pub home_team: String,
    pub away_team: String,
    pub tipoff_utc: DateTime<Utc>,
    pub status: GameStatus,
}

/// Canonical record shape every source adapter normalizes into.
///
/// `complete` distinguishes a finished dataset from a structurally valid but
/// partial one (an in-progress game's play feed, a betting line with only
/// one book quoted). Partial records flag the entity `Partial` so a later
/// run re-attempts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub entity_id: String,
    pub stage: Stage,
    pub payload: serde_json::Value,
    pub complete: bool,
    pub fetched_at: DateTime<Utc>,
}

impl NormalizedRecord {
    pub fn new(entity_id: impl Into<String>, stage: Stage, payload: serde_json::Value) -> Self {
        Self {
            entity_id: entity_id.into(),
            stage,
            payload,
            complete: true,
            fetched_at: Utc::now(),
        }
    }

    pub fn partial(mut self) -> Self {
        self.complete = false;
        self
    }

    /// The flag this record earns its entity.
    pub fn status(&self) -> StageStatus {
        if self.complete {
            StageStatus::Final
        } else {
            StageStatus::Partial
        }
    }
}

/// One chunk's worth of persistence: records and the flag marks they earn,
/// applied as a single all-or-nothing unit. A crash between the two halves
/// can never leave data written but flags unmarked, or vice versa.
#[derive(Debug, Clone, Default)]
pub struct ChunkWrite {
    pub records: Vec<NormalizedRecord>,
    pub marks: Vec<(String, StageStatus)>,
}

impl ChunkWrite {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.marks.is_empty()
    }
}

/// A game row as read back from the store.
#[derive(Debug, Clone)]
pub struct GameRow {
    pub game_id: String,
    pub season: String,
    pub home_team: String,
    pub away_team: String,
    pub tipoff_utc: DateTime<Utc>,
    pub status: GameStatus,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_status_follows_completeness() {
        let rec = NormalizedRecord::new("0022400001", Stage::Pbp, serde_json::json!({}));
        assert_eq!(rec.status(), StageStatus::Final);
        assert_eq!(rec.clone().partial().status(), StageStatus::Partial);
    }

    #[test]
    fn scope_display() {
        assert_eq!(Scope::Season("2024-2025".into()).to_string(), "season:2024-2025");
        assert_eq!(Scope::Games(vec!["a".into(), "b".into()]).to_string(), "games[2]");
    }
}
