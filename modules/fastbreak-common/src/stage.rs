use serde::{Deserialize, Serialize};

/// The fixed pipeline stages, in execution order.
///
/// Each stage declares the upstream stage it depends on. Because an entity's
/// flag can only reach `Final` once its dependency is `Final`, checking the
/// direct dependency is equivalent to checking the whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Schedule,
    Players,
    Injuries,
    Betting,
    Pbp,
    GameStates,
    Boxscores,
    PregameFeatures,
    Predictions,
}

impl Stage {
    /// All stages in dependency order.
    pub const ALL: [Stage; 9] = [
        Stage::Schedule,
        Stage::Players,
        Stage::Injuries,
        Stage::Betting,
        Stage::Pbp,
        Stage::GameStates,
        Stage::Boxscores,
        Stage::PregameFeatures,
        Stage::Predictions,
    ];

    /// 1-based position in the pipeline.
    pub fn ordinal(&self) -> usize {
        Stage::ALL.iter().position(|s| s == self).unwrap_or(0) + 1
    }

    /// The stage that must be `Final` for an entity before this stage
    /// will visit it. `Schedule` has no upstream.
    pub fn dependency(&self) -> Option<Stage> {
        match self.ordinal() {
            1 => None,
            n => Some(Stage::ALL[n - 2]),
        }
    }

    /// Stable identifier used in the database and in logs.
    pub fn key(&self) -> &'static str {
        match self {
            Stage::Schedule => "schedule",
            Stage::Players => "players",
            Stage::Injuries => "injuries",
            Stage::Betting => "betting",
            Stage::Pbp => "pbp",
            Stage::GameStates => "game_states",
            Stage::Boxscores => "boxscores",
            Stage::PregameFeatures => "pregame_features",
            Stage::Predictions => "predictions",
        }
    }

    pub fn from_key(key: &str) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s.key() == key)
    }

    /// Game statuses this stage is willing to visit. Play-derived stages
    /// only make sense once a game has tipped off; postponed games are
    /// excluded from everything past the schedule sync.
    pub fn visits(&self, status: GameStatus) -> bool {
        if status == GameStatus::Postponed {
            return *self == Stage::Schedule;
        }
        match self {
            Stage::Pbp | Stage::GameStates | Stage::Boxscores => {
                matches!(status, GameStatus::InProgress | GameStatus::Final)
            }
            _ => true,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-(entity, stage) completion flag.
///
/// `Final` is terminal: once set, a later run may not downgrade it without
/// the explicit repair override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Partial,
    Final,
}

impl StageStatus {
    pub fn key(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Partial => "partial",
            StageStatus::Final => "final",
        }
    }

    pub fn from_key(key: &str) -> Option<StageStatus> {
        match key {
            "pending" => Some(StageStatus::Pending),
            "partial" => Some(StageStatus::Partial),
            "final" => Some(StageStatus::Final),
            _ => None,
        }
    }

    /// Whether a normal (non-forced) write may move a flag from `self` to
    /// `to`. Forward movement and same-status rewrites are allowed; any
    /// downgrade from `Final` is not.
    pub fn allows(&self, to: StageStatus) -> bool {
        match self {
            StageStatus::Final => to == StageStatus::Final,
            _ => true,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Game status as reported by the schedule feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
    Postponed,
}

impl GameStatus {
    pub fn key(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::InProgress => "in_progress",
            GameStatus::Final => "final",
            GameStatus::Postponed => "postponed",
        }
    }

    pub fn from_key(key: &str) -> Option<GameStatus> {
        match key {
            "scheduled" => Some(GameStatus::Scheduled),
            "in_progress" => Some(GameStatus::InProgress),
            "final" => Some(GameStatus::Final),
            "postponed" => Some(GameStatus::Postponed),
            _ => None,
        }
    }
}
