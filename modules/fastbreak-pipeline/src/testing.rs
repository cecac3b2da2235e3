// Test doubles for the pipeline.
//
// MemoryTracker (CompletionTracker) — stateful in-memory store with the same
// selection and atomicity semantics as the Postgres one, plus injectable
// storage faults. MockCollector (StageCollector) — scripted per-entity
// outcomes with call counting. Together they run the whole orchestrator
// under `cargo test` with no network and no database.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use fastbreak_common::{
    ChunkWrite, GameRow, GameStatus, NormalizedRecord, ScheduledGame, Scope, Stage, StageStatus,
};
use fastbreak_sources::{CollectError, FetchError, StageCollector};
use fastbreak_store::{Result, RunRow, StoreError};

use crate::traits::CompletionTracker;

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

pub const TEST_SEASON: &str = "2024-25";

/// A tipoff `days` after a fixed season start, so ordering is deterministic.
pub fn tipoff(days: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 22, 23, 0, 0).unwrap() + Duration::days(days)
}

pub fn scheduled_game(
    game_id: &str,
    home: &str,
    away: &str,
    days: i64,
    status: GameStatus,
) -> ScheduledGame {
    ScheduledGame {
        game_id: game_id.to_string(),
        season: TEST_SEASON.to_string(),
        home_team: home.to_string(),
        away_team: away.to_string(),
        tipoff_utc: tipoff(days),
        status,
    }
}

/// The payload shape the schedule stage stores and the store expands.
pub fn schedule_payload(games: &[ScheduledGame]) -> serde_json::Value {
    serde_json::json!({ "games": games })
}

// ---------------------------------------------------------------------------
// MemoryTracker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TrackerState {
    games: HashMap<String, GameRow>,
    flags: HashMap<(String, Stage), StageStatus>,
    records: HashMap<(String, Stage), NormalizedRecord>,
    leases: HashMap<String, (Uuid, DateTime<Utc>)>,
    saved_runs: Vec<(Uuid, serde_json::Value, serde_json::Value)>,
    applies: u32,
    fail_apply_at: Option<u32>,
}

/// In-memory CompletionTracker. Chunk writes are all-or-nothing, downgrades
/// of `final` flags are skipped, and selection mirrors the SQL semantics.
#[derive(Default)]
pub struct MemoryTracker {
    state: Mutex<TrackerState>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the Nth `apply_chunk` call (1-based) fail as a storage fault,
    /// applying nothing.
    pub fn fail_apply_at(&self, nth: u32) {
        self.state.lock().unwrap().fail_apply_at = Some(nth);
    }

    pub fn flag_of(&self, stage: Stage, entity_id: &str) -> Option<StageStatus> {
        self.state
            .lock()
            .unwrap()
            .flags
            .get(&(entity_id.to_string(), stage))
            .copied()
    }

    pub fn record_count(&self, stage: Stage) -> usize {
        self.state
            .lock()
            .unwrap()
            .records
            .keys()
            .filter(|(_, s)| *s == stage)
            .count()
    }

    pub fn saved_run_count(&self) -> usize {
        self.state.lock().unwrap().saved_runs.len()
    }

    pub fn last_run_events(&self) -> Option<serde_json::Value> {
        self.state
            .lock()
            .unwrap()
            .saved_runs
            .last()
            .map(|(_, _, events)| events.clone())
    }

    /// Seed a game and its pending flag rows directly, bypassing the
    /// schedule stage.
    pub fn seed_game(&self, game: &ScheduledGame) {
        let mut state = self.state.lock().unwrap();
        Self::insert_game(&mut state, game);
    }

    pub fn seed_record(&self, record: NormalizedRecord) {
        let mut state = self.state.lock().unwrap();
        let status = record.status();
        state
            .records
            .insert((record.entity_id.clone(), record.stage), record.clone());
        Self::set_flag(&mut state, record.stage, &record.entity_id, status);
    }

    fn insert_game(state: &mut TrackerState, game: &ScheduledGame) {
        state.games.insert(
            game.game_id.clone(),
            GameRow {
                game_id: game.game_id.clone(),
                season: game.season.clone(),
                home_team: game.home_team.clone(),
                away_team: game.away_team.clone(),
                tipoff_utc: game.tipoff_utc,
                status: game.status,
                updated_at: Utc::now(),
            },
        );
        for stage in Stage::ALL {
            state
                .flags
                .entry((game.game_id.clone(), stage))
                .or_insert(StageStatus::Pending);
        }
        Self::set_flag(state, Stage::Schedule, &game.game_id, StageStatus::Final);
    }

    fn set_flag(state: &mut TrackerState, stage: Stage, entity_id: &str, to: StageStatus) {
        let key = (entity_id.to_string(), stage);
        match state.flags.get(&key) {
            Some(from) if !from.allows(to) => {} // skip downgrades
            _ => {
                state.flags.insert(key, to);
            }
        }
    }

    fn selectable(status: StageStatus, reattempt_partial: bool) -> bool {
        match status {
            StageStatus::Pending => true,
            StageStatus::Partial => reattempt_partial,
            StageStatus::Final => false,
        }
    }
}

#[async_trait]
impl CompletionTracker for MemoryTracker {
    async fn pending(
        &self,
        stage: Stage,
        scope: &Scope,
        reattempt_partial: bool,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();

        if stage == Stage::Schedule {
            return Ok(match scope {
                Scope::Season(season) => {
                    let entity = format!("season:{season}");
                    let status = state
                        .flags
                        .get(&(entity.clone(), Stage::Schedule))
                        .copied()
                        .unwrap_or(StageStatus::Pending);
                    if Self::selectable(status, reattempt_partial) {
                        vec![entity]
                    } else {
                        vec![]
                    }
                }
                Scope::Games(_) => vec![],
                Scope::Incomplete => {
                    let mut entities: Vec<String> = state
                        .flags
                        .iter()
                        .filter(|((entity, s), status)| {
                            *s == Stage::Schedule
                                && entity.starts_with("season:")
                                && Self::selectable(**status, reattempt_partial)
                        })
                        .map(|((entity, _), _)| entity.clone())
                        .collect();
                    entities.sort();
                    entities
                }
            });
        }

        let dep = stage.dependency().unwrap();
        let mut selected: Vec<&GameRow> = state
            .games
            .values()
            .filter(|game| {
                let in_scope = match scope {
                    Scope::Season(season) => game.season == *season,
                    Scope::Games(ids) => ids.contains(&game.game_id),
                    Scope::Incomplete => true,
                };
                let status = state
                    .flags
                    .get(&(game.game_id.clone(), stage))
                    .copied()
                    .unwrap_or(StageStatus::Pending);
                let dep_final = state.flags.get(&(game.game_id.clone(), dep))
                    == Some(&StageStatus::Final);
                in_scope
                    && stage.visits(game.status)
                    && Self::selectable(status, reattempt_partial)
                    && dep_final
            })
            .collect();
        selected.sort_by_key(|g| g.tipoff_utc);
        Ok(selected.iter().map(|g| g.game_id.clone()).collect())
    }

    async fn apply_chunk(&self, stage: Stage, write: &ChunkWrite) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.applies += 1;
        if state.fail_apply_at == Some(state.applies) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        for record in &write.records {
            if stage == Stage::Schedule {
                if let Some(games) = record.payload.get("games") {
                    let games: Vec<ScheduledGame> =
                        serde_json::from_value(games.clone())?;
                    for game in &games {
                        Self::insert_game(&mut state, game);
                    }
                }
            }
            state
                .records
                .insert((record.entity_id.clone(), record.stage), record.clone());
        }
        for (entity_id, status) in &write.marks {
            Self::set_flag(&mut state, stage, entity_id, *status);
        }
        Ok(())
    }

    async fn mark(
        &self,
        stage: Stage,
        entity_id: &str,
        status: StageStatus,
        force: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (entity_id.to_string(), stage);
        if let Some(from) = state.flags.get(&key).copied() {
            if !force && !from.allows(status) {
                return Err(StoreError::InvalidTransition {
                    entity_id: entity_id.to_string(),
                    stage,
                    from,
                    to: status,
                });
            }
        }
        state.flags.insert(key, status);
        Ok(())
    }

    async fn flag(&self, stage: Stage, entity_id: &str) -> Result<Option<StageStatus>> {
        Ok(self.flag_of(stage, entity_id))
    }

    async fn record_payload(
        &self,
        stage: Stage,
        entity_id: &str,
    ) -> Result<Option<NormalizedRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .records
            .get(&(entity_id.to_string(), stage))
            .cloned())
    }

    async fn game(&self, game_id: &str) -> Result<Option<GameRow>> {
        Ok(self.state.lock().unwrap().games.get(game_id).cloned())
    }

    async fn completed_games_before(
        &self,
        team: &str,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut games: Vec<&GameRow> = state
            .games
            .values()
            .filter(|g| {
                (g.home_team == team || g.away_team == team)
                    && g.tipoff_utc < before
                    && g.status == GameStatus::Final
            })
            .collect();
        games.sort_by_key(|g| std::cmp::Reverse(g.tipoff_utc));
        Ok(games
            .iter()
            .take(limit as usize)
            .map(|g| g.game_id.clone())
            .collect())
    }

    async fn acquire_lease(&self, key: &str, holder: Uuid, ttl_secs: i64) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        match state.leases.get(key) {
            Some((_, expires)) if *expires > now => Ok(false),
            _ => {
                state
                    .leases
                    .insert(key.to_string(), (holder, now + Duration::seconds(ttl_secs)));
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, key: &str, holder: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.leases.get(key).is_some_and(|(h, _)| *h == holder) {
            state.leases.remove(key);
        }
        Ok(())
    }

    async fn save_run(&self, run: &RunRow) -> Result<()> {
        self.state.lock().unwrap().saved_runs.push((
            run.run_id,
            run.report.clone(),
            run.events.clone(),
        ));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockCollector
// ---------------------------------------------------------------------------

/// A scripted outcome for one collect call.
#[derive(Clone)]
pub enum Scripted {
    Final(serde_json::Value),
    Partial(serde_json::Value),
    Unavailable,
    Rejected(String),
    /// Simulates an exhausted call budget.
    Budget,
}

/// Scripted StageCollector. Per-entity outcome queues with a default, plus a
/// call counter. Builder pattern: `.on()`, `.with_default()`.
pub struct MockCollector {
    stage: Stage,
    name: String,
    outcomes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    default: Scripted,
    calls: AtomicU32,
}

impl MockCollector {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            name: format!("mock:{}", stage.key()),
            outcomes: Mutex::new(HashMap::new()),
            default: Scripted::Final(serde_json::json!({ "ok": true })),
            calls: AtomicU32::new(0),
        }
    }

    /// Queue an outcome for one entity; queued outcomes are consumed in
    /// order, then the default applies.
    pub fn on(self, entity_id: &str, outcome: Scripted) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .entry(entity_id.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn with_default(mut self, outcome: Scripted) -> Self {
        self.default = outcome;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageCollector for MockCollector {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, entity_id: &str) -> std::result::Result<NormalizedRecord, CollectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get_mut(entity_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone());

        match outcome {
            Scripted::Final(payload) => Ok(NormalizedRecord::new(entity_id, self.stage, payload)),
            Scripted::Partial(payload) => {
                Ok(NormalizedRecord::new(entity_id, self.stage, payload).partial())
            }
            Scripted::Unavailable => Err(CollectError::SourceUnavailable {
                primary: FetchError::Transient {
                    source_id: self.name.clone(),
                    attempts: 3,
                    message: "connection refused".to_string(),
                },
                fallback: None,
            }),
            Scripted::Rejected(reason) => Err(CollectError::SourceRejected {
                source_id: self.name.clone(),
                reason,
            }),
            Scripted::Budget => Err(CollectError::SourceUnavailable {
                primary: FetchError::BudgetExhausted {
                    source_id: self.name.clone(),
                    budget: 0,
                },
                fallback: None,
            }),
        }
    }
}
