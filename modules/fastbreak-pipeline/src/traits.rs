// Trait abstraction over the Postgres store.
//
// CompletionTracker is everything the runner and orchestrator need from
// persistence: entity selection, atomic chunk writes, flag reads, stored
// payloads for derived stages, the run lease, and the run log. MemoryTracker
// in `testing` implements the same contract in-memory, so the whole pipeline
// runs under `cargo test` with no database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use fastbreak_common::{ChunkWrite, GameRow, NormalizedRecord, Scope, Stage, StageStatus};
use fastbreak_store::{GameStore, Result, RunRow};

#[async_trait]
pub trait CompletionTracker: Send + Sync {
    /// Entities in scope still owing `stage`, dependency-gated.
    async fn pending(
        &self,
        stage: Stage,
        scope: &Scope,
        reattempt_partial: bool,
    ) -> Result<Vec<String>>;

    /// Persist one chunk's records and flag marks atomically.
    async fn apply_chunk(&self, stage: Stage, write: &ChunkWrite) -> Result<()>;

    /// Write one flag directly (repair tooling). Downgrading a `final` flag
    /// fails with `InvalidTransition` unless `force` is set.
    async fn mark(
        &self,
        stage: Stage,
        entity_id: &str,
        status: StageStatus,
        force: bool,
    ) -> Result<()>;

    async fn flag(&self, stage: Stage, entity_id: &str) -> Result<Option<StageStatus>>;

    /// Stored payload from an upstream stage.
    async fn record_payload(
        &self,
        stage: Stage,
        entity_id: &str,
    ) -> Result<Option<NormalizedRecord>>;

    async fn game(&self, game_id: &str) -> Result<Option<GameRow>>;

    /// Most recent completed games for a team before a cutoff.
    async fn completed_games_before(
        &self,
        team: &str,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>>;

    async fn acquire_lease(&self, key: &str, holder: Uuid, ttl_secs: i64) -> Result<bool>;

    async fn release_lease(&self, key: &str, holder: Uuid) -> Result<()>;

    async fn save_run(&self, run: &RunRow) -> Result<()>;
}

#[async_trait]
impl CompletionTracker for GameStore {
    async fn pending(
        &self,
        stage: Stage,
        scope: &Scope,
        reattempt_partial: bool,
    ) -> Result<Vec<String>> {
        GameStore::pending(self, stage, scope, reattempt_partial).await
    }

    async fn apply_chunk(&self, stage: Stage, write: &ChunkWrite) -> Result<()> {
        GameStore::apply_chunk(self, stage, write).await
    }

    async fn mark(
        &self,
        stage: Stage,
        entity_id: &str,
        status: StageStatus,
        force: bool,
    ) -> Result<()> {
        GameStore::mark(self, stage, entity_id, status, force).await
    }

    async fn flag(&self, stage: Stage, entity_id: &str) -> Result<Option<StageStatus>> {
        GameStore::flag(self, stage, entity_id).await
    }

    async fn record_payload(
        &self,
        stage: Stage,
        entity_id: &str,
    ) -> Result<Option<NormalizedRecord>> {
        GameStore::record_payload(self, stage, entity_id).await
    }

    async fn game(&self, game_id: &str) -> Result<Option<GameRow>> {
        GameStore::game(self, game_id).await
    }

    async fn completed_games_before(
        &self,
        team: &str,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        GameStore::completed_games_before(self, team, before, limit).await
    }

    async fn acquire_lease(&self, key: &str, holder: Uuid, ttl_secs: i64) -> Result<bool> {
        GameStore::acquire_lease(self, key, holder, ttl_secs).await
    }

    async fn release_lease(&self, key: &str, holder: Uuid) -> Result<()> {
        GameStore::release_lease(self, key, holder).await
    }

    async fn save_run(&self, run: &RunRow) -> Result<()> {
        GameStore::save_run(self, run).await
    }
}
