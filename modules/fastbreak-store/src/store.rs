// Postgres persistence for the pipeline. All flag writes and record upserts
// go through here; `apply_chunk` is the transactional boundary the rest of
// the system relies on.

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use fastbreak_common::{
    ChunkWrite, GameRow, GameStatus, NormalizedRecord, Scope, ScheduledGame, Stage, StageStatus,
};

use crate::error::{Result, StoreError};

pub struct GameStore {
    pool: PgPool,
}

/// One finished run, ready to persist to `pipeline_runs`.
pub struct RunRow {
    pub run_id: Uuid,
    pub scope: String,
    pub started_at: DateTime<Utc>,
    pub report: serde_json::Value,
    pub events: serde_json::Value,
}

impl GameStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Ok(())
    }

    // --- Entity selection -------------------------------------------------

    /// Entities in scope still owing `stage`, filtered to those whose
    /// dependency stage is already `final`. Entities with unsatisfied
    /// dependencies are excluded rather than attempted and failed.
    pub async fn pending(
        &self,
        stage: Stage,
        scope: &Scope,
        reattempt_partial: bool,
    ) -> Result<Vec<String>> {
        if stage == Stage::Schedule {
            return self.pending_schedule(scope, reattempt_partial).await;
        }

        let flag_statuses = selectable_statuses(reattempt_partial);
        let game_statuses: Vec<String> = [
            GameStatus::Scheduled,
            GameStatus::InProgress,
            GameStatus::Final,
            GameStatus::Postponed,
        ]
        .into_iter()
        .filter(|s| stage.visits(*s))
        .map(|s| s.key().to_string())
        .collect();

        // Every non-schedule stage has exactly one upstream stage.
        let dep = stage
            .dependency()
            .expect("non-schedule stage has a dependency");

        let base = r#"
            SELECT f.entity_id
            FROM game_stage_flags f
            JOIN games g ON g.game_id = f.entity_id
            WHERE f.stage = $1
              AND f.status = ANY($2)
              AND g.status = ANY($3)
              AND EXISTS (
                  SELECT 1 FROM game_stage_flags d
                  WHERE d.entity_id = f.entity_id
                    AND d.stage = $4
                    AND d.status = 'final'
              )
        "#;

        let rows = match scope {
            Scope::Season(season) => {
                sqlx::query(&format!("{base} AND g.season = $5 ORDER BY g.tipoff_utc"))
                    .bind(stage.key())
                    .bind(&flag_statuses)
                    .bind(&game_statuses)
                    .bind(dep.key())
                    .bind(season)
                    .fetch_all(&self.pool)
                    .await?
            }
            Scope::Games(ids) => {
                sqlx::query(&format!(
                    "{base} AND g.game_id = ANY($5) ORDER BY g.tipoff_utc"
                ))
                .bind(stage.key())
                .bind(&flag_statuses)
                .bind(&game_statuses)
                .bind(dep.key())
                .bind(ids)
                .fetch_all(&self.pool)
                .await?
            }
            Scope::Incomplete => {
                sqlx::query(&format!("{base} ORDER BY g.tipoff_utc"))
                    .bind(stage.key())
                    .bind(&flag_statuses)
                    .bind(&game_statuses)
                    .bind(dep.key())
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }

    /// The schedule stage runs over synthetic season entities. An ongoing
    /// season sits at `partial` so it is re-synced every run; a season whose
    /// games are all final stays `final` and drops out of selection.
    async fn pending_schedule(&self, scope: &Scope, reattempt_partial: bool) -> Result<Vec<String>> {
        match scope {
            Scope::Season(season) => {
                let entity = season_entity(season);
                let row = sqlx::query(
                    "SELECT status FROM game_stage_flags WHERE entity_id = $1 AND stage = 'schedule'",
                )
                .bind(&entity)
                .fetch_optional(&self.pool)
                .await?;

                let due = match row {
                    None => true,
                    Some(r) => {
                        let status = parse_status(&r.get::<String, _>(0));
                        match status {
                            StageStatus::Pending => true,
                            StageStatus::Partial => reattempt_partial,
                            StageStatus::Final => false,
                        }
                    }
                };
                Ok(if due { vec![entity] } else { vec![] })
            }
            // Explicit id scopes assume games were already discovered by a
            // prior season-scoped run.
            Scope::Games(_) => Ok(vec![]),
            Scope::Incomplete => {
                let statuses = selectable_statuses(reattempt_partial);
                let rows = sqlx::query(
                    r#"
                    SELECT entity_id FROM game_stage_flags
                    WHERE stage = 'schedule'
                      AND entity_id LIKE 'season:%'
                      AND status = ANY($1)
                    ORDER BY entity_id
                    "#,
                )
                .bind(&statuses)
                .fetch_all(&self.pool)
                .await?;
                Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
            }
        }
    }

    // --- Chunk persistence ------------------------------------------------

    /// Apply one chunk's records and flag marks in a single transaction.
    /// Schedule payloads additionally expand into game rows and seed the
    /// per-game flag rows.
    pub async fn apply_chunk(&self, stage: Stage, write: &ChunkWrite) -> Result<()> {
        if write.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for record in &write.records {
            if stage == Stage::Schedule {
                Self::expand_schedule(&mut tx, record).await?;
            }
            sqlx::query(
                r#"
                INSERT INTO stage_records (entity_id, stage, payload, complete, fetched_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (entity_id, stage) DO UPDATE
                    SET payload = EXCLUDED.payload,
                        complete = EXCLUDED.complete,
                        fetched_at = EXCLUDED.fetched_at
                "#,
            )
            .bind(&record.entity_id)
            .bind(record.stage.key())
            .bind(&record.payload)
            .bind(record.complete)
            .bind(record.fetched_at)
            .execute(&mut *tx)
            .await?;
        }

        for (entity_id, status) in &write.marks {
            // Within a chunk an attempted downgrade is skipped and logged
            // rather than poisoning its chunk-mates' writes; the standalone
            // `mark` path is the one that surfaces InvalidTransition.
            Self::mark_in_tx(&mut tx, stage, entity_id, *status, false, true).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Upsert the games listed in a schedule record and seed their flag rows.
    async fn expand_schedule(
        tx: &mut Transaction<'_, Postgres>,
        record: &NormalizedRecord,
    ) -> Result<()> {
        let games: Vec<ScheduledGame> = match record.payload.get("games") {
            Some(v) => serde_json::from_value(v.clone())?,
            None => return Ok(()),
        };

        for game in &games {
            sqlx::query(
                r#"
                INSERT INTO games (game_id, season, home_team, away_team, tipoff_utc, status)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (game_id) DO UPDATE
                    SET status = EXCLUDED.status,
                        tipoff_utc = EXCLUDED.tipoff_utc,
                        updated_at = now()
                "#,
            )
            .bind(&game.game_id)
            .bind(&game.season)
            .bind(&game.home_team)
            .bind(&game.away_team)
            .bind(game.tipoff_utc)
            .bind(game.status.key())
            .execute(&mut **tx)
            .await?;

            for stage in Stage::ALL {
                sqlx::query(
                    r#"
                    INSERT INTO game_stage_flags (entity_id, stage, status)
                    VALUES ($1, $2, 'pending')
                    ON CONFLICT (entity_id, stage) DO NOTHING
                    "#,
                )
                .bind(&game.game_id)
                .bind(stage.key())
                .execute(&mut **tx)
                .await?;
            }

            // The game row itself is the schedule stage's output for this
            // entity, so its schedule flag finalizes here.
            Self::mark_in_tx(tx, Stage::Schedule, &game.game_id, StageStatus::Final, false, true)
                .await?;
        }

        debug!(count = games.len(), "Schedule payload expanded into game rows");
        Ok(())
    }

    // --- Flag writes ------------------------------------------------------

    /// Write one flag. The only mutation path for completion state outside
    /// `apply_chunk`. Downgrading a `final` flag requires `force` (repair
    /// tooling only) and otherwise fails with `InvalidTransition`.
    pub async fn mark(
        &self,
        stage: Stage,
        entity_id: &str,
        status: StageStatus,
        force: bool,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::mark_in_tx(&mut tx, stage, entity_id, status, force, false).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        stage: Stage,
        entity_id: &str,
        to: StageStatus,
        force: bool,
        lenient: bool,
    ) -> Result<()> {
        let current = sqlx::query(
            "SELECT status FROM game_stage_flags WHERE entity_id = $1 AND stage = $2 FOR UPDATE",
        )
        .bind(entity_id)
        .bind(stage.key())
        .fetch_optional(&mut **tx)
        .await?
        .map(|r| parse_status(&r.get::<String, _>(0)));

        if let Some(from) = current {
            if !force && !from.allows(to) {
                if lenient {
                    warn!(entity_id, stage = %stage, %from, %to, "Skipping invalid flag transition");
                    return Ok(());
                }
                return Err(StoreError::InvalidTransition {
                    entity_id: entity_id.to_string(),
                    stage,
                    from,
                    to,
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO game_stage_flags (entity_id, stage, status, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (entity_id, stage) DO UPDATE
                SET status = EXCLUDED.status, updated_at = now()
            "#,
        )
        .bind(entity_id)
        .bind(stage.key())
        .bind(to.key())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    // --- Reads ------------------------------------------------------------

    /// Current flag for one (entity, stage), if a row exists.
    pub async fn flag(&self, stage: Stage, entity_id: &str) -> Result<Option<StageStatus>> {
        let row = sqlx::query(
            "SELECT status FROM game_stage_flags WHERE entity_id = $1 AND stage = $2",
        )
        .bind(entity_id)
        .bind(stage.key())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| parse_status(&r.get::<String, _>(0))))
    }

    /// Stored payload for a derived stage to build on.
    pub async fn record_payload(
        &self,
        stage: Stage,
        entity_id: &str,
    ) -> Result<Option<NormalizedRecord>> {
        let row = sqlx::query(
            r#"
            SELECT payload, complete, fetched_at FROM stage_records
            WHERE entity_id = $1 AND stage = $2
            "#,
        )
        .bind(entity_id)
        .bind(stage.key())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| NormalizedRecord {
            entity_id: entity_id.to_string(),
            stage,
            payload: r.get("payload"),
            complete: r.get("complete"),
            fetched_at: r.get("fetched_at"),
        }))
    }

    pub async fn game(&self, game_id: &str) -> Result<Option<GameRow>> {
        let row = sqlx::query(
            r#"
            SELECT game_id, season, home_team, away_team, tipoff_utc, status, updated_at
            FROM games WHERE game_id = $1
            "#,
        )
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| GameRow {
            game_id: r.get("game_id"),
            season: r.get("season"),
            home_team: r.get("home_team"),
            away_team: r.get("away_team"),
            tipoff_utc: r.get("tipoff_utc"),
            status: parse_game_status(&r.get::<String, _>("status")),
            updated_at: r.get("updated_at"),
        }))
    }

    /// Most recent completed games for a team before a cutoff. Used by the
    /// pre-game feature builder.
    pub async fn completed_games_before(
        &self,
        team: &str,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT game_id FROM games
            WHERE (home_team = $1 OR away_team = $1)
              AND tipoff_utc < $2
              AND status = 'final'
            ORDER BY tipoff_utc DESC
            LIMIT $3
            "#,
        )
        .bind(team)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }

    // --- Run lease --------------------------------------------------------

    /// Try to acquire the scope lease. Returns false if another unexpired
    /// holder has it. Expired leases are stolen so a crashed run cannot
    /// wedge the pipeline.
    pub async fn acquire_lease(&self, key: &str, holder: Uuid, ttl_secs: i64) -> Result<bool> {
        let expires_at = Utc::now() + Duration::seconds(ttl_secs);
        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_leases (key, holder, acquired_at, expires_at)
            VALUES ($1, $2, now(), $3)
            ON CONFLICT (key) DO UPDATE
                SET holder = EXCLUDED.holder,
                    acquired_at = now(),
                    expires_at = EXCLUDED.expires_at
                WHERE pipeline_leases.expires_at < now()
            "#,
        )
        .bind(key)
        .bind(holder)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Release the lease if we still hold it.
    pub async fn release_lease(&self, key: &str, holder: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM pipeline_leases WHERE key = $1 AND holder = $2")
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Run log ----------------------------------------------------------

    /// Persist a finished run's report and event timeline.
    pub async fn save_run(&self, run: &RunRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (run_id, scope, started_at, finished_at, report, events)
            VALUES ($1, $2, $3, now(), $4, $5)
            "#,
        )
        .bind(run.run_id)
        .bind(&run.scope)
        .bind(run.started_at)
        .bind(&run.report)
        .bind(&run.events)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn selectable_statuses(reattempt_partial: bool) -> Vec<String> {
    if reattempt_partial {
        vec!["pending".to_string(), "partial".to_string()]
    } else {
        vec!["pending".to_string()]
    }
}

pub(crate) fn season_entity(season: &str) -> String {
    format!("season:{season}")
}

fn parse_status(key: &str) -> StageStatus {
    StageStatus::from_key(key).unwrap_or(StageStatus::Pending)
}

fn parse_game_status(key: &str) -> GameStatus {
    GameStatus::from_key(key).unwrap_or(GameStatus::Scheduled)
}
