//! End-to-end pipeline scenarios over the in-memory tracker and scripted
//! collectors: no network, no database.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use fastbreak_common::{GameStatus, Scope, Stage, StageStatus};
use fastbreak_pipeline::orchestrator::{Orchestrator, RunOptions};
use fastbreak_pipeline::report::OverallStatus;
use fastbreak_pipeline::testing::{
    schedule_payload, scheduled_game, MemoryTracker, MockCollector, Scripted, TEST_SEASON,
};
use fastbreak_pipeline::traits::CompletionTracker;
use fastbreak_pipeline::PipelineError;
use fastbreak_sources::StageCollector;
use fastbreak_store::StoreError;

struct Harness {
    tracker: Arc<MemoryTracker>,
    mocks: HashMap<Stage, Arc<MockCollector>>,
    orchestrator: Orchestrator,
}

fn options() -> RunOptions {
    RunOptions {
        chunk_size: 100,
        chunk_workers: 1,
        reattempt_partial: true,
        lease_ttl_secs: 3600,
        stages: Stage::ALL.to_vec(),
    }
}

/// Wire all nine stages with mocks; unspecified stages default to a
/// successful final record per entity.
fn harness_with(mut overrides: HashMap<Stage, MockCollector>, options: RunOptions) -> Harness {
    let tracker = Arc::new(MemoryTracker::new());
    let mut mocks = HashMap::new();
    let mut collectors: HashMap<Stage, Arc<dyn StageCollector>> = HashMap::new();
    for stage in Stage::ALL {
        let mock = Arc::new(
            overrides
                .remove(&stage)
                .unwrap_or_else(|| MockCollector::new(stage)),
        );
        collectors.insert(stage, mock.clone() as Arc<dyn StageCollector>);
        mocks.insert(stage, mock);
    }
    let orchestrator = Orchestrator::new(tracker.clone(), collectors, options);
    Harness {
        tracker,
        mocks,
        orchestrator,
    }
}

fn season_scope() -> Scope {
    Scope::Season(TEST_SEASON.to_string())
}

#[tokio::test]
async fn full_run_finalizes_every_stage() {
    let games = vec![
        scheduled_game("g1", "BOS", "NYK", 0, GameStatus::Final),
        scheduled_game("g2", "LAL", "DEN", 1, GameStatus::Final),
    ];
    let mut overrides = HashMap::new();
    overrides.insert(
        Stage::Schedule,
        MockCollector::new(Stage::Schedule)
            .with_default(Scripted::Final(schedule_payload(&games))),
    );
    let h = harness_with(overrides, options());

    let report = h.orchestrator.run(&season_scope()).await.unwrap();

    assert_eq!(report.status, OverallStatus::Complete);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.stages.len(), 9);
    for stage in Stage::ALL {
        for game in ["g1", "g2"] {
            assert_eq!(
                h.tracker.flag_of(stage, game),
                Some(StageStatus::Final),
                "{stage} flag for {game}"
            );
        }
    }
    assert_eq!(
        h.tracker.flag_of(Stage::Schedule, &format!("season:{TEST_SEASON}")),
        Some(StageStatus::Final)
    );

    // One persisted run with a sequenced timeline.
    assert_eq!(h.tracker.saved_run_count(), 1);
    let events = h.tracker.last_run_events().unwrap();
    assert_eq!(events[0]["type"], "run_started");
    assert_eq!(events[0]["seq"], 1);
}

#[tokio::test]
async fn rerun_over_a_finished_season_is_a_noop() {
    let games = vec![scheduled_game("g1", "BOS", "NYK", 0, GameStatus::Final)];
    let mut overrides = HashMap::new();
    overrides.insert(
        Stage::Schedule,
        MockCollector::new(Stage::Schedule)
            .with_default(Scripted::Final(schedule_payload(&games))),
    );
    let h = harness_with(overrides, options());

    let first = h.orchestrator.run(&season_scope()).await.unwrap();
    assert_eq!(first.status, OverallStatus::Complete);
    let calls_after_first: HashMap<Stage, u32> =
        h.mocks.iter().map(|(s, m)| (*s, m.calls())).collect();

    let second = h.orchestrator.run(&season_scope()).await.unwrap();
    assert_eq!(second.status, OverallStatus::Complete);
    assert!(second.stages.iter().all(|s| s.attempted == 0));
    for (stage, mock) in &h.mocks {
        assert_eq!(mock.calls(), calls_after_first[stage], "{stage} re-fetched");
    }
}

#[tokio::test]
async fn partial_play_feed_is_retried_on_the_next_run() {
    let games = vec![scheduled_game("g1", "BOS", "NYK", 0, GameStatus::InProgress)];
    let mut overrides = HashMap::new();
    // Ongoing season: the schedule record itself stays partial.
    overrides.insert(
        Stage::Schedule,
        MockCollector::new(Stage::Schedule)
            .with_default(Scripted::Partial(schedule_payload(&games))),
    );
    overrides.insert(
        Stage::Pbp,
        MockCollector::new(Stage::Pbp).on("g1", Scripted::Partial(json!({ "actions": [] }))),
    );
    let h = harness_with(overrides, options());

    let first = h.orchestrator.run(&season_scope()).await.unwrap();
    assert_eq!(first.status, OverallStatus::Incomplete);
    assert_eq!(first.exit_code(), 1);
    assert_eq!(h.tracker.flag_of(Stage::Pbp, "g1"), Some(StageStatus::Partial));
    // Downstream of the partial play feed nothing was attempted.
    assert_eq!(h.tracker.flag_of(Stage::GameStates, "g1"), Some(StageStatus::Pending));

    // Second run: the scripted partial is consumed, the default final lands.
    let second = h.orchestrator.run(&season_scope()).await.unwrap();
    assert_eq!(h.tracker.flag_of(Stage::Pbp, "g1"), Some(StageStatus::Final));
    assert_eq!(h.tracker.flag_of(Stage::GameStates, "g1"), Some(StageStatus::Final));
    assert_eq!(h.tracker.flag_of(Stage::Predictions, "g1"), Some(StageStatus::Final));
    // The season itself is still running, so the run stays incomplete.
    assert_eq!(second.status, OverallStatus::Incomplete);
}

#[tokio::test]
async fn failed_entity_blocks_its_own_downstream_only() {
    let games = vec![
        scheduled_game("g1", "BOS", "NYK", 0, GameStatus::Final),
        scheduled_game("g2", "LAL", "DEN", 1, GameStatus::Final),
    ];
    let mut overrides = HashMap::new();
    overrides.insert(
        Stage::Schedule,
        MockCollector::new(Stage::Schedule)
            .with_default(Scripted::Final(schedule_payload(&games))),
    );
    overrides.insert(
        Stage::Players,
        MockCollector::new(Stage::Players).on("g1", Scripted::Unavailable),
    );
    let h = harness_with(overrides, options());

    let report = h.orchestrator.run(&season_scope()).await.unwrap();

    assert_eq!(report.status, OverallStatus::Incomplete);
    // g1 keeps its untouched pending flag and is excluded downstream.
    assert_eq!(h.tracker.flag_of(Stage::Players, "g1"), Some(StageStatus::Pending));
    let injuries = report
        .stages
        .iter()
        .find(|s| s.stage == Stage::Injuries)
        .unwrap();
    assert_eq!(injuries.attempted, 1);
    // g2 sails through to the end.
    assert_eq!(h.tracker.flag_of(Stage::Predictions, "g2"), Some(StageStatus::Final));
    assert_eq!(h.tracker.flag_of(Stage::Predictions, "g1"), Some(StageStatus::Pending));
}

#[tokio::test]
async fn storage_fault_aborts_without_partial_writes() {
    let games = vec![
        scheduled_game("g1", "BOS", "NYK", 0, GameStatus::Final),
        scheduled_game("g2", "LAL", "DEN", 1, GameStatus::Final),
    ];
    let mut overrides = HashMap::new();
    overrides.insert(
        Stage::Schedule,
        MockCollector::new(Stage::Schedule)
            .with_default(Scripted::Final(schedule_payload(&games))),
    );
    let h = harness_with(overrides, options());
    // First apply is the schedule chunk; the second (players) blows up.
    h.tracker.fail_apply_at(2);

    let report = h.orchestrator.run(&season_scope()).await.unwrap();

    assert_eq!(report.status, OverallStatus::Aborted);
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.stages.len(), 1);
    // The failed chunk left neither records nor marks behind.
    assert_eq!(h.tracker.record_count(Stage::Players), 0);
    assert_eq!(h.tracker.flag_of(Stage::Players, "g1"), Some(StageStatus::Pending));
    // The run was still persisted and the lease released.
    assert_eq!(h.tracker.saved_run_count(), 1);
    let retry = h.orchestrator.run(&season_scope()).await.unwrap();
    assert_eq!(retry.status, OverallStatus::Complete);
}

#[tokio::test]
async fn concurrent_run_is_refused() {
    let h = harness_with(HashMap::new(), options());
    assert!(h
        .tracker
        .acquire_lease("pipeline", Uuid::new_v4(), 3600)
        .await
        .unwrap());

    let err = h.orchestrator.run(&season_scope()).await.unwrap_err();
    assert!(matches!(err, PipelineError::LeaseHeld));
    assert_eq!(h.tracker.saved_run_count(), 0);
}

#[tokio::test]
async fn exhausted_budget_stops_the_stage_and_leaves_the_rest_pending() {
    let games = vec![
        scheduled_game("g1", "BOS", "NYK", 0, GameStatus::Final),
        scheduled_game("g2", "LAL", "DEN", 1, GameStatus::Final),
        scheduled_game("g3", "MIA", "CHI", 2, GameStatus::Final),
    ];
    let mut overrides = HashMap::new();
    overrides.insert(
        Stage::Schedule,
        MockCollector::new(Stage::Schedule)
            .with_default(Scripted::Final(schedule_payload(&games))),
    );
    overrides.insert(
        Stage::Betting,
        MockCollector::new(Stage::Betting).on("g2", Scripted::Budget),
    );
    let mut opts = options();
    opts.chunk_size = 1; // one game per chunk, so the stop is observable
    let h = harness_with(overrides, opts);

    let report = h.orchestrator.run(&season_scope()).await.unwrap();

    assert_eq!(report.status, OverallStatus::Incomplete);
    let betting = report
        .stages
        .iter()
        .find(|s| s.stage == Stage::Betting)
        .unwrap();
    assert!(betting.stopped_early);
    assert_eq!(betting.finalized, 1);
    assert_eq!(betting.skipped, 2);
    // g3's chunk never ran.
    assert_eq!(h.mocks[&Stage::Betting].calls(), 2);
    assert_eq!(h.tracker.flag_of(Stage::Betting, "g3"), Some(StageStatus::Pending));
    // Downstream only sees the game that got its lines.
    let pbp = report.stages.iter().find(|s| s.stage == Stage::Pbp).unwrap();
    assert_eq!(pbp.attempted, 1);
}

#[tokio::test]
async fn postponed_games_are_left_alone_after_the_schedule_sync() {
    let games = vec![
        scheduled_game("g1", "BOS", "NYK", 0, GameStatus::Final),
        scheduled_game("g2", "LAL", "DEN", 1, GameStatus::Postponed),
    ];
    let mut overrides = HashMap::new();
    overrides.insert(
        Stage::Schedule,
        MockCollector::new(Stage::Schedule)
            .with_default(Scripted::Final(schedule_payload(&games))),
    );
    let h = harness_with(overrides, options());

    let report = h.orchestrator.run(&season_scope()).await.unwrap();

    // The postponed game is not owed work, so the run is complete.
    assert_eq!(report.status, OverallStatus::Complete);
    assert_eq!(h.tracker.flag_of(Stage::Schedule, "g2"), Some(StageStatus::Final));
    assert_eq!(h.tracker.flag_of(Stage::Players, "g2"), Some(StageStatus::Pending));
    let players = report
        .stages
        .iter()
        .find(|s| s.stage == Stage::Players)
        .unwrap();
    assert_eq!(players.attempted, 1);
}

#[tokio::test]
async fn explicit_game_scope_limits_selection() {
    let h = harness_with(HashMap::new(), options());
    h.tracker
        .seed_game(&scheduled_game("g1", "BOS", "NYK", 0, GameStatus::Final));
    h.tracker
        .seed_game(&scheduled_game("g2", "LAL", "DEN", 1, GameStatus::Final));

    let scope = Scope::Games(vec!["g1".to_string()]);
    let report = h.orchestrator.run(&scope).await.unwrap();

    assert_eq!(report.status, OverallStatus::Complete);
    assert_eq!(h.tracker.flag_of(Stage::Predictions, "g1"), Some(StageStatus::Final));
    assert_eq!(h.tracker.flag_of(Stage::Players, "g2"), Some(StageStatus::Pending));
    let schedule = report
        .stages
        .iter()
        .find(|s| s.stage == Stage::Schedule)
        .unwrap();
    assert_eq!(schedule.attempted, 0);
}

#[tokio::test]
async fn cancellation_is_observed_before_any_new_work() {
    let games = vec![scheduled_game("g1", "BOS", "NYK", 0, GameStatus::Final)];
    let mut overrides = HashMap::new();
    overrides.insert(
        Stage::Schedule,
        MockCollector::new(Stage::Schedule)
            .with_default(Scripted::Final(schedule_payload(&games))),
    );
    let h = harness_with(overrides, options());
    h.orchestrator.cancellation_token().cancel();

    let report = h.orchestrator.run(&season_scope()).await.unwrap();

    // The run stops cleanly and honestly reports unfinished work.
    assert_eq!(report.status, OverallStatus::Incomplete);
    assert!(report.stages.is_empty());
    assert_eq!(h.mocks[&Stage::Schedule].calls(), 0);
    assert_eq!(h.tracker.saved_run_count(), 1);
}

#[tokio::test]
async fn stage_subset_runs_only_the_requested_stages() {
    let games = vec![scheduled_game("g1", "BOS", "NYK", 0, GameStatus::Final)];
    let mut overrides = HashMap::new();
    overrides.insert(
        Stage::Schedule,
        MockCollector::new(Stage::Schedule)
            .with_default(Scripted::Final(schedule_payload(&games))),
    );
    let mut opts = options();
    opts.stages = vec![Stage::Schedule, Stage::Players];
    let h = harness_with(overrides, opts);

    let report = h.orchestrator.run(&season_scope()).await.unwrap();

    assert_eq!(report.status, OverallStatus::Complete);
    assert_eq!(report.stages.len(), 2);
    assert_eq!(h.tracker.flag_of(Stage::Players, "g1"), Some(StageStatus::Final));
    assert_eq!(h.tracker.flag_of(Stage::Injuries, "g1"), Some(StageStatus::Pending));
    assert_eq!(h.mocks[&Stage::Injuries].calls(), 0);
}

#[tokio::test]
async fn final_flags_are_never_downgraded_by_later_chunks() {
    let h = harness_with(HashMap::new(), options());
    h.tracker
        .seed_game(&scheduled_game("g1", "BOS", "NYK", 0, GameStatus::Final));

    let final_write = fastbreak_common::ChunkWrite {
        records: vec![],
        marks: vec![("g1".to_string(), StageStatus::Final)],
    };
    h.tracker.apply_chunk(Stage::Players, &final_write).await.unwrap();

    let downgrade = fastbreak_common::ChunkWrite {
        records: vec![],
        marks: vec![("g1".to_string(), StageStatus::Partial)],
    };
    h.tracker.apply_chunk(Stage::Players, &downgrade).await.unwrap();

    assert_eq!(h.tracker.flag_of(Stage::Players, "g1"), Some(StageStatus::Final));
}

#[tokio::test]
async fn manual_downgrade_of_a_final_flag_requires_force() {
    let h = harness_with(HashMap::new(), options());
    h.tracker
        .seed_game(&scheduled_game("g1", "BOS", "NYK", 0, GameStatus::Final));
    h.tracker
        .mark(Stage::Players, "g1", StageStatus::Final, false)
        .await
        .unwrap();

    let err = h
        .tracker
        .mark(Stage::Players, "g1", StageStatus::Pending, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: StageStatus::Final,
            to: StageStatus::Pending,
            ..
        }
    ));
    assert_eq!(h.tracker.flag_of(Stage::Players, "g1"), Some(StageStatus::Final));

    // Forced repair resets the flag, putting the entity back in the next
    // run's pending set.
    h.tracker
        .mark(Stage::Players, "g1", StageStatus::Pending, true)
        .await
        .unwrap();
    assert_eq!(h.tracker.flag_of(Stage::Players, "g1"), Some(StageStatus::Pending));
    let pending = h
        .tracker
        .pending(Stage::Players, &season_scope(), true)
        .await
        .unwrap();
    assert_eq!(pending, vec!["g1".to_string()]);
}
