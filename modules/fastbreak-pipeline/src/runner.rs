//! Stage execution: select pending entities, fetch them in chunks, persist
//! each chunk atomically, tally the outcome.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fastbreak_common::{ChunkWrite, Scope, Stage, StageStatus};
use fastbreak_sources::{CollectError, FetchError, StageCollector};

use crate::error::{PipelineError, Result};
use crate::report::StageReport;
use crate::run_log::{EventKind, RunLog};
use crate::traits::CompletionTracker;

/// Entities fetched concurrently inside one chunk. The real throttle is the
/// source client's semaphore; this only bounds in-flight futures.
const ENTITY_CONCURRENCY: usize = 8;

pub struct StageRunner {
    tracker: Arc<dyn CompletionTracker>,
    chunk_size: usize,
    chunk_workers: usize,
    reattempt_partial: bool,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ChunkOutcome {
    records: usize,
    marks: usize,
    finalized: usize,
    partial: usize,
    failed: Vec<(String, String)>,
    /// Entities that hit the exhausted call budget.
    budget_skipped: usize,
    budget_source: Option<String>,
}

impl StageRunner {
    pub fn new(
        tracker: Arc<dyn CompletionTracker>,
        chunk_size: usize,
        chunk_workers: usize,
        reattempt_partial: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tracker,
            chunk_size: chunk_size.max(1),
            chunk_workers: chunk_workers.max(1),
            reattempt_partial,
            cancel,
        }
    }

    /// Run one stage over everything in scope that still owes it.
    pub async fn run_stage(
        &self,
        stage: Stage,
        scope: &Scope,
        collector: &dyn StageCollector,
        log: &mut RunLog,
    ) -> Result<StageReport> {
        let pending = self
            .tracker
            .pending(stage, scope, self.reattempt_partial)
            .await?;
        log.push(EventKind::StageStarted {
            stage,
            pending: pending.len(),
        });

        let mut report = StageReport::new(stage, pending.len());
        if pending.is_empty() {
            info!(stage = %stage, "Nothing pending, stage is a no-op");
            return Ok(report);
        }
        info!(stage = %stage, pending = pending.len(), source = collector.source_name(), "Stage starting");

        let chunks: Vec<Vec<String>> = pending
            .chunks(self.chunk_size)
            .map(|c| c.to_vec())
            .collect();

        if self.chunk_workers == 1 {
            self.run_sequential(stage, collector, &chunks, &mut report, log)
                .await?;
        } else {
            self.run_parallel(stage, collector, &chunks, &mut report, log)
                .await?;
        }

        log.push(EventKind::StageFinished {
            stage,
            finalized: report.finalized,
            partial: report.partial,
            failed: report.failed,
            skipped: report.skipped,
        });
        info!(
            stage = %stage,
            finalized = report.finalized,
            partial = report.partial,
            failed = report.failed,
            skipped = report.skipped,
            "Stage finished"
        );
        Ok(report)
    }

    async fn run_sequential(
        &self,
        stage: Stage,
        collector: &dyn StageCollector,
        chunks: &[Vec<String>],
        report: &mut StageReport,
        log: &mut RunLog,
    ) -> Result<()> {
        for (idx, chunk) in chunks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.skipped += chunks[idx..].iter().map(Vec::len).sum::<usize>();
                report.stopped_early = true;
                warn!(stage = %stage, "Cancelled, remaining chunks skipped");
                break;
            }

            let outcome = self.process_chunk(stage, collector, chunk).await?;
            let budget_source = outcome.budget_source.clone();
            self.absorb(stage, idx, outcome, report, log);

            if let Some(source) = budget_source {
                let remaining: usize = chunks[idx + 1..].iter().map(Vec::len).sum();
                report.skipped += remaining;
                report.stopped_early = true;
                log.push(EventKind::BudgetStopped {
                    stage,
                    source: source.clone(),
                    remaining,
                });
                warn!(stage = %stage, source, remaining, "Call budget exhausted, stage stopped");
                break;
            }

            // Give other tasks a turn between chunks on long stages.
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn run_parallel(
        &self,
        stage: Stage,
        collector: &dyn StageCollector,
        chunks: &[Vec<String>],
        report: &mut StageReport,
        log: &mut RunLog,
    ) -> Result<()> {
        // Each chunk future checks the token before doing any work, so a
        // cancel lets in-flight chunks finish while unstarted ones skip.
        let mut stream = futures::stream::iter(chunks.iter().enumerate().map(|(idx, chunk)| {
            let runner = self;
            async move {
                if runner.cancel.is_cancelled() {
                    return (idx, chunk.len(), Ok(None));
                }
                let result = runner.process_chunk(stage, collector, chunk).await;
                (idx, chunk.len(), result.map(Some))
            }
        }))
        .buffer_unordered(self.chunk_workers);

        let mut budget_source = None;
        let mut cancelled = false;
        while let Some((idx, size, result)) = stream.next().await {
            match result? {
                Some(outcome) => {
                    if outcome.budget_source.is_some() {
                        budget_source = outcome.budget_source.clone();
                    }
                    self.absorb(stage, idx, outcome, report, log);
                }
                None => {
                    cancelled = true;
                    report.skipped += size;
                }
            }
        }
        if cancelled {
            report.stopped_early = true;
            warn!(stage = %stage, "Cancelled, remaining chunks skipped");
        }

        // Chunks were already in flight, so nothing gets skipped here; the
        // stage is still marked stopped so the run reads as incomplete.
        if let Some(source) = budget_source {
            report.stopped_early = true;
            log.push(EventKind::BudgetStopped {
                stage,
                source: source.clone(),
                remaining: 0,
            });
            warn!(stage = %stage, source, "Call budget exhausted during parallel chunks");
        }
        Ok(())
    }

    fn absorb(
        &self,
        stage: Stage,
        idx: usize,
        outcome: ChunkOutcome,
        report: &mut StageReport,
        log: &mut RunLog,
    ) {
        report.finalized += outcome.finalized;
        report.partial += outcome.partial;
        report.failed += outcome.failed.len();
        report.skipped += outcome.budget_skipped;

        log.push(EventKind::ChunkApplied {
            stage,
            chunk: idx,
            records: outcome.records,
            marks: outcome.marks,
        });
        for (entity_id, error) in outcome.failed {
            warn!(stage = %stage, entity_id, error, "Entity failed");
            log.push(EventKind::EntityFailed {
                stage,
                entity_id,
                error,
            });
        }
    }

    /// Fetch every entity in the chunk, then persist records and flag marks
    /// as one transaction. Entity failures are tallied, never partially
    /// written; a storage fault propagates and aborts the run.
    async fn process_chunk(
        &self,
        stage: Stage,
        collector: &dyn StageCollector,
        chunk: &[String],
    ) -> Result<ChunkOutcome> {
        let mut write = ChunkWrite::default();
        let mut outcome = ChunkOutcome::default();

        let mut results = futures::stream::iter(chunk.iter().map(|entity_id| async move {
            (entity_id.clone(), collector.collect(entity_id).await)
        }))
        .buffer_unordered(ENTITY_CONCURRENCY);

        while let Some((entity_id, result)) = results.next().await {
            match result {
                Ok(record) => {
                    match record.status() {
                        StageStatus::Partial => outcome.partial += 1,
                        _ => outcome.finalized += 1,
                    }
                    write.marks.push((entity_id, record.status()));
                    write.records.push(record);
                }
                Err(CollectError::Storage(msg)) => {
                    return Err(PipelineError::DerivedStorage(msg));
                }
                Err(CollectError::SourceUnavailable {
                    primary: FetchError::BudgetExhausted { source_id, .. },
                    ..
                }) => {
                    // Left pending; the next run gets a fresh budget.
                    outcome.budget_skipped += 1;
                    outcome.budget_source = Some(source_id);
                }
                Err(error) => {
                    outcome.failed.push((entity_id, error.to_string()));
                }
            }
        }
        drop(results);

        self.tracker.apply_chunk(stage, &write).await?;
        outcome.records = write.records.len();
        outcome.marks = write.marks.len();
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scheduled_game, MemoryTracker, MockCollector, TEST_SEASON};
    use async_trait::async_trait;
    use fastbreak_common::{GameStatus, NormalizedRecord};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn seeded_tracker(games: usize) -> Arc<MemoryTracker> {
        let tracker = Arc::new(MemoryTracker::new());
        for i in 0..games {
            tracker.seed_game(&scheduled_game(
                &format!("002240000{i}"),
                "BOS",
                "NYK",
                i as i64,
                GameStatus::Scheduled,
            ));
        }
        tracker
    }

    /// Cancels the shared token from inside its first collect call.
    struct CancelOnFirstCall {
        cancel: CancellationToken,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StageCollector for CancelOnFirstCall {
        fn source_name(&self) -> &str {
            "mock:players"
        }

        async fn collect(&self, entity_id: &str) -> std::result::Result<NormalizedRecord, CollectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            Ok(NormalizedRecord::new(
                entity_id,
                Stage::Players,
                serde_json::json!({ "ok": true }),
            ))
        }
    }

    #[tokio::test]
    async fn parallel_chunks_finalize_everything_in_scope() {
        let tracker = seeded_tracker(5);
        let collector = MockCollector::new(Stage::Players);
        let runner = StageRunner::new(tracker.clone(), 2, 3, true, CancellationToken::new());
        let mut log = RunLog::new();

        let report = runner
            .run_stage(
                Stage::Players,
                &Scope::Season(TEST_SEASON.to_string()),
                &collector,
                &mut log,
            )
            .await
            .unwrap();

        assert_eq!(report.attempted, 5);
        assert_eq!(report.finalized, 5);
        assert!(!report.stopped_early);
        assert_eq!(collector.calls(), 5);
        for i in 0..5 {
            assert_eq!(
                tracker.flag_of(Stage::Players, &format!("002240000{i}")),
                Some(StageStatus::Final)
            );
        }
    }

    #[tokio::test]
    async fn parallel_chunks_stop_starting_work_once_cancelled() {
        let tracker = seeded_tracker(6);
        let cancel = CancellationToken::new();
        let collector = CancelOnFirstCall {
            cancel: cancel.clone(),
            calls: AtomicU32::new(0),
        };
        let runner = StageRunner::new(tracker, 1, 2, true, cancel);
        let mut log = RunLog::new();

        let report = runner
            .run_stage(
                Stage::Players,
                &Scope::Season(TEST_SEASON.to_string()),
                &collector,
                &mut log,
            )
            .await
            .unwrap();

        // At most the in-flight chunks collect; everything queued behind
        // them is skipped and left pending.
        assert!(report.stopped_early);
        let calls = collector.calls.load(Ordering::SeqCst);
        assert!(calls <= 2, "collected {calls} entities after cancel");
        assert_eq!(report.finalized + report.skipped, 6);
        assert!(report.skipped >= 4);
    }
}
