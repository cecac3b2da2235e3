use async_trait::async_trait;
use tracing::warn;

use fastbreak_common::NormalizedRecord;

use crate::error::{CollectError, FetchError};

/// One stage's source adapter: given an entity id, fetch from the upstream
/// source and normalize into the canonical record shape.
#[async_trait]
pub trait StageCollector: Send + Sync {
    fn source_name(&self) -> &str;

    /// Whether a secondary source backs this one.
    fn has_fallback(&self) -> bool {
        false
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError>;
}

/// Tiered collection: try the primary source, fall back to a secondary when
/// the primary fails or returns an incomplete record. Both failures are
/// carried in the resulting error so the run log shows the whole story.
pub struct FallbackCollector {
    primary: Box<dyn StageCollector>,
    fallback: Box<dyn StageCollector>,
}

impl FallbackCollector {
    pub fn new(primary: Box<dyn StageCollector>, fallback: Box<dyn StageCollector>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl StageCollector for FallbackCollector {
    fn source_name(&self) -> &str {
        self.primary.source_name()
    }

    fn has_fallback(&self) -> bool {
        true
    }

    async fn collect(&self, entity_id: &str) -> Result<NormalizedRecord, CollectError> {
        let primary_err = match self.primary.collect(entity_id).await {
            Ok(record) if record.complete => return Ok(record),
            Ok(partial) => {
                // The fallback gets one shot at a complete record; the
                // primary's partial one is still usable if it can't do better.
                warn!(
                    entity_id,
                    primary = self.primary.source_name(),
                    fallback = self.fallback.source_name(),
                    "Primary record incomplete, trying fallback"
                );
                return match self.fallback.collect(entity_id).await {
                    Ok(record) if record.complete => Ok(record),
                    _ => Ok(partial),
                };
            }
            Err(e) => e,
        };

        warn!(
            entity_id,
            primary = self.primary.source_name(),
            fallback = self.fallback.source_name(),
            error = %primary_err,
            "Primary source failed, trying fallback"
        );

        match self.fallback.collect(entity_id).await {
            Ok(record) => Ok(record),
            Err(fallback_err) => Err(merge_errors(primary_err, fallback_err)),
        }
    }
}

fn merge_errors(primary: CollectError, fallback: CollectError) -> CollectError {
    match (primary, fallback) {
        // Storage faults always win: they must abort the run.
        (storage @ CollectError::Storage(_), _) | (_, storage @ CollectError::Storage(_)) => {
            storage
        }
        // Both unreachable: unavailable, with the fallback's fetch error
        // attached when we have one.
        (
            CollectError::SourceUnavailable { primary, .. },
            CollectError::SourceUnavailable {
                primary: fallback, ..
            },
        ) => CollectError::SourceUnavailable {
            primary,
            fallback: Some(fallback),
        },
        (
            CollectError::SourceUnavailable { primary, .. },
            CollectError::SourceRejected { source_id, reason },
        ) => CollectError::SourceUnavailable {
            primary,
            fallback: Some(FetchError::Rejected {
                source_id,
                status: 0,
                message: reason,
            }),
        },
        // The primary gave a definitive rejection; report that one, the
        // fallback was only ever a second opinion.
        (rejected @ CollectError::SourceRejected { .. }, _) => rejected,
    }
}
