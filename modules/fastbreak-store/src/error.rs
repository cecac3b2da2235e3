use fastbreak_common::{Stage, StageStatus};

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable or a transaction failed. Fatal to the current run.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Attempt to downgrade a `final` flag without the repair override.
    /// Rejected, never applied.
    #[error("invalid transition for {entity_id} at {stage}: {from} -> {to}")]
    InvalidTransition {
        entity_id: String,
        stage: Stage,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("Malformed stored payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this error should abort the whole run rather than a single
    /// entity or chunk.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}
