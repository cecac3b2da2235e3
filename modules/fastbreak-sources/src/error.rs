/// Fetch-level failure from one source endpoint.
///
/// The originating source is carried as `source_id`; the name `source` is
/// reserved by `thiserror` for error chaining.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection failures, timeouts and 5xx responses that survived every
    /// retry attempt.
    #[error("{source_id}: gave up after {attempts} attempts: {message}")]
    Transient {
        source_id: String,
        attempts: u32,
        message: String,
    },

    /// The source understood the request and refused it (4xx other than
    /// 408/429). Retrying would send the same bad request again.
    #[error("{source_id}: rejected with status {status}: {message}")]
    Rejected {
        source_id: String,
        status: u16,
        message: String,
    },

    /// The per-run call budget for this source is spent. Remaining entities
    /// stay pending for the next run rather than hammering the source.
    #[error("{source_id}: call budget of {budget} exhausted")]
    BudgetExhausted { source_id: String, budget: u32 },
}

impl FetchError {
    pub fn source_name(&self) -> &str {
        match self {
            FetchError::Transient { source_id, .. }
            | FetchError::Rejected { source_id, .. }
            | FetchError::BudgetExhausted { source_id, .. } => source_id,
        }
    }
}

/// Collector-level failure for one entity, after fallbacks were tried.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// No source could be reached for this entity. The entity's flag is
    /// left untouched so a later run retries it.
    #[error("source unavailable: {primary}")]
    SourceUnavailable {
        primary: FetchError,
        fallback: Option<FetchError>,
    },

    /// A source answered but the answer is unusable: a hard rejection or a
    /// response that does not parse into the expected shape.
    #[error("{source_id}: {reason}")]
    SourceRejected { source_id: String, reason: String },

    /// A derived stage could not read its upstream data from the store.
    /// Fatal: the run aborts rather than misreporting entities as failed.
    #[error("storage fault: {0}")]
    Storage(String),
}

impl CollectError {
    pub fn rejected(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        CollectError::SourceRejected {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }
}

impl From<FetchError> for CollectError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Rejected {
                source_id,
                status,
                message,
            } => CollectError::SourceRejected {
                source_id,
                reason: format!("status {status}: {message}"),
            },
            other => CollectError::SourceUnavailable {
                primary: other,
                fallback: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_lead_with_the_source_name() {
        let err = FetchError::Transient {
            source_id: "nba-cdn".to_string(),
            attempts: 3,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.source_name(), "nba-cdn");
        assert!(err.to_string().starts_with("nba-cdn:"));

        let err = FetchError::BudgetExhausted {
            source_id: "nba-stats".to_string(),
            budget: 5000,
        };
        assert_eq!(err.to_string(), "nba-stats: call budget of 5000 exhausted");
    }

    #[test]
    fn rejection_converts_to_a_collect_rejection() {
        let err: CollectError = FetchError::Rejected {
            source_id: "espn".to_string(),
            status: 404,
            message: "not found".to_string(),
        }
        .into();
        match err {
            CollectError::SourceRejected { source_id, reason } => {
                assert_eq!(source_id, "espn");
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
