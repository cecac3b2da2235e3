use fastbreak_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Another run holds the scope lease. The new run is refused outright.
    #[error("another run already holds the lease")]
    LeaseHeld,

    #[error(transparent)]
    Storage(#[from] StoreError),

    /// A derived stage hit a storage fault while reading upstream records.
    #[error("storage fault: {0}")]
    DerivedStorage(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
