use hoard_heap::HeapError;
use hoard_types::TypesError;

/// Errors produced while orchestrating a node-failure recovery.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A backup record failed to parse or verify.
    #[error(transparent)]
    Record(#[from] TypesError),
    /// The heap rejected re-insertion of recovered chunks.
    #[error(transparent)]
    Heap(#[from] HeapError),
    /// The log collaborator could not replay a backup range.
    #[error("log replay failed: {0}")]
    LogReplay(String),
    /// A metadata/lookup call failed.
    #[error("lookup call failed: {0}")]
    Lookup(String),
    /// A message could not be delivered.
    #[error("network send failed: {0}")]
    Network(String),
    /// Recovered chunks could not be re-materialized.
    #[error("chunk re-insertion failed: {0}")]
    Reinsert(String),
    /// An incoming recovery message did not decode.
    #[error("malformed recovery message: {0}")]
    InvalidMessage(String),
    #[error("invalid recovery configuration: {0}")]
    InvalidConfig(String),
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;
