use crate::chunk_id::NodeId;

/// Errors produced by the shared data model.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// A chunk id component was the reserved invalid sentinel or out of range.
    #[error("invalid chunk id: creator {creator}, local id {local:#x}")]
    InvalidChunkId { creator: NodeId, local: u64 },
    /// The 48-bit local id space of a node is exhausted.
    #[error("local id space exhausted for node {0}")]
    LocalIdExhausted(NodeId),
    /// A raw chunk record failed to parse or its checksum did not match.
    #[error("corrupted record: {0}")]
    CorruptedRecord(String),
    /// A record or buffer was shorter than its header claims.
    #[error("truncated record: expected {expected} bytes, found {found}")]
    TruncatedRecord { expected: usize, found: usize },
}

pub type TypesResult<T> = Result<T, TypesError>;
