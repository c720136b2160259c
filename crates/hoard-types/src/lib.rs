//! Shared data model for the hoard chunk store: chunk identifiers, backup
//! range descriptors, the raw chunk record codec, and the aggregation objects
//! produced by failure recovery.

pub mod backup;
pub mod chunk_id;
pub mod error;
pub mod raw_chunk;
pub mod recovery_meta;

pub use backup::{BackupRange, RangeSelector};
pub use chunk_id::{ChunkId, ChunkIdRange, LocalIdCounter, NodeId};
pub use error::{TypesError, TypesResult};
pub use raw_chunk::RawChunk;
pub use recovery_meta::{FinishedRecovery, RecoveryMetadata, RecoverySnapshot};
