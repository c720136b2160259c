//! Contracts toward the subsystems recovery collaborates with. The
//! coordinator only ever talks through these, so tests drive it with mocks
//! and deployments plug in the real log, lookup overlay and transport.

use std::path::Path;

use hoard_types::{BackupRange, ChunkId, NodeId, RangeSelector, RawChunk};

use crate::error::RecoveryResult;
use crate::file_log::BackupFileReader;
use crate::messages::Message;

/// Replays backup data back into serialized chunks.
pub trait LogClient: Send + Sync {
    /// Replays one backup range from live backup peers.
    fn recover_backup_range(
        &self,
        owner: NodeId,
        selector: RangeSelector,
    ) -> RecoveryResult<Vec<RawChunk>>;

    /// Replays one backup file from disk. The default reads the on-disk
    /// record format directly.
    fn recover_backup_range_from_file(
        &self,
        file_name: &str,
        dir: &Path,
    ) -> RecoveryResult<Vec<RawChunk>> {
        BackupFileReader::read_records(&dir.join(file_name))
    }
}

/// Metadata overlay operations. These are remote calls and may be slow; the
/// coordinator never holds a heap lock across them.
pub trait LookupClient: Send + Sync {
    fn get_all_backup_ranges(&self, owner: NodeId) -> RecoveryResult<Vec<BackupRange>>;

    /// Republishes a single chunk under a new owner.
    fn migrate(&self, chunk: ChunkId, new_owner: NodeId) -> RecoveryResult<()>;

    /// Bulk republish: every chunk the failed owner held is now served by the
    /// restorer.
    fn set_restorer_after_recovery(&self, owner: NodeId) -> RecoveryResult<()>;
}

/// Re-materializes recovered chunks into local storage.
pub trait ChunkBackup: Send + Sync {
    /// Stores the chunks and returns the number of payload bytes taken in.
    fn put_recovered_chunks(&self, chunks: &[RawChunk]) -> RecoveryResult<u64>;
}

/// Outbound message transport.
pub trait Network: Send + Sync {
    fn send_message(&self, message: &Message) -> RecoveryResult<()>;
}
