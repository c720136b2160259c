use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::chunk_id::{ChunkIdRange, NodeId};

/// Running totals of one in-flight recovery. Range workers update it
/// concurrently, so the counters are atomic and the range list is guarded.
/// Created fresh per recovery and discarded once reported upstream.
#[derive(Debug, Default)]
pub struct RecoveryMetadata {
    chunk_count: AtomicU64,
    byte_count: AtomicU64,
    cid_ranges: Mutex<Vec<ChunkIdRange>>,
}

/// Point-in-time copy of a [`RecoveryMetadata`], what gets reported to the
/// caller when recovery finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverySnapshot {
    pub chunk_count: u64,
    pub byte_count: u64,
    pub cid_ranges: Vec<ChunkIdRange>,
}

impl RecoveryMetadata {
    pub fn new() -> RecoveryMetadata {
        RecoveryMetadata::default()
    }

    /// Records one recovered range worth of chunks.
    pub fn add(&self, chunks: u64, bytes: u64, ranges: &[ChunkIdRange]) {
        self.chunk_count.fetch_add(chunks, Ordering::Relaxed);
        self.byte_count.fetch_add(bytes, Ordering::Relaxed);
        if !ranges.is_empty() {
            self.cid_ranges.lock().extend_from_slice(ranges);
        }
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count.load(Ordering::Relaxed)
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RecoverySnapshot {
        RecoverySnapshot {
            chunk_count: self.chunk_count(),
            byte_count: self.byte_count(),
            cid_ranges: self.cid_ranges.lock().clone(),
        }
    }
}

/// Everything the replication follow-up needs about one recovered backup
/// range: who replicates it next, which ids it spans, and how many chunks
/// made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedRecovery {
    pub replacement_backup_peer: NodeId,
    pub cid_ranges: Vec<ChunkIdRange>,
    pub chunk_count: u64,
    pub range_id: u64,
}

impl FinishedRecovery {
    pub fn new(
        replacement_backup_peer: NodeId,
        cid_ranges: Vec<ChunkIdRange>,
        chunk_count: u64,
        range_id: u64,
    ) -> FinishedRecovery {
        FinishedRecovery {
            replacement_backup_peer,
            cid_ranges,
            chunk_count,
            range_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_id::ChunkId;
    use std::sync::Arc;

    #[test]
    fn concurrent_updates_accumulate() {
        let meta = Arc::new(RecoveryMetadata::new());
        let mut handles = Vec::new();
        for worker in 0..4u64 {
            let meta = Arc::clone(&meta);
            handles.push(std::thread::spawn(move || {
                let id = ChunkId::new(NodeId(1), worker * 100 + 1).unwrap();
                meta.add(10, 640, &[ChunkIdRange::single(id)]);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = meta.snapshot();
        assert_eq!(snap.chunk_count, 40);
        assert_eq!(snap.byte_count, 2560);
        assert_eq!(snap.cid_ranges.len(), 4);
    }
}
