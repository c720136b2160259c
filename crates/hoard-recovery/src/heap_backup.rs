//! The in-memory [`ChunkBackup`] implementation: recovered chunks land in the
//! small-object heap and become resolvable through the CID table.

use std::sync::Arc;

use tracing::warn;

use hoard_heap::{CidTable, Heap};
use hoard_types::RawChunk;

use crate::error::RecoveryResult;
use crate::traits::ChunkBackup;

pub struct HeapChunkBackup {
    heap: Arc<Heap>,
    table: Arc<CidTable>,
}

impl HeapChunkBackup {
    pub fn new(heap: Arc<Heap>, table: Arc<CidTable>) -> HeapChunkBackup {
        HeapChunkBackup { heap, table }
    }
}

impl ChunkBackup for HeapChunkBackup {
    /// Reserves blocks for the whole batch first, so a heap that cannot take
    /// the range rejects it without leaving partial state, then copies the
    /// payloads and publishes the addresses.
    fn put_recovered_chunks(&self, chunks: &[RawChunk]) -> RecoveryResult<u64> {
        let sizes: Vec<u64> = chunks.iter().map(|c| c.payload.len() as u64).collect();
        let addrs = self.heap.allocate_batch(&sizes)?;

        let mut bytes = 0u64;
        for (chunk, &addr) in chunks.iter().zip(&addrs) {
            self.heap.write(addr, 0, &chunk.payload)?;
            if let Some(stale) = self.table.publish(chunk.id, addr) {
                // a replayed chunk shadows an older copy of itself
                warn!(chunk = %chunk.id, %stale, "replacing stale chunk address");
                self.heap.free(stale)?;
            }
            bytes += chunk.payload.len() as u64;
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoard_heap::HeapConfig;
    use hoard_types::{ChunkId, NodeId};

    fn backup() -> (HeapChunkBackup, Arc<Heap>, Arc<CidTable>) {
        let heap = Arc::new(Heap::new(&HeapConfig::new(1 << 20, 1 << 20)).unwrap());
        let table = Arc::new(CidTable::new());
        (
            HeapChunkBackup::new(Arc::clone(&heap), Arc::clone(&table)),
            heap,
            table,
        )
    }

    #[test]
    fn chunks_become_resolvable_and_readable() {
        let (backup, heap, table) = backup();
        let id = ChunkId::new(NodeId(2), 11).unwrap();
        let chunk = RawChunk::new(id, b"recovered payload".to_vec());

        let bytes = backup.put_recovered_chunks(&[chunk.clone()]).unwrap();
        assert_eq!(bytes, chunk.payload.len() as u64);

        let addr = table.resolve(id).unwrap();
        let mut out = vec![0u8; chunk.payload.len()];
        heap.read(addr, 0, &mut out).unwrap();
        assert_eq!(out, chunk.payload);
    }

    #[test]
    fn replay_of_same_chunk_frees_the_old_copy() {
        let (backup, heap, table) = backup();
        let id = ChunkId::new(NodeId(2), 12).unwrap();

        backup
            .put_recovered_chunks(&[RawChunk::new(id, vec![1; 64])])
            .unwrap();
        let before = heap.aggregate_status().active_blocks;
        backup
            .put_recovered_chunks(&[RawChunk::new(id, vec![2; 64])])
            .unwrap();

        assert_eq!(heap.aggregate_status().active_blocks, before);
        assert_eq!(table.len(), 1);
    }
}
