use dashmap::DashMap;

use hoard_types::ChunkId;

/// Maps chunk ids onto heap addresses.
///
/// The table is deliberately plain bookkeeping: the heap hands out addresses,
/// callers publish them here before treating a chunk as live, and unpublish
/// before freeing the address. The allocator itself never consults it.
#[derive(Debug, Default)]
pub struct CidTable {
    entries: DashMap<ChunkId, u64>,
}

impl CidTable {
    pub fn new() -> CidTable {
        CidTable::default()
    }

    /// Publishes a chunk's address; returns the previous address if the id
    /// was already mapped (a caller bug or a migration overwrite).
    pub fn publish(&self, id: ChunkId, addr: u64) -> Option<u64> {
        self.entries.insert(id, addr)
    }

    pub fn resolve(&self, id: ChunkId) -> Option<u64> {
        self.entries.get(&id).map(|entry| *entry)
    }

    /// Removes the mapping; the address may be freed only after this.
    pub fn unpublish(&self, id: ChunkId) -> Option<u64> {
        self.entries.remove(&id).map(|(_, addr)| addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
