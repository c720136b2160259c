use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{TypesError, TypesResult};

/// Identifier of a storage node, the upper 16 bits of every chunk id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Sentinel for "no node".
    pub const INVALID: NodeId = NodeId(0xFFFF);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// 64-bit chunk identifier: creator node id in the upper 16 bits, node-local
/// id in the lower 48 bits. Assigned once at creation and immutable; only the
/// owning node of a chunk changes over its lifetime, never the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(u64);

const CREATOR_MASK: u64 = 0xFFFF_0000_0000_0000;
const LOCAL_ID_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;
const CREATOR_SHIFT: u32 = 48;

impl ChunkId {
    /// Sentinel for "no chunk".
    pub const INVALID: ChunkId = ChunkId(u64::MAX);

    /// Combines a creator node id and a 48-bit local id. Rejects the invalid
    /// node sentinel, local ids that do not fit 48 bits, and the combination
    /// that would collide with [`ChunkId::INVALID`].
    pub fn new(creator: NodeId, local: u64) -> TypesResult<ChunkId> {
        if !creator.is_valid() || local & !LOCAL_ID_MASK != 0 {
            return Err(TypesError::InvalidChunkId { creator, local });
        }
        Ok(ChunkId((u64::from(creator.0) << CREATOR_SHIFT) | local))
    }

    /// Reassembles an id from its raw wire representation. The sentinel is
    /// preserved; no further validation happens here.
    pub fn from_raw(raw: u64) -> ChunkId {
        ChunkId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// The node that created this chunk.
    pub fn creator(self) -> NodeId {
        NodeId(((self.0 & CREATOR_MASK) >> CREATOR_SHIFT) as u16)
    }

    /// The node-local part of the id.
    pub fn local_id(self) -> u64 {
        self.0 & LOCAL_ID_MASK
    }

    /// Local id 0 is reserved for the per-node index/root chunk and is
    /// excluded from normal allocation.
    pub fn is_index_chunk(self) -> bool {
        self.is_valid() && self.local_id() == 0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Hands out fresh local ids for one node, starting past the reserved index
/// chunk id 0.
#[derive(Debug)]
pub struct LocalIdCounter {
    node: NodeId,
    next: AtomicU64,
}

impl LocalIdCounter {
    pub fn new(node: NodeId) -> LocalIdCounter {
        LocalIdCounter {
            node,
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> TypesResult<ChunkId> {
        let local = self.next.fetch_add(1, Ordering::Relaxed);
        if local & !LOCAL_ID_MASK != 0 {
            return Err(TypesError::LocalIdExhausted(self.node));
        }
        ChunkId::new(self.node, local)
    }
}

/// Inclusive range of chunk ids, the unit recovery reports progress in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkIdRange {
    pub start: ChunkId,
    pub end: ChunkId,
}

impl ChunkIdRange {
    pub fn new(start: ChunkId, end: ChunkId) -> ChunkIdRange {
        ChunkIdRange { start, end }
    }

    pub fn single(id: ChunkId) -> ChunkIdRange {
        ChunkIdRange { start: id, end: id }
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.start.raw() <= id.raw() && id.raw() <= self.end.raw()
    }

    pub fn count(&self) -> u64 {
        self.end.raw() - self.start.raw() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creator_and_local_round_trip() {
        for (node, local) in [(0x0001u16, 5u64), (0x00A2, 0xFFFF_FFFF_FFFF), (0x7FFF, 1)] {
            let id = ChunkId::new(NodeId(node), local).unwrap();
            assert_eq!(id.creator(), NodeId(node));
            assert_eq!(id.local_id(), local);
        }
    }

    #[test]
    fn known_bit_layout() {
        let id = ChunkId::new(NodeId(0x0001), 5).unwrap();
        assert_eq!(id.raw(), 0x0001_0000_0000_0005);
        assert_eq!(id.creator(), NodeId(0x0001));
        assert_eq!(id.local_id(), 5);
    }

    #[test]
    fn invalid_inputs_rejected() {
        assert!(ChunkId::new(NodeId::INVALID, 1).is_err());
        assert!(ChunkId::new(NodeId(1), 1 << 48).is_err());
    }

    #[test]
    fn index_chunk_detection() {
        assert!(ChunkId::new(NodeId(3), 0).unwrap().is_index_chunk());
        assert!(!ChunkId::new(NodeId(3), 1).unwrap().is_index_chunk());
        assert!(!ChunkId::INVALID.is_index_chunk());
    }

    #[test]
    fn local_id_counter_skips_index_chunk() {
        let counter = LocalIdCounter::new(NodeId(7));
        let first = counter.next().unwrap();
        assert_eq!(first.local_id(), 1);
        assert!(!first.is_index_chunk());
    }

    #[test]
    fn range_contains_and_count() {
        let start = ChunkId::new(NodeId(1), 10).unwrap();
        let end = ChunkId::new(NodeId(1), 19).unwrap();
        let range = ChunkIdRange::new(start, end);
        assert_eq!(range.count(), 10);
        assert!(range.contains(ChunkId::new(NodeId(1), 15).unwrap()));
        assert!(!range.contains(ChunkId::new(NodeId(1), 20).unwrap()));
    }
}
