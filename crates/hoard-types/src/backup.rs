use serde::{Deserialize, Serialize};

use crate::chunk_id::{ChunkId, NodeId};

/// Descriptor of one replicated backup range owned by a node.
///
/// `first_chunk_or_range_id` carries either the first chunk id of a
/// contiguous range the owner created itself, or an opaque range id when the
/// range holds chunks migrated to the owner from other creators. Which of the
/// two it is can only be decided against the failed owner's node id, see
/// [`BackupRange::selector`]. Ranges owned by one node partition that node's
/// address space without overlaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRange {
    pub owner: NodeId,
    pub first_chunk_or_range_id: u64,
    pub backup_peers: Vec<NodeId>,
}

/// Tells the log collaborator which backup range to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeSelector {
    /// The failed node created the chunks itself; the range is addressed by
    /// its first chunk id.
    Normal { first_chunk: ChunkId },
    /// The chunks were migrated to the failed node; the range is addressed by
    /// an opaque per-owner range id.
    Migration { range_id: u8 },
}

impl BackupRange {
    pub fn new(owner: NodeId, first_chunk_or_range_id: u64, backup_peers: Vec<NodeId>) -> Self {
        BackupRange {
            owner,
            first_chunk_or_range_id,
            backup_peers,
        }
    }

    /// Decides normal vs. migration range for a given failed owner: if the
    /// creator encoded in the range id equals the failed owner, the owner
    /// created the chunks and the range is a normal one.
    pub fn selector(&self, failed_owner: NodeId) -> RangeSelector {
        let as_id = ChunkId::from_raw(self.first_chunk_or_range_id);
        if as_id.creator() == failed_owner {
            RangeSelector::Normal { first_chunk: as_id }
        } else {
            RangeSelector::Migration {
                range_id: (self.first_chunk_or_range_id & 0xFF) as u8,
            }
        }
    }

    /// First peer that still holds a replica, used as the replacement backup
    /// peer after a successful recovery.
    pub fn replacement_peer(&self) -> NodeId {
        self.backup_peers
            .iter()
            .copied()
            .find(|peer| peer.is_valid())
            .unwrap_or(NodeId::INVALID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_picks_normal_for_own_creation() {
        let owner = NodeId(0x0042);
        let first = ChunkId::new(owner, 100).unwrap();
        let range = BackupRange::new(owner, first.raw(), vec![NodeId(1)]);
        assert_eq!(
            range.selector(owner),
            RangeSelector::Normal { first_chunk: first }
        );
    }

    #[test]
    fn selector_picks_migration_for_foreign_creator() {
        let owner = NodeId(0x0042);
        let foreign = ChunkId::new(NodeId(0x0007), 3).unwrap();
        let range = BackupRange::new(owner, foreign.raw(), vec![]);
        assert_eq!(
            range.selector(owner),
            RangeSelector::Migration { range_id: 3 }
        );
    }

    #[test]
    fn replacement_peer_skips_invalid() {
        let range = BackupRange::new(NodeId(1), 0, vec![NodeId::INVALID, NodeId(9)]);
        assert_eq!(range.replacement_peer(), NodeId(9));
        let empty = BackupRange::new(NodeId(1), 0, vec![]);
        assert_eq!(empty.replacement_peer(), NodeId::INVALID);
    }
}
