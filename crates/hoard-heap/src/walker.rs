//! Re-parses the block stream of every segment into a diagnostic snapshot.
//!
//! The walker is read-only and off any hot path. It holds each segment's
//! manage lock only for the duration of that segment's walk, so the snapshot
//! is consistent per segment, not across the heap.

use crate::block::{BlockMarker, POINTER_SIZE, SIZE_MARKER_BYTE};
use crate::heap::Heap;
use crate::segment::{Segment, SegmentStatus};

/// Snapshot of the whole heap as seen by one walk.
#[derive(Debug, Clone)]
pub struct WalkResult {
    pub total_size: u64,
    pub segment_size: u64,
    pub declared_segment_count: usize,
    pub segments: Vec<SegmentWalk>,
}

/// Snapshot of one segment: every parsed block plus every free-list chain.
#[derive(Debug, Clone)]
pub struct SegmentWalk {
    pub id: usize,
    pub start: u64,
    pub end: u64,
    pub block_area_size: u64,
    pub free_list_start: u64,
    pub free_list_area_size: u64,
    pub blocks: Vec<WalkedBlock>,
    pub free_lists: Vec<FreeListWalk>,
    pub status: SegmentStatus,
    /// Set when the block stream stopped parsing; the walk of this segment
    /// is truncated at that point.
    pub corruption: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkedBlock {
    /// First interior byte.
    pub start: u64,
    /// Interior size; the trailing marker sits at `start + raw_size`.
    pub raw_size: u64,
    pub marker_nibble: u8,
    pub kind: WalkedBlockKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkedBlockKind {
    TinyFree,
    SingleByteFree,
    Free { prev: u64, next: u64 },
    Allocated { payload_size: u64, state: u8 },
}

impl WalkedBlock {
    pub fn end(&self) -> u64 {
        self.start + self.raw_size
    }

    pub fn is_free(&self) -> bool {
        !matches!(self.kind, WalkedBlockKind::Allocated { .. })
    }
}

/// One free-list chain, head first.
#[derive(Debug, Clone)]
pub struct FreeListWalk {
    pub list: usize,
    pub min_size: u64,
    pub chain: Vec<u64>,
}

impl SegmentWalk {
    /// Sum of allocated payload bytes in the parsed stream.
    pub fn allocated_payload(&self) -> u64 {
        self.blocks
            .iter()
            .filter_map(|b| match b.kind {
                WalkedBlockKind::Allocated { payload_size, .. } => Some(payload_size),
                _ => None,
            })
            .sum()
    }

    /// Sum of free interior bytes in the parsed stream.
    pub fn free_interior(&self) -> u64 {
        self.blocks
            .iter()
            .filter(|b| b.is_free())
            .map(|b| b.raw_size)
            .sum()
    }

    /// Every interior byte plus every marker byte, which must equal the
    /// block area size for an intact segment.
    pub fn accounted_bytes(&self) -> u64 {
        let interiors: u64 = self.blocks.iter().map(|b| b.raw_size).sum();
        interiors + self.blocks.len() as u64 + 1
    }
}

pub struct HeapWalker;

impl HeapWalker {
    pub fn walk(heap: &Heap) -> WalkResult {
        WalkResult {
            total_size: heap.total_size(),
            segment_size: heap.segment_size(),
            declared_segment_count: (heap.total_size() / heap.segment_size()) as usize,
            segments: heap.segments().iter().map(Self::walk_segment).collect(),
        }
    }

    fn walk_segment(segment: &Segment) -> SegmentWalk {
        let inner = segment.inner_read();

        let base = segment.base();
        let area = segment.block_area_size();
        let last_marker = base + area - SIZE_MARKER_BYTE;

        let mut blocks = Vec::new();
        let mut corruption = None;

        let mut marker_pos = base;
        while marker_pos < last_marker {
            let nibble = inner.low_nibble(marker_pos);
            let addr = marker_pos + SIZE_MARKER_BYTE;

            let (raw_size, kind) = match BlockMarker::decode(nibble) {
                None => {
                    corruption = Some(format!(
                        "unrecognized marker nibble {nibble:#x} at {marker_pos:#x}"
                    ));
                    break;
                }
                Some(BlockMarker::TinyFree) => {
                    (inner.read_val(addr, 1), WalkedBlockKind::TinyFree)
                }
                Some(BlockMarker::Free { len_width }) => {
                    let w = u64::from(len_width);
                    let size = inner.read_val(addr, len_width as usize);
                    let prev = inner.read_ptr(addr + w);
                    let next = inner.read_ptr(addr + w + POINTER_SIZE);
                    (size, WalkedBlockKind::Free { prev, next })
                }
                Some(BlockMarker::SingleByteFree) => (0, WalkedBlockKind::SingleByteFree),
                Some(BlockMarker::Allocated { len_width, state }) => {
                    let payload = inner.read_val(addr, len_width as usize);
                    (
                        u64::from(len_width) + payload,
                        WalkedBlockKind::Allocated {
                            payload_size: payload,
                            state,
                        },
                    )
                }
            };

            if addr + raw_size > last_marker {
                corruption = Some(format!(
                    "block at {addr:#x} with interior {raw_size} overruns the block area"
                ));
                break;
            }

            blocks.push(WalkedBlock {
                start: addr,
                raw_size,
                marker_nibble: nibble,
                kind,
            });
            marker_pos = addr + raw_size;
        }

        let free_lists = Self::walk_free_lists(segment, &inner, blocks.len());

        SegmentWalk {
            id: segment.id(),
            start: base,
            end: base + segment.full_size(),
            block_area_size: area,
            free_list_start: segment.free_list_base(),
            free_list_area_size: segment.full_size() - area,
            blocks,
            free_lists,
            status: inner.status,
            corruption,
        }
    }

    fn walk_free_lists(
        segment: &Segment,
        inner: &crate::segment::SegmentInner,
        block_count: usize,
    ) -> Vec<FreeListWalk> {
        let mut lists = Vec::with_capacity(segment.list_count());
        for list in 0..segment.list_count() {
            let mut chain = Vec::new();
            let mut addr = inner.read_ptr(segment.head_slot(list));
            // a chain longer than the block count means a cycle
            while addr != 0 && chain.len() <= block_count {
                chain.push(addr);
                match BlockMarker::decode(inner.low_nibble(addr - SIZE_MARKER_BYTE)) {
                    Some(BlockMarker::Free { len_width }) => {
                        addr = inner.read_ptr(addr + u64::from(len_width) + POINTER_SIZE);
                    }
                    _ => break,
                }
            }
            lists.push(FreeListWalk {
                list,
                min_size: segment.list_min_size(list),
                chain,
            });
        }
        lists
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;

    fn heap() -> Heap {
        Heap::new(&HeapConfig::new(1 << 20, 1 << 20)).unwrap()
    }

    #[test]
    fn walk_accounts_every_byte() {
        let heap = heap();
        let a = heap.allocate(64).unwrap();
        let _b = heap.allocate(300).unwrap();
        let _c = heap.allocate(70_000).unwrap();
        heap.free(a).unwrap();

        let walk = HeapWalker::walk(&heap);
        let seg = &walk.segments[0];
        assert!(seg.corruption.is_none());
        assert_eq!(seg.accounted_bytes(), seg.block_area_size);
    }

    #[test]
    fn walk_matches_running_counters() {
        let heap = heap();
        let mut addrs = Vec::new();
        for i in 0..50u64 {
            addrs.push(heap.allocate(32 + i * 7).unwrap());
        }
        for addr in addrs.iter().step_by(3) {
            heap.free(*addr).unwrap();
        }

        let walk = HeapWalker::walk(&heap);
        let seg = &walk.segments[0];
        assert_eq!(seg.allocated_payload(), seg.status.allocated_payload);
        assert_eq!(seg.free_interior(), seg.status.free_space);
        let free_blocks = seg
            .blocks
            .iter()
            .filter(|b| {
                matches!(
                    b.kind,
                    WalkedBlockKind::TinyFree | WalkedBlockKind::Free { .. }
                )
            })
            .count() as u64;
        assert_eq!(free_blocks, seg.status.free_blocks);
    }

    #[test]
    fn free_list_chains_cover_linked_free_blocks() {
        let heap = heap();
        let a = heap.allocate(500).unwrap();
        let _b = heap.allocate(500).unwrap();
        let c = heap.allocate(500).unwrap();
        let _d = heap.allocate(500).unwrap();
        heap.free(a).unwrap();
        heap.free(c).unwrap();

        let walk = HeapWalker::walk(&heap);
        let seg = &walk.segments[0];
        let chained: usize = seg.free_lists.iter().map(|l| l.chain.len()).sum();
        let linked = seg
            .blocks
            .iter()
            .filter(|b| matches!(b.kind, WalkedBlockKind::Free { .. }))
            .count();
        assert_eq!(chained, linked);
    }
}
