//! Structural checks over a walker snapshot.
//!
//! The checks run in a fixed order from coarse (heap sizing) to fine
//! (free-list membership); the first failure is reported and later checks are
//! skipped, since they would only cascade from the same damage. Checking
//! never panics, whatever the snapshot looks like.

use thiserror::Error;
use tracing::error;

use crate::walker::{SegmentWalk, WalkResult, WalkedBlockKind};

/// Which structural check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckId {
    /// Total heap size must equal segment count times segment size.
    HeapSizing,
    /// The walk must have visited the declared number of segments.
    SegmentCount,
    /// Segments must tile the address space without gaps or overlap.
    SegmentBounds,
    /// Each free-list head area must sit at the end of its segment.
    FreeListBounds,
    /// Every parsed block must lie inside its segment's block area.
    BlockBounds,
    /// Every free-list chain member must be a linked free block.
    FreeListMembership,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("integrity check {check:?} failed: {detail}")]
pub struct IntegrityError {
    pub check: CheckId,
    pub detail: String,
}

impl IntegrityError {
    fn new(check: CheckId, detail: String) -> IntegrityError {
        IntegrityError { check, detail }
    }
}

pub struct IntegrityChecker;

impl IntegrityChecker {
    /// Validates a snapshot; the first failing check is returned and logged.
    pub fn check(walk: &WalkResult) -> Result<(), IntegrityError> {
        let result = Self::check_heap_sizing(walk)
            .and_then(|()| Self::check_segment_count(walk))
            .and_then(|()| Self::check_segment_bounds(walk))
            .and_then(|()| Self::check_free_list_bounds(walk))
            .and_then(|()| Self::check_block_bounds(walk))
            .and_then(|()| Self::check_free_list_membership(walk));

        if let Err(ref failure) = result {
            error!(check = ?failure.check, detail = %failure.detail, "heap integrity check failed");
        }
        result
    }

    fn check_heap_sizing(walk: &WalkResult) -> Result<(), IntegrityError> {
        let expected = walk.declared_segment_count as u64 * walk.segment_size;
        if walk.total_size != expected {
            return Err(IntegrityError::new(
                CheckId::HeapSizing,
                format!(
                    "total size {} != {} segments * {} bytes",
                    walk.total_size, walk.declared_segment_count, walk.segment_size
                ),
            ));
        }
        Ok(())
    }

    fn check_segment_count(walk: &WalkResult) -> Result<(), IntegrityError> {
        if walk.segments.len() != walk.declared_segment_count {
            return Err(IntegrityError::new(
                CheckId::SegmentCount,
                format!(
                    "walked {} segments, expected {}",
                    walk.segments.len(),
                    walk.declared_segment_count
                ),
            ));
        }
        Ok(())
    }

    fn check_segment_bounds(walk: &WalkResult) -> Result<(), IntegrityError> {
        let mut expected_start = 0u64;
        for seg in &walk.segments {
            if seg.start != expected_start || seg.end - seg.start != walk.segment_size {
                return Err(IntegrityError::new(
                    CheckId::SegmentBounds,
                    format!(
                        "segment {} spans [{:#x}, {:#x}), expected [{:#x}, {:#x})",
                        seg.id,
                        seg.start,
                        seg.end,
                        expected_start,
                        expected_start + walk.segment_size
                    ),
                ));
            }
            expected_start = seg.end;
        }
        Ok(())
    }

    fn check_free_list_bounds(walk: &WalkResult) -> Result<(), IntegrityError> {
        for seg in &walk.segments {
            let list_start_ok = seg.free_list_start == seg.start + seg.block_area_size;
            let list_end_ok = seg.free_list_start + seg.free_list_area_size == seg.end;
            if !list_start_ok || !list_end_ok {
                return Err(IntegrityError::new(
                    CheckId::FreeListBounds,
                    format!(
                        "segment {}: free-list area [{:#x}, {:#x}) does not cap the segment",
                        seg.id,
                        seg.free_list_start,
                        seg.free_list_start + seg.free_list_area_size
                    ),
                ));
            }
        }
        Ok(())
    }

    fn check_block_bounds(walk: &WalkResult) -> Result<(), IntegrityError> {
        for seg in &walk.segments {
            if let Some(ref note) = seg.corruption {
                return Err(IntegrityError::new(
                    CheckId::BlockBounds,
                    format!("segment {}: block stream unparseable: {note}", seg.id),
                ));
            }
            let area_start = seg.start + 1;
            let area_end = seg.start + seg.block_area_size - 1;
            for block in &seg.blocks {
                if block.start < area_start || block.end() > area_end {
                    return Err(IntegrityError::new(
                        CheckId::BlockBounds,
                        format!(
                            "segment {}: block [{:#x}, {:#x}) outside block area",
                            seg.id,
                            block.start,
                            block.end()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_free_list_membership(walk: &WalkResult) -> Result<(), IntegrityError> {
        for seg in &walk.segments {
            for list in &seg.free_lists {
                for &addr in &list.chain {
                    if !Self::is_linked_free(seg, addr) {
                        return Err(IntegrityError::new(
                            CheckId::FreeListMembership,
                            format!(
                                "segment {}: list {} links {:#x}, which is not a linked free block",
                                seg.id, list.list, addr
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn is_linked_free(seg: &SegmentWalk, addr: u64) -> bool {
        seg.blocks
            .iter()
            .any(|b| b.start == addr && matches!(b.kind, WalkedBlockKind::Free { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use crate::heap::Heap;
    use crate::walker::HeapWalker;

    fn snapshot() -> WalkResult {
        let heap = Heap::new(&HeapConfig::new(2 << 20, 1 << 20)).unwrap();
        let a = heap.allocate(128).unwrap();
        let _b = heap.allocate(4096).unwrap();
        let c = heap.allocate(128).unwrap();
        heap.free(a).unwrap();
        heap.free(c).unwrap();
        HeapWalker::walk(&heap)
    }

    #[test]
    fn intact_heap_passes_all_checks() {
        IntegrityChecker::check(&snapshot()).unwrap();
    }

    #[test]
    fn sizing_mismatch_is_first_failure() {
        let mut walk = snapshot();
        walk.total_size += 1;
        let err = IntegrityChecker::check(&walk).unwrap_err();
        assert_eq!(err.check, CheckId::HeapSizing);
    }

    #[test]
    fn missing_segment_is_detected() {
        let mut walk = snapshot();
        walk.segments.pop();
        let err = IntegrityChecker::check(&walk).unwrap_err();
        assert_eq!(err.check, CheckId::SegmentCount);
    }

    #[test]
    fn shifted_segment_is_detected() {
        let mut walk = snapshot();
        walk.segments[1].start += 8;
        let err = IntegrityChecker::check(&walk).unwrap_err();
        assert_eq!(err.check, CheckId::SegmentBounds);
    }

    #[test]
    fn out_of_area_block_is_detected() {
        let mut walk = snapshot();
        let area_end = walk.segments[0].start + walk.segments[0].block_area_size;
        walk.segments[0].blocks[0].start = area_end;
        let err = IntegrityChecker::check(&walk).unwrap_err();
        assert_eq!(err.check, CheckId::BlockBounds);
    }

    #[test]
    fn stray_free_list_member_is_detected() {
        let mut walk = snapshot();
        let (seg_idx, allocated) = walk
            .segments
            .iter()
            .enumerate()
            .find_map(|(i, seg)| {
                seg.blocks
                    .iter()
                    .find(|b| matches!(b.kind, WalkedBlockKind::Allocated { .. }))
                    .map(|b| (i, b.start))
            })
            .unwrap();
        walk.segments[seg_idx]
            .free_lists
            .iter_mut()
            .find(|l| !l.chain.is_empty())
            .unwrap()
            .chain
            .push(allocated);
        let err = IntegrityChecker::check(&walk).unwrap_err();
        assert_eq!(err.check, CheckId::FreeListMembership);
    }
}
