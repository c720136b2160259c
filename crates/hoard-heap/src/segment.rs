//! A fixed-size heap segment: a block area of self-describing payload blocks
//! followed by an array of free-list heads, one per size class.
//!
//! Segments exist so that threads allocating in different parts of the heap
//! never contend: every structural mutation of one segment is serialized
//! under that segment's manage lock, while payload reads of stable blocks
//! only take the shared side.

use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;

use crate::block::{
    BlockMarker, alloc_len_width, free_len_width, MAX_BLOCK_PAYLOAD, MAX_CUSTOM_STATE,
    MIN_LINKED_FREE_SIZE, POINTER_SIZE, SIZE_MARKER_BYTE, SMALL_BLOCK_SIZE,
};
use crate::error::{HeapError, HeapResult};

/// Running counters of one segment, kept exactly consistent with the block
/// stream; the walker re-derives and cross-checks them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SegmentStatus {
    /// Sum of the interior sizes of all free blocks.
    pub free_space: u64,
    /// Number of free blocks (single-byte gaps not counted).
    pub free_blocks: u64,
    /// Number of free blocks with interior < 64 bytes.
    pub small_free_blocks: u64,
    /// Sum of the payload sizes of all allocated blocks.
    pub allocated_payload: u64,
    /// Number of allocated blocks.
    pub active_blocks: u64,
}

pub(crate) struct SegmentInner {
    base: u64,
    buf: Box<[u8]>,
    pub(crate) status: SegmentStatus,
}

/// One contiguous region `[base, base + full_size)` of the heap's flat
/// address space. The leading `size` bytes are the block area, the rest holds
/// `list_count` free-list head pointers.
pub struct Segment {
    id: usize,
    base: u64,
    full_size: u64,
    size: u64,
    free_list_base: u64,
    list_count: usize,
    list_min_sizes: Vec<u64>,
    inner: RwLock<SegmentInner>,
}

#[derive(Default)]
struct MergedNeighbors {
    space: u64,
    blocks: u64,
    small: u64,
}

impl Segment {
    /// Lays out a zeroed segment with one free block spanning the whole block
    /// area (minus the two boundary markers).
    pub fn new(id: usize, base: u64, full_size: u64) -> Segment {
        // one list per power of two up to the segment size, minus the two
        // classes that could never hold a block
        let list_count = (63 - full_size.leading_zeros() as u64 - 2) as usize;
        let list_area = list_count as u64 * POINTER_SIZE;
        let size = full_size - list_area;

        let mut list_min_sizes: Vec<u64> = (0..list_count).map(|i| 1u64 << (i + 2)).collect();
        list_min_sizes[0] = 12;
        list_min_sizes[1] = 24;
        list_min_sizes[2] = 36;
        list_min_sizes[3] = 48;

        let segment = Segment {
            id,
            base,
            full_size,
            size,
            free_list_base: base + size,
            list_count,
            list_min_sizes,
            inner: RwLock::new(SegmentInner {
                base,
                buf: vec![0u8; full_size as usize].into_boxed_slice(),
                status: SegmentStatus::default(),
            }),
        };

        {
            let mut inner = segment.inner.write();
            let initial = size - 2 * SIZE_MARKER_BYTE;
            segment.create_free_block(&mut inner, base + SIZE_MARKER_BYTE, initial);
            inner.status.free_space = initial;
            inner.status.free_blocks = 1;
            inner.status.small_free_blocks = u64::from(initial < SMALL_BLOCK_SIZE);
        }

        segment
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn full_size(&self) -> u64 {
        self.full_size
    }

    /// Size of the block area.
    pub fn block_area_size(&self) -> u64 {
        self.size
    }

    pub fn free_list_base(&self) -> u64 {
        self.free_list_base
    }

    pub fn list_count(&self) -> usize {
        self.list_count
    }

    pub fn status(&self) -> SegmentStatus {
        self.inner.read().status
    }

    pub(crate) fn inner_read(&self) -> RwLockReadGuard<'_, SegmentInner> {
        self.inner.read()
    }

    /// Reserves a block for `payload` bytes, tagged with custom state
    /// `state`. Fails with [`HeapError::OutOfMemory`] when no free block in
    /// this segment can serve the request; the heap then probes the next
    /// segment.
    pub fn allocate(&self, payload: u64, state: u8) -> HeapResult<u64> {
        if payload == 0 || payload > MAX_BLOCK_PAYLOAD {
            return Err(HeapError::InvalidBlockSize(payload));
        }
        if state > MAX_CUSTOM_STATE {
            return Err(HeapError::InvalidCustomState(state));
        }

        let width = u64::from(alloc_len_width(payload));
        let block_size = payload + width;

        let mut inner = self.inner.write();
        let (addr, free_size) = self
            .take_free_block(&mut inner, block_size)?
            .ok_or(HeapError::OutOfMemory(self.id))?;

        let was_small = u64::from(free_size < SMALL_BLOCK_SIZE);
        if free_size == block_size {
            inner.status.free_space -= block_size;
            inner.status.free_blocks -= 1;
            inner.status.small_free_blocks -= was_small;
        } else if free_size == block_size + 1 {
            // leftover too small for any interior: burn it as an extra
            // marker byte flagged single-byte-free on both sides
            inner.set_low_nibble(addr + block_size, BlockMarker::SingleByteFree.encode());
            inner.set_high_nibble(addr + block_size + 1, BlockMarker::SingleByteFree.encode());
            inner.status.free_space -= block_size + 1;
            inner.status.free_blocks -= 1;
            inner.status.small_free_blocks -= was_small;
        } else {
            let remainder = free_size - block_size - 1;
            self.create_free_block(&mut inner, addr + block_size + SIZE_MARKER_BYTE, remainder);
            inner.status.free_space -= block_size + 1;
            if free_size >= SMALL_BLOCK_SIZE && remainder < SMALL_BLOCK_SIZE {
                inner.status.small_free_blocks += 1;
            }
        }

        let marker = BlockMarker::allocated_for(payload, state).encode();
        inner.set_high_nibble(addr + block_size, marker);
        inner.set_low_nibble(addr - SIZE_MARKER_BYTE, marker);
        inner.write_val(addr, payload, width as usize);

        inner.status.allocated_payload += payload;
        inner.status.active_blocks += 1;

        Ok(addr)
    }

    /// Frees an allocated block, coalescing with free physical neighbors on
    /// both sides. Freeing anything that is not currently an allocated block
    /// is rejected with [`HeapError::InvalidFree`].
    pub fn free(&self, addr: u64) -> HeapResult<()> {
        self.check_block_addr(addr)?;
        let mut inner = self.inner.write();

        let (width, payload) = self.allocated_header(&inner, addr)?;
        let interior = width + payload;

        let mut start = addr;
        let mut total = interior;
        let mut merged = MergedNeighbors::default();

        // left neighbor, never across the segment boundary
        if addr - SIZE_MARKER_BYTE != self.base {
            let nibble = inner.high_nibble(addr - SIZE_MARKER_BYTE);
            match Self::decode_marker(addr - SIZE_MARKER_BYTE, nibble)? {
                BlockMarker::TinyFree => {
                    let left_size = inner.read_val(addr - SIZE_MARKER_BYTE - 1, 1);
                    start = addr - SIZE_MARKER_BYTE - left_size;
                    total += left_size + SIZE_MARKER_BYTE;
                    merged.absorb(left_size);
                }
                BlockMarker::Free { len_width } => {
                    let w = u64::from(len_width);
                    let left_size = inner.read_val(addr - SIZE_MARKER_BYTE - w, w as usize);
                    start = addr - SIZE_MARKER_BYTE - left_size;
                    self.unhook_free_block(&mut inner, start)?;
                    total += left_size + SIZE_MARKER_BYTE;
                    merged.absorb(left_size);
                }
                BlockMarker::SingleByteFree => {
                    start = addr - SIZE_MARKER_BYTE;
                    total += SIZE_MARKER_BYTE;
                }
                BlockMarker::Allocated { .. } => {}
            }
        }

        // right neighbor starts past this block's trailing marker
        let trailer = addr + interior;
        if trailer != self.base + self.size - SIZE_MARKER_BYTE {
            let nibble = inner.low_nibble(trailer);
            match Self::decode_marker(trailer, nibble)? {
                BlockMarker::TinyFree => {
                    let right_size = inner.read_val(trailer + SIZE_MARKER_BYTE, 1);
                    total += right_size + SIZE_MARKER_BYTE;
                    merged.absorb(right_size);
                }
                BlockMarker::Free { len_width } => {
                    let right_addr = trailer + SIZE_MARKER_BYTE;
                    let right_size = inner.read_val(right_addr, len_width as usize);
                    self.unhook_free_block(&mut inner, right_addr)?;
                    total += right_size + SIZE_MARKER_BYTE;
                    merged.absorb(right_size);
                }
                BlockMarker::SingleByteFree => {
                    total += SIZE_MARKER_BYTE;
                }
                BlockMarker::Allocated { .. } => {}
            }
        }

        self.create_free_block(&mut inner, start, total);

        inner.status.free_space += total - merged.space;
        inner.status.free_blocks = inner.status.free_blocks + 1 - merged.blocks;
        inner.status.small_free_blocks =
            inner.status.small_free_blocks + u64::from(total < SMALL_BLOCK_SIZE) - merged.small;
        inner.status.allocated_payload -= payload;
        inner.status.active_blocks -= 1;

        Ok(())
    }

    /// Copies payload bytes out of an allocated block, bounded by the block's
    /// recorded payload length.
    pub fn read(&self, addr: u64, offset: u64, out: &mut [u8]) -> HeapResult<usize> {
        self.check_block_addr(addr)?;
        let inner = self.inner.read();
        let (width, payload) = self.allocated_header(&inner, addr)?;
        self.check_payload_bounds(addr, offset, out.len() as u64, payload)?;

        let from = (addr + width + offset - self.base) as usize;
        out.copy_from_slice(&inner.buf[from..from + out.len()]);
        Ok(out.len())
    }

    /// Writes payload bytes into an allocated block, bounded by the block's
    /// recorded payload length.
    pub fn write(&self, addr: u64, offset: u64, data: &[u8]) -> HeapResult<usize> {
        self.check_block_addr(addr)?;
        let mut inner = self.inner.write();
        let (width, payload) = self.allocated_header(&inner, addr)?;
        self.check_payload_bounds(addr, offset, data.len() as u64, payload)?;

        let to = (addr + width + offset - self.base) as usize;
        inner.buf[to..to + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    /// Payload length recorded in the block's header.
    pub fn payload_size(&self, addr: u64) -> HeapResult<u64> {
        self.check_block_addr(addr)?;
        let inner = self.inner.read();
        let (_, payload) = self.allocated_header(&inner, addr)?;
        Ok(payload)
    }

    /// The custom state tag of an allocated block.
    pub fn custom_state(&self, addr: u64) -> HeapResult<u8> {
        self.check_block_addr(addr)?;
        let inner = self.inner.read();
        let nibble = inner.low_nibble(addr - SIZE_MARKER_BYTE);
        match Self::decode_marker(addr - SIZE_MARKER_BYTE, nibble)? {
            BlockMarker::Allocated { state, .. } => Ok(state),
            _ => Err(HeapError::InvalidFree(addr)),
        }
    }

    /// Retags an allocated block without touching its payload, e.g. to mark
    /// a chunk deleted before it is physically removed.
    pub fn set_custom_state(&self, addr: u64, state: u8) -> HeapResult<()> {
        if state > MAX_CUSTOM_STATE {
            return Err(HeapError::InvalidCustomState(state));
        }
        self.check_block_addr(addr)?;
        let mut inner = self.inner.write();
        let nibble = inner.low_nibble(addr - SIZE_MARKER_BYTE);
        let len_width = match Self::decode_marker(addr - SIZE_MARKER_BYTE, nibble)? {
            BlockMarker::Allocated { len_width, .. } => len_width,
            _ => return Err(HeapError::InvalidFree(addr)),
        };

        let payload = inner.read_val(addr, len_width as usize);
        let marker = BlockMarker::Allocated { len_width, state }.encode();
        inner.set_low_nibble(addr - SIZE_MARKER_BYTE, marker);
        inner.set_high_nibble(addr + u64::from(len_width) + payload, marker);
        Ok(())
    }

    pub(crate) fn list_min_size(&self, list: usize) -> u64 {
        self.list_min_sizes[list]
    }

    pub(crate) fn head_slot(&self, list: usize) -> u64 {
        self.free_list_base + list as u64 * POINTER_SIZE
    }

    /// Index of the largest size class whose minimum does not exceed `size`.
    pub(crate) fn list_index(&self, size: u64) -> usize {
        let mut index = 0;
        while index + 1 < self.list_min_sizes.len() && self.list_min_sizes[index + 1] <= size {
            index += 1;
        }
        index
    }

    // ---------------------------------------------------------------------

    fn decode_marker(address: u64, nibble: u8) -> HeapResult<BlockMarker> {
        BlockMarker::decode(nibble).ok_or(HeapError::CorruptedBlock { address, nibble })
    }

    fn check_block_addr(&self, addr: u64) -> HeapResult<()> {
        if addr <= self.base || addr >= self.base + self.size - SIZE_MARKER_BYTE {
            return Err(HeapError::OutOfBounds {
                address: addr,
                offset: 0,
                length: 0,
            });
        }
        Ok(())
    }

    fn check_payload_bounds(
        &self,
        addr: u64,
        offset: u64,
        length: u64,
        payload: u64,
    ) -> HeapResult<()> {
        if offset + length > payload {
            return Err(HeapError::OutOfBounds {
                address: addr,
                offset,
                length,
            });
        }
        Ok(())
    }

    fn allocated_header(&self, inner: &SegmentInner, addr: u64) -> HeapResult<(u64, u64)> {
        let nibble = inner.low_nibble(addr - SIZE_MARKER_BYTE);
        match Self::decode_marker(addr - SIZE_MARKER_BYTE, nibble)? {
            BlockMarker::Allocated { len_width, .. } => {
                let width = u64::from(len_width);
                let payload = inner.read_val(addr, len_width as usize);
                Ok((width, payload))
            }
            _ => Err(HeapError::InvalidFree(addr)),
        }
    }

    /// Picks a free block with interior >= `block_size` and unhooks it.
    /// Escalates to the next larger size class first (its head is guaranteed
    /// big enough), then first-fit-scans the base class. `Ok(None)` means the
    /// segment has no fitting block; a list node whose marker does not decode
    /// as a linked free block is corruption, never exhaustion.
    fn take_free_block(
        &self,
        inner: &mut SegmentInner,
        block_size: u64,
    ) -> HeapResult<Option<(u64, u64)>> {
        let base_list = self.list_index(block_size);

        let mut candidate = 0u64;
        let mut list = base_list + 1;
        while list < self.list_count {
            let head = inner.read_ptr(self.head_slot(list));
            if head != 0 {
                candidate = head;
                break;
            }
            list += 1;
        }

        if candidate == 0 {
            let mut addr = inner.read_ptr(self.head_slot(base_list));
            while addr != 0 {
                let width = Self::linked_free_width(inner, addr)?;
                let size = inner.read_val(addr, width as usize);
                if size >= block_size {
                    candidate = addr;
                    break;
                }
                addr = inner.read_ptr(addr + width + POINTER_SIZE);
            }
        }

        if candidate == 0 {
            return Ok(None);
        }

        let width = Self::linked_free_width(inner, candidate)?;
        let free_size = inner.read_val(candidate, width as usize);
        self.unhook_free_block(inner, candidate)?;
        Ok(Some((candidate, free_size)))
    }

    /// Length-field width of a block that a free list claims as a member.
    fn linked_free_width(inner: &SegmentInner, addr: u64) -> HeapResult<u64> {
        let nibble = inner.low_nibble(addr - SIZE_MARKER_BYTE);
        match Self::decode_marker(addr - SIZE_MARKER_BYTE, nibble)? {
            BlockMarker::Free { len_width } => Ok(u64::from(len_width)),
            _ => Err(HeapError::CorruptedBlock {
                address: addr - SIZE_MARKER_BYTE,
                nibble,
            }),
        }
    }

    /// Writes a free block at `addr` with interior size `size`: size field at
    /// both interior ends, list linkage when large enough, marker nibbles on
    /// both boundary bytes. Status accounting is the caller's job.
    fn create_free_block(&self, inner: &mut SegmentInner, addr: u64, size: u64) {
        debug_assert!(size > 0);

        let marker;
        if size < MIN_LINKED_FREE_SIZE {
            marker = BlockMarker::TinyFree.encode();
            inner.write_val(addr, size, 1);
            inner.write_val(addr + size - 1, size, 1);
        } else {
            let width = free_len_width(size);
            marker = BlockMarker::Free { len_width: width }.encode();
            let w = u64::from(width);

            inner.write_val(addr, size, width as usize);
            inner.write_val(addr + size - w, size, width as usize);

            let head_slot = self.head_slot(self.list_index(size));
            let anchor = inner.read_ptr(head_slot);
            inner.write_ptr(addr + w, head_slot);
            inner.write_ptr(addr + w + POINTER_SIZE, anchor);
            if anchor != 0 {
                if let Some(BlockMarker::Free { len_width }) =
                    BlockMarker::decode(inner.low_nibble(anchor - SIZE_MARKER_BYTE))
                {
                    inner.write_ptr(anchor + u64::from(len_width), addr);
                }
            }
            inner.write_ptr(head_slot, addr);
        }

        inner.set_low_nibble(addr - SIZE_MARKER_BYTE, marker);
        inner.set_high_nibble(addr + size, marker);
    }

    /// Removes a linked free block from its list. `prev` pointing into the
    /// head area means the block is first in its list.
    fn unhook_free_block(&self, inner: &mut SegmentInner, addr: u64) -> HeapResult<()> {
        let nibble = inner.low_nibble(addr - SIZE_MARKER_BYTE);
        let width = match Self::decode_marker(addr - SIZE_MARKER_BYTE, nibble)? {
            BlockMarker::Free { len_width } => u64::from(len_width),
            _ => {
                return Err(HeapError::CorruptedBlock {
                    address: addr,
                    nibble,
                })
            }
        };

        let prev = inner.read_ptr(addr + width);
        let next = inner.read_ptr(addr + width + POINTER_SIZE);

        if prev >= self.free_list_base {
            inner.write_ptr(prev, next);
        } else {
            let prev_nibble = inner.low_nibble(prev - SIZE_MARKER_BYTE);
            match Self::decode_marker(prev - SIZE_MARKER_BYTE, prev_nibble)? {
                BlockMarker::Free { len_width } => {
                    inner.write_ptr(prev + u64::from(len_width) + POINTER_SIZE, next);
                }
                _ => {
                    return Err(HeapError::CorruptedBlock {
                        address: prev,
                        nibble: prev_nibble,
                    })
                }
            }
        }

        if next != 0 {
            let next_nibble = inner.low_nibble(next - SIZE_MARKER_BYTE);
            match Self::decode_marker(next - SIZE_MARKER_BYTE, next_nibble)? {
                BlockMarker::Free { len_width } => {
                    inner.write_ptr(next + u64::from(len_width), prev);
                }
                _ => {
                    return Err(HeapError::CorruptedBlock {
                        address: next,
                        nibble: next_nibble,
                    })
                }
            }
        }

        Ok(())
    }
}

impl MergedNeighbors {
    fn absorb(&mut self, interior: u64) {
        self.space += interior;
        self.blocks += 1;
        self.small += u64::from(interior < SMALL_BLOCK_SIZE);
    }
}

impl SegmentInner {
    fn local(&self, addr: u64) -> usize {
        (addr - self.base) as usize
    }

    /// Reads up to 8 little-endian bytes as one value.
    pub(crate) fn read_val(&self, addr: u64, count: usize) -> u64 {
        let at = self.local(addr);
        let mut bytes = [0u8; 8];
        bytes[..count].copy_from_slice(&self.buf[at..at + count]);
        u64::from_le_bytes(bytes)
    }

    pub(crate) fn write_val(&mut self, addr: u64, value: u64, count: usize) {
        let at = self.local(addr);
        self.buf[at..at + count].copy_from_slice(&value.to_le_bytes()[..count]);
    }

    pub(crate) fn read_ptr(&self, addr: u64) -> u64 {
        self.read_val(addr, POINTER_SIZE as usize)
    }

    pub(crate) fn write_ptr(&mut self, addr: u64, pointer: u64) {
        self.write_val(addr, pointer, POINTER_SIZE as usize);
    }

    /// Low nibble: describes the block starting right after this marker.
    pub(crate) fn low_nibble(&self, addr: u64) -> u8 {
        self.buf[self.local(addr)] & 0x0F
    }

    /// High nibble: describes the block ending right before this marker.
    pub(crate) fn high_nibble(&self, addr: u64) -> u8 {
        (self.buf[self.local(addr)] & 0xF0) >> 4
    }

    pub(crate) fn set_low_nibble(&mut self, addr: u64, nibble: u8) {
        let at = self.local(addr);
        self.buf[at] = (self.buf[at] & 0xF0) | (nibble & 0x0F);
    }

    pub(crate) fn set_high_nibble(&mut self, addr: u64, nibble: u8) {
        let at = self.local(addr);
        self.buf[at] = ((nibble & 0x0F) << 4) | (self.buf[at] & 0x0F);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment() -> Segment {
        Segment::new(0, 0, 1 << 20)
    }

    #[test]
    fn fresh_segment_is_one_free_block() {
        let seg = segment();
        let status = seg.status();
        assert_eq!(status.free_blocks, 1);
        assert_eq!(status.free_space, seg.block_area_size() - 2);
        assert_eq!(status.active_blocks, 0);
    }

    #[test]
    fn allocate_then_read_back() {
        let seg = segment();
        let addr = seg.allocate(64, 0).unwrap();
        seg.write(addr, 0, &[0xAB; 64]).unwrap();

        let mut out = [0u8; 64];
        seg.read(addr, 0, &mut out).unwrap();
        assert_eq!(out, [0xAB; 64]);
        assert_eq!(seg.payload_size(addr).unwrap(), 64);
    }

    #[test]
    fn payload_access_is_bounded() {
        let seg = segment();
        let addr = seg.allocate(16, 0).unwrap();
        let mut out = [0u8; 17];
        assert!(matches!(
            seg.read(addr, 0, &mut out),
            Err(HeapError::OutOfBounds { .. })
        ));
        assert!(matches!(
            seg.write(addr, 10, &[0u8; 8]),
            Err(HeapError::OutOfBounds { .. })
        ));
        seg.write(addr, 10, &[0u8; 6]).unwrap();
    }

    #[test]
    fn double_free_is_rejected() {
        let seg = segment();
        // two live neighbors keep the freed block's markers intact
        let addr = seg.allocate(40, 0).unwrap();
        let _right = seg.allocate(40, 0).unwrap();
        seg.free(addr).unwrap();
        assert!(matches!(seg.free(addr), Err(HeapError::InvalidFree(_))));
    }

    #[test]
    fn free_of_unallocated_address_is_rejected() {
        let seg = segment();
        assert!(seg.free(12345).is_err());
    }

    #[test]
    fn adjacent_frees_coalesce_into_one_block() {
        let seg = segment();
        let a = seg.allocate(100, 0).unwrap();
        let b = seg.allocate(100, 0).unwrap();
        let _guard = seg.allocate(100, 0).unwrap();

        seg.free(a).unwrap();
        seg.free(b).unwrap();

        // a, b and the marker between them merged into a single free block
        let status = seg.status();
        assert_eq!(status.free_blocks, 2); // merged block + segment remainder
        assert_eq!(status.active_blocks, 1);
    }

    #[test]
    fn exact_fit_reuses_freed_block() {
        // fill the segment first so the large tail block cannot shadow the
        // freed block via size-class escalation
        let seg = Segment::new(0, 0, 64 * 1024);
        let mut held = Vec::new();
        while let Ok(addr) = seg.allocate(200, 0) {
            held.push(addr);
        }
        assert!(held.len() > 2);

        let victim = held[held.len() / 2];
        seg.free(victim).unwrap();
        assert_eq!(seg.allocate(200, 0).unwrap(), victim);
    }

    #[test]
    fn custom_state_round_trips() {
        let seg = segment();
        let addr = seg.allocate(32, 0).unwrap();
        assert_eq!(seg.custom_state(addr).unwrap(), 0);
        seg.set_custom_state(addr, 2).unwrap();
        assert_eq!(seg.custom_state(addr).unwrap(), 2);
        assert_eq!(seg.payload_size(addr).unwrap(), 32);
        assert!(seg.set_custom_state(addr, 3).is_err());
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let seg = Segment::new(0, 0, 64 * 1024);
        let mut held = Vec::new();
        loop {
            match seg.allocate(4096, 0) {
                Ok(addr) => held.push(addr),
                Err(HeapError::OutOfMemory(0)) => break,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(!held.is_empty());
        // freeing one block makes the same size allocatable again
        seg.free(held[0]).unwrap();
        seg.allocate(4096, 0).unwrap();
    }

    #[test]
    fn corrupted_free_marker_surfaces_as_corruption() {
        let seg = segment();
        // stamp the unused nibble onto the initial free block's marker
        seg.inner.write().set_low_nibble(seg.base(), 5);

        assert!(matches!(
            seg.allocate(64, 0),
            Err(HeapError::CorruptedBlock { nibble: 5, .. })
        ));
    }

    #[test]
    fn oversize_and_zero_rejected() {
        let seg = segment();
        assert!(matches!(
            seg.allocate(0, 0),
            Err(HeapError::InvalidBlockSize(0))
        ));
        assert!(matches!(
            seg.allocate(MAX_BLOCK_PAYLOAD + 1, 0),
            Err(HeapError::InvalidBlockSize(_))
        ));
    }
}
