//! The heap proper: an array of segments behind one flat address space.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::config::HeapConfig;
use crate::error::{HeapError, HeapResult};
use crate::segment::{Segment, SegmentStatus};

/// Owns every segment and spreads allocations across them. Addresses are
/// global: `address / segment_size` names the segment, the remainder the
/// offset inside it. Segment locking stays inside [`Segment`]; two
/// allocations in different segments run fully in parallel.
pub struct Heap {
    segments: Vec<Segment>,
    segment_size: u64,
    total_size: u64,
    cursor: AtomicUsize,
}

impl Heap {
    pub fn new(config: &HeapConfig) -> HeapResult<Heap> {
        config.validate()?;

        let count = config.segment_count();
        let segments = (0..count)
            .map(|i| Segment::new(i, i as u64 * config.segment_size, config.segment_size))
            .collect();

        debug!(
            total_size = config.total_size,
            segment_size = config.segment_size,
            segments = count,
            "heap initialized"
        );

        Ok(Heap {
            segments,
            segment_size: config.segment_size,
            total_size: config.total_size,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Reserves a block for `payload` bytes. Segments are probed in order
    /// starting from a rotating cursor so allocation pressure spreads; a
    /// segment answering [`HeapError::OutOfMemory`] just sends us to the
    /// next one. Only when every segment is exhausted does the heap report
    /// [`HeapError::HeapFull`], which fails this operation, not the process.
    pub fn allocate(&self, payload: u64) -> HeapResult<u64> {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for probe in 0..self.segments.len() {
            let segment = &self.segments[(start + probe) % self.segments.len()];
            match segment.allocate(payload, 0) {
                Ok(addr) => return Ok(addr),
                Err(HeapError::OutOfMemory(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(HeapError::HeapFull(payload))
    }

    /// Bulk allocation for recovery re-insertion. Either every requested
    /// block is reserved or none: on exhaustion mid-batch everything
    /// reserved so far is freed again before the error surfaces.
    pub fn allocate_batch(&self, payloads: &[u64]) -> HeapResult<Vec<u64>> {
        let mut addrs = Vec::with_capacity(payloads.len());
        for &payload in payloads {
            match self.allocate(payload) {
                Ok(addr) => addrs.push(addr),
                Err(err) => {
                    for &addr in &addrs {
                        // freshly reserved, nothing else references them yet
                        let _ = self.free(addr);
                    }
                    return Err(err);
                }
            }
        }
        Ok(addrs)
    }

    pub fn free(&self, addr: u64) -> HeapResult<()> {
        self.segment_of(addr)?.free(addr)
    }

    pub fn read(&self, addr: u64, offset: u64, out: &mut [u8]) -> HeapResult<usize> {
        self.segment_of(addr)?.read(addr, offset, out)
    }

    pub fn write(&self, addr: u64, offset: u64, data: &[u8]) -> HeapResult<usize> {
        self.segment_of(addr)?.write(addr, offset, data)
    }

    pub fn payload_size(&self, addr: u64) -> HeapResult<u64> {
        self.segment_of(addr)?.payload_size(addr)
    }

    pub fn custom_state(&self, addr: u64) -> HeapResult<u8> {
        self.segment_of(addr)?.custom_state(addr)
    }

    pub fn set_custom_state(&self, addr: u64, state: u8) -> HeapResult<()> {
        self.segment_of(addr)?.set_custom_state(addr, state)
    }

    /// Sum of the per-segment running counters.
    pub fn aggregate_status(&self) -> SegmentStatus {
        let mut total = SegmentStatus::default();
        for segment in &self.segments {
            let status = segment.status();
            total.free_space += status.free_space;
            total.free_blocks += status.free_blocks;
            total.small_free_blocks += status.small_free_blocks;
            total.allocated_payload += status.allocated_payload;
            total.active_blocks += status.active_blocks;
        }
        total
    }

    fn segment_of(&self, addr: u64) -> HeapResult<&Segment> {
        let index = (addr / self.segment_size) as usize;
        self.segments.get(index).ok_or(HeapError::OutOfBounds {
            address: addr,
            offset: 0,
            length: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(segments: u64, segment_size: u64) -> Heap {
        Heap::new(&HeapConfig::new(segments * segment_size, segment_size)).unwrap()
    }

    #[test]
    fn allocations_spread_over_segments() {
        let heap = heap(4, 64 * 1024);
        let addrs: Vec<u64> = (0..8).map(|_| heap.allocate(1024).unwrap()).collect();
        let mut used: Vec<u64> = addrs.iter().map(|a| a / heap.segment_size()).collect();
        used.sort_unstable();
        used.dedup();
        assert!(used.len() > 1, "rotating cursor should touch >1 segment");
    }

    #[test]
    fn full_heap_reports_heap_full() {
        let heap = heap(2, 4 * 1024);
        let mut held = Vec::new();
        loop {
            match heap.allocate(512) {
                Ok(addr) => held.push(addr),
                Err(HeapError::HeapFull(_)) => break,
                Err(other) => panic!("unexpected: {other}"),
            }
        }
        heap.free(held.pop().unwrap()).unwrap();
        heap.allocate(512).unwrap();
    }

    #[test]
    fn batch_rolls_back_on_exhaustion() {
        let heap = heap(1, 4 * 1024);
        let before = heap.aggregate_status();

        let request = vec![1024u64; 8]; // cannot all fit in 4 KiB
        assert!(matches!(
            heap.allocate_batch(&request),
            Err(HeapError::HeapFull(_))
        ));

        let after = heap.aggregate_status();
        assert_eq!(before.active_blocks, after.active_blocks);
        assert_eq!(before.free_space, after.free_space);
    }

    #[test]
    fn read_write_cross_segment_dispatch() {
        let heap = heap(2, 64 * 1024);
        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(100).unwrap();
        heap.write(a, 0, b"first segment chunk").unwrap();
        heap.write(b, 0, b"other segment chunk").unwrap();

        let mut out = [0u8; 19];
        heap.read(a, 0, &mut out).unwrap();
        assert_eq!(&out, b"first segment chunk");
        heap.read(b, 0, &mut out).unwrap();
        assert_eq!(&out, b"other segment chunk");
    }
}
