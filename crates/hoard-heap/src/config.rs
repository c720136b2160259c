use serde::{Deserialize, Serialize};

use crate::error::{HeapError, HeapResult};

/// Smallest allowed segment size. Below this the free-list head area would
/// dominate the segment.
pub const SEGMENT_SIZE_MIN: u64 = 4 * 1024;

/// Largest allowed segment size; keeps free-block length fields at four
/// bytes.
pub const SEGMENT_SIZE_MAX: u64 = u32::MAX as u64;

const DEFAULT_TOTAL_BYTES: u64 = 128 * 1024 * 1024; // 128 MiB
const DEFAULT_SEGMENT_BYTES: u64 = 16 * 1024 * 1024; // 16 MiB

/// Sizing of the small-object heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapConfig {
    /// Total pre-allocated memory in bytes. Must be a multiple of
    /// `segment_size`.
    pub total_size: u64,
    /// Size of each segment in bytes.
    pub segment_size: u64,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            total_size: DEFAULT_TOTAL_BYTES,
            segment_size: DEFAULT_SEGMENT_BYTES,
        }
    }
}

impl HeapConfig {
    pub fn new(total_size: u64, segment_size: u64) -> HeapConfig {
        HeapConfig {
            total_size,
            segment_size,
        }
    }

    pub fn validate(&self) -> HeapResult<()> {
        if self.segment_size < SEGMENT_SIZE_MIN || self.segment_size > SEGMENT_SIZE_MAX {
            return Err(HeapError::InvalidConfig(format!(
                "segment size {} outside [{SEGMENT_SIZE_MIN}, {SEGMENT_SIZE_MAX}]",
                self.segment_size
            )));
        }
        if self.total_size == 0 || self.total_size % self.segment_size != 0 {
            return Err(HeapError::InvalidConfig(format!(
                "total size {} is not a positive multiple of segment size {}",
                self.total_size, self.segment_size
            )));
        }
        Ok(())
    }

    pub fn segment_count(&self) -> usize {
        (self.total_size / self.segment_size) as usize
    }
}
