/// Errors of the small-object heap.
///
/// Capacity exhaustion ([`HeapError::OutOfMemory`], [`HeapError::HeapFull`])
/// is an expected outcome the caller handles by probing elsewhere or failing
/// the put; corruption and contract violations get their own variants so the
/// two are never conflated.
#[non_exhaustive]
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HeapError {
    /// The probed segment has no free block large enough.
    #[error("segment {0} is out of memory")]
    OutOfMemory(usize),
    /// Every segment of the heap is out of memory.
    #[error("heap is full: no segment can serve {0} bytes")]
    HeapFull(u64),
    /// Requested block size is zero or exceeds the maximum block size.
    #[error("invalid block size {0}")]
    InvalidBlockSize(u64),
    /// A marker byte did not decode to any known block kind.
    #[error("corrupted block: unrecognized marker nibble {nibble:#x} at address {address:#x}")]
    CorruptedBlock { address: u64, nibble: u8 },
    /// The address does not point at an allocated block.
    #[error("invalid free: address {0:#x} does not point at an allocated block")]
    InvalidFree(u64),
    /// The address is outside the heap or the access exceeds the block's
    /// recorded payload length.
    #[error("out of bounds: address {address:#x}, offset {offset}, length {length}")]
    OutOfBounds {
        address: u64,
        offset: u64,
        length: u64,
    },
    /// Custom state tags only span 0..=2.
    #[error("custom state {0} out of range")]
    InvalidCustomState(u8),
    /// Configuration value was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type HeapResult<T> = Result<T, HeapError>;
