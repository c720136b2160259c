//! Marker codec for the self-describing block format.
//!
//! One marker byte sits between every two adjacent blocks. Its low nibble
//! describes the block starting right after the byte, its high nibble the
//! block ending right before it. All multi-byte length fields and pointers in
//! the heap are little endian; a block's interior is
//! `length field + payload` for allocated blocks and
//! `length field + free-list links + slack` for free ones, with the interior
//! size stored at both interior ends of free blocks so neighbors can be
//! inspected from either side.

/// Bytes occupied by one marker.
pub const SIZE_MARKER_BYTE: u64 = 1;

/// Width of free-list pointers and list heads.
pub const POINTER_SIZE: u64 = 5;

/// Free blocks below this interior size cannot hold the two list pointers and
/// fall back to the tiny encoding, findable only by a linear walk.
pub const MIN_LINKED_FREE_SIZE: u64 = 12;

/// Largest payload a single block can carry (8 MiB), which keeps the
/// allocated length field at three bytes or less.
pub const MAX_BLOCK_PAYLOAD: u64 = 1 << 23;

/// Free blocks smaller than this count as "small" in the fragmentation
/// statistics.
pub const SMALL_BLOCK_SIZE: u64 = 64;

/// Highest custom state tag an allocated block can carry.
pub const MAX_CUSTOM_STATE: u8 = 2;

const FREE_WIDTH_MAX: u8 = 4;
const ALLOC_BASE: u8 = 6;
const SINGLE_BYTE_MARKER: u8 = 15;

/// Decoded form of one marker nibble. Decoding happens once per block visit;
/// every consumer matches exhaustively instead of switching on raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMarker {
    /// Free block with interior < 12 bytes: a 1-byte interior size at the
    /// first and last interior byte, no list linkage.
    TinyFree,
    /// Free block with `len_width` (1..=4) size bytes at both interior ends,
    /// followed at the front by 5-byte prev/next list pointers.
    Free { len_width: u8 },
    /// Allocated block: `len_width` (1..=3) payload-length bytes, then the
    /// payload. `state` is a small caller-defined tag (0..=2).
    Allocated { len_width: u8, state: u8 },
    /// A lone marker byte bridging a gap too small for any interior.
    SingleByteFree,
}

impl BlockMarker {
    /// Decodes a nibble; `None` marks heap corruption (nibble 5 is unused).
    pub fn decode(nibble: u8) -> Option<BlockMarker> {
        match nibble {
            0 => Some(BlockMarker::TinyFree),
            w @ 1..=FREE_WIDTH_MAX => Some(BlockMarker::Free { len_width: w }),
            m @ ALLOC_BASE..=14 => Some(BlockMarker::Allocated {
                len_width: (m - ALLOC_BASE) % 3 + 1,
                state: (m - ALLOC_BASE) / 3,
            }),
            SINGLE_BYTE_MARKER => Some(BlockMarker::SingleByteFree),
            _ => None,
        }
    }

    /// Encodes back to the nibble value. Inverse of [`BlockMarker::decode`]
    /// for every decodable nibble.
    pub fn encode(self) -> u8 {
        match self {
            BlockMarker::TinyFree => 0,
            BlockMarker::Free { len_width } => len_width,
            BlockMarker::Allocated { len_width, state } => ALLOC_BASE + state * 3 + (len_width - 1),
            BlockMarker::SingleByteFree => SINGLE_BYTE_MARKER,
        }
    }

    pub fn is_free(self) -> bool {
        !matches!(self, BlockMarker::Allocated { .. })
    }

    /// Marker for an allocated block of the given payload size: the length
    /// field gets the smallest width that can represent the size.
    pub fn allocated_for(payload: u64, state: u8) -> BlockMarker {
        BlockMarker::Allocated {
            len_width: alloc_len_width(payload),
            state,
        }
    }
}

/// Smallest length-field width (1..=3) representing an allocated payload.
pub fn alloc_len_width(payload: u64) -> u8 {
    debug_assert!(payload <= MAX_BLOCK_PAYLOAD);
    if payload >= 1 << 16 {
        3
    } else if payload >= 1 << 8 {
        2
    } else {
        1
    }
}

/// Smallest length-field width (1..=4) representing a free-block interior.
pub fn free_len_width(size: u64) -> u8 {
    let mut width = 1u8;
    let mut rest = size >> 8;
    while rest > 0 {
        width += 1;
        rest >>= 8;
    }
    debug_assert!(width <= FREE_WIDTH_MAX);
    width
}
