//! Small-object heap for the hoard chunk store.
//!
//! Memory is pre-allocated in fixed-size segments, each split into a block
//! area holding self-describing payload blocks and a trailing free-list area
//! with one list head per size class. The heap spreads allocations across
//! segments and exposes a flat 64-bit address space; the CID table maps chunk
//! ids onto those addresses. A walker re-parses the block stream for the
//! integrity checker.

pub mod block;
pub mod cid_table;
pub mod config;
pub mod error;
pub mod heap;
pub mod integrity;
pub mod segment;
pub mod walker;

pub use block::BlockMarker;
pub use cid_table::CidTable;
pub use config::HeapConfig;
pub use error::{HeapError, HeapResult};
pub use heap::Heap;
pub use integrity::{CheckId, IntegrityChecker, IntegrityError};
pub use segment::{Segment, SegmentStatus};
pub use walker::{FreeListWalk, HeapWalker, SegmentWalk, WalkResult, WalkedBlock, WalkedBlockKind};
