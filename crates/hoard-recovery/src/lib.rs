//! Node-failure recovery for the hoard chunk store.
//!
//! When a peer dies, its chunks are rebuilt on a restorer node: either
//! replayed from the live backup logs of surviving peers or, on cold start,
//! read back from local backup files. The coordinator in this crate drives
//! that process through narrow collaborator traits, so the log, the lookup
//! overlay and the transport stay pluggable.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod file_log;
pub mod heap_backup;
pub mod messages;
pub mod traits;

pub use config::RecoveryConfig;
pub use coordinator::{RecoveryCoordinator, RecoveryReport};
pub use error::{RecoveryError, RecoveryResult};
pub use file_log::BackupFileReader;
pub use heap_backup::HeapChunkBackup;
pub use messages::{
    Message, RecoverBackupRangeRequest, RecoverBackupRangeResponse, RecoverMessage,
    FLAG_USE_LIVE_DATA,
};
pub use traits::{ChunkBackup, LogClient, LookupClient, Network};
