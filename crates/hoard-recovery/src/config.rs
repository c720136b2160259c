use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use hoard_types::NodeId;

use crate::error::{RecoveryError, RecoveryResult};

/// Where a node keeps its backup files and who it is in the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Directory scanned by the cold-start recovery path.
    pub backup_dir: PathBuf,
    /// This node's id; recovery requests addressed to anyone else are
    /// forwarded.
    pub local_node: NodeId,
}

impl RecoveryConfig {
    pub fn new(backup_dir: impl Into<PathBuf>, local_node: NodeId) -> RecoveryConfig {
        RecoveryConfig {
            backup_dir: backup_dir.into(),
            local_node,
        }
    }

    pub fn validate(&self) -> RecoveryResult<()> {
        if !self.local_node.is_valid() {
            return Err(RecoveryError::InvalidConfig(
                "local node id is the invalid sentinel".to_string(),
            ));
        }
        if self.backup_dir.as_os_str().is_empty() {
            return Err(RecoveryError::InvalidConfig(
                "backup directory is empty".to_string(),
            ));
        }
        Ok(())
    }
}
