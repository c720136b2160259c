//! Orchestrates the recovery of a failed node's chunks, either from live
//! backup peers or from local backup files.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use hoard_types::{
    BackupRange, ChunkId, ChunkIdRange, FinishedRecovery, NodeId, RangeSelector, RawChunk,
    RecoveryMetadata, RecoverySnapshot,
};

use crate::config::RecoveryConfig;
use crate::error::RecoveryResult;
use crate::messages::{
    Message, RecoverBackupRangeRequest, RecoverBackupRangeResponse, RecoverMessage,
};
use crate::traits::{ChunkBackup, LogClient, LookupClient, Network};

/// How one recovery request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryReport {
    /// The request was for another restorer and has been sent there.
    Forwarded { dest: NodeId },
    /// Recovery ran here; the snapshot totals what was re-inserted.
    Completed(RecoverySnapshot),
}

/// Drives recovery end to end: decides local vs. forwarded, serializes
/// concurrent recoveries of the same owner, replays ranges through the log
/// collaborator, re-inserts chunks and republishes ownership.
pub struct RecoveryCoordinator {
    config: RecoveryConfig,
    log: Arc<dyn LogClient>,
    lookup: Arc<dyn LookupClient>,
    backup: Arc<dyn ChunkBackup>,
    network: Arc<dyn Network>,
    owner_locks: Mutex<HashMap<NodeId, Arc<Mutex<()>>>>,
    finished: Mutex<Vec<FinishedRecovery>>,
}

impl RecoveryCoordinator {
    pub fn new(
        config: RecoveryConfig,
        log: Arc<dyn LogClient>,
        lookup: Arc<dyn LookupClient>,
        backup: Arc<dyn ChunkBackup>,
        network: Arc<dyn Network>,
    ) -> RecoveryResult<RecoveryCoordinator> {
        config.validate()?;
        Ok(RecoveryCoordinator {
            config,
            log,
            lookup,
            backup,
            network,
            owner_locks: Mutex::new(HashMap::new()),
            finished: Mutex::new(Vec::new()),
        })
    }

    pub fn local_node(&self) -> NodeId {
        self.config.local_node
    }

    /// Recovers the chunks of failed node `owner` on restorer `dest`. When
    /// `dest` is not this node the request is forwarded and not retried; a
    /// send failure aborts. Locally, recoveries of the same owner are
    /// serialized while different owners proceed in parallel.
    pub fn recover(
        &self,
        owner: NodeId,
        dest: NodeId,
        use_live_data: bool,
    ) -> RecoveryResult<RecoveryReport> {
        if dest != self.config.local_node {
            info!(%owner, %dest, "forwarding recovery to its restorer");
            self.network.send_message(&Message::Recover(RecoverMessage {
                dest,
                owner,
                use_live_data,
            }))?;
            return Ok(RecoveryReport::Forwarded { dest });
        }

        let lock = self.owner_lock(owner);
        let _serialized = lock.lock();

        info!(%owner, use_live_data, "starting local recovery");
        let metadata = RecoveryMetadata::new();
        if use_live_data {
            self.recover_locally(owner, &metadata)?;
        } else {
            self.recover_locally_from_files(owner, &metadata)?;
        }

        let snapshot = metadata.snapshot();
        info!(
            %owner,
            chunks = snapshot.chunk_count,
            bytes = snapshot.byte_count,
            "recovery finished"
        );
        Ok(RecoveryReport::Completed(snapshot))
    }

    /// Handles an incoming recovery frame. Work runs on a dedicated thread so
    /// the caller's message loop never blocks on log replay.
    pub fn handle_message(self: &Arc<Self>, message: Message) {
        match message {
            Message::Recover(m) => {
                let this = Arc::clone(self);
                std::thread::spawn(move || {
                    if let Err(err) = this.recover(m.owner, m.dest, m.use_live_data) {
                        error!(owner = %m.owner, %err, "recovery request failed");
                    }
                });
            }
            Message::RangeRequest(request) => {
                let this = Arc::clone(self);
                std::thread::spawn(move || {
                    let response = this.handle_range_request(request);
                    if let Err(err) = this.network.send_message(&Message::RangeResponse(response))
                    {
                        error!(owner = %request.owner, %err, "failed to answer range request");
                    }
                });
            }
            Message::RangeResponse(response) => {
                // responses are consumed by the requesting side's transport
                warn!(
                    recovered = response.recovered_count,
                    "unsolicited range response"
                );
            }
        }
    }

    /// Recovered-range records awaiting the replication follow-up; draining
    /// hands them over exactly once.
    pub fn take_finished(&self) -> Vec<FinishedRecovery> {
        std::mem::take(&mut *self.finished.lock())
    }

    fn owner_lock(&self, owner: NodeId) -> Arc<Mutex<()>> {
        Arc::clone(self.owner_locks.lock().entry(owner).or_default())
    }

    /// Live path: every backup range the overlay knows for the owner is
    /// replayed from its backup peers. A failing range is skipped, the rest
    /// still recovers.
    fn recover_locally(&self, owner: NodeId, metadata: &RecoveryMetadata) -> RecoveryResult<()> {
        let ranges = self.lookup.get_all_backup_ranges(owner)?;
        if ranges.is_empty() {
            info!(%owner, "no backup ranges registered, nothing to recover");
            return Ok(());
        }

        for range in &ranges {
            let selector = range.selector(owner);
            match self.recover_range(owner, range, selector, metadata) {
                Ok(finished) => self.finished.lock().push(finished),
                Err(err) => {
                    warn!(%owner, ?selector, %err, "skipping backup range");
                }
            }
        }

        self.lookup.set_restorer_after_recovery(owner)?;
        Ok(())
    }

    fn recover_range(
        &self,
        owner: NodeId,
        range: &BackupRange,
        selector: RangeSelector,
        metadata: &RecoveryMetadata,
    ) -> RecoveryResult<FinishedRecovery> {
        let chunks = self.log.recover_backup_range(owner, selector)?;
        let bytes = self.backup.put_recovered_chunks(&chunks)?;
        self.migrate_foreign_chunks(owner, &chunks)?;

        let cid_ranges = compress_cid_ranges(&chunks);
        metadata.add(chunks.len() as u64, bytes, &cid_ranges);

        Ok(FinishedRecovery::new(
            range.replacement_peer(),
            cid_ranges,
            chunks.len() as u64,
            range.first_chunk_or_range_id,
        ))
    }

    /// File path: replays every backup file of the owner found in the backup
    /// directory. A file that fails to read or verify is logged and skipped.
    fn recover_locally_from_files(
        &self,
        owner: NodeId,
        metadata: &RecoveryMetadata,
    ) -> RecoveryResult<()> {
        let needle = format!("sec{}", owner.0);
        let mut names: Vec<String> = std::fs::read_dir(&self.config.backup_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(&needle))
            .collect();
        names.sort_unstable();

        if names.is_empty() {
            info!(%owner, dir = %self.config.backup_dir.display(), "no backup files found");
            return Ok(());
        }

        for name in &names {
            if let Err(err) = self.recover_file(owner, name, metadata) {
                error!(%owner, file = %name, %err, "failed to recover backup file");
            }
        }

        self.lookup.set_restorer_after_recovery(owner)?;
        Ok(())
    }

    fn recover_file(
        &self,
        owner: NodeId,
        name: &str,
        metadata: &RecoveryMetadata,
    ) -> RecoveryResult<()> {
        let chunks = self
            .log
            .recover_backup_range_from_file(name, &self.config.backup_dir)?;
        let bytes = self.backup.put_recovered_chunks(&chunks)?;

        // migration backup files carry chunks the owner did not create
        if name.contains('M') {
            self.migrate_foreign_chunks(owner, &chunks)?;
        }

        let cid_ranges = compress_cid_ranges(&chunks);
        metadata.add(chunks.len() as u64, bytes, &cid_ranges);
        Ok(())
    }

    /// Republishes every chunk whose creator is not the failed owner; those
    /// are not covered by the bulk restorer update.
    fn migrate_foreign_chunks(&self, owner: NodeId, chunks: &[RawChunk]) -> RecoveryResult<()> {
        for chunk in chunks {
            if chunk.id.creator() != owner {
                self.lookup.migrate(chunk.id, self.config.local_node)?;
            }
        }
        Ok(())
    }

    fn handle_range_request(&self, request: RecoverBackupRangeRequest) -> RecoverBackupRangeResponse {
        match self.replay_single_range(request.owner, request.selector) {
            Ok((count, cid_ranges)) => RecoverBackupRangeResponse {
                recovered_count: count,
                cid_ranges,
            },
            Err(err) => {
                warn!(owner = %request.owner, %err, "range request failed");
                RecoverBackupRangeResponse {
                    recovered_count: 0,
                    cid_ranges: Vec::new(),
                }
            }
        }
    }

    fn replay_single_range(
        &self,
        owner: NodeId,
        selector: RangeSelector,
    ) -> RecoveryResult<(u64, Vec<ChunkIdRange>)> {
        let chunks = self.log.recover_backup_range(owner, selector)?;
        self.backup.put_recovered_chunks(&chunks)?;
        Ok((chunks.len() as u64, compress_cid_ranges(&chunks)))
    }
}

/// Compresses a batch of chunk ids into inclusive ranges of consecutive ids.
fn compress_cid_ranges(chunks: &[RawChunk]) -> Vec<ChunkIdRange> {
    let mut ids: Vec<u64> = chunks.iter().map(|c| c.id.raw()).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut ranges = Vec::new();
    let mut iter = ids.into_iter();
    let Some(first) = iter.next() else {
        return ranges;
    };

    let (mut start, mut end) = (first, first);
    for id in iter {
        if id == end + 1 {
            end = id;
        } else {
            ranges.push(ChunkIdRange::new(
                ChunkId::from_raw(start),
                ChunkId::from_raw(end),
            ));
            (start, end) = (id, id);
        }
    }
    ranges.push(ChunkIdRange::new(
        ChunkId::from_raw(start),
        ChunkId::from_raw(end),
    ));
    ranges
}
