//! On-disk backup files: a plain concatenation of raw chunk records.

use std::fs;
use std::path::Path;

use tracing::debug;

use hoard_types::RawChunk;

use crate::error::RecoveryResult;

pub struct BackupFileReader;

impl BackupFileReader {
    /// Reads every record of a backup file, verifying each checksum. The
    /// first bad record fails the whole file; recovery treats such a file as
    /// lost rather than re-inserting half of it.
    pub fn read_records(path: &Path) -> RecoveryResult<Vec<RawChunk>> {
        let buf = fs::read(path)?;
        let mut chunks = Vec::new();
        let mut at = 0;
        while at < buf.len() {
            let (chunk, consumed) = RawChunk::decode_from(&buf[at..])?;
            chunks.push(chunk);
            at += consumed;
        }
        debug!(file = %path.display(), records = chunks.len(), "read backup file");
        Ok(chunks)
    }

    /// Writes records as one backup file, the inverse of
    /// [`BackupFileReader::read_records`].
    pub fn write_records(path: &Path, chunks: &[RawChunk]) -> RecoveryResult<()> {
        let mut buf = Vec::with_capacity(chunks.iter().map(RawChunk::encoded_len).sum());
        for chunk in chunks {
            chunk.encode_into(&mut buf);
        }
        fs::write(path, buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecoveryError;
    use hoard_types::{ChunkId, NodeId};

    fn chunks() -> Vec<RawChunk> {
        (1..=5u64)
            .map(|local| {
                RawChunk::new(
                    ChunkId::new(NodeId(4), local).unwrap(),
                    vec![local as u8; 32],
                )
            })
            .collect()
    }

    #[test]
    fn file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sec4_0.bak");
        let original = chunks();

        BackupFileReader::write_records(&path, &original).unwrap();
        assert_eq!(BackupFileReader::read_records(&path).unwrap(), original);
    }

    #[test]
    fn corrupt_record_fails_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sec4_1.bak");
        BackupFileReader::write_records(&path, &chunks()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            BackupFileReader::read_records(&path),
            Err(RecoveryError::Record(_))
        ));
    }

    #[test]
    fn missing_file_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BackupFileReader::read_records(&dir.path().join("absent.bak")),
            Err(RecoveryError::Io(_))
        ));
    }
}
