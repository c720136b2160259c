use crc64fast_nvme::Digest;

use crate::chunk_id::ChunkId;
use crate::error::{TypesError, TypesResult};

/// Fixed header in front of every serialized chunk:
/// `id: u64 | payload_len: u32 | crc64(payload): u64`, little endian.
pub const RECORD_HEADER_SIZE: usize = 20;

/// A chunk in its serialized form, as replayed from backup logs and files.
/// Just the identifier and the payload bytes; no polymorphic type
/// information travels with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub id: ChunkId,
    pub payload: Vec<u8>,
}

impl RawChunk {
    pub fn new(id: ChunkId, payload: Vec<u8>) -> RawChunk {
        RawChunk { id, payload }
    }

    /// Size of the encoded record including its header.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }

    /// Appends the record to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut digest = Digest::new();
        digest.write(&self.payload);

        out.extend_from_slice(&self.id.raw().to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&digest.sum64().to_le_bytes());
        out.extend_from_slice(&self.payload);
    }

    /// Decodes one record from the front of `buf`, returning the record and
    /// the number of bytes consumed. The payload checksum is verified. Every
    /// stored chunk carries at least one payload byte, so a zero-length
    /// record is rejected as corrupt.
    pub fn decode_from(buf: &[u8]) -> TypesResult<(RawChunk, usize)> {
        if buf.len() < RECORD_HEADER_SIZE {
            return Err(TypesError::TruncatedRecord {
                expected: RECORD_HEADER_SIZE,
                found: buf.len(),
            });
        }

        let id = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let payload_len = u32::from_le_bytes(buf[8..12].try_into().unwrap()) as usize;
        let checksum = u64::from_le_bytes(buf[12..20].try_into().unwrap());

        let total = RECORD_HEADER_SIZE + payload_len;
        if buf.len() < total {
            return Err(TypesError::TruncatedRecord {
                expected: total,
                found: buf.len(),
            });
        }

        let id = ChunkId::from_raw(id);
        if !id.is_valid() {
            return Err(TypesError::CorruptedRecord(
                "record carries the invalid chunk id sentinel".to_string(),
            ));
        }
        if payload_len == 0 {
            return Err(TypesError::CorruptedRecord(format!(
                "zero-length payload for chunk {id}"
            )));
        }

        let payload = &buf[RECORD_HEADER_SIZE..total];
        let mut digest = Digest::new();
        digest.write(payload);
        if digest.sum64() != checksum {
            return Err(TypesError::CorruptedRecord(format!(
                "checksum mismatch for chunk {id}"
            )));
        }

        Ok((RawChunk::new(id, payload.to_vec()), total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_id::NodeId;

    fn sample(local: u64, payload: &[u8]) -> RawChunk {
        RawChunk::new(ChunkId::new(NodeId(0x11), local).unwrap(), payload.to_vec())
    }

    #[test]
    fn encode_decode_preserves_record() {
        let chunk = sample(42, b"hello chunk");
        let mut buf = Vec::new();
        chunk.encode_into(&mut buf);
        assert_eq!(buf.len(), chunk.encoded_len());

        let (decoded, consumed) = RawChunk::decode_from(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn corrupted_payload_is_detected() {
        let chunk = sample(1, b"payload bytes");
        let mut buf = Vec::new();
        chunk.encode_into(&mut buf);
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        assert!(matches!(
            RawChunk::decode_from(&buf),
            Err(TypesError::CorruptedRecord(_))
        ));
    }

    #[test]
    fn zero_length_payload_rejected() {
        let id = ChunkId::new(NodeId(0x11), 9).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&id.raw().to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        // checksum of the empty payload is consistent, the length alone is
        // what gets the record rejected
        buf.extend_from_slice(&Digest::new().sum64().to_le_bytes());

        assert!(matches!(
            RawChunk::decode_from(&buf),
            Err(TypesError::CorruptedRecord(_))
        ));
    }

    #[test]
    fn truncated_buffer_is_detected() {
        let chunk = sample(2, b"0123456789");
        let mut buf = Vec::new();
        chunk.encode_into(&mut buf);
        buf.truncate(buf.len() - 4);

        assert!(matches!(
            RawChunk::decode_from(&buf),
            Err(TypesError::TruncatedRecord { .. })
        ));
    }
}
