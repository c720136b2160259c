//! Wire frames exchanged during recovery. Hand-encoded little endian with a
//! leading subtype byte, matching the chunk record codec's conventions.

use hoard_types::{ChunkId, ChunkIdRange, NodeId, RangeSelector};

use crate::error::{RecoveryError, RecoveryResult};

const SUBTYPE_RECOVER: u8 = 1;
const SUBTYPE_RANGE_REQUEST: u8 = 2;
const SUBTYPE_RANGE_RESPONSE: u8 = 3;

const SELECTOR_NORMAL: u8 = 0;
const SELECTOR_MIGRATION: u8 = 1;

/// Flag bit in [`RecoverMessage`]: replay from live backup peers instead of
/// local files.
pub const FLAG_USE_LIVE_DATA: u8 = 0x80;

/// Tells `dest` to recover the chunks of failed node `owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverMessage {
    pub dest: NodeId,
    pub owner: NodeId,
    pub use_live_data: bool,
}

/// Asks a peer to replay one backup range it holds for `owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverBackupRangeRequest {
    pub owner: NodeId,
    pub selector: RangeSelector,
}

/// Outcome of one range replay; a count of zero signals failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverBackupRangeResponse {
    pub recovered_count: u64,
    pub cid_ranges: Vec<ChunkIdRange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Recover(RecoverMessage),
    RangeRequest(RecoverBackupRangeRequest),
    RangeResponse(RecoverBackupRangeResponse),
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Message::Recover(m) => {
                out.push(SUBTYPE_RECOVER);
                out.extend_from_slice(&m.dest.0.to_le_bytes());
                out.extend_from_slice(&m.owner.0.to_le_bytes());
                out.push(if m.use_live_data { FLAG_USE_LIVE_DATA } else { 0 });
            }
            Message::RangeRequest(m) => {
                out.push(SUBTYPE_RANGE_REQUEST);
                out.extend_from_slice(&m.owner.0.to_le_bytes());
                match m.selector {
                    RangeSelector::Normal { first_chunk } => {
                        out.push(SELECTOR_NORMAL);
                        out.extend_from_slice(&first_chunk.raw().to_le_bytes());
                    }
                    RangeSelector::Migration { range_id } => {
                        out.push(SELECTOR_MIGRATION);
                        out.push(range_id);
                    }
                }
            }
            Message::RangeResponse(m) => {
                out.push(SUBTYPE_RANGE_RESPONSE);
                out.extend_from_slice(&m.recovered_count.to_le_bytes());
                out.extend_from_slice(&(m.cid_ranges.len() as u32).to_le_bytes());
                for range in &m.cid_ranges {
                    out.extend_from_slice(&range.start.raw().to_le_bytes());
                    out.extend_from_slice(&range.end.raw().to_le_bytes());
                }
            }
        }
        out
    }

    pub fn decode(buf: &[u8]) -> RecoveryResult<Message> {
        let mut cursor = Cursor::new(buf);
        let message = match cursor.u8()? {
            SUBTYPE_RECOVER => {
                let dest = NodeId(cursor.u16()?);
                let owner = NodeId(cursor.u16()?);
                let flags = cursor.u8()?;
                Message::Recover(RecoverMessage {
                    dest,
                    owner,
                    use_live_data: flags & FLAG_USE_LIVE_DATA != 0,
                })
            }
            SUBTYPE_RANGE_REQUEST => {
                let owner = NodeId(cursor.u16()?);
                let selector = match cursor.u8()? {
                    SELECTOR_NORMAL => RangeSelector::Normal {
                        first_chunk: ChunkId::from_raw(cursor.u64()?),
                    },
                    SELECTOR_MIGRATION => RangeSelector::Migration {
                        range_id: cursor.u8()?,
                    },
                    tag => {
                        return Err(RecoveryError::InvalidMessage(format!(
                            "unknown range selector tag {tag}"
                        )))
                    }
                };
                Message::RangeRequest(RecoverBackupRangeRequest { owner, selector })
            }
            SUBTYPE_RANGE_RESPONSE => {
                let recovered_count = cursor.u64()?;
                let ranges = cursor.u32()? as usize;
                let mut cid_ranges = Vec::with_capacity(ranges.min(1024));
                for _ in 0..ranges {
                    let start = ChunkId::from_raw(cursor.u64()?);
                    let end = ChunkId::from_raw(cursor.u64()?);
                    cid_ranges.push(ChunkIdRange::new(start, end));
                }
                Message::RangeResponse(RecoverBackupRangeResponse {
                    recovered_count,
                    cid_ranges,
                })
            }
            subtype => {
                return Err(RecoveryError::InvalidMessage(format!(
                    "unknown message subtype {subtype}"
                )))
            }
        };
        Ok(message)
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf, at: 0 }
    }

    fn take(&mut self, count: usize) -> RecoveryResult<&'a [u8]> {
        if self.at + count > self.buf.len() {
            return Err(RecoveryError::InvalidMessage(format!(
                "frame truncated at byte {}, needed {count} more",
                self.at
            )));
        }
        let slice = &self.buf[self.at..self.at + count];
        self.at += count;
        Ok(slice)
    }

    fn u8(&mut self) -> RecoveryResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> RecoveryResult<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> RecoveryResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> RecoveryResult<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recover_message_round_trips() {
        let message = Message::Recover(RecoverMessage {
            dest: NodeId(0x0042),
            owner: NodeId(0x0007),
            use_live_data: true,
        });
        assert_eq!(Message::decode(&message.encode()).unwrap(), message);
    }

    #[test]
    fn use_live_data_flag_decodes_with_bit_test() {
        // the flag must be read as a bit, not compared against 1
        let frame = [SUBTYPE_RECOVER, 0x42, 0x00, 0x07, 0x00, FLAG_USE_LIVE_DATA];
        match Message::decode(&frame).unwrap() {
            Message::Recover(m) => assert!(m.use_live_data),
            other => panic!("unexpected message: {other:?}"),
        }

        let frame = [SUBTYPE_RECOVER, 0x42, 0x00, 0x07, 0x00, 0x00];
        match Message::decode(&frame).unwrap() {
            Message::Recover(m) => assert!(!m.use_live_data),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn range_request_round_trips_both_selectors() {
        let normal = Message::RangeRequest(RecoverBackupRangeRequest {
            owner: NodeId(9),
            selector: RangeSelector::Normal {
                first_chunk: ChunkId::new(NodeId(9), 1).unwrap(),
            },
        });
        assert_eq!(Message::decode(&normal.encode()).unwrap(), normal);

        let migration = Message::RangeRequest(RecoverBackupRangeRequest {
            owner: NodeId(9),
            selector: RangeSelector::Migration { range_id: 3 },
        });
        assert_eq!(Message::decode(&migration.encode()).unwrap(), migration);
    }

    #[test]
    fn range_response_round_trips() {
        let start = ChunkId::new(NodeId(2), 10).unwrap();
        let end = ChunkId::new(NodeId(2), 19).unwrap();
        let message = Message::RangeResponse(RecoverBackupRangeResponse {
            recovered_count: 10,
            cid_ranges: vec![ChunkIdRange::new(start, end)],
        });
        assert_eq!(Message::decode(&message.encode()).unwrap(), message);
    }

    #[test]
    fn unknown_subtype_rejected() {
        assert!(matches!(
            Message::decode(&[0xEE, 0, 0]),
            Err(RecoveryError::InvalidMessage(_))
        ));
    }

    #[test]
    fn truncated_frame_rejected() {
        let full = Message::Recover(RecoverMessage {
            dest: NodeId(1),
            owner: NodeId(2),
            use_live_data: false,
        })
        .encode();
        assert!(Message::decode(&full[..full.len() - 1]).is_err());
    }
}
