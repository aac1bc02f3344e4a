use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_LSN};
use crate::storage::table::Tuple;

/// Fixed log record header (little-endian):
///   0..4   size (i32, total record bytes including this header)
///   4..12  lsn (i64)
///   12..16 txn_id (u32)
///   16..24 prev_lsn (i64)
///   24..28 type (i32)
pub const LOG_RECORD_HEADER_SIZE: usize = 28;

/// Serialized RID: page_id (i32) then slot_num (u32)
pub const RID_SERIALIZED_SIZE: usize = 8;

/// Types of log records emitted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Begin = 1,
    Commit = 2,
    Abort = 3,
    Insert = 4,
    Update = 5,
    ApplyDelete = 6,
    MarkDelete = 7,
    RollbackDelete = 8,
    NewPage = 9,
}

impl LogRecordType {
    fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Commit),
            3 => Some(Self::Abort),
            4 => Some(Self::Insert),
            5 => Some(Self::Update),
            6 => Some(Self::ApplyDelete),
            7 => Some(Self::MarkDelete),
            8 => Some(Self::RollbackDelete),
            9 => Some(Self::NewPage),
            _ => None,
        }
    }
}

/// Per-type payload following the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    /// BEGIN / COMMIT / ABORT carry no payload
    None,
    /// INSERT and the three delete variants: the affected RID and tuple
    Tuple { rid: Rid, tuple: Tuple },
    /// UPDATE: the affected RID, then old and new images
    Update {
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    },
    /// NEWPAGE: the page id preceding the new page in its chain
    NewPage { prev_page_id: PageId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub size: u32,
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
    pub payload: LogPayload,
}

impl LogRecord {
    fn new(txn_id: TxnId, prev_lsn: Lsn, record_type: LogRecordType, payload: LogPayload) -> Self {
        let size = (LOG_RECORD_HEADER_SIZE + Self::payload_size(&payload)) as u32;
        Self {
            size,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        }
    }

    pub fn new_begin(txn_id: TxnId) -> Self {
        Self::new(txn_id, INVALID_LSN, LogRecordType::Begin, LogPayload::None)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Commit, LogPayload::None)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Abort, LogPayload::None)
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Insert,
            LogPayload::Tuple { rid, tuple },
        )
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    ) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Update,
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        )
    }

    /// One of the three delete flavors: ApplyDelete, MarkDelete or
    /// RollbackDelete, all sharing the RID + tuple payload
    pub fn new_delete(
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
        rid: Rid,
        tuple: Tuple,
    ) -> Self {
        debug_assert!(matches!(
            record_type,
            LogRecordType::ApplyDelete | LogRecordType::MarkDelete | LogRecordType::RollbackDelete
        ));
        Self::new(txn_id, prev_lsn, record_type, LogPayload::Tuple { rid, tuple })
    }

    pub fn new_page_record(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::NewPage,
            LogPayload::NewPage { prev_page_id },
        )
    }

    fn payload_size(payload: &LogPayload) -> usize {
        match payload {
            LogPayload::None => 0,
            LogPayload::Tuple { tuple, .. } => RID_SERIALIZED_SIZE + tuple.serialized_size(),
            LogPayload::Update {
                old_tuple,
                new_tuple,
                ..
            } => RID_SERIALIZED_SIZE + old_tuple.serialized_size() + new_tuple.serialized_size(),
            LogPayload::NewPage { .. } => 4,
        }
    }

    /// Serialize the whole record into `buf`, which must hold `size` bytes
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= self.size as usize);

        LittleEndian::write_i32(&mut buf[0..4], self.size as i32);
        LittleEndian::write_i64(&mut buf[4..12], self.lsn);
        LittleEndian::write_u32(&mut buf[12..16], self.txn_id);
        LittleEndian::write_i64(&mut buf[16..24], self.prev_lsn);
        LittleEndian::write_i32(&mut buf[24..28], self.record_type as i32);

        let mut pos = LOG_RECORD_HEADER_SIZE;
        match &self.payload {
            LogPayload::None => {}
            LogPayload::Tuple { rid, tuple } => {
                pos += serialize_rid(rid, &mut buf[pos..]);
                tuple.serialize_into(&mut buf[pos..]);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                pos += serialize_rid(rid, &mut buf[pos..]);
                pos += old_tuple.serialize_into(&mut buf[pos..]);
                new_tuple.serialize_into(&mut buf[pos..]);
            }
            LogPayload::NewPage { prev_page_id } => {
                LittleEndian::write_i32(&mut buf[pos..pos + 4], *prev_page_id);
            }
        }
    }

    /// Parse a record from the front of `buf`. Returns None when the header
    /// or declared payload does not fit, or the record is corrupt; the
    /// caller treats that as end of log (during redo) or as fatal (during
    /// undo).
    pub fn deserialize(buf: &[u8]) -> Option<Self> {
        if buf.len() < LOG_RECORD_HEADER_SIZE {
            return None;
        }

        let size = LittleEndian::read_i32(&buf[0..4]);
        if size < LOG_RECORD_HEADER_SIZE as i32 || size as usize > buf.len() {
            return None;
        }

        let lsn = LittleEndian::read_i64(&buf[4..12]);
        let txn_id = LittleEndian::read_u32(&buf[12..16]);
        let prev_lsn = LittleEndian::read_i64(&buf[16..24]);
        let record_type = LogRecordType::from_i32(LittleEndian::read_i32(&buf[24..28]))?;

        let body = &buf[LOG_RECORD_HEADER_SIZE..size as usize];
        let payload = match record_type {
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort => LogPayload::None,
            LogRecordType::Insert
            | LogRecordType::ApplyDelete
            | LogRecordType::MarkDelete
            | LogRecordType::RollbackDelete => {
                let rid = deserialize_rid(body)?;
                let tuple = Tuple::deserialize_from(&body[RID_SERIALIZED_SIZE..])?;
                LogPayload::Tuple { rid, tuple }
            }
            LogRecordType::Update => {
                let rid = deserialize_rid(body)?;
                let old_tuple = Tuple::deserialize_from(&body[RID_SERIALIZED_SIZE..])?;
                let new_tuple = Tuple::deserialize_from(
                    &body[RID_SERIALIZED_SIZE + old_tuple.serialized_size()..],
                )?;
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => {
                if body.len() < 4 {
                    return None;
                }
                LogPayload::NewPage {
                    prev_page_id: LittleEndian::read_i32(&body[0..4]),
                }
            }
        };

        Some(Self {
            size: size as u32,
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        })
    }

    /// RID of the page this record mutates, if any
    pub fn rid(&self) -> Option<Rid> {
        match &self.payload {
            LogPayload::Tuple { rid, .. } | LogPayload::Update { rid, .. } => Some(*rid),
            _ => None,
        }
    }
}

fn serialize_rid(rid: &Rid, buf: &mut [u8]) -> usize {
    LittleEndian::write_i32(&mut buf[0..4], rid.page_id);
    LittleEndian::write_u32(&mut buf[4..8], rid.slot_num);
    RID_SERIALIZED_SIZE
}

fn deserialize_rid(buf: &[u8]) -> Option<Rid> {
    if buf.len() < RID_SERIALIZED_SIZE {
        return None;
    }
    Some(Rid::new(
        LittleEndian::read_i32(&buf[0..4]),
        LittleEndian::read_u32(&buf[4..8]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record: &LogRecord) -> LogRecord {
        let mut buf = vec![0u8; record.size as usize];
        record.serialize_into(&mut buf);
        LogRecord::deserialize(&buf).unwrap()
    }

    #[test]
    fn test_begin_round_trip() {
        let mut record = LogRecord::new_begin(3);
        record.lsn = 0;
        assert_eq!(record.size as usize, LOG_RECORD_HEADER_SIZE);
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_commit_round_trip() {
        let mut record = LogRecord::new_commit(3, 7);
        record.lsn = 8;
        let parsed = round_trip(&record);
        assert_eq!(parsed.record_type, LogRecordType::Commit);
        assert_eq!(parsed.prev_lsn, 7);
        assert_eq!(parsed.txn_id, 3);
    }

    #[test]
    fn test_insert_round_trip() {
        let mut record =
            LogRecord::new_insert(1, 4, Rid::new(7, 3), Tuple::new(vec![1, 2, 3, 4]));
        record.lsn = 5;
        let parsed = round_trip(&record);
        assert_eq!(parsed, record);
        assert_eq!(parsed.rid(), Some(Rid::new(7, 3)));
    }

    #[test]
    fn test_update_round_trip() {
        let mut record = LogRecord::new_update(
            2,
            9,
            Rid::new(4, 0),
            Tuple::new(vec![1, 1]),
            Tuple::new(vec![2, 2, 2]),
        );
        record.lsn = 10;
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_new_page_round_trip() {
        let mut record = LogRecord::new_page_record(5, 11, 42);
        record.lsn = 12;
        let parsed = round_trip(&record);
        assert_eq!(parsed.payload, LogPayload::NewPage { prev_page_id: 42 });
    }

    #[test]
    fn test_truncated_or_zeroed_buffer_rejected() {
        let mut record = LogRecord::new_insert(1, 0, Rid::new(1, 1), Tuple::new(vec![9; 16]));
        record.lsn = 1;
        let mut buf = vec![0u8; record.size as usize];
        record.serialize_into(&mut buf);

        // header truncated
        assert!(LogRecord::deserialize(&buf[..10]).is_none());
        // record body truncated
        assert!(LogRecord::deserialize(&buf[..record.size as usize - 4]).is_none());
        // all-zero buffer parses as no record
        assert!(LogRecord::deserialize(&[0u8; 64]).is_none());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut record = LogRecord::new_begin(1);
        record.lsn = 0;
        let mut buf = vec![0u8; record.size as usize];
        record.serialize_into(&mut buf);
        LittleEndian::write_i32(&mut buf[24..28], 99);
        assert!(LogRecord::deserialize(&buf).is_none());
    }
}
