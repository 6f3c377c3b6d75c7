//! Journal record types and envelope encoding.
//!
//! Every record is framed as:
//!
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//!
//! All integers are little-endian. The CRC covers header and payload.

use crate::error::{CoreError, CoreResult};
use crate::position::Position;

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"FPJR";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JournalRecordType {
    /// A position was queued.
    Insert = 1,
    /// A position was removed.
    Delete = 2,
    /// Id allocator watermark, written at the head of a compacted journal.
    Sequence = 3,
}

impl JournalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Insert),
            2 => Some(Self::Delete),
            3 => Some(Self::Sequence),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single journal entry.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalRecord {
    /// A position was queued. The position carries its assigned id.
    Insert(Position),
    /// The position with this id was removed.
    Delete {
        /// Id of the removed position.
        id: u64,
    },
    /// The next id to hand out is at least this value.
    Sequence {
        /// Next id.
        next_id: u64,
    },
}

/// Outcome of decoding the bytes at one offset.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A complete, valid record and its encoded length.
    Record(JournalRecord, usize),
    /// The bytes end before a full record; a torn write.
    Truncated,
}

impl JournalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> JournalRecordType {
        match self {
            Self::Insert(_) => JournalRecordType::Insert,
            Self::Delete { .. } => JournalRecordType::Delete,
            Self::Sequence { .. } => JournalRecordType::Sequence,
        }
    }

    fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        match self {
            Self::Insert(position) => position.to_cbor(),
            Self::Delete { id } => Ok(id.to_le_bytes().to_vec()),
            Self::Sequence { next_id } => Ok(next_id.to_le_bytes().to_vec()),
        }
    }

    /// Serializes the record with its envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or exceeds 4 GiB.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::Codec("journal record payload too large".into()))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    /// Decodes the record starting at `offset` within `bytes`.
    ///
    /// `offset` is only used for error reporting; `bytes` must start at the
    /// record.
    pub(crate) fn decode(bytes: &[u8], offset: u64) -> CoreResult<Decoded> {
        if bytes.len() < HEADER_SIZE {
            return Ok(Decoded::Truncated);
        }

        if bytes[0..4] != JOURNAL_MAGIC {
            return Err(CoreError::corruption(offset, "invalid magic"));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version > JOURNAL_VERSION {
            return Err(CoreError::corruption(
                offset,
                format!("unsupported version {version}"),
            ));
        }

        let type_byte = bytes[6];
        let record_type = JournalRecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::corruption(offset, format!("unknown record type {type_byte}"))
        })?;

        let payload_len = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;
        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if bytes.len() < total_len {
            return Ok(Decoded::Truncated);
        }

        let payload_end = HEADER_SIZE + payload_len;
        let stored_crc = u32::from_le_bytes([
            bytes[payload_end],
            bytes[payload_end + 1],
            bytes[payload_end + 2],
            bytes[payload_end + 3],
        ]);
        let computed_crc = compute_crc32(&bytes[..payload_end]);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                offset,
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let payload = &bytes[HEADER_SIZE..payload_end];
        let record = match record_type {
            JournalRecordType::Insert => {
                let position = Position::from_cbor(payload)
                    .map_err(|e| CoreError::corruption(offset, e.to_string()))?;
                if !position.is_persisted() {
                    return Err(CoreError::corruption(offset, "insert record without id"));
                }
                Self::Insert(position)
            }
            JournalRecordType::Delete => Self::Delete {
                id: read_u64(payload, offset)?,
            },
            JournalRecordType::Sequence => Self::Sequence {
                next_id: read_u64(payload, offset)?,
            },
        };

        Ok(Decoded::Record(record, total_len))
    }
}

fn read_u64(payload: &[u8], offset: u64) -> CoreResult<u64> {
    let bytes: [u8; 8] = payload.try_into().map_err(|_| {
        CoreError::corruption(
            offset,
            format!("expected 8 byte payload, got {}", payload.len()),
        )
    })?;
    Ok(u64::from_le_bytes(bytes))
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn position(id: u64) -> Position {
        let time = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
        let mut position = Position::new("pulse-01", time, 48.8584, 2.2945);
        position.id = id;
        position
    }

    fn decode_record(bytes: &[u8]) -> JournalRecord {
        match JournalRecord::decode(bytes, 0).unwrap() {
            Decoded::Record(record, len) => {
                assert_eq!(len, bytes.len());
                record
            }
            Decoded::Truncated => panic!("record unexpectedly truncated"),
        }
    }

    #[test]
    fn record_type_bytes() {
        for t in [
            JournalRecordType::Insert,
            JournalRecordType::Delete,
            JournalRecordType::Sequence,
        ] {
            assert_eq!(JournalRecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(JournalRecordType::from_byte(0), None);
    }

    #[test]
    fn insert_record_envelope() {
        let record = JournalRecord::Insert(position(3));
        let bytes = record.encode().unwrap();

        assert_eq!(&bytes[0..4], b"FPJR");
        assert_eq!(bytes[6], JournalRecordType::Insert.as_byte());
        assert_eq!(decode_record(&bytes), record);
    }

    #[test]
    fn fixed_size_records() {
        let delete = JournalRecord::Delete { id: 9 };
        let bytes = delete.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 8 + CRC_SIZE);
        assert_eq!(decode_record(&bytes), delete);

        let sequence = JournalRecord::Sequence { next_id: 1_000 };
        assert_eq!(decode_record(&sequence.encode().unwrap()), sequence);
    }

    #[test]
    fn short_input_is_truncated() {
        let bytes = JournalRecord::Delete { id: 1 }.encode().unwrap();

        for cut in [0, 5, HEADER_SIZE, bytes.len() - 1] {
            let result = JournalRecord::decode(&bytes[..cut], 0).unwrap();
            assert!(matches!(result, Decoded::Truncated), "cut at {cut}");
        }
    }

    #[test]
    fn flipped_bit_fails_checksum() {
        let mut bytes = JournalRecord::Delete { id: 1 }.encode().unwrap();
        bytes[HEADER_SIZE] ^= 0x01;

        let result = JournalRecord::decode(&bytes, 64);
        assert!(matches!(
            result,
            Err(CoreError::ChecksumMismatch { offset: 64, .. })
        ));
    }

    #[test]
    fn bad_magic_and_type_are_corruption() {
        let mut bytes = JournalRecord::Delete { id: 1 }.encode().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            JournalRecord::decode(&bytes, 0),
            Err(CoreError::JournalCorruption { .. })
        ));

        let mut bytes = JournalRecord::Delete { id: 1 }.encode().unwrap();
        bytes[6] = 42;
        assert!(matches!(
            JournalRecord::decode(&bytes, 0),
            Err(CoreError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
