//! Index record layout
//!
//! Every entry in a logical queue is a fixed 16-byte unit:
//!
//! ```text
//! ┌──────────────────────┬──────────────┬────────────────────┐
//! │ physical_offset: i64 │  size: i32   │ message_type: i32  │
//! │       8 bytes        │   4 bytes    │      4 bytes       │
//! └──────────────────────┴──────────────┴────────────────────┘
//! ```
//!
//! All fields are big-endian. A slot is valid only when
//! `physical_offset >= 0 && size > 0`; unwritten (zeroed) space fails that
//! check, which is how scans find the end of the written prefix.
//!
//! The gap-fill blank `(0, i32::MAX, 0)` occupies a slot (it passes the
//! validity check so scans keep positional alignment) but never references a
//! message. Use [`IndexRecord::references_message`] before dereferencing a
//! record into the physical log.

use bytes::{Buf, BufMut};

/// Size of one index record in bytes
pub const RECORD_SIZE: i32 = 16;

/// Record size as a `usize`, for slicing
pub(crate) const RECORD_LEN: usize = RECORD_SIZE as usize;

/// A single index record pointing into the physical log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexRecord {
    /// Offset of the message in the physical log
    pub physical_offset: i64,
    /// Byte length of the message in the physical log
    pub size: i32,
    /// Message classification
    pub message_type: i32,
}

impl IndexRecord {
    /// Placeholder written in front of the first real record of a queue
    /// that does not start at logical index zero.
    pub const BLANK: IndexRecord = IndexRecord {
        physical_offset: 0,
        size: i32::MAX,
        message_type: 0,
    };

    pub fn new(physical_offset: i64, size: i32, message_type: i32) -> Self {
        Self {
            physical_offset,
            size,
            message_type,
        }
    }

    /// Whether this slot holds a written record
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.physical_offset >= 0 && self.size > 0
    }

    /// Whether this is a gap-fill placeholder
    #[inline]
    pub fn is_blank(&self) -> bool {
        *self == Self::BLANK
    }

    /// Whether this record points at a message in the physical log
    #[inline]
    pub fn references_message(&self) -> bool {
        self.is_valid() && !self.is_blank()
    }

    /// Physical offset directly after the referenced message
    #[inline]
    pub fn end_offset(&self) -> i64 {
        self.physical_offset + self.size as i64
    }

    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        let mut buf = &mut out[..];
        buf.put_i64(self.physical_offset);
        buf.put_i32(self.size);
        buf.put_i32(self.message_type);
        out
    }

    /// Decode the record at the start of `data`, `None` if fewer than 16 bytes remain
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < RECORD_LEN {
            return None;
        }
        let mut buf = &data[..RECORD_LEN];
        Some(Self {
            physical_offset: buf.get_i64(),
            size: buf.get_i32(),
            message_type: buf.get_i32(),
        })
    }
}

/// Logical byte offset of a record index
#[inline]
pub fn byte_offset(record_index: i64) -> i64 {
    record_index * RECORD_SIZE as i64
}

/// Record index of a logical byte offset
#[inline]
pub fn record_index(byte_offset: i64) -> i64 {
    byte_offset / RECORD_SIZE as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout_is_big_endian() {
        let record = IndexRecord::new(0x0102_0304_0506_0708, 0x0A0B_0C0D, 7);
        let bytes = record.to_bytes();

        assert_eq!(&bytes[0..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[8..12], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 7]);
        assert_eq!(IndexRecord::from_bytes(&bytes), Some(record));
    }

    #[test]
    fn test_validity() {
        assert!(IndexRecord::new(0, 1, 0).is_valid());
        assert!(IndexRecord::new(1024, 200, 3).is_valid());
        assert!(!IndexRecord::new(-1, 10, 0).is_valid());
        assert!(!IndexRecord::new(10, 0, 0).is_valid());
        assert!(!IndexRecord::from_bytes(&[0u8; 16]).unwrap().is_valid());
    }

    #[test]
    fn test_blank_occupies_a_slot_without_a_message() {
        let blank = IndexRecord::from_bytes(&IndexRecord::BLANK.to_bytes()).unwrap();
        assert!(blank.is_blank());
        assert!(blank.is_valid());
        assert!(!blank.references_message());
        assert!(IndexRecord::new(0, 10, 0).references_message());
        assert!(!IndexRecord::new(0, 0, 0).references_message());
    }

    #[test]
    fn test_short_input() {
        assert_eq!(IndexRecord::from_bytes(&[0u8; 15]), None);
    }

    #[test]
    fn test_offset_conversions() {
        assert_eq!(byte_offset(0), 0);
        assert_eq!(byte_offset(3), 48);
        assert_eq!(record_index(48), 3);
        assert_eq!(record_index(63), 3);
        assert_eq!(IndexRecord::new(100, 28, 0).end_offset(), 128);
    }
}
