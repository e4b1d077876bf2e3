//! Pinned zero-copy views into segment memory
//!
//! A [`BufferView`] borrows a byte range of a segment without copying. The
//! segment counts outstanding views; dropping a view releases its pin exactly
//! once, on every exit path, so a segment can tell when its memory is no
//! longer referenced.

use crate::record::{IndexRecord, RECORD_LEN};
use bytes::Buf;
use std::fmt;
use std::sync::Arc;

/// Segment memory that can be pinned by views
///
/// A pinned range is immutable: implementations must not write any byte of
/// it until every view covering it has released its pin.
pub trait MappedRegion: Send + Sync {
    /// Bytes `[start, start + len)` of the region
    ///
    /// Callers only ask for ranges inside the region that they hold a pin
    /// on; implementations may panic otherwise.
    fn bytes(&self, start: usize, len: usize) -> &[u8];

    /// Release one pin previously taken for a view
    fn release(&self);
}

/// A pinned, read-only window into a segment
pub struct BufferView {
    region: Arc<dyn MappedRegion>,
    start: usize,
    len: usize,
    start_offset: i64,
}

impl BufferView {
    /// Wrap a range of a region that the caller has already pinned.
    /// The pin is released when the view is dropped.
    pub fn new(region: Arc<dyn MappedRegion>, start: usize, len: usize, start_offset: i64) -> Self {
        Self {
            region,
            start,
            len,
            start_offset,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.region.bytes(self.start, self.len)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Logical byte offset of the first byte of the view
    pub fn start_offset(&self) -> i64 {
        self.start_offset
    }

    pub fn get_i64(&self, pos: usize) -> Option<i64> {
        let mut buf = self.as_slice().get(pos..pos.checked_add(8)?)?;
        Some(buf.get_i64())
    }

    pub fn get_i32(&self, pos: usize) -> Option<i32> {
        let mut buf = self.as_slice().get(pos..pos.checked_add(4)?)?;
        Some(buf.get_i32())
    }

    /// Decode the index record starting at `pos`
    pub fn record_at(&self, pos: usize) -> Option<IndexRecord> {
        IndexRecord::from_bytes(self.as_slice().get(pos..)?)
    }

    /// Iterate whole records from the start of the view
    pub fn records(&self) -> Records<'_> {
        Records {
            data: self.as_slice(),
        }
    }
}

impl Drop for BufferView {
    fn drop(&mut self) {
        self.region.release();
    }
}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("start", &self.start)
            .field("len", &self.len)
            .field("start_offset", &self.start_offset)
            .finish()
    }
}

/// Iterator over the whole records of a view
pub struct Records<'a> {
    data: &'a [u8],
}

impl Iterator for Records<'_> {
    type Item = IndexRecord;

    fn next(&mut self) -> Option<IndexRecord> {
        let record = IndexRecord::from_bytes(self.data)?;
        self.data = &self.data[RECORD_LEN..];
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.data.len() / RECORD_LEN;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Records<'_> {}
