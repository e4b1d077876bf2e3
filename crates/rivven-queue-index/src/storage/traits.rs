use super::view::BufferView;
use crate::Result;
use std::sync::Arc;

/// One fixed-size segment of a queue's logical byte space
///
/// Cursors are in-segment byte positions. The write cursor is the end of
/// appended data; the commit cursor is the end of flushed data.
pub trait Segment: Send + Sync {
    /// Display name (the zero-padded base offset)
    fn name(&self) -> String;

    /// Logical byte offset of the first byte of this segment
    fn base_offset(&self) -> i64;

    /// Capacity in bytes
    fn size(&self) -> i32;

    /// Pin `[0, write_cursor)`, empty when nothing is written. `None` once
    /// the segment is gone.
    fn slice(&self) -> Option<BufferView>;

    /// Pin `[pos, write_cursor)`. `None` if `pos` is outside written data or
    /// the segment is gone.
    fn select_buffer(&self, pos: i32) -> Option<BufferView>;

    /// Append at the write cursor. `false` if the bytes do not fit or the
    /// segment is gone.
    fn append(&self, data: &[u8]) -> bool;

    fn write_cursor(&self) -> i32;

    /// Move the write cursor. Bytes pinned by live views must stay
    /// unchanged even when the cursor moves below them.
    fn set_write_cursor(&self, pos: i32);

    fn set_commit_cursor(&self, pos: i32);

    /// Whether this segment was the first one created in an empty queue
    fn is_first_created(&self) -> bool;

    fn is_full(&self) -> bool {
        self.write_cursor() >= self.size()
    }
}

/// Ordered set of equal-size segments forming one append-only byte stream
///
/// Implementations provide their own interior synchronization: every method
/// takes `&self` and may be called from reader threads while the single
/// writer appends.
pub trait SegmentSet: Send + Sync {
    type Segment: Segment;

    /// Attach segments that already exist in the backing store
    fn load(&self) -> Result<()>;

    /// Snapshot of all segments ordered by base offset
    fn segments(&self) -> Vec<Arc<Self::Segment>>;

    /// Segment whose write window covers `timestamp`
    fn segment_by_time(&self, timestamp: i64) -> Option<Arc<Self::Segment>>;

    /// Segment containing the logical byte `offset`
    fn find_segment_by_offset(&self, offset: i64) -> Option<Arc<Self::Segment>>;

    /// Newest segment, creating one when the set is empty or the newest is full
    fn get_or_create_segment_for(&self, offset: i64) -> Option<Arc<Self::Segment>>;

    /// Oldest segment, pinned against deletion while the `Arc` is held
    fn first_segment(&self) -> Option<Arc<Self::Segment>>;

    /// Newest segment, pinned against deletion while the `Arc` is held
    fn last_segment(&self) -> Option<Arc<Self::Segment>>;

    fn delete_last_segment(&self);

    /// Drop leading segments whose records all reference physical offsets
    /// below `physical_offset`. Returns how many were dropped.
    fn delete_expired_before(&self, physical_offset: i64) -> usize;

    /// Discard everything at or after the logical byte `offset`
    fn truncate_dirty_files(&self, offset: i64);

    /// Flush written data once at least `min_pages` pages are dirty
    /// (`0` flushes anything pending). Returns `true` when nothing new was
    /// flushed.
    fn commit(&self, min_pages: usize) -> bool;

    /// Discard every segment
    fn destroy(&self);

    /// Logical byte offset directly after the newest written byte
    fn max_offset(&self) -> i64;

    fn segment_size(&self) -> i32;
}

/// Read access to the physical message log
pub trait PhysicalLog: Send + Sync {
    /// Store timestamp of the message at `(physical_offset, size)`, or a
    /// negative value when the log can no longer serve that range.
    fn record_timestamp(&self, physical_offset: i64, size: i32) -> i64;
}

impl<F> PhysicalLog for F
where
    F: Fn(i64, i32) -> i64 + Send + Sync,
{
    fn record_timestamp(&self, physical_offset: i64, size: i32) -> i64 {
        self(physical_offset, size)
    }
}
