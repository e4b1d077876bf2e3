//! In-memory segment set
//!
//! Fixed-size, zero-initialized segments kept in process memory. Appends go
//! through an atomic write cursor the same way the lock-free append log does:
//! the writer copies bytes past the cursor and then publishes the new cursor
//! with `Release`, readers bound every view by the cursor loaded with
//! `Acquire`, so a published record is never observed half-written.
//!
//! A view pins the buffer generation it was cut from. Rewinding the write
//! cursor below a pinned range does not reuse that memory: the segment moves
//! to a fresh generation holding a copy of the kept prefix, and existing
//! views keep reading the old one, which is never written again.
//!
//! Nothing survives the process. [`MemorySegmentSet::load`] instead treats
//! every attached segment as fully written, which is the state a mapped
//! segment set is in right after opening files and before recovery finds the
//! real end.

use super::traits::{Segment, SegmentSet};
use super::view::{BufferView, MappedRegion};
use crate::config::{validate_segment_size, QueueIndexConfig};
use crate::record::{IndexRecord, RECORD_LEN, RECORD_SIZE};
use crate::{Error, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One generation of a segment's backing memory
struct SegmentBuffer {
    data: Box<[UnsafeCell<u8>]>,
    /// Live views of the owning segment, shared by all its generations
    pins: Arc<AtomicUsize>,
}

// SAFETY: bytes are only written by `MemorySegment::append`, which holds the
// segment's writer lock and writes at or past the published write cursor.
// Views cover `[start, cursor)` for a cursor read under the generation lock,
// so no live view ever covers a byte that is being written. A rewind below a
// pinned range swaps in a new generation (under the writer lock and the
// generation write lock) instead of handing pinned bytes back to the writer.
unsafe impl Send for SegmentBuffer {}
unsafe impl Sync for SegmentBuffer {}

impl SegmentBuffer {
    fn new(capacity: usize, pins: Arc<AtomicUsize>) -> Self {
        Self {
            data: std::iter::repeat_with(|| UnsafeCell::new(0u8))
                .take(capacity)
                .collect(),
            pins,
        }
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn base_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.data.as_ptr())
    }

    /// Fresh generation holding the first `len` bytes of this one
    fn copy_prefix(&self, len: usize) -> Self {
        let next = Self::new(self.capacity(), self.pins.clone());
        let len = len.min(self.capacity());
        // SAFETY: the caller holds the writer lock, so neither buffer is
        // being written; `next` is not shared yet
        unsafe {
            std::ptr::copy_nonoverlapping(self.base_ptr(), next.base_ptr(), len);
        }
        next
    }

    fn write(&self, pos: usize, data: &[u8]) {
        assert!(pos + data.len() <= self.capacity());
        // SAFETY: in bounds; the caller holds the writer lock and `pos` is at
        // or past the write cursor, see the Sync impl
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base_ptr().add(pos), data.len());
        }
    }
}

impl MappedRegion for SegmentBuffer {
    fn bytes(&self, start: usize, len: usize) -> &[u8] {
        assert!(
            start + len <= self.capacity(),
            "segment read out of bounds: start={} len={} capacity={}",
            start,
            len,
            self.capacity()
        );
        // SAFETY: in bounds, and only called for ranges a live view pins,
        // which are not written while pinned
        unsafe { std::slice::from_raw_parts(self.base_ptr().add(start), len) }
    }

    fn release(&self) {
        self.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A segment held in memory
pub struct MemorySegment {
    base_offset: i64,
    size: i32,
    generation: RwLock<Arc<SegmentBuffer>>,
    /// Serializes everything that writes bytes or moves the write cursor
    writer: Mutex<()>,
    write_pos: AtomicI32,
    commit_pos: AtomicI32,
    pins: Arc<AtomicUsize>,
    available: AtomicBool,
    first_created: bool,
    last_modified: AtomicI64,
}

impl MemorySegment {
    pub fn new(base_offset: i64, size: i32, first_created: bool) -> Self {
        let size = size.max(0);
        let pins = Arc::new(AtomicUsize::new(0));
        Self {
            base_offset,
            size,
            generation: RwLock::new(Arc::new(SegmentBuffer::new(size as usize, pins.clone()))),
            writer: Mutex::new(()),
            write_pos: AtomicI32::new(0),
            commit_pos: AtomicI32::new(0),
            pins,
            available: AtomicBool::new(true),
            first_created,
            last_modified: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    /// Milliseconds since epoch of the last append
    pub fn last_modified(&self) -> i64 {
        self.last_modified.load(Ordering::Acquire)
    }

    /// Override the modification time, e.g. when restoring a segment
    pub fn set_last_modified(&self, millis: i64) {
        self.last_modified.store(millis, Ordering::Release);
    }

    pub fn commit_cursor(&self) -> i32 {
        self.commit_pos.load(Ordering::Acquire)
    }

    /// Number of live views into this segment
    pub fn pinned(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Mark the segment gone; existing views stay readable until dropped
    pub fn destroy(&self) {
        self.available.store(false, Ordering::Release);
        let pinned = self.pinned();
        if pinned > 0 {
            debug!("segment {} destroyed with {} live views", self.name(), pinned);
        }
    }

    /// Flush if at least `least_pages` pages are pending, returning the commit cursor
    fn flush(&self, least_pages: usize, page_size: usize) -> i32 {
        let write = self.write_cursor();
        let commit = self.commit_cursor();
        let able = if write >= self.size() {
            true
        } else if least_pages > 0 {
            let pending = (write as usize / page_size).saturating_sub(commit as usize / page_size);
            pending >= least_pages
        } else {
            write > commit
        };
        if able {
            self.set_commit_cursor(write);
        }
        self.commit_cursor()
    }

    /// Pin `[start, write_cursor)` of the current generation
    fn view(&self, start: i32) -> Option<BufferView> {
        let generation = self.generation.read();
        if !self.is_available() {
            return None;
        }
        let write = self.write_cursor();
        if start < 0 || start > write {
            return None;
        }
        self.pins.fetch_add(1, Ordering::AcqRel);
        let region: Arc<dyn MappedRegion> = generation.clone();
        Some(BufferView::new(
            region,
            start as usize,
            (write - start) as usize,
            self.base_offset + start as i64,
        ))
    }
}

impl Segment for MemorySegment {
    fn name(&self) -> String {
        format!("{:020}", self.base_offset)
    }

    fn base_offset(&self) -> i64 {
        self.base_offset
    }

    fn size(&self) -> i32 {
        self.size
    }

    fn slice(&self) -> Option<BufferView> {
        self.view(0)
    }

    fn select_buffer(&self, pos: i32) -> Option<BufferView> {
        self.view(pos).filter(|view| !view.is_empty())
    }

    fn append(&self, data: &[u8]) -> bool {
        let _writer = self.writer.lock();
        if !self.is_available() {
            return false;
        }
        let current = self.write_cursor();
        let end = current as usize + data.len();
        if end > self.size as usize {
            return false;
        }
        self.generation.read().write(current as usize, data);
        self.write_pos.store(end as i32, Ordering::Release);
        self.last_modified
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        true
    }

    fn write_cursor(&self) -> i32 {
        self.write_pos.load(Ordering::Acquire)
    }

    fn set_write_cursor(&self, pos: i32) {
        let pos = pos.clamp(0, self.size);
        let _writer = self.writer.lock();
        let mut generation = self.generation.write();
        if pos < self.write_cursor() && self.pinned() > 0 {
            let next = generation.copy_prefix(pos as usize);
            *generation = Arc::new(next);
            debug!(
                "segment {} rewound to {} under {} live views",
                self.name(),
                pos,
                self.pinned()
            );
        }
        self.write_pos.store(pos, Ordering::Release);
    }

    fn set_commit_cursor(&self, pos: i32) {
        self.commit_pos.store(pos, Ordering::Release);
    }

    fn is_first_created(&self) -> bool {
        self.first_created
    }
}

/// In-memory [`SegmentSet`]
pub struct MemorySegmentSet {
    segment_size: i32,
    page_size: usize,
    segments: RwLock<Vec<Arc<MemorySegment>>>,
    committed_where: AtomicI64,
}

impl MemorySegmentSet {
    pub fn new(segment_size: i32) -> Result<Self> {
        validate_segment_size(segment_size)?;
        Ok(Self {
            segment_size,
            page_size: QueueIndexConfig::default().page_size,
            segments: RwLock::new(Vec::new()),
            committed_where: AtomicI64::new(0),
        })
    }

    pub fn from_config(config: &QueueIndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            page_size: config.page_size,
            ..Self::new(config.segment_size)?
        })
    }

    /// Attach an existing segment; base offsets must be consecutive
    pub fn attach(&self, segment: MemorySegment) -> Result<Arc<MemorySegment>> {
        if segment.size() != self.segment_size {
            return Err(Error::LoadFailed(format!(
                "segment {} has size {}, expected {}",
                segment.name(),
                segment.size(),
                self.segment_size
            )));
        }
        let mut segments = self.segments.write();
        let expected = segments
            .last()
            .map(|s| s.base_offset + self.segment_size as i64);
        if let Some(expected) = expected {
            if segment.base_offset != expected {
                return Err(Error::LoadFailed(format!(
                    "segment {} does not follow {}",
                    segment.name(),
                    expected
                )));
            }
        }
        let segment = Arc::new(segment);
        segments.push(segment.clone());
        Ok(segment)
    }

    /// Logical byte offset up to which data has been committed
    pub fn committed_where(&self) -> i64 {
        self.committed_where.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }

    fn locate(segments: &[Arc<MemorySegment>], offset: i64, segment_size: i32) -> Option<usize> {
        let first = segments.first()?;
        if offset < first.base_offset {
            return None;
        }
        let index = (offset / segment_size as i64 - first.base_offset / segment_size as i64) as usize;
        (index < segments.len()).then_some(index)
    }
}

impl SegmentSet for MemorySegmentSet {
    type Segment = MemorySegment;

    fn load(&self) -> Result<()> {
        let segments = self.segments.read();
        for segment in segments.iter() {
            segment.set_write_cursor(self.segment_size);
            segment.set_commit_cursor(self.segment_size);
        }
        info!("attached {} in-memory segments", segments.len());
        Ok(())
    }

    fn segments(&self) -> Vec<Arc<MemorySegment>> {
        self.segments.read().clone()
    }

    fn segment_by_time(&self, timestamp: i64) -> Option<Arc<MemorySegment>> {
        let segments = self.segments.read();
        segments
            .iter()
            .find(|s| s.last_modified() >= timestamp)
            .or_else(|| segments.last())
            .cloned()
    }

    fn find_segment_by_offset(&self, offset: i64) -> Option<Arc<MemorySegment>> {
        let segments = self.segments.read();
        Self::locate(&segments, offset, self.segment_size).map(|i| segments[i].clone())
    }

    fn get_or_create_segment_for(&self, offset: i64) -> Option<Arc<MemorySegment>> {
        {
            let segments = self.segments.read();
            if let Some(last) = segments.last() {
                if !last.is_full() {
                    return Some(last.clone());
                }
            }
        }

        let mut segments = self.segments.write();
        let create_offset = match segments.last() {
            None => offset - offset % self.segment_size as i64,
            Some(last) if last.is_full() => last.base_offset + self.segment_size as i64,
            Some(last) => return Some(last.clone()),
        };
        if create_offset < 0 {
            warn!("refusing to create segment at negative offset {}", create_offset);
            return None;
        }
        let segment = Arc::new(MemorySegment::new(
            create_offset,
            self.segment_size,
            segments.is_empty(),
        ));
        debug!("created segment {}", segment.name());
        segments.push(segment.clone());
        Some(segment)
    }

    fn first_segment(&self) -> Option<Arc<MemorySegment>> {
        self.segments.read().first().cloned()
    }

    fn last_segment(&self) -> Option<Arc<MemorySegment>> {
        self.segments.read().last().cloned()
    }

    fn delete_last_segment(&self) {
        if let Some(segment) = self.segments.write().pop() {
            segment.destroy();
            info!("deleted last segment {}", segment.name());
        }
    }

    fn delete_expired_before(&self, physical_offset: i64) -> usize {
        let mut segments = self.segments.write();
        let tail = self.segment_size - RECORD_SIZE;
        let mut expired = 0;

        // The newest segment is never expired
        while expired + 1 < segments.len() {
            let segment = &segments[expired];
            let last_physical = match segment.select_buffer(tail) {
                Some(view) => match view.record_at(0) {
                    Some(record) => record.physical_offset,
                    None => break,
                },
                None => break,
            };
            if last_physical >= physical_offset {
                break;
            }
            segment.destroy();
            expired += 1;
        }

        for segment in segments.drain(..expired) {
            debug!("expired segment {}", segment.name());
        }
        expired
    }

    fn truncate_dirty_files(&self, offset: i64) {
        let mut segments = self.segments.write();
        let size = self.segment_size as i64;
        segments.retain(|segment| {
            let tail = segment.base_offset + size;
            if tail <= offset {
                return true;
            }
            if offset >= segment.base_offset {
                let pos = (offset % size) as i32;
                segment.set_write_cursor(pos);
                segment.set_commit_cursor(pos);
                true
            } else {
                info!("truncating dirty segment {}", segment.name());
                segment.destroy();
                false
            }
        });
    }

    fn commit(&self, min_pages: usize) -> bool {
        let committed = self.committed_where();
        let segment = {
            let segments = self.segments.read();
            match Self::locate(&segments, committed, self.segment_size) {
                Some(i) => segments[i].clone(),
                // Nothing committed yet, start with the first segment
                None if committed == 0 => match segments.first() {
                    Some(first) => first.clone(),
                    None => return true,
                },
                None => return true,
            }
        };
        let position = segment.flush(min_pages, self.page_size);
        let now = segment.base_offset + position as i64;
        self.committed_where.store(now, Ordering::Release);
        now == committed
    }

    fn destroy(&self) {
        let mut segments = self.segments.write();
        for segment in segments.drain(..) {
            segment.destroy();
        }
        self.committed_where.store(0, Ordering::Release);
        info!("destroyed in-memory segment set");
    }

    fn max_offset(&self) -> i64 {
        self.segments
            .read()
            .last()
            .map(|s| s.base_offset + s.write_cursor() as i64)
            .unwrap_or(0)
    }

    fn segment_size(&self) -> i32 {
        self.segment_size
    }
}

/// Encode records back to back, for seeding segments
pub fn encode_records(records: &[IndexRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * RECORD_LEN);
    for record in records {
        out.extend_from_slice(&record.to_bytes());
    }
    out
}
