//! Logical queue index
//!
//! One [`LogicalQueueIndex`] per (topic, partition). Record `i` of the queue
//! lives at logical byte offset `i * 16` of a [`SegmentSet`] and points at the
//! i-th message this partition stored in the shared physical log.
//!
//! # Concurrency
//!
//! There is exactly one writer per queue. `put_index`, `recover`,
//! `truncate_dirty_logic_files`, `last_offset` and `destroy` belong to that
//! writer and must not run concurrently with each other; this is a caller
//! contract and is not checked. `find_offset_by_time`, `index_buffer`,
//! `correct_min_offset` and the offset accessors may run on any thread at
//! any time: they only read bytes below a segment's published write cursor.
//!
//! # Recovery
//!
//! ```text
//!   segments:  [ s0 ][ s1 ][ s2 ][ s3 ][ s4 ]
//!                           ^ scan starts here (third from last)
//!                                        valid.. valid.. | torn ...
//!                                                        ^ truncate_dirty_files
//! ```

use crate::config::{validate_segment_size, QueueIndexConfig};
use crate::metrics::{QueueIndexMetrics, Timer};
use crate::record::{byte_offset, record_index, IndexRecord, RECORD_SIZE};
use crate::storage::{BufferView, MemorySegmentSet, PhysicalLog, Segment, SegmentSet};
use crate::{Error, Result};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a timestamp lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeLookup {
    /// Record index closest to the requested time
    Found(i64),
    /// A searched record points at data the physical log has already trimmed
    Unresolvable,
    /// No segment covers the requested time
    NoSegment,
    /// The covering segment holds no searchable records
    NoRecords,
}

impl TimeLookup {
    /// The found index, or 0 (start of queue) for every other outcome
    pub fn index_or_start(self) -> i64 {
        match self {
            TimeLookup::Found(index) => index,
            _ => 0,
        }
    }
}

/// What a rescan of the newest segment decided
enum Rewind {
    /// Nothing written, or even the first record is past the cutoff
    DropSegment,
    /// Cursors are parked after the last record to keep
    Done,
}

/// Index of one queue partition over a segment set
pub struct LogicalQueueIndex<S: SegmentSet> {
    topic: String,
    partition: u32,
    segments: S,
    physical_log: Arc<dyn PhysicalLog>,
    recover_segments: usize,
    flush_least_pages: usize,
    /// Physical offset of the newest indexed message, -1 when empty
    max_physical_offset: AtomicI64,
    /// Logical byte offset of the first record still backed by the physical log
    min_logical_offset: AtomicI64,
}

impl LogicalQueueIndex<MemorySegmentSet> {
    /// Index backed by an in-memory segment set sized from `config`
    pub fn in_memory(
        config: &QueueIndexConfig,
        topic: impl Into<String>,
        partition: u32,
        physical_log: Arc<dyn PhysicalLog>,
    ) -> Result<Self> {
        let segments = MemorySegmentSet::from_config(config)?;
        Self::with_config(config, topic, partition, segments, physical_log)
    }
}

impl<S: SegmentSet> LogicalQueueIndex<S> {
    /// Index over `segments` with default recovery and flush settings
    ///
    /// Fails when the set's segment size is not a positive multiple of the
    /// record size.
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        segments: S,
        physical_log: Arc<dyn PhysicalLog>,
    ) -> Result<Self> {
        validate_segment_size(segments.segment_size())?;
        Ok(Self {
            topic: topic.into(),
            partition,
            segments,
            physical_log,
            recover_segments: QueueIndexConfig::default().recover_segments,
            flush_least_pages: QueueIndexConfig::default().flush_least_pages,
            max_physical_offset: AtomicI64::new(-1),
            min_logical_offset: AtomicI64::new(0),
        })
    }

    pub fn with_config(
        config: &QueueIndexConfig,
        topic: impl Into<String>,
        partition: u32,
        segments: S,
        physical_log: Arc<dyn PhysicalLog>,
    ) -> Result<Self> {
        config.validate()?;
        if segments.segment_size() != config.segment_size {
            return Err(Error::InvalidConfig(format!(
                "segment set uses {} byte segments, config expects {}",
                segments.segment_size(),
                config.segment_size
            )));
        }
        Ok(Self {
            recover_segments: config.recover_segments,
            flush_least_pages: config.flush_least_pages,
            ..Self::new(topic, partition, segments, physical_log)?
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn segments(&self) -> &S {
        &self.segments
    }

    pub fn max_physical_offset(&self) -> i64 {
        self.max_physical_offset.load(Ordering::Acquire)
    }

    pub fn set_max_physical_offset(&self, offset: i64) {
        self.max_physical_offset.store(offset, Ordering::Release);
    }

    pub fn min_logical_offset(&self) -> i64 {
        self.min_logical_offset.load(Ordering::Acquire)
    }

    pub fn set_min_logical_offset(&self, offset: i64) {
        self.min_logical_offset.store(offset, Ordering::Release);
    }

    /// Record index one past the newest written record
    pub fn max_offset_in_queue(&self) -> i64 {
        record_index(self.segments.max_offset())
    }

    /// Record index of the oldest record still backed by the physical log
    pub fn min_offset_in_queue(&self) -> i64 {
        record_index(self.min_logical_offset())
    }

    /// Number of readable records in the queue
    ///
    /// Never negative: truncating a gap-filled queue can leave the newest
    /// record below the minimum until the next write moves it.
    pub fn message_count(&self) -> i64 {
        (self.max_offset_in_queue() - self.min_offset_in_queue()).max(0)
    }

    /// Attach existing segments
    pub fn load(&self) -> Result<()> {
        let result = self.segments.load();
        info!(
            "load logical queue {}-{} {}",
            self.topic,
            self.partition,
            if result.is_ok() { "OK" } else { "Failed" }
        );
        result
    }

    /// Find the end of valid data after an unclean shutdown and discard
    /// everything behind it.
    ///
    /// Only the last `recover_segments` segments are rescanned; older ones
    /// were flushed before the newest segments were created.
    pub fn recover(&self) {
        let segments = self.segments.segments();
        if segments.is_empty() {
            return;
        }

        let timer = Timer::new();
        let segment_size = self.segments.segment_size();
        let mut index = segments.len().saturating_sub(self.recover_segments);

        let (segment, position) = loop {
            let segment = &segments[index];
            let position = self.scan_valid_prefix(segment.as_ref());

            if position < segment_size {
                info!(
                    "recover current logical queue over {} {}",
                    segment.name(),
                    segment.base_offset() + position as i64
                );
                break (segment, position);
            }
            if index + 1 >= segments.len() {
                info!(
                    "recover last logical segment over, last segment {}",
                    segment.name()
                );
                break (segment, position);
            }
            index += 1;
            info!("recover next logical segment, {}", segments[index].name());
        };

        self.segments
            .truncate_dirty_files(segment.base_offset() + position as i64);

        QueueIndexMetrics::record_recovery_latency_us(timer.elapsed_us());
        self.publish_offsets();
    }

    /// Position just past the last valid record of a segment, scanning from 0
    fn scan_valid_prefix(&self, segment: &S::Segment) -> i32 {
        let Some(view) = segment.slice() else {
            return 0;
        };

        let mut position = 0;
        for record in view.records() {
            if !record.is_valid() {
                debug!(
                    "recover current logical segment over, {} {} {} {}",
                    segment.name(),
                    record.physical_offset,
                    record.size,
                    record.message_type
                );
                break;
            }
            position += RECORD_SIZE;
            if !record.is_blank() {
                self.max_physical_offset
                    .store(record.physical_offset, Ordering::Release);
            }
        }
        position
    }

    /// Record index whose message time is closest to `timestamp`, or 0
    /// when that cannot be determined
    pub fn find_offset_by_time(&self, timestamp: i64) -> i64 {
        self.lookup_offset_by_time(timestamp).index_or_start()
    }

    /// Binary search the segment covering `timestamp` for the record whose
    /// store time is closest to it
    ///
    /// Without an exact hit the answer is the nearer of the two bracketing
    /// records; when both are equally far the earlier one wins.
    pub fn lookup_offset_by_time(&self, timestamp: i64) -> TimeLookup {
        let timer = Timer::new();
        let Some(segment) = self.segments.segment_by_time(timestamp) else {
            return TimeLookup::NoSegment;
        };

        let base = segment.base_offset();
        let min_logical = self.min_logical_offset();
        let mut low = if min_logical > base {
            (min_logical - base) as i32
        } else {
            0
        };

        let Some(view) = segment.select_buffer(0) else {
            return TimeLookup::NoRecords;
        };
        let mut high = view.len() as i32 - RECORD_SIZE;

        let mut target: Option<i32> = None;
        let mut left: Option<(i32, i64)> = None;
        let mut right: Option<(i32, i64)> = None;

        while high >= low {
            let mid = (low + high) / (2 * RECORD_SIZE) * RECORD_SIZE;
            let Some(record) = view.record_at(mid as usize) else {
                break;
            };
            // Blanks sit in front of the first real record
            if !record.references_message() {
                low = mid + RECORD_SIZE;
                continue;
            }

            let store_time = self
                .physical_log
                .record_timestamp(record.physical_offset, record.size);
            if store_time < 0 {
                QueueIndexMetrics::increment_unresolvable_lookups();
                return TimeLookup::Unresolvable;
            }

            match store_time.cmp(&timestamp) {
                CmpOrdering::Equal => {
                    target = Some(mid);
                    break;
                }
                CmpOrdering::Greater => {
                    high = mid - RECORD_SIZE;
                    right = Some((mid, store_time));
                }
                CmpOrdering::Less => {
                    low = mid + RECORD_SIZE;
                    left = Some((mid, store_time));
                }
            }
        }
        drop(view);

        let position = match (target, left, right) {
            (Some(exact), _, _) => exact,
            (None, None, Some((right, _))) => right,
            (None, Some((left, _)), None) => left,
            (None, Some((left, left_time)), Some((right, right_time))) => {
                if (timestamp - left_time).abs() > (timestamp - right_time).abs() {
                    right
                } else {
                    left
                }
            }
            (None, None, None) => return TimeLookup::NoRecords,
        };

        QueueIndexMetrics::record_time_lookup_latency_us(timer.elapsed_us());
        TimeLookup::Found(record_index(base + position as i64))
    }

    /// Drop index records that reference physical offsets at or past
    /// `physical_offset`, which the physical log no longer holds
    pub fn truncate_dirty_logic_files(&self, physical_offset: i64) {
        self.max_physical_offset
            .store(physical_offset - 1, Ordering::Release);

        while let Some(segment) = self.segments.last_segment() {
            match self.rewind_segment(segment.as_ref(), physical_offset) {
                Rewind::DropSegment => {
                    debug!(
                        "dropping logical segment {} of {}-{}, nothing before physical offset {}",
                        segment.name(),
                        self.topic,
                        self.partition,
                        physical_offset
                    );
                    drop(segment);
                    self.segments.delete_last_segment();
                    QueueIndexMetrics::increment_segments_truncated();
                }
                Rewind::Done => break,
            }
        }

        self.publish_offsets();
    }

    /// Park the cursors of `segment` after the last record that precedes
    /// `cutoff`
    ///
    /// The records are scanned first and the cursors move once, after the
    /// scan has released its view.
    fn rewind_segment(&self, segment: &S::Segment, cutoff: i64) -> Rewind {
        let Some(view) = segment.slice() else {
            return Rewind::Done;
        };

        let mut kept = 0;
        let mut newest = None;
        for record in view.records() {
            if !record.is_valid() || record.physical_offset >= cutoff {
                break;
            }
            kept += 1;
            if !record.is_blank() {
                newest = Some(record.physical_offset);
            }
        }
        drop(view);

        if kept == 0 {
            return Rewind::DropSegment;
        }
        let position = kept * RECORD_SIZE;
        segment.set_write_cursor(position);
        segment.set_commit_cursor(position);
        if let Some(offset) = newest {
            self.max_physical_offset.store(offset, Ordering::Release);
        }
        Rewind::Done
    }

    /// Physical offset following the newest indexed message, recomputed
    /// from the newest segment. Also re-parks that segment's cursors after
    /// its last valid record.
    pub fn last_offset(&self) -> Option<i64> {
        let segment = self.segments.last_segment()?;
        let view = segment.slice()?;

        let mut valid = 0;
        let mut newest: Option<IndexRecord> = None;
        for record in view.records() {
            if !record.is_valid() {
                break;
            }
            valid += 1;
            if !record.is_blank() {
                newest = Some(record);
            }
        }
        drop(view);

        let position = valid * RECORD_SIZE;
        segment.set_write_cursor(position);
        segment.set_commit_cursor(position);
        let newest = newest?;
        self.max_physical_offset
            .store(newest.physical_offset, Ordering::Release);
        Some(newest.end_offset())
    }

    /// Flush pending index data; see [`SegmentSet::commit`]
    pub fn commit(&self, min_pages: usize) -> bool {
        self.segments.commit(min_pages)
    }

    /// Commit with the configured `flush_least_pages` threshold
    pub fn flush(&self) -> bool {
        self.commit(self.flush_least_pages)
    }

    /// Drop segments made obsolete by physical log retention and move the
    /// queue minimum past records older than `physical_min_offset`
    pub fn delete_expired(&self, physical_min_offset: i64) -> usize {
        let count = self.segments.delete_expired_before(physical_min_offset);
        if count > 0 {
            info!(
                "deleted {} expired logical segments of {}-{} before physical offset {}",
                count, self.topic, self.partition, physical_min_offset
            );
            QueueIndexMetrics::add_segments_expired(count as u64);
        }

        // Whole segments may survive even though their leading records are stale
        self.correct_min_offset(physical_min_offset);
        self.publish_offsets();
        count
    }

    /// Advance the queue minimum to the first record of the oldest segment
    /// that references `physical_min_offset` or later
    ///
    /// Leaves the minimum untouched when the oldest segment holds no such
    /// record.
    pub fn correct_min_offset(&self, physical_min_offset: i64) {
        let Some(segment) = self.segments.first_segment() else {
            return;
        };
        let Some(view) = segment.select_buffer(0) else {
            return;
        };

        let found = view
            .records()
            .position(|r| r.references_message() && r.physical_offset >= physical_min_offset);

        match found {
            Some(i) => {
                let min = view.start_offset() + byte_offset(i as i64);
                self.min_logical_offset.fetch_max(min, Ordering::AcqRel);
                info!(
                    "compute logical min offset: {}, topic: {}, partition: {}",
                    self.min_offset_in_queue(),
                    self.topic,
                    self.partition
                );
            }
            None => debug!(
                "no record at or after physical offset {} in {}, min offset of {}-{} unchanged",
                physical_min_offset,
                segment.name(),
                self.topic,
                self.partition
            ),
        }
    }

    /// Append the index record of one stored message at `logical_index`
    ///
    /// Single writer only. Offsets at or below the newest indexed physical
    /// offset are replays and succeed without writing.
    pub fn put_index(
        &self,
        physical_offset: i64,
        size: i32,
        message_type: i32,
        logical_index: i64,
    ) -> Result<()> {
        if physical_offset <= self.max_physical_offset() {
            QueueIndexMetrics::increment_replays_skipped();
            return Ok(());
        }

        let record = IndexRecord::new(physical_offset, size, message_type);
        let expected = byte_offset(logical_index);

        let segment = self
            .segments
            .get_or_create_segment_for(expected)
            .ok_or(Error::SegmentUnavailable { offset: expected })?;

        if segment.is_first_created() && logical_index != 0 && segment.write_cursor() == 0 {
            self.min_logical_offset.store(expected, Ordering::Release);
            self.fill_pre_blank(segment.as_ref(), expected);
            info!(
                "fill pre blank space {} {} {}",
                segment.name(),
                expected,
                segment.write_cursor()
            );
        }

        let actual = segment.base_offset() + segment.write_cursor() as i64;
        if expected != actual {
            warn!(
                "logical queue {}-{} order maybe wrong, expected {} actual {}",
                self.topic, self.partition, expected, actual
            );
            QueueIndexMetrics::increment_order_warnings();
        }

        if !segment.append(&record.to_bytes()) {
            warn!(
                "append index record to {} failed at {}",
                segment.name(),
                segment.write_cursor()
            );
            QueueIndexMetrics::increment_append_failures();
            return Err(Error::AppendFailed {
                segment: segment.name(),
                position: segment.write_cursor(),
            });
        }

        self.max_physical_offset
            .store(physical_offset, Ordering::Release);
        QueueIndexMetrics::increment_records_indexed();
        Ok(())
    }

    /// Write blanks from the start of `segment` up to the in-segment position
    /// of `until`
    fn fill_pre_blank(&self, segment: &S::Segment, until: i64) {
        let until = (until % self.segments.segment_size() as i64) as i32;
        let blank = IndexRecord::BLANK.to_bytes();
        let mut written = 0u64;

        let mut pos = 0;
        while pos < until {
            if !segment.append(&blank) {
                break;
            }
            written += 1;
            pos += RECORD_SIZE;
        }
        QueueIndexMetrics::add_gap_fill_records(written);
    }

    /// Pinned view of the records from `start_index` to the end of its segment
    pub fn index_buffer(&self, start_index: i64) -> Option<BufferView> {
        let offset = byte_offset(start_index);
        let segment = self.segments.find_segment_by_offset(offset)?;
        let pos = (offset % self.segments.segment_size() as i64) as i32;
        segment.select_buffer(pos)
    }

    /// Record index of the first record of the segment after the one holding `index`
    pub fn roll_to_next_segment(&self, index: i64) -> i64 {
        let units = (self.segments.segment_size() / RECORD_SIZE) as i64;
        index + units - index % units
    }

    /// Reset both offsets and discard every segment
    pub fn destroy(&self) {
        self.max_physical_offset.store(-1, Ordering::Release);
        self.min_logical_offset.store(0, Ordering::Release);
        self.segments.destroy();
        info!("destroyed logical queue {}-{}", self.topic, self.partition);
    }

    fn publish_offsets(&self) {
        QueueIndexMetrics::set_queue_offsets(
            &self.topic,
            self.partition,
            self.min_offset_in_queue(),
            self.max_offset_in_queue(),
        );
    }
}

impl<S: SegmentSet> fmt::Debug for LogicalQueueIndex<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalQueueIndex")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("max_physical_offset", &self.max_physical_offset())
            .field("min_logical_offset", &self.min_logical_offset())
            .finish()
    }
}
