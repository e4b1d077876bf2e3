//! Per-partition logical queue index for rivven.
//!
//! Messages from every topic land interleaved in one physical log. A
//! [`LogicalQueueIndex`] keeps, per (topic, partition), a dense array of
//! 16-byte [`IndexRecord`]s so that the n-th message of a partition can be
//! located in O(1) and looked up by store time in O(log n).

pub mod config;
pub mod error;
pub mod metrics;
pub mod queue_index;
pub mod record;
pub mod storage;

pub use config::QueueIndexConfig;
pub use error::{Error, Result};
pub use metrics::{QueueIndexMetrics, Timer};
pub use queue_index::{LogicalQueueIndex, TimeLookup};
pub use record::{IndexRecord, RECORD_SIZE};
pub use storage::{
    BufferView, MappedRegion, MemorySegment, MemorySegmentSet, PhysicalLog, Records, Segment,
    SegmentSet,
};
