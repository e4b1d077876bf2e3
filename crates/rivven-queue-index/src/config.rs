use crate::record::RECORD_SIZE;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default number of records per index segment
const DEFAULT_RECORDS_PER_SEGMENT: i32 = 300_000;

/// Configuration for a logical queue index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueIndexConfig {
    /// Byte size of every index segment (a multiple of the record size)
    pub segment_size: i32,

    /// Number of trailing segments rescanned on recovery
    pub recover_segments: usize,

    /// Minimum number of dirty pages before `commit` flushes
    pub flush_least_pages: usize,

    /// Page size used to count dirty pages
    pub page_size: usize,
}

impl Default for QueueIndexConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_RECORDS_PER_SEGMENT * RECORD_SIZE,
            recover_segments: 3,
            flush_least_pages: 2,
            page_size: 4096,
        }
    }
}

impl QueueIndexConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the segment size in bytes
    pub fn with_segment_size(mut self, segment_size: i32) -> Self {
        self.segment_size = segment_size;
        self
    }

    /// Size segments to hold exactly `records` index records
    pub fn with_records_per_segment(mut self, records: i32) -> Self {
        self.segment_size = records.saturating_mul(RECORD_SIZE);
        self
    }

    /// Set how many trailing segments recovery rescans
    pub fn with_recover_segments(mut self, segments: usize) -> Self {
        self.recover_segments = segments;
        self
    }

    /// Set the minimum dirty pages for a commit
    pub fn with_flush_least_pages(mut self, pages: usize) -> Self {
        self.flush_least_pages = pages;
        self
    }

    /// Set the page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Number of index records a single segment holds
    pub fn records_per_segment(&self) -> i32 {
        self.segment_size / RECORD_SIZE
    }

    /// Check that the configuration can back an index
    pub fn validate(&self) -> Result<()> {
        validate_segment_size(self.segment_size)?;
        if self.recover_segments == 0 {
            return Err(Error::InvalidConfig(
                "recover_segments must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidConfig("page_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Segments must hold at least one whole record and no partial ones
pub(crate) fn validate_segment_size(segment_size: i32) -> Result<()> {
    if segment_size <= 0 || segment_size % RECORD_SIZE != 0 {
        return Err(Error::InvalidConfig(format!(
            "segment_size must be a positive multiple of {}, got {}",
            RECORD_SIZE, segment_size
        )));
    }
    Ok(())
}
