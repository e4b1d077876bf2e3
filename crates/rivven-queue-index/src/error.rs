use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No segment available for logical offset {offset}")]
    SegmentUnavailable { offset: i64 },

    #[error("Append to segment {segment} failed at position {position}")]
    AppendFailed { segment: String, position: i32 },

    #[error("Failed to load segments: {0}")]
    LoadFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
