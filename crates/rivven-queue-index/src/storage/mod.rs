pub mod memory;
pub mod traits;
pub mod view;

pub use memory::{MemorySegment, MemorySegmentSet};
pub use traits::{PhysicalLog, Segment, SegmentSet};
pub use view::{BufferView, MappedRegion, Records};
