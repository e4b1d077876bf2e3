//! Property-based tests for the logical queue index
//!
//! These tests use proptest to generate random write sequences and verify
//! the index invariants hold for all of them.

use proptest::prelude::*;
use rivven_queue_index::{
    IndexRecord, LogicalQueueIndex, MemorySegmentSet, PhysicalLog, QueueIndexConfig,
};
use std::sync::Arc;

fn queue(records_per_segment: i32) -> LogicalQueueIndex<MemorySegmentSet> {
    let config = QueueIndexConfig::new().with_records_per_segment(records_per_segment);
    let clock: Arc<dyn PhysicalLog> = Arc::new(|offset: i64, _size: i32| offset);
    LogicalQueueIndex::in_memory(&config, "events", 0, clock).unwrap()
}

prop_compose! {
    /// Strictly increasing (physical_offset, size) pairs
    fn message_sequence(max_len: usize)(
        steps in prop::collection::vec((1i64..1_000, 1i32..512), 1..max_len)
    ) -> Vec<(i64, i32)> {
        let mut offset = 0i64;
        steps
            .into_iter()
            .map(|(gap, size)| {
                offset += gap;
                (offset, size)
            })
            .collect()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn test_put_index_tracks_latest_offset(
        messages in message_sequence(64),
        records_per_segment in 1i32..16,
    ) {
        let queue = queue(records_per_segment);
        for (i, (offset, size)) in messages.iter().enumerate() {
            prop_assert!(queue.put_index(*offset, *size, 0, i as i64).is_ok());
            prop_assert_eq!(queue.max_physical_offset(), *offset);
        }

        let (last_offset, last_size) = messages[messages.len() - 1];
        prop_assert_eq!(queue.last_offset(), Some(last_offset + last_size as i64));
        prop_assert_eq!(queue.message_count(), messages.len() as i64);
    }

    #[test]
    fn test_replays_never_change_contents(
        messages in message_sequence(32),
        replays in prop::collection::vec((any::<prop::sample::Index>(), 1i32..512, 0i32..8), 1..16),
    ) {
        let queue = queue(8);
        for (i, (offset, size)) in messages.iter().enumerate() {
            queue.put_index(*offset, *size, 0, i as i64).unwrap();
        }
        let snapshot = |queue: &LogicalQueueIndex<MemorySegmentSet>| -> Vec<IndexRecord> {
            (0..queue.max_offset_in_queue())
                .filter_map(|i| queue.index_buffer(i).and_then(|v| v.record_at(0)))
                .collect()
        };
        let before = snapshot(&queue);

        for (pick, size, message_type) in replays {
            let (offset, _) = messages[pick.index(messages.len())];
            prop_assert!(queue.put_index(offset, size, message_type, 0).is_ok());
        }

        prop_assert_eq!(snapshot(&queue), before);
    }

    #[test]
    fn test_find_offset_by_time_hits_every_record(
        messages in message_sequence(48),
    ) {
        // One segment holds the whole sequence
        let queue = queue(64);
        for (i, (offset, size)) in messages.iter().enumerate() {
            queue.put_index(*offset, *size, 0, i as i64).unwrap();
        }

        for (i, (offset, _)) in messages.iter().enumerate() {
            prop_assert_eq!(queue.find_offset_by_time(*offset), i as i64);
        }
        prop_assert_eq!(queue.find_offset_by_time(0), 0);
        prop_assert_eq!(
            queue.find_offset_by_time(i64::MAX / 2),
            messages.len() as i64 - 1
        );
    }

    #[test]
    fn test_truncate_keeps_only_offsets_below_cutoff(
        messages in message_sequence(48),
        records_per_segment in 1i32..8,
        cut in any::<prop::sample::Index>(),
    ) {
        let queue = queue(records_per_segment);
        for (i, (offset, size)) in messages.iter().enumerate() {
            queue.put_index(*offset, *size, 0, i as i64).unwrap();
        }

        let cutoff = messages[cut.index(messages.len())].0;
        let kept = messages.iter().filter(|(offset, _)| *offset < cutoff).count();
        queue.truncate_dirty_logic_files(cutoff);

        prop_assert_eq!(queue.max_offset_in_queue(), kept as i64);
        let expected_max = if kept == 0 { cutoff - 1 } else { messages[kept - 1].0 };
        prop_assert_eq!(queue.max_physical_offset(), expected_max);
    }
}
