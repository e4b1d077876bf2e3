/// Logical queue index benchmark suite
///
/// Covers the write path, timestamp lookup, reads and recovery
/// Run with: cargo bench --package rivven-queue-index
use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use rivven_queue_index::storage::memory::encode_records;
use rivven_queue_index::{
    IndexRecord, LogicalQueueIndex, MemorySegment, MemorySegmentSet, PhysicalLog,
    QueueIndexConfig, QueueIndexMetrics, SegmentSet,
};
use std::sync::Arc;

const RECORDS_PER_SEGMENT: i32 = 4096;
const MESSAGE_SIZE: i32 = 256;

fn bench_put_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_index");

    for count in [1_000i64, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                new_queue,
                |queue| {
                    for i in 0..count {
                        let _ = black_box(queue.put_index(
                            i * MESSAGE_SIZE as i64,
                            MESSAGE_SIZE,
                            0,
                            i,
                        ));
                    }
                    queue
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_replay_skip(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_skip");
    let queue = filled_queue(10_000);

    group.bench_function("already_indexed", |b| {
        b.iter(|| black_box(queue.put_index(black_box(512), MESSAGE_SIZE, 0, 2)));
    });

    group.finish();
}

fn bench_find_offset_by_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_offset_by_time");

    for count in [16i64, 256, 4096].iter() {
        let queue = filled_queue(*count);
        let last = (*count - 1) * MESSAGE_SIZE as i64;

        group.bench_with_input(BenchmarkId::new("exact", count), &last, |b, &last| {
            let mut t = 0i64;
            b.iter(|| {
                t = (t + 7 * MESSAGE_SIZE as i64) % (last + 1);
                black_box(queue.find_offset_by_time(t))
            });
        });

        group.bench_with_input(BenchmarkId::new("between", count), &last, |b, &last| {
            let mut t = 0i64;
            b.iter(|| {
                t = (t + 7 * MESSAGE_SIZE as i64 + 13) % (last + 1);
                black_box(queue.find_offset_by_time(t))
            });
        });
    }

    group.finish();
}

fn bench_index_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_buffer");
    let queue = filled_queue(RECORDS_PER_SEGMENT as i64 * 4);

    for batch in [1usize, 32, 1024].iter() {
        group.throughput(Throughput::Elements(*batch as u64));

        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            b.iter(|| {
                let Some(view) = queue.index_buffer(black_box(RECORDS_PER_SEGMENT as i64 + 17))
                else {
                    return 0;
                };
                view.records()
                    .take(batch)
                    .map(|r| r.physical_offset)
                    .sum::<i64>()
            });
        });
    }

    group.finish();
}

fn bench_recover(c: &mut Criterion) {
    let mut group = c.benchmark_group("recover");
    let segment_size = RECORDS_PER_SEGMENT * 16;

    for segments in [1i64, 3, 8].iter() {
        group.throughput(Throughput::Bytes((*segments * segment_size as i64) as u64));

        group.bench_with_input(
            BenchmarkId::from_parameter(segments),
            segments,
            |b, &segments| {
                b.iter_batched(
                    || {
                        let set = MemorySegmentSet::new(segment_size).unwrap();
                        for s in 0..segments {
                            let segment = set
                                .attach(MemorySegment::new(s * segment_size as i64, segment_size, s == 0))
                                .unwrap();
                            // Last segment is only half full
                            let fill = if s + 1 == segments {
                                RECORDS_PER_SEGMENT as i64 / 2
                            } else {
                                RECORDS_PER_SEGMENT as i64
                            };
                            let base = s * RECORDS_PER_SEGMENT as i64;
                            let records: Vec<IndexRecord> = (base..base + fill)
                                .map(|i| IndexRecord::new(i * MESSAGE_SIZE as i64, MESSAGE_SIZE, 0))
                                .collect();
                            segment.append(&encode_records(&records));
                        }
                        let queue = LogicalQueueIndex::new("bench-topic", 0, set, clock()).unwrap();
                        queue.load().unwrap();
                        queue
                    },
                    |queue| {
                        queue.recover();
                        queue
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_metrics_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics_overhead");

    group.bench_function("counter_increment", |b| {
        b.iter(QueueIndexMetrics::increment_records_indexed);
    });

    group.bench_function("offset_gauges", |b| {
        b.iter(|| QueueIndexMetrics::set_queue_offsets("bench-topic", 0, 0, 1_000));
    });

    group.finish();
}

// Helper functions
fn clock() -> Arc<dyn PhysicalLog> {
    Arc::new(|offset: i64, _size: i32| offset)
}

fn new_queue() -> LogicalQueueIndex<MemorySegmentSet> {
    let config = QueueIndexConfig::new().with_records_per_segment(RECORDS_PER_SEGMENT);
    LogicalQueueIndex::in_memory(&config, "bench-topic", 0, clock()).unwrap()
}

fn filled_queue(count: i64) -> LogicalQueueIndex<MemorySegmentSet> {
    let queue = new_queue();
    for i in 0..count {
        queue
            .put_index(i * MESSAGE_SIZE as i64, MESSAGE_SIZE, 0, i)
            .unwrap();
    }
    assert_eq!(queue.segments().max_offset(), count * 16);
    queue
}

criterion_group!(
    benches,
    bench_put_index,
    bench_replay_skip,
    bench_find_offset_by_time,
    bench_index_buffer,
    bench_recover,
    bench_metrics_overhead,
);

criterion_main!(benches);
