use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use memtable::MemorySegment;
use segment::{write_memory_segment, MultiSegment, Segment};
use tempfile::tempdir;

const N_SEGMENTS: usize = 8;
const KEYS_PER_SEGMENT: usize = 5_000;
const VALUE_SIZE: usize = 100;

/// Overlapping segments: segment `s` holds every key `i` with `i % (s + 1) == 0`.
fn build_segment(s: usize) -> MemorySegment {
    let mut mem = MemorySegment::new();
    for i in (0..KEYS_PER_SEGMENT * N_SEGMENTS).step_by(s + 1).take(KEYS_PER_SEGMENT) {
        mem.put(format!("key{:08}", i).into_bytes(), vec![b'x'; VALUE_SIZE]);
    }
    mem
}

fn merge_memory_benchmark(c: &mut Criterion) {
    let segments: Vec<Segment> = (0..N_SEGMENTS).map(|s| Segment::memory(build_segment(s))).collect();
    c.bench_function("multi_segment_merge_memory_8x5k", |b| {
        b.iter(|| {
            let mut iter = MultiSegment::new(segments.clone()).lookup(None, None).unwrap();
            let mut n = 0usize;
            while iter.next_entry().unwrap().is_some() {
                n += 1;
            }
            n
        });
    });
}

fn merge_disk_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let segments: Vec<Segment> = (0..N_SEGMENTS)
        .map(|s| {
            let k = dir.path().join(format!("bench.keys.{}", s));
            let d = dir.path().join(format!("bench.data.{}", s));
            Segment::disk(write_memory_segment(&k, &d, &build_segment(s)).unwrap())
        })
        .collect();

    c.bench_function("multi_segment_merge_disk_8x5k", |b| {
        b.iter_batched(
            || MultiSegment::new(segments.clone()),
            |multi| {
                let mut iter = multi.lookup(None, None).unwrap();
                let mut n = 0usize;
                while iter.next_entry().unwrap().is_some() {
                    n += 1;
                }
                n
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, merge_memory_benchmark, merge_disk_benchmark);
criterion_main!(benches);
