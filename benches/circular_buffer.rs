use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use millrace::CircularBuffer;

// Ring buffer insert is the per-sample cost floor of every sliding
// window in the crate
fn bench_push_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("circular_buffer_throughput");

    for size in [64, 256, 1024].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_samples", size)),
            size,
            |b, &size| {
                let mut buffer = CircularBuffer::new(2048).unwrap();

                b.iter(|| {
                    for i in 0..size {
                        let _ = buffer.push_overwrite(black_box(i as f32));
                    }
                });
            },
        );
    }

    group.finish();
}

// Measure single insert latency, both before and after the buffer
// starts evicting
fn bench_single_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_push_latency");

    let mut buffer = CircularBuffer::new(2048).unwrap();
    group.bench_function("push_while_filling", |b| {
        b.iter(|| {
            let _ = buffer.push_overwrite(black_box(42.0f32));
        });
    });

    let mut full = CircularBuffer::new(2048).unwrap();
    for i in 0..2048 {
        let _ = full.push_overwrite(i as f32);
    }
    group.bench_function("push_while_evicting", |b| {
        b.iter(|| {
            let _ = full.push_overwrite(black_box(42.0f32));
        });
    });

    group.finish();
}

// Timestamped insert with horizon expiry on every push
fn bench_timestamped_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("timestamped_push");

    let mut buffer = CircularBuffer::with_duration(2048, 1.0).unwrap();
    let mut now = 0.0f64;
    group.bench_function("push_overwrite_at_1s_horizon", |b| {
        b.iter(|| {
            now += 0.001;
            let _ = buffer.push_overwrite_at(black_box(42.0f32), now);
        });
    });

    // Explicit expiry sweep over a full buffer
    group.bench_function("expire_older_than_full_2048", |b| {
        let mut timed = CircularBuffer::with_duration(2048, 10_000.0).unwrap();
        for i in 0..2048 {
            let _ = timed.push_overwrite_at(i as f32, i as f64);
        }
        b.iter(|| {
            // Cutoff below the oldest timestamp, so nothing is removed
            let _ = black_box(timed.expire_older_than(black_box(-1.0)));
        });
    });

    group.finish();
}

// Bulk insert from a slice
fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load");

    for size in [256, 1024, 4096].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        let data: Vec<f32> = (0..*size).map(|i| i as f32).collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_into_2048", size)),
            size,
            |b, _| {
                let mut buffer = CircularBuffer::new(2048).unwrap();
                b.iter(|| {
                    buffer.load(black_box(&data));
                });
            },
        );
    }

    group.finish();
}

// Ordered export of a wrapped buffer
fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");

    let mut buffer = CircularBuffer::new(1024).unwrap();
    // Push past capacity so the storage is wrapped
    for i in 0..1536 {
        buffer.push_overwrite(i as f32);
    }

    group.throughput(Throughput::Elements(1024));
    group.bench_function("to_vec_wrapped_1024", |b| {
        b.iter(|| {
            let _ = black_box(buffer.to_vec());
        });
    });

    group.bench_function("as_slices_wrapped_1024", |b| {
        b.iter(|| {
            let _ = black_box(buffer.as_slices());
        });
    });

    group.bench_function("iter_sum_wrapped_1024", |b| {
        b.iter(|| {
            let total: f32 = buffer.iter().sum();
            black_box(total)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_push_throughput,
    bench_single_push,
    bench_timestamped_push,
    bench_load,
    bench_export
);
criterion_main!(benches);
