//! Performance benchmarks for line splitting and log multiplexing

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sandbox_exec::stream::{LineSplitter, StreamMultiplexer, StreamSource};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Build `lines` lines of output cut into chunks of `chunk_size` bytes
fn create_chunks(lines: usize, chunk_size: usize) -> Vec<String> {
    let mut output = String::new();
    for i in 0..lines {
        output.push_str(&format!("line {} of build output with some padding\n", i));
    }
    output
        .as_bytes()
        .chunks(chunk_size)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}

fn bench_line_splitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_splitting");
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));

    for chunk_size in [16, 256, 4096].iter() {
        let chunks = create_chunks(1_000, *chunk_size);
        group.bench_with_input(
            BenchmarkId::new("feed", chunk_size),
            &chunks,
            |b, chunks| {
                b.iter(|| {
                    let mut splitter = LineSplitter::new(StreamSource::Stdout);
                    let mut total = 0;
                    for chunk in chunks {
                        total += splitter.feed(chunk).len();
                    }
                    black_box(total);
                });
            },
        );
    }

    group.finish();
}

fn bench_multiplexer_drain(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("multiplexer_drain");
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));

    for lines in [100, 1_000, 10_000].iter() {
        let stdout = create_chunks(*lines, 512);
        let stderr = create_chunks(*lines / 10, 64);
        group.bench_with_input(
            BenchmarkId::new("interleaved", lines),
            &(stdout, stderr),
            |b, (stdout, stderr)| {
                b.to_async(&rt).iter(|| async {
                    let mux = Arc::new(StreamMultiplexer::new());
                    for (i, chunk) in stdout.iter().enumerate() {
                        mux.push_chunk(StreamSource::Stdout, chunk);
                        if let Some(err) = stderr.get(i) {
                            mux.push_chunk(StreamSource::Stderr, err);
                        }
                    }
                    mux.mark_finished();
                    black_box(mux.drain().await.len());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_line_splitting, bench_multiplexer_drain);
criterion_main!(benches);
