#![allow(clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use function_telemetry::{
    InMemorySink, KindFilterMode, NullSink, RequestTelemetry, TelemetryClient, sampling_score,
};
use std::sync::Arc;
use std::time::Duration;

/// Benchmark: Track latency (stamping, both chains and the enqueue)
fn bench_track_latency(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("track_latency");
    group.measurement_time(Duration::from_secs(10));

    for (label, mode) in [
        ("traces_only", KindFilterMode::traces_only()),
        ("all_kinds", KindFilterMode::all()),
    ] {
        group.bench_function(label, |b| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let client = TelemetryClient::builder()
                        .sink(Arc::new(NullSink))
                        .kind_filter(mode.clone())
                        .queue_capacity(iters as usize + 1)
                        .build()
                        .unwrap();

                    let start = std::time::Instant::now();
                    for n in 0..iters {
                        client.track_request(RequestTelemetry::new(
                            "HttpTrigger1",
                            "/api/HttpTrigger1",
                            Duration::from_millis(n % 50),
                            200,
                        ));
                    }
                    let elapsed = start.elapsed();

                    client.shutdown(Duration::from_secs(10)).await;
                    elapsed
                })
            });
        });
    }

    group.finish();
}

/// Benchmark: End-to-end throughput into an in-memory sink, by batch size
fn bench_export_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("export_throughput");
    group.sample_size(20);

    let num_items: usize = 10_000;
    for batch_size in [1, 16, 64, 256] {
        group.throughput(Throughput::Elements(num_items as u64));
        group.bench_with_input(
            BenchmarkId::new("batch_size", batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter_custom(|iters| {
                    rt.block_on(async {
                        let mut total_time = Duration::ZERO;

                        for _ in 0..iters {
                            let sink = Arc::new(InMemorySink::new());
                            let client = TelemetryClient::builder()
                                .sink(sink.clone())
                                .queue_capacity(num_items)
                                .batch_size(batch_size)
                                .live_metrics(false)
                                .build()
                                .unwrap();

                            let start = std::time::Instant::now();
                            for n in 0..num_items {
                                client.track_trace(format!("trace {n}"));
                            }
                            client.flush(Duration::from_secs(30)).await;
                            total_time += start.elapsed();

                            assert_eq!(sink.len(), num_items);
                        }

                        total_time
                    })
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: Sampling score for a trace-id sized key
fn bench_sampling_score(c: &mut Criterion) {
    c.bench_function("sampling_score", |b| {
        b.iter(|| sampling_score(std::hint::black_box("0af7651916cd43dd8448eb211c80319c")))
    });
}

criterion_group!(
    benches,
    bench_track_latency,
    bench_export_throughput,
    bench_sampling_score
);
criterion_main!(benches);
