//! Benchmarks for callback event matching and parameter encoding.
//!
//! Performance budgets:
//! - Match after 1000 buffered reports: **< 100μs**
//! - Open-params wire encode + decode: **< 20μs**

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fira_core::event::{Event, EventName};
use fira_core::event_stream;
use fira_core::params::{Profile, RangingParams, UwbAddress};
use std::hint::black_box;
use std::time::Duration;


const BUDGETS: &[bench_common::BenchBudget] = &[
    bench_common::BenchBudget {
        name: "event_stream_match",
        budget: "p50 < 100us (match after 1000 buffered reports)",
    },
    bench_common::BenchBudget {
        name: "params_wire",
        budget: "p50 < 20us (encode + decode open params)",
    },
];

fn bench_stream_match(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let mut group = c.benchmark_group("event_stream_match");

    for backlog in [10_usize, 100, 1000] {
        group.throughput(Throughput::Elements(backlog as u64));
        group.bench_with_input(BenchmarkId::new("reports_then_stop", backlog), &backlog, |b, &n| {
            b.iter_batched(
                || {
                    let (tx, rx) = event_stream::channel("bench");
                    for _ in 0..n {
                        tx.send(Event::session(EventName::ReportReceived, "bench", 10));
                    }
                    tx.send(Event::session(EventName::Stopped, "bench", 10));
                    (tx, rx)
                },
                |(_tx, mut rx)| {
                    let event = runtime
                        .block_on(rx.wait_for(EventName::Stopped, Duration::ZERO))
                        .expect("stopped buffered");
                    black_box(event);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_params_wire(c: &mut Criterion) {
    let params = RangingParams::initiator(
        Profile::NearbyShare,
        UwbAddress::from([1, 2]),
        UwbAddress::from([3, 4]),
    );
    let mut group = c.benchmark_group("params_wire");
    group.bench_function("encode_decode", |b| {
        b.iter(|| {
            let wire = params.to_wire().expect("encode");
            black_box(RangingParams::from_wire(&wire).expect("decode"));
        });
    });
    group.finish();
}

fn bench_config() -> Criterion {
    bench_common::emit_bench_artifacts("event_matching", BUDGETS);
    Criterion::default().configure_from_args()
}

criterion_group!(
    name = benches;
    config = bench_config();
    targets = bench_stream_match,
        bench_params_wire
);
criterion_main!(benches);
