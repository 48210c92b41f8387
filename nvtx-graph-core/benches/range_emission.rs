//! Range emission overhead.
//!
//! Compares a begin/end pair on the immediate path with the same pair inserted
//! into a host capture, and the cost of replaying captured markers.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use nvtx_graph_core::host::HostGraphRuntime;
use nvtx_graph_core::{ExecutionContext, NullBackend, RangeBackend};

fn null_backend() -> Arc<dyn RangeBackend> {
    Arc::new(NullBackend)
}

fn bench_immediate_pair(c: &mut Criterion) {
    let runtime = HostGraphRuntime::shared();
    let stream = runtime.create_stream();
    let mut ctx = ExecutionContext::new(stream, runtime, null_backend());

    c.bench_function("immediate_range_pair", |b| {
        b.iter(|| {
            let token = ctx.begin_range(black_box("forward")).unwrap();
            black_box(ctx.end_range(token).unwrap())
        });
    });
}

fn bench_captured_pair(c: &mut Criterion) {
    c.bench_function("captured_range_pair", |b| {
        b.iter_batched(
            || {
                let runtime = HostGraphRuntime::shared();
                let stream = runtime.create_stream();
                runtime.begin_capture(stream).unwrap();
                let ctx = ExecutionContext::new(stream, runtime.clone(), null_backend());
                (runtime, stream, ctx)
            },
            |(runtime, stream, mut ctx)| {
                let token = ctx.begin_range(black_box("forward")).unwrap();
                ctx.end_range(token).unwrap();
                runtime.end_capture(stream).unwrap()
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for ranges in [1usize, 16, 128] {
        let runtime = HostGraphRuntime::shared();
        let stream = runtime.create_stream();
        let mut ctx = ExecutionContext::new(stream, runtime.clone(), null_backend());
        runtime.begin_capture(stream).unwrap();
        for _ in 0..ranges {
            let guard = ctx.range("layer").unwrap();
            runtime.launch(stream, "noop", || {}).unwrap();
            guard.finish().unwrap();
        }
        let exec = runtime.end_capture(stream).unwrap().instantiate();

        group.bench_function(format!("{ranges}_ranges"), |b| {
            b.iter(|| exec.replay());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_immediate_pair, bench_captured_pair, bench_replay);
criterion_main!(benches);
