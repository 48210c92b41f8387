//! End-to-end tests: instrumented work captured into host graphs and replayed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nvtx_graph::host::{HostGraphRuntime, NodeLabel};
use nvtx_graph::{
    instrument, ExecutionContext, GraphRangeError, MarkerKind, RangeEvent, RangeRoute,
    RecordingBackend, StreamHandle,
};

struct Fixture {
    runtime: Arc<HostGraphRuntime>,
    backend: Arc<RecordingBackend>,
    stream: StreamHandle,
    ctx: ExecutionContext,
}

fn fixture() -> Fixture {
    let runtime = HostGraphRuntime::shared();
    let backend = Arc::new(RecordingBackend::new());
    let stream = runtime.create_stream();
    let ctx = ExecutionContext::new(stream, runtime.clone(), backend.clone());
    Fixture {
        runtime,
        backend,
        stream,
        ctx,
    }
}

fn push(name: &str) -> RangeEvent {
    RangeEvent::Push(name.to_string())
}

#[test]
fn test_dummy_kernel_replayed_ten_times() {
    let Fixture {
        runtime,
        backend,
        stream,
        mut ctx,
    } = fixture();

    let launches = Arc::new(AtomicUsize::new(0));
    let kernel_runtime = runtime.clone();
    let dummy_kernel = instrument(
        "dummy_kernel",
        move |ctx: &mut ExecutionContext, launches: Arc<AtomicUsize>| {
            kernel_runtime.launch(ctx.stream(), "x * 2.0", move || {
                launches.fetch_add(1, Ordering::SeqCst);
            })
        },
    );

    runtime.begin_capture(stream).unwrap();
    for _ in 0..3 {
        dummy_kernel.call(&mut ctx, launches.clone()).unwrap();
    }
    let graph = runtime.end_capture(stream).unwrap();

    // Capture emitted nothing and ran nothing.
    assert!(backend.is_empty());
    assert_eq!(launches.load(Ordering::SeqCst), 0);
    assert_eq!(graph.len(), 9);

    let exec = graph.instantiate();
    for _ in 0..10 {
        let guard = ctx.range("graph_replay").unwrap();
        exec.replay();
        guard.finish().unwrap();
    }

    assert_eq!(launches.load(Ordering::SeqCst), 30);
    assert!(backend.is_balanced());

    let completed = backend.completed_ranges();
    let kernels: Vec<_> = completed
        .iter()
        .filter(|(name, _)| name == "dummy_kernel")
        .collect();
    let replays: Vec<_> = completed
        .iter()
        .filter(|(name, _)| name == "graph_replay")
        .collect();
    assert_eq!(kernels.len(), 30);
    assert_eq!(replays.len(), 10);
    // Every kernel range sits directly inside a replay range.
    assert!(kernels.iter().all(|(_, depth)| *depth == 1));
    assert!(replays.iter().all(|(_, depth)| *depth == 0));

    // One replay's worth of events: three pairs inside `graph_replay`.
    let events = backend.events();
    assert_eq!(
        &events[..8],
        &[
            push("graph_replay"),
            push("dummy_kernel"),
            RangeEvent::Pop,
            push("dummy_kernel"),
            RangeEvent::Pop,
            push("dummy_kernel"),
            RangeEvent::Pop,
            RangeEvent::Pop,
        ]
    );
}

#[test]
fn test_markers_enclose_captured_work() {
    let Fixture {
        runtime,
        stream,
        mut ctx,
        ..
    } = fixture();

    runtime.begin_capture(stream).unwrap();
    runtime.launch(stream, "before", || {}).unwrap();
    let token = ctx.begin_range("region").unwrap();
    let begin = token.begin_node().expect("captured range has a begin node");
    runtime.launch(stream, "first", || {}).unwrap();
    runtime.launch(stream, "second", || {}).unwrap();
    let end = ctx.end_range(token).unwrap().expect("captured range has an end node");
    runtime.launch(stream, "after", || {}).unwrap();
    let graph = runtime.end_capture(stream).unwrap();

    assert_eq!(
        graph.labels(),
        vec![
            NodeLabel::Kernel("before".to_string()),
            NodeLabel::Marker(MarkerKind::Begin, "region".to_string()),
            NodeLabel::Kernel("first".to_string()),
            NodeLabel::Kernel("second".to_string()),
            NodeLabel::Marker(MarkerKind::End, "region".to_string()),
            NodeLabel::Kernel("after".to_string()),
        ]
    );

    let nodes = graph.nodes();
    let first = nodes[2].id;
    let second = nodes[3].id;
    let after = nodes[5].id;
    assert!(graph.depends_on(first, begin));
    assert!(graph.depends_on(end, second));
    assert!(graph.depends_on(end, begin));
    assert!(graph.depends_on(after, end));
    assert!(graph.position(begin) < graph.position(end));
}

#[test]
fn test_nested_captured_ranges() {
    let Fixture {
        runtime,
        backend,
        stream,
        mut ctx,
    } = fixture();

    runtime.begin_capture(stream).unwrap();
    {
        let mut layer = ctx.range("layer").unwrap();
        {
            let _attn = layer.range("attention").unwrap();
            runtime.launch(stream, "qkv", || {}).unwrap();
        }
        runtime.launch(stream, "mlp", || {}).unwrap();
    }
    let graph = runtime.end_capture(stream).unwrap();

    assert_eq!(
        graph.labels(),
        vec![
            NodeLabel::Marker(MarkerKind::Begin, "layer".to_string()),
            NodeLabel::Marker(MarkerKind::Begin, "attention".to_string()),
            NodeLabel::Kernel("qkv".to_string()),
            NodeLabel::Marker(MarkerKind::End, "attention".to_string()),
            NodeLabel::Kernel("mlp".to_string()),
            NodeLabel::Marker(MarkerKind::End, "layer".to_string()),
        ]
    );

    let exec = graph.instantiate();
    exec.replay();
    exec.replay();
    assert_eq!(
        backend.completed_ranges(),
        vec![
            ("attention".to_string(), 1),
            ("layer".to_string(), 0),
            ("attention".to_string(), 1),
            ("layer".to_string(), 0),
        ]
    );
}

#[test]
fn test_same_call_routes_by_current_capture_state() {
    let Fixture {
        runtime,
        backend,
        stream,
        mut ctx,
    } = fixture();
    let kernel_runtime = runtime.clone();
    let step = instrument("step", move |ctx: &mut ExecutionContext, _: ()| {
        let route = ctx.capture_status()?;
        kernel_runtime.launch(ctx.stream(), "step_kernel", || {})?;
        Ok::<_, GraphRangeError>(route.is_some())
    });

    // Outside capture: immediate markers only.
    assert!(!step.call(&mut ctx, ()).unwrap());
    assert_eq!(backend.take(), vec![push("step"), RangeEvent::Pop]);

    // Inside capture: graph nodes only.
    runtime.begin_capture(stream).unwrap();
    assert!(step.call(&mut ctx, ()).unwrap());
    let graph = runtime.end_capture(stream).unwrap();
    assert!(backend.is_empty());
    assert_eq!(
        graph.labels(),
        vec![
            NodeLabel::Marker(MarkerKind::Begin, "step".to_string()),
            NodeLabel::Kernel("step_kernel".to_string()),
            NodeLabel::Marker(MarkerKind::End, "step".to_string()),
        ]
    );

    // And back outside again.
    assert!(!step.call(&mut ctx, ()).unwrap());
    assert_eq!(backend.take(), vec![push("step"), RangeEvent::Pop]);
}

#[test]
fn test_token_routes_do_not_cross() {
    let Fixture {
        runtime,
        backend,
        stream,
        mut ctx,
    } = fixture();

    // Opened before capture starts: closes immediately even though the stream is now capturing.
    let eager = ctx.begin_range("eager").unwrap();
    assert_eq!(eager.route(), RangeRoute::Immediate);
    runtime.begin_capture(stream).unwrap();
    let captured = ctx.begin_range("captured").unwrap();
    assert!(captured.is_captured());

    ctx.end_range(captured).unwrap();
    ctx.end_range(eager).unwrap();
    let graph = runtime.end_capture(stream).unwrap();

    assert_eq!(backend.events(), vec![push("eager"), RangeEvent::Pop]);
    assert_eq!(
        graph.labels(),
        vec![
            NodeLabel::Marker(MarkerKind::Begin, "captured".to_string()),
            NodeLabel::Marker(MarkerKind::End, "captured".to_string()),
        ]
    );
}

#[test]
fn test_failing_captured_work_still_closes_range() {
    let Fixture {
        runtime,
        stream,
        mut ctx,
        ..
    } = fixture();

    runtime.begin_capture(stream).unwrap();
    let failing = instrument("failing", |_: &mut ExecutionContext, _: ()| {
        Err::<(), _>(anyhow::anyhow!("bad launch configuration"))
    });
    assert!(failing.call(&mut ctx, ()).is_err());
    assert_eq!(ctx.depth(), 0);

    let graph = runtime.end_capture(stream).unwrap();
    assert_eq!(
        graph.labels(),
        vec![
            NodeLabel::Marker(MarkerKind::Begin, "failing".to_string()),
            NodeLabel::Marker(MarkerKind::End, "failing".to_string()),
        ]
    );
}

#[test]
fn test_panicking_captured_work_still_closes_range() {
    let Fixture {
        runtime,
        stream,
        mut ctx,
        ..
    } = fixture();

    runtime.begin_capture(stream).unwrap();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _guard = ctx.range("panicking").unwrap();
        panic!("kernel bug");
    }));
    assert!(outcome.is_err());
    assert_eq!(ctx.depth(), 0);

    let graph = runtime.end_capture(stream).unwrap();
    assert_eq!(graph.len(), 2);
    assert_eq!(
        graph.labels()[1],
        NodeLabel::Marker(MarkerKind::End, "panicking".to_string())
    );
}

#[test]
fn test_aborted_capture_surfaces_capture_ended() {
    let Fixture {
        runtime,
        stream,
        mut ctx,
        ..
    } = fixture();

    let capture = runtime.begin_capture(stream).unwrap();
    let token = ctx.begin_range("doomed").unwrap();
    runtime.abort_capture(stream).unwrap();

    let expected = GraphRangeError::CaptureEnded { stream, capture };
    assert_eq!(ctx.begin_range("after_abort").unwrap_err(), expected);
    let err = ctx.end_range(token).unwrap_err();
    assert_eq!(err.error(), &expected);
    assert!(err.into_token().is_none());
    assert_eq!(runtime.end_capture(stream).unwrap_err(), expected);

    // The stream is usable again once the aborted capture is cleared.
    let guard = ctx.range("recovered").unwrap();
    assert_eq!(guard.token().map(|t| t.route()), Some(RangeRoute::Immediate));
}

#[test]
fn test_mismatched_end_leaves_outer_ranges_open() {
    let Fixture {
        runtime,
        backend,
        stream,
        mut ctx,
    } = fixture();

    runtime.begin_capture(stream).unwrap();
    let outer = ctx.begin_range("outer").unwrap();
    let inner = ctx.begin_range("inner").unwrap();

    let rejected = ctx.end_range(outer).unwrap_err();
    assert!(matches!(
        rejected.error(),
        GraphRangeError::RangeStackMismatch { .. }
    ));
    assert_eq!(ctx.open_ranges().collect::<Vec<_>>(), vec!["outer", "inner"]);
    ctx.end_range(inner).unwrap();

    // The rejected token is handed back and closes `outer` in order.
    let outer = rejected.into_token().expect("mismatched token is returned");
    ctx.end_range(outer).unwrap();
    assert_eq!(ctx.depth(), 0);

    let graph = runtime.end_capture(stream).unwrap();
    assert_eq!(
        graph.labels(),
        vec![
            NodeLabel::Marker(MarkerKind::Begin, "outer".to_string()),
            NodeLabel::Marker(MarkerKind::Begin, "inner".to_string()),
            NodeLabel::Marker(MarkerKind::End, "inner".to_string()),
            NodeLabel::Marker(MarkerKind::End, "outer".to_string()),
        ]
    );
    assert!(backend.is_empty());

    let exec = graph.instantiate();
    exec.replay();
    exec.replay();
    assert!(backend.is_balanced());
    assert_eq!(
        backend.completed_ranges(),
        vec![
            ("inner".to_string(), 1),
            ("outer".to_string(), 0),
            ("inner".to_string(), 1),
            ("outer".to_string(), 0),
        ]
    );
}
