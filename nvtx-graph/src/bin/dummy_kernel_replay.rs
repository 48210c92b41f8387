//! Capture an instrumented kernel into a graph and replay it.
//!
//! The kernel is called once eagerly, then `--captures` times inside a single
//! capture. The graph is replayed `--replays` times, each replay bracketed by
//! an immediate `graph_replay` range. Every captured call contributes one
//! range pair per replay, so the kernel name should account for
//! `captures * replays + 1` pairs, the extra one from the eager call.
//!
//! By default the graph is captured on host streams. With `--cuda` it is
//! captured on device 0 through the driver, the kernel being a memset.
//! Run under Nsight Systems to see the ranges:
//!
//! ```bash
//! nsys profile cargo run --release --features cuda --bin dummy-kernel-replay -- --cuda
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use clap::Parser;
use nvtx_graph::host::HostGraphRuntime;
use nvtx_graph::{backend, init_logging, instrument, ExecutionContext, RangeBackend, StreamHandle};

#[derive(Parser, Debug)]
#[command(version, about = "Replay a captured graph with graph-aware NVTX ranges")]
struct Args {
    /// Number of instrumented kernel calls inside the capture
    #[arg(long, default_value_t = 3)]
    captures: usize,

    /// Number of graph replays
    #[arg(long, default_value_t = 10)]
    replays: usize,

    /// Range name used for the kernel
    #[arg(long, default_value = "dummy_kernel")]
    name: String,

    /// Number of elements processed by the kernel
    #[arg(long, default_value_t = 1024)]
    len: usize,

    /// Only count ranges in-process instead of forwarding them to NVTX
    #[arg(long)]
    record_only: bool,

    /// Capture on CUDA device 0 instead of host streams (needs `--features cuda`)
    #[arg(long)]
    cuda: bool,
}

/// Forwards to an optional inner backend and counts completed ranges per name.
struct TallyBackend {
    inner: Option<Arc<dyn RangeBackend>>,
    state: Mutex<Tally>,
}

#[derive(Default)]
struct Tally {
    open: Vec<String>,
    completed: BTreeMap<String, usize>,
}

impl TallyBackend {
    fn new(inner: Option<Arc<dyn RangeBackend>>) -> Self {
        Self {
            inner,
            state: Mutex::new(Tally::default()),
        }
    }

    fn completed(&self) -> BTreeMap<String, usize> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .completed
            .clone()
    }
}

impl RangeBackend for TallyBackend {
    fn name(&self) -> &'static str {
        "tally"
    }

    fn push_range(&self, name: &str) {
        if let Some(inner) = &self.inner {
            inner.push_range(name);
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.open.push(name.to_string());
    }

    fn pop_range(&self) {
        if let Some(inner) = &self.inner {
            inner.pop_range();
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(name) = state.open.pop() {
            *state.completed.entry(name).or_default() += 1;
        }
    }
}

/// Replay on host streams: no device needed.
fn run_host(args: &Args, tally: Arc<TallyBackend>) -> anyhow::Result<()> {
    let runtime = HostGraphRuntime::shared();
    let stream: StreamHandle = runtime.create_stream();
    let mut ctx = ExecutionContext::new(stream, runtime.clone(), tally);

    let input: Arc<Vec<f32>> = Arc::new((0..args.len).map(|i| i as f32 * 0.5).collect());
    let output = Arc::new(Mutex::new(vec![0.0f32; args.len]));

    let kernel_runtime = runtime.clone();
    let dummy_kernel = instrument(
        args.name.clone(),
        move |ctx: &mut ExecutionContext, (x, y): (Arc<Vec<f32>>, Arc<Mutex<Vec<f32>>>)| {
            kernel_runtime.launch(ctx.stream(), "scale_by_two", move || {
                let mut y = y.lock().unwrap_or_else(PoisonError::into_inner);
                for (out, value) in y.iter_mut().zip(x.iter()) {
                    *out = value * 2.0;
                }
            })?;
            Ok::<_, anyhow::Error>(())
        },
    );

    // Warm-up outside capture: an immediate range pair.
    dummy_kernel.call(&mut ctx, (input.clone(), output.clone()))?;

    runtime.begin_capture(stream)?;
    for _ in 0..args.captures {
        dummy_kernel.call(&mut ctx, (input.clone(), output.clone()))?;
    }
    let graph = runtime.end_capture(stream)?;
    tracing::info!(nodes = graph.len(), "Captured host graph");

    let exec = graph.instantiate();
    for _ in 0..args.replays {
        let guard = ctx.range("graph_replay")?;
        exec.replay();
        guard.finish()?;
    }
    Ok(())
}

/// Replay on device 0 with real stream capture.
#[cfg(feature = "cuda")]
fn run_cuda(args: &Args, tally: Arc<TallyBackend>) -> anyhow::Result<()> {
    use nvtx_graph::cuda::cudarc::driver::{sys, CudaContext, DevicePtr};
    use nvtx_graph::cuda::{stream_handle, CudaGraphCapture};
    use nvtx_graph::GraphRangeError;

    let device = CudaContext::new(0)?;
    device.bind_to_thread()?;
    let cuda_stream = device.new_stream()?;
    let output = cuda_stream.alloc_zeros::<f32>(args.len)?;
    let dst = {
        let (ptr, _sync) = output.device_ptr(&cuda_stream);
        ptr
    };
    cuda_stream.synchronize()?;

    let stream = stream_handle(cuda_stream.cu_stream());
    let capture = Arc::new(CudaGraphCapture::new());
    let mut ctx = ExecutionContext::new(stream, capture.clone(), tally);

    let len = args.len;
    let dummy_kernel = instrument(args.name.clone(), move |ctx: &mut ExecutionContext, _: ()| {
        let raw = ctx.stream().as_raw() as usize as sys::CUstream;
        unsafe { sys::cuMemsetD32Async(dst, 2.0f32.to_bits(), len, raw) }
            .result()
            .map_err(|err| GraphRangeError::Driver {
                call: "cuMemsetD32Async",
                message: err.to_string(),
            })
    });

    dummy_kernel.call(&mut ctx, ())?;
    capture.synchronize(stream)?;

    capture.begin_capture(stream)?;
    for _ in 0..args.captures {
        if let Err(err) = dummy_kernel.call(&mut ctx, ()) {
            // Leave the stream usable before reporting.
            let _ = capture.end_capture(stream);
            return Err(err.into());
        }
    }
    let graph = capture.end_capture(stream)?;
    tracing::info!(nodes = graph.node_count()?, "Captured CUDA graph");

    let exec = graph.instantiate()?;
    for _ in 0..args.replays {
        let guard = ctx.range("graph_replay")?;
        exec.launch(stream)?;
        // Host nodes fire on the driver's callback thread; wait for them
        // so each replay's ranges land inside its `graph_replay` range.
        capture.synchronize(stream)?;
        guard.finish()?;
    }
    Ok(())
}

#[cfg(not(feature = "cuda"))]
fn run_cuda(_args: &Args, _tally: Arc<TallyBackend>) -> anyhow::Result<()> {
    anyhow::bail!("--cuda requires building with `--features cuda`")
}

fn main() -> anyhow::Result<()> {
    init_logging()?;
    let args = Args::parse();

    let inner = if args.record_only {
        None
    } else {
        Some(backend().context(
            "NVTX backend required; rebuild with `--features nvtx` or pass --record-only",
        )?)
    };
    let tally = Arc::new(TallyBackend::new(inner));

    if args.cuda {
        run_cuda(&args, tally.clone())?;
    } else {
        run_host(&args, tally.clone())?;
    }

    let completed = tally.completed();
    let kernel_pairs = completed.get(&args.name).copied().unwrap_or_default();
    let expected = args.captures * args.replays + 1;
    for (name, count) in &completed {
        println!("{name}: {count} range pairs");
    }
    anyhow::ensure!(
        kernel_pairs == expected,
        "expected {expected} `{}` range pairs (1 eager + {} captured x {} replays), found {kernel_pairs}",
        args.name,
        args.captures,
        args.replays
    );
    Ok(())
}
