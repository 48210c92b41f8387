//! Profiler ranges that survive CUDA graph capture and replay.
//!
//! Host-side NVTX calls run once. When work is captured into a graph and
//! replayed by the device, those calls never fire again and replay profiles
//! lose their structure. This crate checks, on every range begin, whether the
//! stream is capturing; if it is, the range's begin and end markers are
//! inserted into the graph as host nodes so they execute on every replay.
//!
//! ## Usage
//!
//! ```ignore
//! use nvtx_graph_core::{host::HostGraphRuntime, ExecutionContext};
//!
//! let runtime = HostGraphRuntime::shared();
//! let stream = runtime.create_stream();
//! let mut ctx = ExecutionContext::with_global_backend(stream, runtime.clone())?;
//!
//! // Marks immediately when idle, inserts graph nodes when capturing
//! let guard = ctx.range("model_forward")?;
//! ```
//!
//! ## Features
//!
//! - `nvtx`: link `libnvToolsExt` and emit real NVTX ranges
//! - `cuda`: CUDA driver integration via `cudarc`
//! - `candle`: build contexts from `candle_core::Device`

mod backend;
mod capture;
pub mod config;
mod context;
#[cfg(feature = "cuda")]
pub mod cuda;
mod emitter;
mod error;
mod guard;
pub mod host;
mod marker;
mod stream;

#[cfg(feature = "nvtx")]
pub use backend::NvtxBackend;
pub use backend::{
    backend, backend_initialized, init_backend, try_backend, NullBackend, RangeBackend, RangeEvent,
    RecordingBackend,
};
pub use capture::query;
pub use config::{BackendKind, ProfilingConfig};
pub use context::ExecutionContext;
pub use emitter::{RangeEmitter, RangeRoute, RangeToken};
pub use error::{EndRangeError, GraphRangeError, Result};
pub use guard::RangeGuard;
pub use marker::{HostMarker, MarkerKind};
pub use stream::{CaptureContext, CaptureId, GraphCapture, NodeRef, StreamHandle};
