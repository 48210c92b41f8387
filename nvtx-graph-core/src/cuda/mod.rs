//! CUDA driver integration.
//!
//! [`CudaGraphCapture`] implements the capture seam on top of stream capture:
//! capture state comes from `cuStreamGetCaptureInfo`, and markers become host
//! nodes added with `cuGraphAddHostNode`, after which the stream's capture
//! dependencies are set to the new node so it sits in the stream-ordered chain.
//!
//! [`CudaGraphCapture::begin_capture`], [`CudaGraphCapture::end_capture`],
//! [`CudaGraph::instantiate`] and [`CudaGraphExec::launch`] drive the capture
//! lifecycle itself for callers that own their streams.
//!
//! The driver context owning the stream must be current on the calling thread.

mod capture;
mod graph;

use std::sync::Arc;

use cudarc::driver::CudaStream;

pub use capture::CudaGraphCapture;
pub use cudarc;
pub use graph::{CudaGraph, CudaGraphExec};

use crate::{ExecutionContext, GraphRangeError, Result, StreamHandle};

/// Handle for a raw driver stream.
pub fn stream_handle(stream: cudarc::driver::sys::CUstream) -> StreamHandle {
    StreamHandle::from_raw(stream as usize as u64)
}

/// Build a context for `stream` on the global backend.
///
/// Binds the stream's driver context to the calling thread.
pub fn execution_context(stream: &Arc<CudaStream>) -> Result<ExecutionContext> {
    stream
        .context()
        .bind_to_thread()
        .map_err(|err| GraphRangeError::Driver {
            call: "cuCtxSetCurrent",
            message: err.to_string(),
        })?;
    ExecutionContext::with_global_backend(
        stream_handle(stream.cu_stream()),
        Arc::new(CudaGraphCapture::new()),
    )
}

/// Build a context for the stream backing a candle CUDA device.
#[cfg(feature = "candle")]
pub fn execution_context_for_device(device: &candle_core::Device) -> Result<ExecutionContext> {
    match device {
        candle_core::Device::Cuda(cuda) => execution_context(&cuda.cuda_stream()),
        other => Err(GraphRangeError::Driver {
            call: "candle_core::Device::cuda_stream",
            message: format!("{other:?} is not a CUDA device"),
        }),
    }
}
