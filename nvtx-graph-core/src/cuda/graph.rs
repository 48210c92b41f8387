//! Stream capture, instantiation and launch on the driver API.
//!
//! The counterpart of [`crate::host::HostGraphRuntime`]'s capture lifecycle
//! for real CUDA streams, so instrumented work can be captured and replayed
//! without going through a framework's graph wrapper.

use std::ptr;

use cudarc::driver::sys::{self, CUstreamCaptureMode};

use super::capture::{map_driver_error, raw_stream};
use super::CudaGraphCapture;
use crate::{CaptureId, GraphCapture, GraphRangeError, Result, StreamHandle};

/// A graph produced by ending a capture. Destroyed on drop.
///
/// Marker payloads retained by the graph stay alive until this graph and every
/// [`CudaGraphExec`] instantiated from it are gone.
#[derive(Debug)]
pub struct CudaGraph {
    graph: sys::CUgraph,
    stream: StreamHandle,
}

impl CudaGraph {
    /// Number of nodes in the graph, marker nodes included.
    pub fn node_count(&self) -> Result<usize> {
        let mut count: usize = 0;
        unsafe { sys::cuGraphGetNodes(self.graph, ptr::null_mut(), &mut count) }
            .result()
            .map_err(|err| map_driver_error(self.stream, "cuGraphGetNodes", err))?;
        Ok(count)
    }

    pub fn instantiate(&self) -> Result<CudaGraphExec> {
        let mut exec: sys::CUgraphExec = ptr::null_mut();
        unsafe { sys::cuGraphInstantiateWithFlags(&mut exec, self.graph, 0) }
            .result()
            .map_err(|err| map_driver_error(self.stream, "cuGraphInstantiateWithFlags", err))?;
        Ok(CudaGraphExec { exec })
    }
}

impl Drop for CudaGraph {
    fn drop(&mut self) {
        if let Err(err) = unsafe { sys::cuGraphDestroy(self.graph) }.result() {
            tracing::warn!(%err, "Failed to destroy captured graph");
        }
    }
}

/// Executable graph. Each [`CudaGraphExec::launch`] replays every node,
/// including range markers.
#[derive(Debug)]
pub struct CudaGraphExec {
    exec: sys::CUgraphExec,
}

impl CudaGraphExec {
    /// Enqueue one replay on `stream`. Returns once the launch is queued.
    pub fn launch(&self, stream: StreamHandle) -> Result<()> {
        unsafe { sys::cuGraphLaunch(self.exec, raw_stream(stream)) }
            .result()
            .map_err(|err| map_driver_error(stream, "cuGraphLaunch", err))
    }
}

impl Drop for CudaGraphExec {
    fn drop(&mut self) {
        if let Err(err) = unsafe { sys::cuGraphExecDestroy(self.exec) }.result() {
            tracing::warn!(%err, "Failed to destroy executable graph");
        }
    }
}

impl CudaGraphCapture {
    /// Start capturing work issued to `stream` from this thread.
    ///
    /// `stream` must not be the legacy default stream.
    pub fn begin_capture(&self, stream: StreamHandle) -> Result<CaptureId> {
        unsafe {
            sys::cuStreamBeginCapture_v2(
                raw_stream(stream),
                CUstreamCaptureMode::CU_STREAM_CAPTURE_MODE_THREAD_LOCAL,
            )
        }
        .result()
        .map_err(|err| map_driver_error(stream, "cuStreamBeginCapture_v2", err))?;

        let capture = self
            .capture_status(stream)?
            .ok_or_else(|| GraphRangeError::Driver {
                call: "cuStreamBeginCapture_v2",
                message: format!("{stream} is not capturing after begin"),
            })?;
        tracing::debug!(%stream, capture = %capture.id(), "Began CUDA capture");
        Ok(capture.id())
    }

    /// Stop capturing and return the graph.
    ///
    /// Ends the capture even if it was invalidated, in which case the error
    /// is returned and the stream is usable again.
    pub fn end_capture(&self, stream: StreamHandle) -> Result<CudaGraph> {
        let mut graph: sys::CUgraph = ptr::null_mut();
        unsafe { sys::cuStreamEndCapture(raw_stream(stream), &mut graph) }
            .result()
            .map_err(|err| map_driver_error(stream, "cuStreamEndCapture", err))?;
        tracing::debug!(%stream, "Ended CUDA capture");
        Ok(CudaGraph { graph, stream })
    }

    /// Block until all work queued on `stream` has completed, host nodes included.
    pub fn synchronize(&self, stream: StreamHandle) -> Result<()> {
        unsafe { sys::cuStreamSynchronize(raw_stream(stream)) }
            .result()
            .map_err(|err| map_driver_error(stream, "cuStreamSynchronize", err))
    }
}
