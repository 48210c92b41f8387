//! Host-executed streams and graph capture.
//!
//! A CPU implementation of the capture subsystem with the same observable
//! semantics as CUDA stream capture:
//! - outside capture, [`HostGraphRuntime::launch`] runs work immediately
//! - inside capture, launches are recorded as kernel nodes chained in stream order
//! - [`HostGraphRuntime::abort_capture`] invalidates a capture the way a failing
//!   captured operation does on the device; ending it then fails
//! - [`HostGraph::instantiate`] and [`HostGraphExec::replay`] execute recorded
//!   nodes without re-running any capture-time host code
//!
//! Used when no CUDA device is present and throughout the test-suite.

mod graph;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use graph::{HostGraph, HostGraphExec, HostKernel, NodeInfo, NodeLabel};
use graph::{GraphNode, NodeOp};

use crate::{
    CaptureContext, CaptureId, GraphCapture, GraphRangeError, HostMarker, NodeRef, Result,
    StreamHandle,
};

struct ActiveCapture {
    id: CaptureId,
    nodes: Vec<GraphNode>,
    /// Nodes the next captured operation on the stream will depend on.
    deps: Vec<NodeRef>,
}

enum CaptureSlot {
    Idle,
    Active(ActiveCapture),
    Invalidated(CaptureId),
}

struct StreamState {
    capture: CaptureSlot,
}

#[derive(Default)]
struct RuntimeState {
    streams: HashMap<StreamHandle, StreamState>,
    next_stream: u64,
    next_capture: u64,
    next_node: u64,
}

impl RuntimeState {
    fn stream_mut(&mut self, stream: StreamHandle) -> Result<&mut StreamState> {
        self.streams
            .get_mut(&stream)
            .ok_or(GraphRangeError::InvalidStream { stream })
    }

    fn alloc_node(&mut self) -> NodeRef {
        self.next_node += 1;
        NodeRef::from_raw(self.next_node)
    }

    /// Append `op` to the active capture on `stream`, chained after the current dependencies.
    fn append(&mut self, stream: StreamHandle, expected: Option<CaptureId>, op: NodeOp) -> Result<NodeRef> {
        let id = self.alloc_node();
        let state = self.stream_mut(stream)?;
        match &mut state.capture {
            CaptureSlot::Active(active) if expected.is_none_or(|want| want == active.id) => {
                let deps = std::mem::replace(&mut active.deps, vec![id]);
                active.nodes.push(GraphNode { id, deps, op });
                Ok(id)
            }
            CaptureSlot::Active(active) => Err(GraphRangeError::CaptureEnded {
                stream,
                capture: expected.unwrap_or(active.id),
            }),
            CaptureSlot::Invalidated(capture) => Err(GraphRangeError::CaptureEnded {
                stream,
                capture: expected.unwrap_or(*capture),
            }),
            CaptureSlot::Idle => match expected {
                Some(capture) => Err(GraphRangeError::CaptureEnded { stream, capture }),
                None => Err(not_capturing("append", stream)),
            },
        }
    }
}

fn not_capturing(call: &'static str, stream: StreamHandle) -> GraphRangeError {
    GraphRangeError::Driver {
        call,
        message: format!("{stream} is not capturing"),
    }
}

/// Registry of host streams and their capture state.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Default)]
pub struct HostGraphRuntime {
    state: Mutex<RuntimeState>,
}

impl HostGraphRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the runtime already wrapped in an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_stream(&self) -> StreamHandle {
        let mut state = self.lock();
        state.next_stream += 1;
        let stream = StreamHandle::from_raw(state.next_stream);
        state.streams.insert(
            stream,
            StreamState {
                capture: CaptureSlot::Idle,
            },
        );
        tracing::debug!(%stream, "Created host stream");
        stream
    }

    /// Destroy `stream`. Any capture in progress on it is discarded.
    pub fn destroy_stream(&self, stream: StreamHandle) -> Result<()> {
        let removed = self.lock().streams.remove(&stream);
        match removed {
            Some(_) => {
                tracing::debug!(%stream, "Destroyed host stream");
                Ok(())
            }
            None => Err(GraphRangeError::InvalidStream { stream }),
        }
    }

    /// Start capturing work issued to `stream` into a new graph.
    pub fn begin_capture(&self, stream: StreamHandle) -> Result<CaptureId> {
        let mut state = self.lock();
        state.next_capture += 1;
        let id = CaptureId::from_raw(state.next_capture);
        let slot = &mut state.stream_mut(stream)?.capture;
        if !matches!(slot, CaptureSlot::Idle) {
            return Err(GraphRangeError::Driver {
                call: "begin_capture",
                message: format!("{stream} is already capturing"),
            });
        }
        *slot = CaptureSlot::Active(ActiveCapture {
            id,
            nodes: Vec::new(),
            deps: Vec::new(),
        });
        tracing::debug!(%stream, capture = %id, "Began host capture");
        Ok(id)
    }

    /// Stop capturing and return the graph.
    ///
    /// # Errors
    /// * `CaptureEnded` - the capture was invalidated by [`Self::abort_capture`];
    ///   the stream returns to the idle state
    /// * `Driver` - the stream is not capturing
    pub fn end_capture(&self, stream: StreamHandle) -> Result<HostGraph> {
        let mut state = self.lock();
        let slot = &mut state.stream_mut(stream)?.capture;
        match std::mem::replace(slot, CaptureSlot::Idle) {
            CaptureSlot::Active(active) => {
                tracing::debug!(
                    %stream,
                    capture = %active.id,
                    nodes = active.nodes.len(),
                    "Ended host capture"
                );
                Ok(HostGraph::from_nodes(active.nodes))
            }
            CaptureSlot::Invalidated(capture) => {
                Err(GraphRangeError::CaptureEnded { stream, capture })
            }
            CaptureSlot::Idle => Err(not_capturing("end_capture", stream)),
        }
    }

    /// Invalidate the capture in progress on `stream`.
    ///
    /// Subsequent captured operations, marker insertions and capture queries on
    /// the stream fail with `CaptureEnded` until [`Self::end_capture`] is called.
    pub fn abort_capture(&self, stream: StreamHandle) -> Result<()> {
        let mut state = self.lock();
        let slot = &mut state.stream_mut(stream)?.capture;
        match slot {
            CaptureSlot::Active(active) => {
                let capture = active.id;
                *slot = CaptureSlot::Invalidated(capture);
                tracing::debug!(%stream, %capture, "Invalidated host capture");
                Ok(())
            }
            CaptureSlot::Invalidated(_) => Ok(()),
            CaptureSlot::Idle => Err(not_capturing("abort_capture", stream)),
        }
    }

    /// Issue `func` to `stream`.
    ///
    /// Runs immediately when the stream is idle; when capturing, records a
    /// kernel node instead and `func` only runs on replay.
    pub fn launch<F>(&self, stream: StreamHandle, name: &str, func: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let capturing = match &state.stream_mut(stream)?.capture {
            CaptureSlot::Idle => false,
            CaptureSlot::Active(_) => true,
            CaptureSlot::Invalidated(capture) => {
                return Err(GraphRangeError::CaptureEnded {
                    stream,
                    capture: *capture,
                })
            }
        };

        if !capturing {
            drop(state);
            func();
            return Ok(());
        }

        let op = NodeOp::Kernel {
            name: Arc::from(name),
            func: Arc::new(func),
        };
        let node = state.append(stream, None, op)?;
        tracing::trace!(%stream, %node, kernel = name, "Captured kernel node");
        Ok(())
    }
}

impl GraphCapture for HostGraphRuntime {
    fn capture_status(&self, stream: StreamHandle) -> Result<Option<CaptureContext>> {
        let mut state = self.lock();
        match &state.stream_mut(stream)?.capture {
            CaptureSlot::Idle => Ok(None),
            CaptureSlot::Active(active) => Ok(Some(CaptureContext::new(stream, active.id))),
            CaptureSlot::Invalidated(capture) => Err(GraphRangeError::CaptureEnded {
                stream,
                capture: *capture,
            }),
        }
    }

    fn insert_marker_node(&self, ctx: &CaptureContext, marker: HostMarker) -> Result<NodeRef> {
        self.lock()
            .append(ctx.stream(), Some(ctx.id()), NodeOp::Marker(marker))
    }
}
