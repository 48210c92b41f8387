//! Stream, capture and node identifiers, plus the capture-subsystem seam.
//!
//! The graph capture machinery itself (starting and ending captures,
//! instantiating and replaying graphs) lives outside this crate's core logic.
//! The core only needs two things from it, expressed by [`GraphCapture`]:
//! the current capture status of a stream, and the ability to append a host
//! marker node to the stream-ordered chain of an in-progress capture.
//!
//! Two implementations ship with the crate:
//! - [`crate::host::HostGraphRuntime`]: host-executed streams and graphs
//! - `crate::cuda::CudaGraphCapture`: the CUDA driver (feature `cuda`)

use std::fmt;
use std::sync::Arc;

use crate::{HostMarker, Result};

/// Opaque handle to an execution stream.
///
/// For CUDA this is the raw `CUstream` pointer value; for host streams it is
/// the registry index. Handles are only meaningful to the [`GraphCapture`]
/// implementation that issued them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(u64);

impl StreamHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{:#x}", self.0)
    }
}

/// Identifier of one capture session. Unique per stream over the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaptureId(u64);

impl CaptureId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capture#{}", self.0)
    }
}

/// Opaque reference to a node inserted into a graph under construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeRef(u64);

impl NodeRef {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{:#x}", self.0)
    }
}

/// An in-progress graph capture bound to one stream.
///
/// Owned by the capture subsystem. Callers observe it through
/// [`crate::query`] and must not hold it past the next operation, since the
/// capture can end at any time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CaptureContext {
    stream: StreamHandle,
    id: CaptureId,
}

impl CaptureContext {
    pub const fn new(stream: StreamHandle, id: CaptureId) -> Self {
        Self { stream, id }
    }

    pub fn stream(&self) -> StreamHandle {
        self.stream
    }

    pub fn id(&self) -> CaptureId {
        self.id
    }
}

/// The capture subsystem as seen by range emission.
pub trait GraphCapture: Send + Sync {
    /// Report whether `stream` is capturing.
    ///
    /// # Returns
    /// * `Ok(None)` - The stream is not capturing
    /// * `Ok(Some(ctx))` - Capture `ctx` is active on the stream
    /// * `Err(InvalidStream)` - The handle is unknown or destroyed
    /// * `Err(CaptureEnded)` - The capture was invalidated but not yet ended
    fn capture_status(&self, stream: StreamHandle) -> Result<Option<CaptureContext>>;

    /// Append a host marker node to the capture's stream-ordered chain.
    ///
    /// The node must depend on every node the stream currently depends on, and
    /// every node captured afterwards on the stream must depend on it. Fails
    /// with `CaptureEnded` if `ctx` is no longer the active capture on its stream.
    fn insert_marker_node(&self, ctx: &CaptureContext, marker: HostMarker) -> Result<NodeRef>;
}

impl<T: GraphCapture + ?Sized> GraphCapture for Arc<T> {
    fn capture_status(&self, stream: StreamHandle) -> Result<Option<CaptureContext>> {
        (**self).capture_status(stream)
    }

    fn insert_marker_node(&self, ctx: &CaptureContext, marker: HostMarker) -> Result<NodeRef> {
        (**self).insert_marker_node(ctx, marker)
    }
}
