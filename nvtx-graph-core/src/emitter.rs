//! Range begin/end emission.
//!
//! Routing is decided per call from the capture state handed in by the
//! caller: outside capture the backend is called immediately; inside capture
//! a zero-effect host marker node is spliced into the stream-ordered node
//! chain so the marker fires on every replay of the graph, with no host code
//! involved at replay time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::{
    CaptureContext, CaptureId, GraphCapture, HostMarker, NodeRef, RangeBackend, Result,
    StreamHandle,
};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Where a range's begin marker went.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeRoute {
    /// Emitted through the backend on the calling thread.
    Immediate,
    /// Inserted as a graph node into `capture`.
    Graph { capture: CaptureContext, begin: NodeRef },
}

/// One open range. Consumed by the matching end.
#[must_use = "an open range must be ended, or it corrupts every later range on the stream"]
pub struct RangeToken {
    id: u64,
    stream: StreamHandle,
    name: Arc<str>,
    route: RangeRoute,
}

impl RangeToken {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stream(&self) -> StreamHandle {
        self.stream
    }

    pub fn route(&self) -> RangeRoute {
        self.route
    }

    /// The begin node, if the range was opened inside a capture.
    pub fn begin_node(&self) -> Option<NodeRef> {
        match self.route {
            RangeRoute::Immediate => None,
            RangeRoute::Graph { begin, .. } => Some(begin),
        }
    }

    pub fn capture(&self) -> Option<CaptureId> {
        match self.route {
            RangeRoute::Immediate => None,
            RangeRoute::Graph { capture, .. } => Some(capture.id()),
        }
    }

    pub fn is_captured(&self) -> bool {
        matches!(self.route, RangeRoute::Graph { .. })
    }
}

impl fmt::Debug for RangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeToken")
            .field("id", &self.id)
            .field("stream", &self.stream)
            .field("name", &self.name)
            .field("route", &self.route)
            .finish()
    }
}

/// Emits range markers, either immediately or as graph nodes.
///
/// Does not track nesting; see [`crate::ExecutionContext`] for the
/// stack-checked entry points.
#[derive(Clone)]
pub struct RangeEmitter {
    capture: Arc<dyn GraphCapture>,
    backend: Arc<dyn RangeBackend>,
}

impl RangeEmitter {
    pub fn new(capture: Arc<dyn GraphCapture>, backend: Arc<dyn RangeBackend>) -> Self {
        Self { capture, backend }
    }

    pub fn capture(&self) -> &Arc<dyn GraphCapture> {
        &self.capture
    }

    pub fn backend(&self) -> &Arc<dyn RangeBackend> {
        &self.backend
    }

    /// Open a range on `stream`.
    ///
    /// `status` is the result of [`crate::query`] for the same stream, taken
    /// immediately before this call.
    ///
    /// # Errors
    /// Only from node insertion: `CaptureEnded` if the capture finished in
    /// between, or `Driver`. The immediate path cannot fail.
    pub fn begin_range(
        &self,
        stream: StreamHandle,
        name: Arc<str>,
        status: Option<CaptureContext>,
    ) -> Result<RangeToken> {
        let route = match status {
            None => {
                self.backend.push_range(&name);
                tracing::debug!(%stream, range = %name, "Pushed immediate range");
                RangeRoute::Immediate
            }
            Some(capture) => {
                let marker = HostMarker::begin(name.clone(), self.backend.clone());
                let begin = self.capture.insert_marker_node(&capture, marker)?;
                tracing::debug!(
                    %stream,
                    capture = %capture.id(),
                    node = %begin,
                    range = %name,
                    "Inserted range begin node"
                );
                RangeRoute::Graph { capture, begin }
            }
        };

        Ok(RangeToken {
            id: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            stream,
            name,
            route,
        })
    }

    /// Close the range opened by `token`.
    ///
    /// A token opened outside capture always closes immediately, and a token
    /// opened inside a capture always closes with an end node in that same
    /// capture, whatever the stream's state is now.
    ///
    /// # Returns
    /// The end node for captured ranges, `None` for immediate ones.
    ///
    /// # Errors
    /// `CaptureEnded` if the token's capture is no longer active on its stream.
    pub fn end_range(&self, token: RangeToken) -> Result<Option<NodeRef>> {
        match token.route {
            RangeRoute::Immediate => {
                self.backend.pop_range();
                tracing::debug!(stream = %token.stream, range = %token.name, "Popped immediate range");
                Ok(None)
            }
            RangeRoute::Graph { capture, begin } => {
                let marker = HostMarker::end(token.name.clone(), self.backend.clone());
                let end = self.capture.insert_marker_node(&capture, marker)?;
                tracing::debug!(
                    stream = %token.stream,
                    capture = %capture.id(),
                    %begin,
                    node = %end,
                    range = %token.name,
                    "Inserted range end node"
                );
                Ok(Some(end))
            }
        }
    }
}

impl fmt::Debug for RangeEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeEmitter")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}
