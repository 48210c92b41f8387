//! Explicit execution context for instrumented work.
//!
//! An [`ExecutionContext`] binds one stream to the capture subsystem and a
//! backend, and owns the stack of ranges currently open on that stream.
//! Callers thread it through instrumented code instead of relying on an
//! ambient "current stream". Mutating operations take `&mut self`: one
//! context is driven by one thread at a time, so no locks are needed.

use std::fmt;
use std::sync::Arc;

use crate::{
    backend, config::DEFAULT_MAX_DEPTH, init_backend, query, CaptureContext, EndRangeError,
    GraphCapture, GraphRangeError, NodeRef, ProfilingConfig, RangeBackend, RangeEmitter, RangeGuard, RangeToken,
    Result, StreamHandle,
};

struct OpenRange {
    token_id: u64,
    name: Arc<str>,
}

pub struct ExecutionContext {
    stream: StreamHandle,
    emitter: RangeEmitter,
    open: Vec<OpenRange>,
    max_depth: usize,
}

impl ExecutionContext {
    pub fn new(
        stream: StreamHandle,
        capture: Arc<dyn GraphCapture>,
        backend: Arc<dyn RangeBackend>,
    ) -> Self {
        Self {
            stream,
            emitter: RangeEmitter::new(capture, backend),
            open: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Build a context on the global backend, initializing it from `config` if needed.
    ///
    /// # Errors
    /// `BackendUnavailable` if the configured backend is not compiled in.
    pub fn from_config(
        stream: StreamHandle,
        capture: Arc<dyn GraphCapture>,
        config: &ProfilingConfig,
    ) -> Result<Self> {
        let backend = init_backend(config)?;
        Ok(Self::new(stream, capture, backend).with_max_depth(config.max_depth))
    }

    /// Build a context on the global backend, resolved from the environment on first use.
    pub fn with_global_backend(stream: StreamHandle, capture: Arc<dyn GraphCapture>) -> Result<Self> {
        Ok(Self::new(stream, capture, backend()?))
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn stream(&self) -> StreamHandle {
        self.stream
    }

    pub fn emitter(&self) -> &RangeEmitter {
        &self.emitter
    }

    /// Capture state of this context's stream, queried now.
    pub fn capture_status(&self) -> Result<Option<CaptureContext>> {
        query(self.emitter.capture().as_ref(), self.stream)
    }

    /// Number of ranges currently open on this stream.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Names of open ranges, outermost first.
    pub fn open_ranges(&self) -> impl Iterator<Item = &str> + '_ {
        self.open.iter().map(|range| range.name.as_ref())
    }

    /// Open a range named `name`.
    ///
    /// The stream's capture state is queried on every call, so the same
    /// instrumented code routes correctly whether or not it runs under capture.
    ///
    /// # Errors
    /// * `InvalidStream` - the stream was destroyed
    /// * `CaptureEnded` - the stream's capture was invalidated
    /// * `DepthExceeded` - `max_depth` ranges are already open
    pub fn begin_range(&mut self, name: impl Into<Arc<str>>) -> Result<RangeToken> {
        let name = name.into();
        if self.open.len() >= self.max_depth {
            return Err(GraphRangeError::DepthExceeded {
                stream: self.stream,
                name: name.to_string(),
                limit: self.max_depth,
            });
        }

        let status = self.capture_status()?;
        let token = self.emitter.begin_range(self.stream, name.clone(), status)?;
        self.open.push(OpenRange {
            token_id: token.id(),
            name,
        });
        Ok(token)
    }

    /// Close the most recently opened range.
    ///
    /// # Errors
    /// * `RangeStackMismatch` - `token` is not the innermost open range of
    ///   this context; the stack is left untouched and the token is returned
    ///   in the error so it can be ended later
    /// * `CaptureEnded` - the range was opened inside a capture that has since
    ///   ended or been invalidated; the range is still removed from the stack
    pub fn end_range(
        &mut self,
        token: RangeToken,
    ) -> std::result::Result<Option<NodeRef>, EndRangeError> {
        let innermost = self.open.last();
        if token.stream() != self.stream || innermost.map(|r| r.token_id) != Some(token.id()) {
            let error = GraphRangeError::RangeStackMismatch {
                stream: self.stream,
                expected: innermost.map(|r| r.name.to_string()),
                found: token.name().to_string(),
            };
            return Err(EndRangeError::still_open(error, token));
        }

        self.open.pop();
        self.emitter.end_range(token).map_err(EndRangeError::closed)
    }

    /// Open a range that ends when the returned guard is dropped.
    pub fn range(&mut self, name: impl Into<Arc<str>>) -> Result<RangeGuard<'_>> {
        let token = self.begin_range(name)?;
        Ok(RangeGuard::new(self, token))
    }

    /// Run `work` inside a range.
    ///
    /// The range is ended on every exit path: normal return, error return,
    /// and panic. An error from `work` takes precedence over an error ending
    /// the range, which is then only logged.
    pub fn with_range<T, E, F>(
        &mut self,
        name: impl Into<Arc<str>>,
        work: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut ExecutionContext) -> std::result::Result<T, E>,
        E: From<GraphRangeError>,
    {
        let mut guard = self.range(name)?;
        let output = work(&mut *guard);
        let ended = guard.finish();
        match (output, ended) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(end_err)) => {
                tracing::warn!(err = %end_err, "Failed to end range after work failed");
                Err(err)
            }
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("stream", &self.stream)
            .field("open", &self.open_ranges().collect::<Vec<_>>())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}
