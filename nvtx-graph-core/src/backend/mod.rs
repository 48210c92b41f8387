//! Profiler backends that receive range push/pop events.
//!
//! A backend is the "immediate" profiling transport: it is called directly on
//! the non-capturing path, and from marker host nodes when a captured graph
//! executes. Backends are fire-and-forget and never report errors.
//!
//! ## Backends
//!
//! - [`NvtxBackend`]: NVTX ranges for Nsight Systems (feature `nvtx`)
//! - [`RecordingBackend`]: in-memory event log, for tests and replay accounting
//! - [`NullBackend`]: discards everything; only selected explicitly
//!
//! The process-wide backend is resolved once through [`init_backend`] or
//! lazily on the first call to [`backend`].

#[cfg(feature = "nvtx")]
mod nvtx;
mod registry;

use std::fmt;
use std::sync::{Mutex, PoisonError};

#[cfg(feature = "nvtx")]
pub use nvtx::NvtxBackend;
pub use registry::{backend, backend_initialized, init_backend, try_backend};

/// Receiver of profiler range markers.
pub trait RangeBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Open a range named `name` on the calling thread.
    fn push_range(&self, name: &str);

    /// Close the innermost range open on the calling thread.
    fn pop_range(&self);
}

impl fmt::Debug for dyn RangeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RangeBackend({})", self.name())
    }
}

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RangeEvent {
    Push(String),
    Pop,
}

/// Backend that records every call in order.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    events: Mutex<Vec<RangeEvent>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far.
    pub fn events(&self) -> Vec<RangeEvent> {
        self.lock().clone()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<RangeEvent> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Names of all completed ranges, in closing order, paired with their depth.
    ///
    /// Depth 0 is an outermost range. Unmatched pushes are omitted; an
    /// unmatched pop is reported with the name `<unmatched>`.
    pub fn completed_ranges(&self) -> Vec<(String, usize)> {
        let mut open: Vec<String> = Vec::new();
        let mut closed = Vec::new();
        for event in self.lock().iter() {
            match event {
                RangeEvent::Push(name) => open.push(name.clone()),
                RangeEvent::Pop => match open.pop() {
                    Some(name) => closed.push((name, open.len())),
                    None => closed.push(("<unmatched>".to_string(), 0)),
                },
            }
        }
        closed
    }

    /// Whether every push has a matching pop and no pop precedes its push.
    pub fn is_balanced(&self) -> bool {
        let mut depth: usize = 0;
        for event in self.lock().iter() {
            match event {
                RangeEvent::Push(_) => depth += 1,
                RangeEvent::Pop => match depth.checked_sub(1) {
                    Some(d) => depth = d,
                    None => return false,
                },
            }
        }
        depth == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RangeEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RangeBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn push_range(&self, name: &str) {
        self.lock().push(RangeEvent::Push(name.to_string()));
    }

    fn pop_range(&self) {
        self.lock().push(RangeEvent::Pop);
    }
}

/// Backend that discards all markers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl RangeBackend for NullBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    #[inline(always)]
    fn push_range(&self, _name: &str) {}

    #[inline(always)]
    fn pop_range(&self) {}
}
