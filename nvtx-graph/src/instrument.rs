use std::fmt;
use std::sync::Arc;

use nvtx_graph_core::{ExecutionContext, GraphRangeError};

/// A callable whose every invocation is bracketed by a named range.
///
/// Built with [`instrument`]. The wrapped function receives the context, so it
/// can launch work on the context's stream and open nested ranges.
#[derive(Clone)]
pub struct Instrumented<F> {
    name: Arc<str>,
    func: F,
}

impl<F> Instrumented<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inner(&self) -> &F {
        &self.func
    }

    /// Invoke the function inside its range.
    ///
    /// The range ends whether the function returns `Ok`, returns `Err`, or
    /// panics.
    pub fn call<A, T, E>(&self, ctx: &mut ExecutionContext, args: A) -> Result<T, E>
    where
        F: Fn(&mut ExecutionContext, A) -> Result<T, E>,
        E: From<GraphRangeError>,
    {
        ctx.with_range(self.name.clone(), |ctx| (self.func)(ctx, args))
    }
}

impl<F> fmt::Debug for Instrumented<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumented")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Wrap `func` so each call runs inside a range named `name`.
pub fn instrument<F>(name: impl Into<Arc<str>>, func: F) -> Instrumented<F> {
    Instrumented {
        name: name.into(),
        func,
    }
}
