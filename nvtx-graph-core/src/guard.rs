//! Scoped range acquisition.

use std::ops::{Deref, DerefMut};

use crate::{ExecutionContext, GraphRangeError, RangeToken, Result};

/// A range that ends when the guard goes out of scope.
///
/// Created by [`ExecutionContext::range`]. The guard dereferences to the
/// context, so work (and nested ranges) are issued through it while it is
/// alive. Nested guards are therefore closed in LIFO order by construction.
///
/// Dropping the guard ends the range on every exit path, including `?`
/// returns and panics. Drop cannot report failures, so they are logged; use
/// [`RangeGuard::finish`] to observe them.
#[must_use = "the range ends as soon as the guard is dropped"]
pub struct RangeGuard<'a> {
    ctx: &'a mut ExecutionContext,
    token: Option<RangeToken>,
}

impl<'a> RangeGuard<'a> {
    pub(crate) fn new(ctx: &'a mut ExecutionContext, token: RangeToken) -> Self {
        Self {
            ctx,
            token: Some(token),
        }
    }

    pub fn name(&self) -> &str {
        self.token.as_ref().map(RangeToken::name).unwrap_or_default()
    }

    pub fn token(&self) -> Option<&RangeToken> {
        self.token.as_ref()
    }

    /// End the range now and report the outcome.
    pub fn finish(mut self) -> Result<()> {
        match self.token.take() {
            Some(token) => self
                .ctx
                .end_range(token)
                .map(|_| ())
                .map_err(GraphRangeError::from),
            None => Ok(()),
        }
    }
}

impl Deref for RangeGuard<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for RangeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for RangeGuard<'_> {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let name = token.name().to_string();
        if let Err(err) = self.ctx.end_range(token) {
            tracing::error!(
                stream = %self.ctx.stream(),
                range = %name,
                panicking = std::thread::panicking(),
                %err,
                "Failed to end range on drop"
            );
        }
    }
}

/// Open a named range on `ctx`.
///
/// With a block, runs the block inside the range. Inside the block `ctx` is
/// rebound to the context, and the block must evaluate to a `Result` whose
/// error type implements `From<GraphRangeError>`.
///
/// Without a block, shadows `ctx` with a [`RangeGuard`] that ends the range
/// at the end of the enclosing scope. Errors opening the range are
/// propagated with `?`.
///
/// ```ignore
/// let y = graph_range!(ctx, "dummy_kernel", {
///     runtime.launch(ctx.stream(), "scale", move || scale(&x))?;
///     Ok::<_, GraphRangeError>(())
/// })?;
///
/// graph_range!(ctx, "decode_step");
/// runtime.launch(ctx.stream(), "sample", sample)?;
/// ```
#[macro_export]
macro_rules! graph_range {
    ($ctx:ident, $name:expr, $body:block) => {
        $ctx.with_range($name, |$ctx: &mut $crate::ExecutionContext| $body)
    };
    ($ctx:ident, $name:expr) => {
        #[allow(unused_mut)]
        let mut $ctx = $ctx.range($name)?;
    };
}
