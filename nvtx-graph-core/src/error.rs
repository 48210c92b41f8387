use thiserror::Error;

use crate::{CaptureId, RangeToken, StreamHandle};

/// Errors raised while querying capture state or emitting range markers.
///
/// None of these are transient. They are either caller bugs, a race with the
/// capture lifecycle, or a broken environment, so nothing here is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphRangeError {
    /// The stream handle is unknown or was destroyed.
    #[error("invalid or destroyed stream handle {stream}")]
    InvalidStream {
        /// The offending stream
        stream: StreamHandle,
    },

    /// A range was ended out of LIFO order, or with no range open at all.
    #[error(
        "range stack mismatch on {stream}: cannot end `{found}`, innermost open range is {}",
        describe_open(.expected)
    )]
    RangeStackMismatch {
        /// Stream whose stack was checked
        stream: StreamHandle,
        /// Name of the innermost open range, if any
        expected: Option<String>,
        /// Name carried by the token passed to `end_range`
        found: String,
    },

    /// The capture was aborted, or ended before a marker could be inserted into it.
    #[error("{capture} on {stream} has ended or was invalidated")]
    CaptureEnded {
        /// Stream the capture was bound to
        stream: StreamHandle,
        /// The capture that is no longer active
        capture: CaptureId,
    },

    /// No profiling backend is available in this build or environment.
    #[error("profiling backend unavailable: {reason}")]
    BackendUnavailable {
        /// Why the backend could not be resolved
        reason: String,
    },

    /// Opening another range would exceed the configured nesting limit.
    #[error("opening `{name}` on {stream} would exceed the nesting limit of {limit}")]
    DepthExceeded {
        /// Stream whose stack is full
        stream: StreamHandle,
        /// Range that was refused
        name: String,
        /// Configured limit
        limit: usize,
    },

    /// A capture-subsystem call (CUDA driver or host runtime) failed for a
    /// reason not covered above.
    #[error("graph runtime call `{call}` failed: {message}")]
    Driver {
        /// Name of the failing entry point
        call: &'static str,
        /// Error description
        message: String,
    },
}

fn describe_open(expected: &Option<String>) -> String {
    match expected {
        Some(name) => format!("`{name}`"),
        None => "<none>".to_string(),
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphRangeError>;

/// Failure of [`crate::ExecutionContext::end_range`].
///
/// When the range is still open (a `RangeStackMismatch`), the token is handed
/// back so the caller can end it in the right order. Otherwise the range has
/// already been removed and no token is returned.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct EndRangeError {
    error: GraphRangeError,
    token: Option<RangeToken>,
}

impl EndRangeError {
    pub(crate) fn still_open(error: GraphRangeError, token: RangeToken) -> Self {
        Self {
            error,
            token: Some(token),
        }
    }

    pub(crate) fn closed(error: GraphRangeError) -> Self {
        Self { error, token: None }
    }

    pub fn error(&self) -> &GraphRangeError {
        &self.error
    }

    /// The token of a range that is still open, if any.
    pub fn token(&self) -> Option<&RangeToken> {
        self.token.as_ref()
    }

    pub fn into_token(self) -> Option<RangeToken> {
        self.token
    }

    pub fn into_parts(self) -> (GraphRangeError, Option<RangeToken>) {
        (self.error, self.token)
    }
}

impl From<EndRangeError> for GraphRangeError {
    fn from(err: EndRangeError) -> Self {
        if let Some(token) = &err.token {
            tracing::warn!(
                stream = %token.stream(),
                range = %token.name(),
                "Discarding token of a range that is still open"
            );
        }
        err.error
    }
}
