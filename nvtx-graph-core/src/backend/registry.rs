//! Process-wide range backend.
//!
//! Resolution runs exactly once. A missing backend is a configuration error of
//! the deployed binary, so it is reported (and logged) on first use and the
//! same error is returned from every later lookup rather than silently
//! degrading to no profiling.

use std::sync::{Arc, OnceLock};

use super::{NullBackend, RangeBackend};
use crate::{BackendKind, ProfilingConfig, Result};

/// Global backend, or the error that prevented resolving it.
static BACKEND: OnceLock<Result<Arc<dyn RangeBackend>>> = OnceLock::new();

fn resolve(config: &ProfilingConfig) -> Result<Arc<dyn RangeBackend>> {
    let resolved: Result<Arc<dyn RangeBackend>> = match config.backend {
        BackendKind::None => Ok(Arc::new(NullBackend)),
        #[cfg(feature = "nvtx")]
        BackendKind::Nvtx => Ok(Arc::new(super::NvtxBackend::new())),
        #[cfg(not(feature = "nvtx"))]
        BackendKind::Nvtx => Err(crate::GraphRangeError::BackendUnavailable {
            reason: "NVTX requested but this build was compiled without the `nvtx` feature"
                .to_string(),
        }),
    };

    match &resolved {
        Ok(backend) => tracing::info!(backend = backend.name(), "Range backend initialized"),
        Err(err) => tracing::error!(%err, "Range backend unavailable"),
    }
    resolved
}

/// Initialize the global backend from `config`.
///
/// If the backend was already resolved, the existing result is returned and
/// `config` is ignored.
pub fn init_backend(config: &ProfilingConfig) -> Result<Arc<dyn RangeBackend>> {
    BACKEND.get_or_init(|| resolve(config)).clone()
}

/// Get the global backend, resolving it from the environment on first use.
///
/// # Errors
/// `BackendUnavailable` if the configured backend is not compiled in. This is
/// decided once; every call afterwards returns the same error.
pub fn backend() -> Result<Arc<dyn RangeBackend>> {
    BACKEND
        .get_or_init(|| resolve(&ProfilingConfig::from_env()))
        .clone()
}

/// Whether the global backend has been resolved (successfully or not).
pub fn backend_initialized() -> bool {
    BACKEND.get().is_some()
}

/// Get the global backend without triggering resolution.
pub fn try_backend() -> Option<Arc<dyn RangeBackend>> {
    BACKEND.get().and_then(|resolved| resolved.as_ref().ok().cloned())
}
