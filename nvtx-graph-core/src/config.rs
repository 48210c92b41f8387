//! Runtime configuration for range emission.

use std::fmt;
use std::str::FromStr;

/// Default bound on open ranges per stream.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Which backend receives range markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// NVTX ranges, visible in Nsight Systems. Requires the `nvtx` feature.
    #[default]
    Nvtx,
    /// Markers are routed and inserted as usual but emit nothing.
    None,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nvtx" => Ok(Self::Nvtx),
            "none" | "off" | "disabled" => Ok(Self::None),
            other => Err(format!(
                "unknown range backend `{other}` (expected `nvtx` or `none`)"
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nvtx => f.write_str("nvtx"),
            Self::None => f.write_str("none"),
        }
    }
}

/// Configuration for range emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingConfig {
    /// Backend selected for the global registry
    pub backend: BackendKind,
    /// Maximum number of simultaneously open ranges on one stream
    pub max_depth: usize,
}

impl ProfilingConfig {
    /// Read configuration from the environment.
    ///
    /// - `NVTX_GRAPH_BACKEND`: `nvtx` (default) or `none`
    /// - `NVTX_GRAPH_MAX_DEPTH`: positive integer, default 256
    ///
    /// Unparseable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        let backend = match std::env::var("NVTX_GRAPH_BACKEND") {
            Ok(raw) => raw.parse().unwrap_or_else(|err: String| {
                tracing::warn!(%err, "Ignoring NVTX_GRAPH_BACKEND");
                BackendKind::default()
            }),
            Err(_) => BackendKind::default(),
        };
        let max_depth = std::env::var("NVTX_GRAPH_MAX_DEPTH")
            .ok()
            .and_then(|raw| match raw.trim().parse::<usize>() {
                Ok(depth) if depth > 0 => Some(depth),
                _ => {
                    tracing::warn!(value = %raw, "Ignoring NVTX_GRAPH_MAX_DEPTH");
                    None
                }
            })
            .unwrap_or(DEFAULT_MAX_DEPTH);

        Self { backend, max_depth }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
