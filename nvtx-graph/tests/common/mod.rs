#![allow(dead_code)]
//! Shared integration test utilities.

use std::sync::{Arc, Once};

use nvtx_graph::host::HostGraphRuntime;
use nvtx_graph::{ExecutionContext, RecordingBackend, StreamHandle};
use proptest::prelude::ProptestConfig;

static INIT_LOGGING: Once = Once::new();

const PROPTEST_CASES_ENV: &str = "NVTX_GRAPH_PROPTEST_CASES";

/// Route `tracing` output through the test harness, honouring `RUST_LOG`.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Proptest config with `cases` successful cases, overridable from the environment.
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let cases = std::env::var(PROPTEST_CASES_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(cases);
    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

/// A fresh host runtime with one stream and a context recording to memory.
pub fn recording_context() -> (
    Arc<HostGraphRuntime>,
    Arc<RecordingBackend>,
    StreamHandle,
    ExecutionContext,
) {
    let runtime = HostGraphRuntime::shared();
    let backend = Arc::new(RecordingBackend::new());
    let stream = runtime.create_stream();
    let ctx = ExecutionContext::new(stream, runtime.clone(), backend.clone());
    (runtime, backend, stream, ctx)
}
