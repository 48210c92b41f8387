//! Graph-aware NVTX ranges.
//!
//! Re-exports [`nvtx_graph_core`] and adds the conveniences built on top of
//! it: [`instrument`] for wrapping a callable in a range, and
//! [`init_logging`] for binaries.
//!
//! ```ignore
//! use nvtx_graph::{instrument, ExecutionContext, GraphRangeError};
//!
//! let dummy_kernel = instrument("dummy_kernel", |ctx: &mut ExecutionContext, x: f32| {
//!     Ok::<_, GraphRangeError>(x * 2.0)
//! });
//! let y = dummy_kernel.call(&mut ctx, 1.5)?;
//! ```

mod instrument;
mod logging;

pub use instrument::{instrument, Instrumented};
pub use logging::init_logging;
pub use nvtx_graph_core::*;
