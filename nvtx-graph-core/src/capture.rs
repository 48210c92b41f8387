use crate::{CaptureContext, GraphCapture, Result, StreamHandle};

/// Determine whether `stream` is currently capturing a graph.
///
/// Pure observation: nothing is allocated or mutated, so this is safe to call
/// on every range begin. The returned context must be used immediately and
/// not retained, because capture can end concurrently with other work.
///
/// # Errors
/// * `InvalidStream` - the handle is unknown or destroyed
/// * `CaptureEnded` - the stream's capture was invalidated and awaits termination
#[inline]
pub fn query(capture: &dyn GraphCapture, stream: StreamHandle) -> Result<Option<CaptureContext>> {
    let status = capture.capture_status(stream)?;
    tracing::trace!(
        %stream,
        capturing = status.is_some(),
        capture = status.map(|ctx| ctx.id().as_raw()),
        "Queried capture status"
    );
    Ok(status)
}
