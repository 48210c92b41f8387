use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use cudarc::driver::sys::{self, CUresult, CUstreamCaptureStatus};
use cudarc::driver::DriverError;

use crate::{
    CaptureContext, CaptureId, GraphCapture, GraphRangeError, HostMarker, NodeRef, Result,
    StreamHandle,
};

/// Snapshot of `cuStreamGetCaptureInfo` for one stream.
///
/// `deps` is only valid until the next driver call on the stream.
struct CaptureInfo {
    status: CUstreamCaptureStatus,
    id: u64,
    graph: sys::CUgraph,
    deps: *const sys::CUgraphNode,
    num_deps: usize,
}

pub(super) fn raw_stream(stream: StreamHandle) -> sys::CUstream {
    stream.as_raw() as usize as sys::CUstream
}

pub(super) fn map_driver_error(
    stream: StreamHandle,
    call: &'static str,
    err: DriverError,
) -> GraphRangeError {
    match err.0 {
        CUresult::CUDA_ERROR_INVALID_HANDLE
        | CUresult::CUDA_ERROR_INVALID_CONTEXT
        | CUresult::CUDA_ERROR_CONTEXT_IS_DESTROYED => GraphRangeError::InvalidStream { stream },
        _ => GraphRangeError::Driver {
            call,
            message: err.to_string(),
        },
    }
}

fn capture_info(stream: StreamHandle) -> Result<CaptureInfo> {
    let mut status = CUstreamCaptureStatus::CU_STREAM_CAPTURE_STATUS_NONE;
    let mut id: sys::cuuint64_t = 0;
    let mut graph: sys::CUgraph = ptr::null_mut();
    let mut deps: *const sys::CUgraphNode = ptr::null();
    let mut num_deps: usize = 0;

    unsafe {
        sys::cuStreamGetCaptureInfo_v2(
            raw_stream(stream),
            &mut status,
            &mut id,
            &mut graph,
            &mut deps,
            &mut num_deps,
        )
    }
    .result()
    .map_err(|err| map_driver_error(stream, "cuStreamGetCaptureInfo_v2", err))?;

    Ok(CaptureInfo {
        status,
        id,
        graph,
        deps,
        num_deps,
    })
}

/// Host node callback: fires the marker owned by the graph's user object.
unsafe extern "C" fn fire_marker(user_data: *mut c_void) {
    let marker = &*(user_data as *const HostMarker);
    // Unwinding across the driver's callback thread is undefined behaviour.
    let _ = catch_unwind(AssertUnwindSafe(|| marker.fire()));
}

/// User object destructor: frees the marker once the last graph referencing it is destroyed.
unsafe extern "C" fn drop_marker(user_data: *mut c_void) {
    drop(Box::from_raw(user_data as *mut HostMarker));
}

/// Capture seam backed by CUDA stream capture. Stateless; the driver owns all capture state.
#[derive(Debug, Default, Clone, Copy)]
pub struct CudaGraphCapture;

impl CudaGraphCapture {
    pub fn new() -> Self {
        Self
    }

    /// Move `marker` into a user object owned by `graph`.
    ///
    /// The graph, and every executable graph instantiated from it, keeps the
    /// payload alive; the driver frees it when the last of them is destroyed.
    fn retain_marker(
        stream: StreamHandle,
        graph: sys::CUgraph,
        marker: HostMarker,
    ) -> Result<*mut c_void> {
        let payload = Box::into_raw(Box::new(marker)) as *mut c_void;
        let mut object: sys::CUuserObject = ptr::null_mut();

        let created = unsafe {
            sys::cuUserObjectCreate(
                &mut object,
                payload,
                Some(drop_marker),
                1,
                sys::CUuserObject_flags::CU_USER_OBJECT_NO_DESTRUCTOR_SYNC as u32,
            )
        }
        .result();
        if let Err(err) = created {
            unsafe { drop_marker(payload) };
            return Err(map_driver_error(stream, "cuUserObjectCreate", err));
        }

        let retained = unsafe {
            sys::cuGraphRetainUserObject(
                graph,
                object,
                1,
                sys::CUuserObjectRetain_flags::CU_GRAPH_USER_OBJECT_MOVE as u32,
            )
        }
        .result();
        if let Err(err) = retained {
            // Releasing our only reference runs `drop_marker`.
            let _ = unsafe { sys::cuUserObjectRelease(object, 1) };
            return Err(map_driver_error(stream, "cuGraphRetainUserObject", err));
        }

        Ok(payload)
    }
}

impl GraphCapture for CudaGraphCapture {
    fn capture_status(&self, stream: StreamHandle) -> Result<Option<CaptureContext>> {
        let info = capture_info(stream)?;
        match info.status {
            CUstreamCaptureStatus::CU_STREAM_CAPTURE_STATUS_NONE => Ok(None),
            CUstreamCaptureStatus::CU_STREAM_CAPTURE_STATUS_ACTIVE => Ok(Some(
                CaptureContext::new(stream, CaptureId::from_raw(info.id)),
            )),
            CUstreamCaptureStatus::CU_STREAM_CAPTURE_STATUS_INVALIDATED => {
                Err(GraphRangeError::CaptureEnded {
                    stream,
                    capture: CaptureId::from_raw(info.id),
                })
            }
        }
    }

    fn insert_marker_node(&self, ctx: &CaptureContext, marker: HostMarker) -> Result<NodeRef> {
        let stream = ctx.stream();
        let info = capture_info(stream)?;
        let active = info.status == CUstreamCaptureStatus::CU_STREAM_CAPTURE_STATUS_ACTIVE;
        if !active || info.id != ctx.id().as_raw() {
            return Err(GraphRangeError::CaptureEnded {
                stream,
                capture: ctx.id(),
            });
        }

        let payload = Self::retain_marker(stream, info.graph, marker)?;
        let params = sys::CUDA_HOST_NODE_PARAMS {
            fn_: Some(fire_marker),
            userData: payload,
        };

        let mut node: sys::CUgraphNode = ptr::null_mut();
        unsafe {
            sys::cuGraphAddHostNode(&mut node, info.graph, info.deps, info.num_deps, &params)
        }
        .result()
        .map_err(|err| map_driver_error(stream, "cuGraphAddHostNode", err))?;

        // Everything captured next on the stream now waits on the marker, and the
        // marker already waits on everything captured before it.
        unsafe {
            sys::cuStreamUpdateCaptureDependencies(
                raw_stream(stream),
                &mut node,
                1,
                sys::CUstreamUpdateCaptureDependencies_flags::CU_STREAM_SET_CAPTURE_DEPENDENCIES
                    as u32,
            )
        }
        .result()
        .map_err(|err| match err.0 {
            CUresult::CUDA_ERROR_STREAM_CAPTURE_INVALIDATED => GraphRangeError::CaptureEnded {
                stream,
                capture: ctx.id(),
            },
            _ => map_driver_error(stream, "cuStreamUpdateCaptureDependencies", err),
        })?;

        Ok(NodeRef::from_raw(node as usize as u64))
    }
}
