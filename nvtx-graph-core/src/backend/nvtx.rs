use std::ffi::{c_int, CString};

use super::RangeBackend;

mod ffi {
    use std::ffi::{c_char, c_int};

    extern "C" {
        pub fn nvtxRangePushA(message: *const c_char) -> c_int;
        pub fn nvtxRangePop() -> c_int;
    }
}

/// NVTX ranges on the calling thread's range stack.
///
/// Ranges pushed from graph host nodes land on the CUDA callback thread, which
/// is where Nsight Systems attributes them during replay.
#[derive(Debug, Default, Clone, Copy)]
pub struct NvtxBackend;

impl NvtxBackend {
    pub fn new() -> Self {
        Self
    }
}

impl RangeBackend for NvtxBackend {
    fn name(&self) -> &'static str {
        "nvtx"
    }

    fn push_range(&self, name: &str) {
        // Interior NULs would truncate the C string; strip them instead of dropping the range.
        let message = match CString::new(name) {
            Ok(message) => message,
            Err(err) => {
                let mut bytes = err.into_vec();
                bytes.retain(|b| *b != 0);
                CString::new(bytes).unwrap_or_default()
            }
        };
        let _depth: c_int = unsafe { ffi::nvtxRangePushA(message.as_ptr()) };
    }

    fn pop_range(&self) {
        let _depth: c_int = unsafe { ffi::nvtxRangePop() };
    }
}
