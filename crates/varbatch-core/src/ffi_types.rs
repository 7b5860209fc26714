//! Raw CUDA driver handle types shared between crates.

use std::ffi::c_void;

pub type CUresult = i32;
pub type CUevent = *mut c_void;
pub type CUstream = *mut c_void;
pub type CUdeviceptr = u64;

pub const CUDA_SUCCESS: CUresult = 0;
pub const CUDA_ERROR_INVALID_VALUE: CUresult = 1;
pub const CUDA_ERROR_OUT_OF_MEMORY: CUresult = 2;
pub const CUDA_ERROR_NOT_READY: CUresult = 600;

/// `CU_EVENT_DISABLE_TIMING`: events used only for ordering.
pub const CU_EVENT_DISABLE_TIMING: u32 = 0x2;
