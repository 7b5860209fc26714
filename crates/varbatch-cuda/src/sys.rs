//! CUDA driver entry points that cudarc does not wrap the way we need:
//! ordering events, pinned host memory and async copies from it.
//!
//! On Linux the driver is opened with `dlopen` on first use so a missing
//! driver surfaces as [`EngineError::DriverUnavailable`] instead of a link
//! failure.

use std::ffi::{c_int, c_uint, c_void};
#[cfg(target_os = "linux")]
use std::ffi::{CStr, CString, c_char};
#[cfg(target_os = "linux")]
use std::sync::OnceLock;

use varbatch_core::error::{EngineError, Result};
pub use varbatch_core::ffi_types::{CUDA_SUCCESS, CUdeviceptr, CUevent, CUresult, CUstream};

#[cfg(target_os = "linux")]
unsafe extern "C" {
    fn dlopen(filename: *const c_char, flags: i32) -> *mut c_void;
    fn dlerror() -> *const c_char;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
}

#[cfg(target_os = "linux")]
const RTLD_NOW: i32 = 2;
#[cfg(target_os = "linux")]
const RTLD_GLOBAL: i32 = 0x100;

#[cfg(target_os = "linux")]
fn last_dl_error(fallback: &str) -> String {
    // SAFETY: dlerror returns a thread-local C string or null.
    unsafe {
        let p = dlerror();
        if p.is_null() {
            fallback.to_string()
        } else {
            CStr::from_ptr(p).to_string_lossy().to_string()
        }
    }
}

#[cfg(target_os = "linux")]
fn load_cuda_symbol<T>(handle: *mut c_void, name: &'static str) -> std::result::Result<T, String> {
    let cname = CString::new(name).map_err(|_| format!("invalid CUDA symbol name: {name}"))?;
    // SAFETY: handle is a valid dlopen handle and cname is a valid C symbol name.
    let ptr = unsafe { dlsym(handle, cname.as_ptr()) };
    if ptr.is_null() {
        Err(format!(
            "dlsym({name}) failed: {}",
            last_dl_error("unknown dlsym error")
        ))
    } else {
        // SAFETY: ptr points to a driver function whose signature is T.
        Ok(unsafe { std::mem::transmute_copy(&ptr) })
    }
}

#[cfg(target_os = "linux")]
fn open_libcuda() -> std::result::Result<*mut c_void, String> {
    let mut last_err = "unknown dlopen error".to_string();
    for candidate in ["libcuda.so.1", "libcuda.so"] {
        let soname =
            CString::new(candidate).map_err(|_| format!("invalid CUDA soname: {candidate}"))?;
        // SAFETY: static soname and valid dlopen flags.
        let handle = unsafe { dlopen(soname.as_ptr(), RTLD_NOW | RTLD_GLOBAL) };
        if !handle.is_null() {
            return Ok(handle);
        }
        last_err = last_dl_error("unknown dlopen error");
    }
    Err(format!("dlopen(libcuda.so.1|libcuda.so) failed: {last_err}"))
}

/// Declares the driver table, its loader and one `unsafe fn` wrapper per
/// entry point. Every wrapper returns the raw `CUresult`; callers pass it
/// through [`check_cu`].
macro_rules! driver_api {
    ($(
        $(#[doc = $doc:literal])*
        pub unsafe fn $wrapper:ident => $sym:ident($($arg:ident: $ty:ty),* $(,)?);
    )*) => {
        #[cfg(not(target_os = "linux"))]
        unsafe extern "C" {
            $(fn $sym($($arg: $ty),*) -> CUresult;)*
        }

        #[cfg(target_os = "linux")]
        #[allow(non_snake_case)]
        struct CudaDriverApi {
            $($sym: unsafe extern "C" fn($($ty),*) -> CUresult,)*
        }

        #[cfg(target_os = "linux")]
        fn init_cuda_driver_api() -> std::result::Result<CudaDriverApi, String> {
            let handle = open_libcuda()?;
            Ok(CudaDriverApi {
                $($sym: load_cuda_symbol(handle, stringify!($sym))?,)*
            })
        }

        $(
            $(#[doc = $doc])*
            pub unsafe fn $wrapper($($arg: $ty),*) -> Result<CUresult> {
                #[cfg(target_os = "linux")]
                {
                    let api = cuda_driver_api()?;
                    // SAFETY: function pointer was resolved from the driver with a matching signature.
                    Ok(unsafe { (api.$sym)($($arg),*) })
                }
                #[cfg(not(target_os = "linux"))]
                {
                    // SAFETY: FFI call into the CUDA driver API.
                    Ok(unsafe { $sym($($arg),*) })
                }
            }
        )*
    };
}

driver_api! {
    /// Call `cuInit`.
    ///
    /// # Safety
    /// `flags` must be 0.
    pub unsafe fn cu_init => cuInit(flags: c_uint);

    /// Call `cuDeviceGetCount`.
    ///
    /// # Safety
    /// `count` must be a valid, writable pointer.
    pub unsafe fn cu_device_get_count => cuDeviceGetCount(count: *mut c_int);

    /// Call `cuEventCreate`.
    ///
    /// # Safety
    /// `ph_event` must be a valid, writable pointer to CUDA event storage and
    /// a context must be current on the calling thread.
    pub unsafe fn cu_event_create => cuEventCreate(ph_event: *mut CUevent, flags: c_uint);

    /// Call `cuEventRecord`.
    ///
    /// # Safety
    /// `event` and `stream` must be valid handles from the same context.
    pub unsafe fn cu_event_record => cuEventRecord(event: CUevent, stream: CUstream);

    /// Call `cuEventDestroy_v2`.
    ///
    /// # Safety
    /// `event` must be a valid event handle that is not used afterwards.
    pub unsafe fn cu_event_destroy_v2 => cuEventDestroy_v2(event: CUevent);

    /// Call `cuEventQuery`.
    ///
    /// # Safety
    /// `event` must be a valid event handle.
    pub unsafe fn cu_event_query => cuEventQuery(event: CUevent);

    /// Call `cuEventSynchronize`.
    ///
    /// # Safety
    /// `event` must be a valid event handle.
    pub unsafe fn cu_event_synchronize => cuEventSynchronize(event: CUevent);

    /// Call `cuStreamWaitEvent`.
    ///
    /// # Safety
    /// `stream` and `event` must be valid handles from the active context.
    pub unsafe fn cu_stream_wait_event => cuStreamWaitEvent(stream: CUstream, event: CUevent, flags: c_uint);

    /// Call `cuStreamSynchronize`.
    ///
    /// # Safety
    /// `stream` must be a valid stream handle (null selects the legacy stream).
    pub unsafe fn cu_stream_synchronize => cuStreamSynchronize(stream: CUstream);

    /// Call `cuMemAllocHost_v2`.
    ///
    /// # Safety
    /// `pp` must be a valid, writable pointer and a context must be current.
    pub unsafe fn cu_mem_alloc_host_v2 => cuMemAllocHost_v2(pp: *mut *mut c_void, bytesize: usize);

    /// Call `cuMemFreeHost`.
    ///
    /// # Safety
    /// `p` must come from [`cu_mem_alloc_host_v2`] and no pending copy may
    /// still read from it.
    pub unsafe fn cu_mem_free_host => cuMemFreeHost(p: *mut c_void);

    /// Call `cuMemcpyHtoDAsync_v2`.
    ///
    /// # Safety
    /// `src` must point to `byte_count` readable bytes of pinned memory that
    /// stay alive and unmodified until the copy completes on `stream`, and
    /// `dst` must address `byte_count` writable device bytes.
    pub unsafe fn cu_memcpy_htod_async_v2 => cuMemcpyHtoDAsync_v2(
        dst: CUdeviceptr,
        src: *const c_void,
        byte_count: usize,
        stream: CUstream,
    );
}

#[cfg(target_os = "linux")]
static CUDA_DRIVER_API: OnceLock<std::result::Result<CudaDriverApi, String>> = OnceLock::new();

#[cfg(target_os = "linux")]
fn cuda_driver_api() -> Result<&'static CudaDriverApi> {
    let api = CUDA_DRIVER_API.get_or_init(init_cuda_driver_api);
    api.as_ref().map_err(|err| {
        EngineError::DriverUnavailable(format!(
            "failed to load CUDA driver API: {err}. \
Ensure NVIDIA driver libraries are installed and visible via LD_LIBRARY_PATH \
(on WSL, prepend /usr/lib/wsl/lib)."
        ))
    })
}

#[inline]
pub fn check_cu(result: CUresult, context: &str) -> Result<()> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(EngineError::driver(context, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varbatch_core::Status;

    #[test]
    fn check_cu_maps_driver_codes() {
        assert!(check_cu(CUDA_SUCCESS, "cuEventRecord").is_ok());
        let err = check_cu(2, "cuMemAllocHost_v2").expect_err("oom");
        assert_eq!(err.status(), Status::OutOfMemory);
        assert!(err.to_string().contains("cuMemAllocHost_v2"));
        let err = check_cu(600, "cuEventQuery").expect_err("not ready");
        assert_eq!(err.status(), Status::NotReady);
    }
}
