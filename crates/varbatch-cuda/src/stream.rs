//! Stream handles and the ordering events used between workspace stages.

use std::ptr;

use cudarc::driver::CudaStream;
use varbatch_core::error::Result;
use varbatch_core::ffi_types::{CU_EVENT_DISABLE_TIMING, CUDA_ERROR_NOT_READY, CUevent, CUstream};

use crate::sys;

#[inline]
pub fn get_raw_stream(stream: &CudaStream) -> CUstream {
    stream.stream as CUstream
}

#[inline]
// `event` is an opaque CUDA driver handle passed through to the driver API.
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub fn wait_for_event(target_stream: &CudaStream, event: CUevent) -> Result<()> {
    let raw_stream = get_raw_stream(target_stream);
    // SAFETY: stream/event handles are produced by CUDA driver-backed APIs.
    let rc = unsafe { sys::cu_stream_wait_event(raw_stream, event, 0)? };
    sys::check_cu(rc, "cuStreamWaitEvent")?;
    Ok(())
}

/// Block the host until all work queued on `stream` has finished.
pub fn synchronize(stream: &CudaStream) -> Result<()> {
    // SAFETY: the stream handle is owned by a live cudarc stream.
    let rc = unsafe { sys::cu_stream_synchronize(get_raw_stream(stream))? };
    sys::check_cu(rc, "cuStreamSynchronize")
}

/// Timing-free event owned for its whole lifetime.
///
/// Created in the context current on the calling thread.
#[derive(Debug)]
pub struct CudaEvent {
    raw: CUevent,
}

// SAFETY: event handles are plain driver handles valid from any thread that
// shares the owning context.
unsafe impl Send for CudaEvent {}
unsafe impl Sync for CudaEvent {}

impl CudaEvent {
    pub fn new() -> Result<Self> {
        let mut raw: CUevent = ptr::null_mut();
        // SAFETY: `raw` is writable storage for one event handle.
        let rc = unsafe { sys::cu_event_create(&mut raw, CU_EVENT_DISABLE_TIMING)? };
        sys::check_cu(rc, "cuEventCreate")?;
        Ok(Self { raw })
    }

    pub fn raw(&self) -> CUevent {
        self.raw
    }

    /// Capture everything queued on `stream` so far.
    pub fn record(&self, stream: &CudaStream) -> Result<()> {
        // SAFETY: both handles are live and belong to the same context.
        let rc = unsafe { sys::cu_event_record(self.raw, get_raw_stream(stream))? };
        sys::check_cu(rc, "cuEventRecord")
    }

    /// Make `stream` wait for the last recorded work. Never-recorded events
    /// do not block.
    pub fn wait_on(&self, stream: &CudaStream) -> Result<()> {
        wait_for_event(stream, self.raw)
    }

    /// Block the host until the last recorded work completes.
    pub fn synchronize(&self) -> Result<()> {
        // SAFETY: the event handle is live.
        let rc = unsafe { sys::cu_event_synchronize(self.raw)? };
        sys::check_cu(rc, "cuEventSynchronize")
    }

    /// Whether the last recorded work has completed.
    pub fn is_complete(&self) -> Result<bool> {
        // SAFETY: the event handle is live.
        let rc = unsafe { sys::cu_event_query(self.raw)? };
        if rc == CUDA_ERROR_NOT_READY {
            return Ok(false);
        }
        sys::check_cu(rc, "cuEventQuery")?;
        Ok(true)
    }
}

impl Drop for CudaEvent {
    fn drop(&mut self) {
        // SAFETY: the handle was created by cuEventCreate and is dropped once.
        match unsafe { sys::cu_event_destroy_v2(self.raw) } {
            Ok(rc) if rc != sys::CUDA_SUCCESS => {
                tracing::warn!(code = rc, "cuEventDestroy_v2 failed");
            }
            Err(err) => tracing::warn!(%err, "cuEventDestroy_v2 unavailable"),
            _ => {}
        }
    }
}
