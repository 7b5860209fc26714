//! Page-locked host memory for the staged half of a workspace.

use std::ffi::c_void;
use std::ptr;

use varbatch_core::error::{EngineError, Result};
use varbatch_core::workspace::Arena;

use crate::sys;

/// Pinned host allocation, freed on drop.
///
/// Pinned memory is what lets the staging copy run asynchronously; the
/// driver returns page-aligned pointers so every arena region is aligned.
#[derive(Debug)]
pub struct PinnedHostBuffer {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the allocation is exclusively owned; access goes through `&mut self`.
unsafe impl Send for PinnedHostBuffer {}
unsafe impl Sync for PinnedHostBuffer {}

impl PinnedHostBuffer {
    /// Allocate `len` bytes in the context current on this thread, zeroed.
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(EngineError::InvalidParameter(
                "pinned host buffer must not be empty".into(),
            ));
        }
        let mut raw: *mut c_void = ptr::null_mut();
        // SAFETY: `raw` is writable storage for the returned pointer.
        let rc = unsafe { sys::cu_mem_alloc_host_v2(&mut raw, len)? };
        sys::check_cu(rc, "cuMemAllocHost_v2")?;
        let ptr = raw.cast::<u8>();
        // SAFETY: the driver returned `len` writable bytes at `ptr`.
        unsafe { ptr::write_bytes(ptr, 0, len) };
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` holds `len` initialized bytes owned by `self`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Arena over the first `len` bytes.
    pub fn arena(&mut self, len: usize) -> Result<Arena<'_>> {
        let have = self.len;
        let bytes = self
            .as_bytes_mut()
            .get_mut(..len)
            .ok_or(EngineError::BufferTooSmall { need: len, have })?;
        Ok(Arena::new(bytes))
    }
}

impl Drop for PinnedHostBuffer {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from cuMemAllocHost_v2; owners synchronize pending
        // copies before dropping.
        match unsafe { sys::cu_mem_free_host(self.ptr.cast()) } {
            Ok(rc) if rc != sys::CUDA_SUCCESS => {
                tracing::warn!(code = rc, bytes = self.len, "cuMemFreeHost failed");
            }
            Err(err) => tracing::warn!(%err, "cuMemFreeHost unavailable"),
            _ => {}
        }
    }
}
