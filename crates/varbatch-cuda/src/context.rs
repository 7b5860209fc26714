//! One device, one compute stream and the workspace pool that serves it.

use std::ffi::c_int;
use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaStream};
use tracing::info;
use varbatch_core::config::OperatorConfig;
use varbatch_core::error::{EngineError, Result};

use crate::pool::WorkspacePool;
use crate::stream;
use crate::sys;

/// Number of CUDA devices visible to the driver.
///
/// Fails with [`EngineError::DriverUnavailable`] when no driver can be
/// loaded, so callers can probe without a GPU present.
pub fn device_count() -> Result<usize> {
    // SAFETY: cuInit takes no pointers; flags must be 0.
    let rc = unsafe { sys::cu_init(0)? };
    sys::check_cu(rc, "cuInit")
        .map_err(|err| EngineError::DriverUnavailable(err.to_string()))?;
    let mut count: c_int = 0;
    // SAFETY: `count` is valid writable storage.
    let rc = unsafe { sys::cu_device_get_count(&mut count)? };
    sys::check_cu(rc, "cuDeviceGetCount")?;
    Ok(count.max(0) as usize)
}

pub struct GpuContext {
    device: Arc<CudaDevice>,
    stream: CudaStream,
    config: OperatorConfig,
    pool: WorkspacePool,
}

// SAFETY: the raw stream handle is only passed to driver calls, which are
// thread-safe within one context; the pool synchronizes through its Mutex.
unsafe impl Send for GpuContext {}
unsafe impl Sync for GpuContext {}

impl GpuContext {
    pub fn new(ordinal: usize, config: OperatorConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let available = device_count()?;
        if ordinal >= available {
            return Err(EngineError::DriverUnavailable(format!(
                "device {ordinal} requested, {available} visible"
            )));
        }
        let device = CudaDevice::new(ordinal)?;
        let stream = device.fork_default_stream()?;
        let pool = WorkspacePool::new(device.clone(), config.pool_max_per_bucket);
        info!(
            ordinal,
            name = device.name().unwrap_or_default(),
            block_dim = ?config.block_dim,
            pillow_precision = ?config.pillow_precision,
            "GPU context ready"
        );
        Ok(Arc::new(Self {
            device,
            stream,
            config,
            pool,
        }))
    }

    #[inline]
    pub fn device(&self) -> &Arc<CudaDevice> {
        &self.device
    }

    /// Stream every operator call of this context is ordered on.
    #[inline]
    pub fn stream(&self) -> &CudaStream {
        &self.stream
    }

    #[inline]
    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    #[inline]
    pub fn pool(&self) -> &WorkspacePool {
        &self.pool
    }

    /// Synchronize a single CUDA stream.
    pub fn sync_stream(stream: &CudaStream) -> Result<()> {
        stream::synchronize(stream)
    }

    pub fn sync(&self) -> Result<()> {
        Self::sync_stream(&self.stream)
    }
}
