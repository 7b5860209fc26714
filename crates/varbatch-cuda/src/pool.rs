//! Workspace memory and the bucketed pool that recycles it.
//!
//! # Pool (steady state without driver allocations)
//!
//! Callers acquire a [`WorkspaceMem`] sized for the operator's
//! [`WorkspaceRequirements`] and hand it back with
//! [`WorkspacePool::recycle`]. Both halves are rounded up to size buckets so
//! that batches of similar shape reuse the same allocations. After warm-up,
//! call [`AllocPolicy::enter_steady_state`] and every pool miss is logged as
//! a warning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cudarc::driver::{CudaDevice, CudaSlice, CudaStream, DevicePtr, DeviceSlice};
use tracing::{debug, info, warn};
use varbatch_core::error::{EngineError, Result};
use varbatch_core::ffi_types::CUdeviceptr;
use varbatch_core::workspace::{Arena, MemRequirements, WorkspaceRequirements};

use crate::pinned::PinnedHostBuffer;
use crate::stream::{self, CudaEvent};
use crate::sys;

/// cudarc allocations are at least this aligned.
const DEVICE_ALIGNMENT: usize = 256;
/// Pinned allocations are page aligned.
const HOST_ALIGNMENT: usize = 4096;

// ─── Workspace memory ───────────────────────────────────────────────────────

/// Pinned host staging buffer plus device buffer for one in-flight call.
///
/// `host_ready` is recorded after the staging copy is queued; the next call
/// waits on it before overwriting host memory. `device_ready` is recorded
/// after the kernels; the next call's stream waits on it before the staging
/// copy overwrites device memory. Without events every call synchronizes its
/// stream before returning.
pub struct WorkspaceMem {
    host: PinnedHostBuffer,
    device: CudaSlice<u8>,
    host_ready: Option<CudaEvent>,
    device_ready: Option<CudaEvent>,
}

impl WorkspaceMem {
    /// Allocate exactly `host_bytes` pinned and `device_bytes` device memory.
    pub fn new(
        device: &Arc<CudaDevice>,
        host_bytes: usize,
        device_bytes: usize,
        with_events: bool,
    ) -> Result<Self> {
        device.bind_to_thread()?;
        let host = PinnedHostBuffer::new(host_bytes)?;
        let device_buf = device.alloc_zeros::<u8>(device_bytes)?;
        let (host_ready, device_ready) = if with_events {
            (Some(CudaEvent::new()?), Some(CudaEvent::new()?))
        } else {
            (None, None)
        };
        Ok(Self {
            host,
            device: device_buf,
            host_ready,
            device_ready,
        })
    }

    /// Allocate for `req`, rounding both halves up to pool buckets.
    pub fn for_requirements(device: &Arc<CudaDevice>, req: &WorkspaceRequirements) -> Result<Self> {
        check_alignment(req)?;
        let key = BucketKey::of(req);
        Self::new(device, key.host, key.device, true)
    }

    /// What this workspace can hold.
    pub fn requirements(&self) -> WorkspaceRequirements {
        WorkspaceRequirements {
            host: MemRequirements::new(self.host.len(), HOST_ALIGNMENT),
            cuda: MemRequirements::new(self.device.len(), DEVICE_ALIGNMENT),
        }
    }

    pub fn has_events(&self) -> bool {
        self.host_ready.is_some()
    }

    pub fn device_ptr(&self) -> CUdeviceptr {
        *self.device.device_ptr()
    }

    fn key(&self) -> BucketKey {
        BucketKey {
            host: self.host.len(),
            device: self.device.len(),
        }
    }

    /// Host arena over the first `len` staged bytes, once the previous
    /// staging copy has drained.
    pub(crate) fn host_arena(&mut self, len: usize) -> Result<Arena<'_>> {
        if let Some(ev) = &self.host_ready {
            ev.synchronize()?;
        }
        self.host.arena(len)
    }

    /// Queue the copy of `len` staged bytes on `stream`, ordered after the
    /// previous call's kernels.
    pub(crate) fn stage(&mut self, stream: &CudaStream, len: usize) -> Result<()> {
        if let Some(ev) = &self.device_ready {
            ev.wait_on(stream)?;
        }
        if len > 0 {
            // SAFETY: `host` is pinned, holds at least `len` bytes and is not
            // written again until `host_ready` (or a stream sync) says the copy
            // finished. The device buffer holds at least `len` bytes.
            let rc = unsafe {
                sys::cu_memcpy_htod_async_v2(
                    self.device_ptr(),
                    self.host.as_ptr().cast(),
                    len,
                    stream::get_raw_stream(stream),
                )?
            };
            sys::check_cu(rc, "cuMemcpyHtoDAsync_v2")?;
        }
        if let Some(ev) = &self.host_ready {
            ev.record(stream)?;
        }
        Ok(())
    }

    /// Mark the end of this call's device work.
    pub(crate) fn finish(&mut self, stream: &CudaStream) -> Result<()> {
        match &self.device_ready {
            Some(ev) => ev.record(stream),
            None => stream::synchronize(stream),
        }
    }

    /// Block until every call that used this workspace has finished.
    pub fn synchronize(&self) -> Result<()> {
        if let Some(ev) = &self.host_ready {
            ev.synchronize()?;
        }
        if let Some(ev) = &self.device_ready {
            ev.synchronize()?;
        }
        Ok(())
    }
}

impl Drop for WorkspaceMem {
    fn drop(&mut self) {
        if let Err(err) = self.synchronize() {
            warn!(%err, "workspace dropped with unfinished work");
        }
    }
}

impl std::fmt::Debug for WorkspaceMem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceMem")
            .field("host_bytes", &self.host.len())
            .field("device_bytes", &self.device.len())
            .field("events", &self.has_events())
            .finish()
    }
}

fn check_alignment(req: &WorkspaceRequirements) -> Result<()> {
    req.validate()?;
    if req.host.alignment > HOST_ALIGNMENT || req.cuda.alignment > DEVICE_ALIGNMENT {
        return Err(EngineError::InvalidParameter(format!(
            "workspace alignment host={} cuda={} exceeds allocator guarantees ({HOST_ALIGNMENT}/{DEVICE_ALIGNMENT})",
            req.host.alignment, req.cuda.alignment
        )));
    }
    Ok(())
}

// ─── Pool statistics ────────────────────────────────────────────────────────

/// Lock-free pool access counters.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub recycled: AtomicU64,
    pub overflows: AtomicU64,
}

impl PoolStats {
    /// Hit rate as a percentage (0.0–100.0).
    pub fn hit_rate(&self) -> f64 {
        let h = self.hits.load(Ordering::Relaxed) as f64;
        let m = self.misses.load(Ordering::Relaxed) as f64;
        let total = h + m;
        if total == 0.0 {
            0.0
        } else {
            (h / total) * 100.0
        }
    }
}

// ─── Allocation policy ──────────────────────────────────────────────────────

/// Tracks warm-up vs steady-state allocation mode.
#[derive(Debug, Default)]
pub struct AllocPolicy {
    steady: AtomicBool,
}

impl AllocPolicy {
    pub fn enter_steady_state(&self) {
        self.steady.store(true, Ordering::Release);
        info!("AllocPolicy: entered steady state, workspace misses are now warnings");
    }

    pub fn reset(&self) {
        self.steady.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_steady_state(&self) -> bool {
        self.steady.load(Ordering::Acquire)
    }
}

// ─── Bucketed pool ──────────────────────────────────────────────────────────

const BUCKET_ALIGNMENT: usize = 2 * 1024 * 1024;

/// Bucketed `(host, device)` sizes of a workspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct BucketKey {
    host: usize,
    device: usize,
}

impl BucketKey {
    fn of(req: &WorkspaceRequirements) -> Self {
        Self {
            host: bucket_for(req.host.size),
            device: bucket_for(req.cuda.size),
        }
    }
}

struct BucketedPool<T> {
    buckets: HashMap<BucketKey, Vec<T>>,
    max_per_bucket: usize,
}

impl<T> BucketedPool<T> {
    fn new(max_per_bucket: usize) -> Self {
        Self {
            buckets: HashMap::new(),
            max_per_bucket,
        }
    }

    fn take(&mut self, key: BucketKey) -> Option<T> {
        let stack = self.buckets.get_mut(&key)?;
        let item = stack.pop()?;
        if stack.is_empty() {
            self.buckets.remove(&key);
        }
        Some(item)
    }

    /// Returns the item back when its bucket is full.
    fn put(&mut self, key: BucketKey, item: T) -> Option<T> {
        let stack = self.buckets.entry(key).or_default();
        if stack.len() >= self.max_per_bucket {
            return Some(item);
        }
        stack.push(item);
        None
    }

    fn total_items(&self) -> usize {
        self.buckets.values().map(|s| s.len()).sum()
    }

    fn total_bytes(&self) -> usize {
        self.buckets
            .iter()
            .map(|(key, stack)| (key.host + key.device) * stack.len())
            .sum()
    }

    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn drain(&mut self) -> Vec<T> {
        self.buckets.drain().flat_map(|(_, stack)| stack).collect()
    }
}

#[inline]
fn bucket_for(size: usize) -> usize {
    if size == 0 {
        return BUCKET_ALIGNMENT.min(4096);
    }
    if size < BUCKET_ALIGNMENT {
        size.max(4096).next_power_of_two()
    } else {
        (size + BUCKET_ALIGNMENT - 1) & !(BUCKET_ALIGNMENT - 1)
    }
}

/// Recycles [`WorkspaceMem`] across calls on one device.
pub struct WorkspacePool {
    device: Arc<CudaDevice>,
    idle: Mutex<BucketedPool<WorkspaceMem>>,
    stats: PoolStats,
    policy: AllocPolicy,
}

impl WorkspacePool {
    pub fn new(device: Arc<CudaDevice>, max_per_bucket: usize) -> Self {
        Self {
            device,
            idle: Mutex::new(BucketedPool::new(max_per_bucket)),
            stats: PoolStats::default(),
            policy: AllocPolicy::default(),
        }
    }

    /// A workspace covering `req`, recycled when one of the same buckets is idle.
    pub fn acquire(&self, req: &WorkspaceRequirements) -> Result<WorkspaceMem> {
        check_alignment(req)?;
        let key = BucketKey::of(req);
        {
            let mut idle = self.idle.lock().map_err(|_| {
                EngineError::InvariantViolation("workspace pool lock poisoned".into())
            })?;
            if let Some(ws) = idle.take(key) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(ws);
            }
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let ws = WorkspaceMem::new(&self.device, key.host, key.device, true)?;
        if self.policy.is_steady_state() {
            warn!(
                host_bytes = key.host,
                device_bytes = key.device,
                "Workspace pool miss in steady state"
            );
        } else {
            debug!(
                host_bytes = key.host,
                device_bytes = key.device,
                "Workspace allocated"
            );
        }
        Ok(ws)
    }

    /// Return a workspace; dropped when its bucket is already full.
    pub fn recycle(&self, ws: WorkspaceMem) {
        let key = ws.key();
        let Ok(mut idle) = self.idle.lock() else {
            return;
        };
        if let Some(rejected) = idle.put(key, ws) {
            self.stats.overflows.fetch_add(1, Ordering::Relaxed);
            drop(idle);
            warn!(
                host_bytes = key.host,
                device_bytes = key.device,
                "Workspace bucket full, freeing returned workspace"
            );
            drop(rejected);
        } else {
            self.stats.recycled.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    pub fn policy(&self) -> &AllocPolicy {
        &self.policy
    }

    pub fn report_stats(&self) {
        let Ok(idle) = self.idle.lock() else {
            return;
        };
        info!(
            hits = self.stats.hits.load(Ordering::Relaxed),
            misses = self.stats.misses.load(Ordering::Relaxed),
            recycled = self.stats.recycled.load(Ordering::Relaxed),
            overflows = self.stats.overflows.load(Ordering::Relaxed),
            hit_rate = self.stats.hit_rate(),
            idle_workspaces = idle.total_items(),
            idle_bytes_mb = idle.total_bytes() / (1024 * 1024),
            buckets = idle.bucket_count(),
            "Workspace pool report"
        );
    }
}

impl Drop for WorkspacePool {
    fn drop(&mut self) {
        if let Ok(mut idle) = self.idle.lock() {
            let drained = idle.drain();
            debug!(workspaces = drained.len(), "Workspace pool drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_sizing_small() {
        assert_eq!(bucket_for(1), 4096);
        assert_eq!(bucket_for(4096), 4096);
        assert_eq!(bucket_for(4097), 8192);
        assert_eq!(bucket_for(1_000_000), 1_048_576);
    }

    #[test]
    fn bucket_sizing_large() {
        let two_mb = 2 * 1024 * 1024;
        assert_eq!(bucket_for(two_mb), two_mb);
        assert_eq!(bucket_for(two_mb + 1), 2 * two_mb);
        assert_eq!(bucket_for(5_000_000), 3 * two_mb);
        assert_eq!(bucket_for(10_000_000), 5 * two_mb);
    }

    #[test]
    fn bucket_sizing_zero() {
        assert_eq!(bucket_for(0), 4096);
    }

    #[test]
    fn keys_bucket_both_halves() {
        let req = WorkspaceRequirements {
            host: MemRequirements::new(100, 8),
            cuda: MemRequirements::new(3_000_000, 8),
        };
        assert_eq!(
            BucketKey::of(&req),
            BucketKey {
                host: 4096,
                device: 4 * 1024 * 1024
            }
        );
    }

    #[test]
    fn pool_caps_each_bucket() {
        let key = BucketKey {
            host: 4096,
            device: 8192,
        };
        let other = BucketKey {
            host: 4096,
            device: 4096,
        };
        let mut pool = BucketedPool::new(2);
        assert_eq!(pool.put(key, 1), None);
        assert_eq!(pool.put(key, 2), None);
        assert_eq!(pool.put(key, 3), Some(3));
        assert_eq!(pool.put(other, 4), None);
        assert_eq!(pool.total_items(), 3);
        assert_eq!(pool.bucket_count(), 2);
        assert_eq!(pool.total_bytes(), 2 * 12288 + 8192);

        assert_eq!(pool.take(key), Some(2));
        assert_eq!(pool.take(key), Some(1));
        assert_eq!(pool.take(key), None);
        assert_eq!(pool.bucket_count(), 1);
        assert_eq!(pool.drain(), vec![4]);
        assert_eq!(pool.total_items(), 0);
    }

    #[test]
    fn hit_rate_is_a_percentage() {
        let stats = PoolStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        stats.hits.fetch_add(3, Ordering::Relaxed);
        stats.misses.fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.hit_rate(), 75.0);
    }

    #[test]
    fn oversized_alignment_is_rejected() {
        let req = WorkspaceRequirements {
            host: MemRequirements::new(64, 8192),
            cuda: MemRequirements::new(64, 8),
        };
        assert!(check_alignment(&req).is_err());
    }
}
