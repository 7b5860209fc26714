//! Workspace sizing and typed layout of the per-call scratch buffers.
//!
//! A workspace is one host-pinned staging buffer plus one device buffer. The
//! device buffer starts with a *staged* prefix, which is a byte-for-byte copy
//! of the host buffer, followed by device-only *scratch* regions that are
//! never copied.
//!
//! Operators size their workspace and lay out a call with the same layout
//! function: [`LayoutBuilder`] fed with worst-case counts answers
//! "how much memory do I need", fed with actual counts it lays out the call.

use std::marker::PhantomData;
use std::ops::Range;

use bytemuck::Pod;

use crate::error::{EngineError, Result};
use crate::format::ImageFormat;
use crate::image::Size2D;

/// Alignment of every region inside a workspace.
pub const REGION_ALIGNMENT: usize = 16;
/// Alignment requested for the host staging buffer.
pub const HOST_ALIGNMENT: usize = 64;
/// Alignment requested for the device buffer.
pub const DEVICE_ALIGNMENT: usize = 256;

#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

// ─── Requirements ───────────────────────────────────────────────────────────

/// Size and alignment of one memory kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemRequirements {
    pub size: usize,
    pub alignment: usize,
}

impl MemRequirements {
    pub fn new(size: usize, alignment: usize) -> Self {
        Self {
            size: align_up(size, alignment.max(1)),
            alignment,
        }
    }

    /// Requirements able to serve both `self` and `other`.
    pub fn max(self, other: Self) -> Self {
        let alignment = self.alignment.max(other.alignment).max(1);
        Self {
            size: align_up(self.size.max(other.size), alignment),
            alignment,
        }
    }

    /// Reject requirements no allocator could honor.
    pub fn validate(&self) -> Result<()> {
        if !self.alignment.is_power_of_two() {
            return Err(EngineError::InvalidParameter(format!(
                "alignment {} is not a power of two",
                self.alignment
            )));
        }
        if self.size % self.alignment != 0 {
            return Err(EngineError::InvalidParameter(format!(
                "size {} is not a multiple of alignment {}",
                self.size, self.alignment
            )));
        }
        Ok(())
    }
}

/// Memory an operator call needs: host-pinned staging plus device memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkspaceRequirements {
    pub host: MemRequirements,
    pub cuda: MemRequirements,
}

impl WorkspaceRequirements {
    pub fn max(self, other: Self) -> Self {
        Self {
            host: self.host.max(other.host),
            cuda: self.cuda.max(other.cuda),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.host.validate()?;
        self.cuda.validate()
    }

    /// Whether a workspace sized for `self` can serve a call laid out as `layout`.
    pub fn covers(&self, layout: &WorkspaceLayout) -> bool {
        self.host.size >= layout.staged_bytes() && self.cuda.size >= layout.total_bytes()
    }
}

/// Upper bound on the batches a workspace must serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShapeBound {
    pub batch: usize,
    pub max_in: Size2D,
    pub max_out: Size2D,
    pub format: ImageFormat,
}

impl ShapeBound {
    pub fn new(batch: usize, max_in: Size2D, max_out: Size2D, format: ImageFormat) -> Self {
        Self {
            batch,
            max_in,
            max_out,
            format,
        }
    }
}

// ─── Layout ─────────────────────────────────────────────────────────────────

/// Typed window into a workspace: `len` values of `T` at byte `offset`.
#[derive(Debug)]
pub struct Region<T> {
    offset: usize,
    len: usize,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Clone for Region<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Region<T> {}

impl<T> Region<T> {
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.len * std::mem::size_of::<T>()
    }

    pub fn byte_range(&self) -> Range<usize> {
        self.offset..self.offset + self.byte_len()
    }

    /// Device address of this region given the workspace's device base.
    #[inline]
    pub fn device_ptr(&self, device_base: u64) -> u64 {
        device_base + self.offset as u64
    }
}

/// Final byte layout of one call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkspaceLayout {
    staged_bytes: usize,
    total_bytes: usize,
}

impl WorkspaceLayout {
    /// Bytes written on the host and copied to the device.
    #[inline]
    pub fn staged_bytes(&self) -> usize {
        self.staged_bytes
    }

    /// Device bytes including scratch.
    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn requirements(&self) -> WorkspaceRequirements {
        WorkspaceRequirements {
            host: MemRequirements::new(self.staged_bytes, HOST_ALIGNMENT),
            cuda: MemRequirements::new(self.total_bytes, DEVICE_ALIGNMENT),
        }
    }
}

/// Hands out staged regions first, then scratch regions.
#[derive(Debug, Default)]
pub struct LayoutBuilder {
    cursor: usize,
    staged_end: Option<usize>,
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn reserve<T>(&mut self, len: usize) -> Region<T> {
        let align = REGION_ALIGNMENT.max(std::mem::align_of::<T>());
        let offset = align_up(self.cursor, align);
        self.cursor = offset + len * std::mem::size_of::<T>();
        Region {
            offset,
            len,
            _ty: PhantomData,
        }
    }

    /// Region written on the host and copied to the device.
    ///
    /// Staged regions must all be reserved before the first scratch region.
    pub fn staged<T: Pod>(&mut self, len: usize) -> Result<Region<T>> {
        if self.staged_end.is_some() {
            return Err(EngineError::InvariantViolation(
                "staged region requested after scratch regions".into(),
            ));
        }
        Ok(self.reserve(len))
    }

    /// Device-only region (never copied, never touched on the host).
    pub fn scratch<T: Pod>(&mut self, len: usize) -> Region<T> {
        if self.staged_end.is_none() {
            self.staged_end = Some(self.cursor);
        }
        self.reserve(len)
    }

    pub fn finish(self) -> WorkspaceLayout {
        let staged = self.staged_end.unwrap_or(self.cursor);
        WorkspaceLayout {
            staged_bytes: align_up(staged, REGION_ALIGNMENT),
            total_bytes: align_up(self.cursor, REGION_ALIGNMENT),
        }
    }
}

// ─── Arena ──────────────────────────────────────────────────────────────────

/// Typed mutable access to the host staging bytes of one call.
pub struct Arena<'a> {
    bytes: &'a mut [u8],
}

impl<'a> Arena<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn slice_mut<T: Pod>(&mut self, region: Region<T>) -> Result<&mut [T]> {
        let range = region.byte_range();
        let have = self.bytes.len();
        let bytes = self
            .bytes
            .get_mut(range.clone())
            .ok_or(EngineError::BufferTooSmall {
                need: range.end,
                have,
            })?;
        bytemuck::try_cast_slice_mut(bytes).map_err(|err| {
            EngineError::InvariantViolation(format!(
                "staging region at {} is not castable: {err}",
                region.offset
            ))
        })
    }

    /// Copy `values` into `region`, zero-filling any tail.
    pub fn write<T: Pod>(&mut self, region: Region<T>, values: &[T]) -> Result<()> {
        let dst = self.slice_mut(region)?;
        if values.len() > dst.len() {
            return Err(EngineError::BufferTooSmall {
                need: std::mem::size_of_val(values),
                have: std::mem::size_of_val(dst),
            });
        }
        let (head, tail) = dst.split_at_mut(values.len());
        head.copy_from_slice(values);
        tail.fill(T::zeroed());
        Ok(())
    }
}

/// Host buffer aligned to 16 bytes, for planning without pinned memory.
#[derive(Clone, Debug, Default)]
pub struct AlignedHostBuffer {
    words: Vec<u128>,
    len: usize,
}

impl AlignedHostBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u128; len.div_ceil(16)],
            len,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }

    pub fn arena(&mut self) -> Arena<'_> {
        Arena::new(self.as_bytes_mut())
    }
}
