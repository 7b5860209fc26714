//! Host-side half of every operator: validation, workspace planning and
//! per-image metadata building.
//!
//! Nothing in here touches a device. An operator call runs
//! `Validating → Planning → Building → Staging → Launching` and the first
//! three phases live here; staging and launching belong to the CUDA crate.

pub mod erase;
pub mod flip;
pub mod normalize;
pub mod pillow;
pub mod resize;
pub mod rotate;

use tracing::{debug, trace};

use crate::error::{EngineError, Result};
use crate::format::{DataKind, ImageFormat};
use crate::image::{ImageBatchVarShape, Size2D};
use crate::meta::ImageDesc;
use crate::workspace::{Arena, LayoutBuilder, Region, WorkspaceLayout};

/// Widest pixel any kernel handles.
pub const MAX_CHANNELS: usize = 4;
/// Images per launch are mapped to `gridDim.z`.
pub const MAX_BATCH: usize = 65_535;

// ─── Call state machine ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Idle,
    Validating,
    Planning,
    Building,
    Staging,
    Launching,
}

/// Tracks one operator call through its phases; dropping it returns to idle.
#[derive(Debug)]
pub struct CallTracker {
    op: &'static str,
    phase: Phase,
}

impl CallTracker {
    pub fn begin(op: &'static str) -> Self {
        trace!(op, "call entering validation");
        Self {
            op,
            phase: Phase::Validating,
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move forward to `next`. Phases never go backwards within a call.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if next <= self.phase {
            return Err(EngineError::InvariantViolation(format!(
                "{}: phase {:?} cannot follow {:?}",
                self.op, next, self.phase
            )));
        }
        debug!(op = self.op, from = ?self.phase, to = ?next, "call phase");
        self.phase = next;
        Ok(())
    }

    /// Whether the call reached the device (anything past building).
    pub fn touched_device(&self) -> bool {
        self.phase >= Phase::Staging
    }
}

impl Drop for CallTracker {
    fn drop(&mut self) {
        if self.phase < Phase::Launching {
            debug!(op = self.op, phase = ?self.phase, "call returned to idle before launch");
        }
    }
}

// ─── Plans ──────────────────────────────────────────────────────────────────

/// What every validated call hands to the staging/launch machinery.
pub trait HostPlan {
    fn op(&self) -> &'static str;

    fn layout(&self) -> WorkspaceLayout;

    /// Write every staged region into the host arena.
    fn build(&self, arena: &mut Arena<'_>) -> Result<()>;
}

/// Kernel instantiation selected for a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KernelVariant {
    pub kind: DataKind,
    pub channels: usize,
    pub planar: bool,
}

impl KernelVariant {
    pub fn of(format: ImageFormat) -> Self {
        Self {
            kind: format.kind,
            channels: format.num_channels(),
            planar: format.is_planar(),
        }
    }
}

/// Launch extents: `(max_w, max_h, batch)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridExtent {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl GridExtent {
    pub fn new(size: Size2D, depth: usize) -> Self {
        Self {
            width: size.w,
            height: size.h,
            depth,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
}

/// Source and destination descriptor arrays shared by every operator.
#[derive(Clone, Copy, Debug)]
pub struct DescRegions {
    pub src: Region<ImageDesc>,
    pub dst: Region<ImageDesc>,
}

impl DescRegions {
    pub fn reserve(b: &mut LayoutBuilder, batch: usize) -> Result<Self> {
        Ok(Self {
            src: b.staged(batch)?,
            dst: b.staged(batch)?,
        })
    }

    pub fn write(
        &self,
        arena: &mut Arena<'_>,
        input: &ImageBatchVarShape,
        output: &ImageBatchVarShape,
    ) -> Result<()> {
        fill(arena, self.src, input.descs())?;
        fill(arena, self.dst, output.descs())
    }
}

/// Write an iterator into a staged region, zero-filling leftovers.
pub(crate) fn fill<T: bytemuck::Pod>(
    arena: &mut Arena<'_>,
    region: Region<T>,
    values: impl IntoIterator<Item = T>,
) -> Result<()> {
    let dst = arena.slice_mut(region)?;
    let mut n = 0;
    for (slot, v) in dst.iter_mut().zip(values) {
        *slot = v;
        n += 1;
    }
    dst[n..].fill(T::zeroed());
    Ok(())
}

// ─── Validation ─────────────────────────────────────────────────────────────

/// What an operator accepts.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Support {
    pub op: &'static str,
    pub kinds: &'static [DataKind],
    pub planar: bool,
}

/// Shared format of a batch, rejecting empty, mixed and unsupported batches.
pub(crate) fn batch_format(
    support: &Support,
    batch: &ImageBatchVarShape,
) -> Result<ImageFormat> {
    let Some(first) = batch.images().first().map(|img| img.format) else {
        return Err(EngineError::ShapeMismatch(format!(
            "{}: batch holds no images",
            support.op
        )));
    };
    if let Some((index, img)) = batch
        .images()
        .iter()
        .enumerate()
        .find(|(_, img)| img.format != first)
    {
        return Err(EngineError::NonUniformFormat {
            index,
            expected: first,
            actual: img.format,
        });
    }
    check_format(support, first)?;
    Ok(first)
}

pub(crate) fn check_format(support: &Support, format: ImageFormat) -> Result<()> {
    if format.num_channels() == 0 || format.num_channels() > MAX_CHANNELS {
        return Err(EngineError::UnsupportedChannels {
            op: support.op,
            channels: format.num_channels(),
        });
    }
    if format.is_planar() && !support.planar {
        return Err(EngineError::UnsupportedLayout {
            op: support.op,
            layout: "planar",
        });
    }
    if !support.kinds.contains(&format.kind) {
        return Err(EngineError::UnsupportedDataKind {
            op: support.op,
            kind: format.kind,
        });
    }
    Ok(())
}

/// Validate an input/output batch pair that must share one format.
pub(crate) fn validate_pair(
    support: &Support,
    input: &ImageBatchVarShape,
    output: &ImageBatchVarShape,
) -> Result<KernelVariant> {
    check_counts(support.op, input, output)?;
    let in_fmt = batch_format(support, input)?;
    let out_fmt = batch_format(support, output)?;
    if in_fmt != out_fmt {
        return Err(EngineError::FormatMismatch {
            expected: in_fmt,
            actual: out_fmt,
        });
    }
    check_nonempty(support.op, input)?;
    check_nonempty(support.op, output)?;
    Ok(KernelVariant::of(in_fmt))
}

pub(crate) fn check_counts(
    op: &'static str,
    input: &ImageBatchVarShape,
    output: &ImageBatchVarShape,
) -> Result<()> {
    if input.num_images() != output.num_images() {
        return Err(EngineError::ShapeMismatch(format!(
            "{op}: input has {} images, output has {}",
            input.num_images(),
            output.num_images()
        )));
    }
    if input.num_images() > MAX_BATCH {
        return Err(EngineError::CapacityExceeded {
            what: "batch image",
            requested: input.num_images(),
            capacity: MAX_BATCH,
        });
    }
    Ok(())
}

pub(crate) fn check_nonempty(op: &'static str, batch: &ImageBatchVarShape) -> Result<()> {
    if let Some((i, img)) = batch
        .images()
        .iter()
        .enumerate()
        .find(|(_, img)| img.size.is_empty())
    {
        return Err(EngineError::ShapeMismatch(format!(
            "{op}: image {i} has empty extent {}x{}",
            img.size.w, img.size.h
        )));
    }
    Ok(())
}

/// Require every output image to have its input's extent.
pub(crate) fn check_same_sizes(
    op: &'static str,
    input: &ImageBatchVarShape,
    output: &ImageBatchVarShape,
) -> Result<()> {
    for (i, (a, b)) in input.images().iter().zip(output.images()).enumerate() {
        if a.size != b.size {
            return Err(EngineError::ShapeMismatch(format!(
                "{op}: image {i} is {}x{} in and {}x{} out",
                a.size.w, a.size.h, b.size.w, b.size.h
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::format::ImageFormat;
    use crate::image::{Image, ImageBatchVarShape, Size2D};

    /// Batch of fake device images laid out back to back from `base`.
    pub fn batch(fmt: ImageFormat, sizes: &[(usize, usize)], base: u64) -> ImageBatchVarShape {
        let mut next = base;
        let images = sizes
            .iter()
            .map(|&(w, h)| {
                let img = Image::new(fmt, Size2D::new(w, h), next, fmt.row_bytes(w))
                    .expect("valid test image");
                next += img.byte_size() as u64;
                img
            })
            .collect();
        ImageBatchVarShape::from_images(images)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::batch;
    use super::*;
    use crate::error::Status;

    const SUPPORT: Support = Support {
        op: "test",
        kinds: &[DataKind::U8, DataKind::F32],
        planar: false,
    };

    #[test]
    fn phases_only_move_forward() {
        let mut call = CallTracker::begin("resize");
        assert_eq!(call.phase(), Phase::Validating);
        call.advance(Phase::Planning).expect("forward");
        call.advance(Phase::Building).expect("forward");
        assert!(!call.touched_device());
        assert!(call.advance(Phase::Validating).is_err());
        call.advance(Phase::Launching).expect("skip ahead");
        assert!(call.touched_device());
    }

    #[test]
    fn mismatched_layouts_are_a_format_error() {
        let input = batch(ImageFormat::RGB8, &[(4, 4)], 0x1000);
        let output = batch(ImageFormat::RGB8P, &[(4, 4)], 0x9000);
        let support = Support {
            planar: true,
            ..SUPPORT
        };
        let err = validate_pair(&support, &input, &output).expect_err("layout mismatch");
        assert_eq!(err.status(), Status::InvalidDataFormat);
    }

    #[test]
    fn non_uniform_batch_is_rejected_before_planning() {
        let mut input = batch(ImageFormat::RGB8, &[(4, 4), (2, 2)], 0x1000);
        let odd = batch(ImageFormat::RGBA8, &[(3, 3)], 0x8000);
        input = ImageBatchVarShape::from_images(
            input.images().iter().chain(odd.images()).copied().collect(),
        );
        let output = batch(ImageFormat::RGB8, &[(4, 4), (2, 2), (3, 3)], 0x9000);
        let err = validate_pair(&SUPPORT, &input, &output).expect_err("mixed batch");
        assert!(matches!(err, EngineError::NonUniformFormat { index: 2, .. }));
        assert_eq!(err.status(), Status::InvalidDataFormat);
    }

    #[test]
    fn unsupported_configurations_map_to_statuses() {
        let five = ImageFormat::packed(DataKind::U8, 5);
        let err = check_format(&SUPPORT, five).expect_err("five channels");
        assert_eq!(err.status(), Status::InvalidDataFormat);

        let err = check_format(&SUPPORT, ImageFormat::F16).expect_err("f16");
        assert_eq!(err.status(), Status::InvalidDataType);

        let err = check_format(&SUPPORT, ImageFormat::RGB8P).expect_err("planar");
        assert_eq!(err.status(), Status::InvalidDataFormat);
    }

    #[test]
    fn count_mismatch_is_a_shape_error() {
        let input = batch(ImageFormat::U8, &[(4, 4), (4, 4)], 0x1000);
        let output = batch(ImageFormat::U8, &[(4, 4)], 0x9000);
        let err = validate_pair(&SUPPORT, &input, &output).expect_err("count");
        assert_eq!(err.status(), Status::InvalidDataShape);
    }

    #[test]
    fn fill_zeroes_unused_slots() {
        let mut b = LayoutBuilder::new();
        let r = b.staged::<i32>(4).expect("staged");
        let layout = b.finish();
        let mut host = crate::workspace::AlignedHostBuffer::zeroed(layout.staged_bytes());
        host.as_bytes_mut().fill(1);
        let mut arena = host.arena();
        fill(&mut arena, r, [5, 6]).expect("fill");
        assert_eq!(arena.slice_mut(r).expect("view"), &[5, 6, 0, 0]);
    }
}
