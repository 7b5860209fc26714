//! Rectangle erase with constant or random fill.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    DescRegions, GridExtent, HostPlan, KernelVariant, Support, check_same_sizes, fill,
    validate_pair,
};
use crate::error::{EngineError, Result};
use crate::format::DataKind;
use crate::image::{ImageBatchVarShape, Size2D};
use crate::meta::EraseMeta;
use crate::workspace::{
    Arena, LayoutBuilder, Region, ShapeBound, WorkspaceLayout, WorkspaceRequirements,
};

pub const OP: &str = "erase";

const SUPPORT: Support = Support {
    op: OP,
    kinds: &[
        DataKind::U8,
        DataKind::U16,
        DataKind::S16,
        DataKind::S32,
        DataKind::F32,
    ],
    planar: true,
};

/// Every channel of a pixel.
pub const ALL_CHANNELS: u32 = 0xF;

/// One rectangle to erase in one image of the batch.
///
/// Rectangles may extend past their image and are clipped to it. A region
/// whose `image_index` is outside the batch is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EraseRegion {
    pub anchor_x: i32,
    pub anchor_y: i32,
    pub width: i32,
    pub height: i32,
    /// Bit `c` selects channel `c`.
    pub channel_mask: u32,
    pub image_index: i32,
    /// Per-channel fill, converted with saturating truncation.
    pub values: [f32; 4],
    /// Fill from the per-call seed instead of `values`.
    pub random: bool,
}

impl EraseRegion {
    pub fn fill(image_index: i32, anchor: (i32, i32), size: (i32, i32), values: [f32; 4]) -> Self {
        Self {
            anchor_x: anchor.0,
            anchor_y: anchor.1,
            width: size.0,
            height: size.1,
            channel_mask: ALL_CHANNELS,
            image_index,
            values,
            random: false,
        }
    }

    pub fn random(image_index: i32, anchor: (i32, i32), size: (i32, i32)) -> Self {
        Self {
            random: true,
            ..Self::fill(image_index, anchor, size, [0.0; 4])
        }
    }

    pub fn with_mask(mut self, channel_mask: u32) -> Self {
        self.channel_mask = channel_mask;
        self
    }

    /// Intersection with a `size` image; empty when nothing overlaps.
    pub fn clipped_to(&self, size: Size2D) -> Self {
        let span = |anchor: i32, len: i32, limit: usize| {
            let lo = i64::from(anchor).max(0);
            let hi = (i64::from(anchor) + i64::from(len)).min(limit as i64);
            if hi <= lo {
                (anchor.max(0), 0)
            } else {
                // Both ends lie within [0, limit].
                (lo as i32, (hi - lo) as i32)
            }
        };
        let (anchor_x, width) = span(self.anchor_x, self.width, size.w);
        let (anchor_y, height) = span(self.anchor_y, self.height, size.h);
        Self {
            anchor_x,
            anchor_y,
            width,
            height,
            ..*self
        }
    }

    fn meta(&self) -> EraseMeta {
        EraseMeta {
            anchor_x: self.anchor_x,
            anchor_y: self.anchor_y,
            width: self.width,
            height: self.height,
            channel_mask: self.channel_mask,
            image_index: self.image_index,
            random: i32::from(self.random),
            _pad: 0,
            values: self.values,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EraseRegions {
    pub descs: DescRegions,
    pub regions: Region<EraseMeta>,
}

fn layout(batch: usize, regions: usize) -> Result<(EraseRegions, WorkspaceLayout)> {
    let mut b = LayoutBuilder::new();
    let descs = DescRegions::reserve(&mut b, batch)?;
    let regions = b.staged(regions)?;
    Ok((EraseRegions { descs, regions }, b.finish()))
}

/// Workspace for batches within `bound` erasing up to `max_regions` rectangles.
pub fn workspace_requirements(
    bound: &ShapeBound,
    max_regions: usize,
) -> Result<WorkspaceRequirements> {
    Ok(layout(bound.batch, max_regions)?.1.requirements())
}

/// Validated erase call.
#[derive(Debug)]
pub struct ErasePlan<'a> {
    input: &'a ImageBatchVarShape,
    output: &'a ImageBatchVarShape,
    /// Regions clipped to their target image.
    regions: Vec<EraseRegion>,
    seed: u32,
    in_place: bool,
    variant: KernelVariant,
    staging: EraseRegions,
    layout: WorkspaceLayout,
}

impl<'a> ErasePlan<'a> {
    /// `capacity` is the region count the operator instance was built for.
    pub fn new(
        input: &'a ImageBatchVarShape,
        output: &'a ImageBatchVarShape,
        regions: &'a [EraseRegion],
        seed: u32,
        capacity: usize,
    ) -> Result<Self> {
        let variant = validate_pair(&SUPPORT, input, output)?;
        check_same_sizes(OP, input, output)?;
        if regions.len() > capacity {
            return Err(EngineError::CapacityExceeded {
                what: "erase region",
                requested: regions.len(),
                capacity,
            });
        }
        if let Some((i, r)) = regions
            .iter()
            .enumerate()
            .find(|(_, r)| r.width < 0 || r.height < 0)
        {
            return Err(EngineError::InvalidParameter(format!(
                "{OP}: region {i} has negative size {}x{}",
                r.width, r.height
            )));
        }
        let in_place = input
            .images()
            .iter()
            .zip(output.images())
            .all(|(i, o)| i.base == o.base);
        let regions: Vec<EraseRegion> = regions
            .iter()
            .map(|r| {
                let target = usize::try_from(r.image_index)
                    .ok()
                    .and_then(|i| output.get(i))
                    .map_or(Size2D::default(), |img| img.size);
                r.clipped_to(target)
            })
            .collect();
        let (staging, layout) = layout(input.num_images(), regions.len())?;
        debug!(
            op = OP,
            images = input.num_images(),
            regions = regions.len(),
            in_place,
            "erase planned"
        );
        Ok(Self {
            input,
            output,
            regions,
            seed,
            in_place,
            variant,
            staging,
            layout,
        })
    }

    pub fn variant(&self) -> KernelVariant {
        self.variant
    }

    pub fn staging(&self) -> &EraseRegions {
        &self.staging
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    /// Output aliases input, so no copy-through is needed.
    pub fn in_place(&self) -> bool {
        self.in_place
    }

    /// Copy-through: one thread per input pixel.
    pub fn copy_grid(&self) -> GridExtent {
        GridExtent::new(self.input.max_size(), self.input.num_images())
    }

    /// Erase: one thread per pixel of the largest clipped rectangle, one z
    /// slice per region.
    pub fn erase_grid(&self) -> GridExtent {
        let extent = self.regions.iter().fold(Size2D::default(), |acc, r| {
            acc.max(Size2D::new(r.width as usize, r.height as usize))
        });
        GridExtent::new(extent, self.regions.len())
    }
}

impl HostPlan for ErasePlan<'_> {
    fn op(&self) -> &'static str {
        OP
    }

    fn layout(&self) -> WorkspaceLayout {
        self.layout
    }

    fn build(&self, arena: &mut Arena<'_>) -> Result<()> {
        self.staging.descs.write(arena, self.input, self.output)?;
        fill(arena, self.staging.regions, self.regions.iter().map(EraseRegion::meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use crate::format::ImageFormat;
    use crate::ops::testing::batch;
    use crate::workspace::AlignedHostBuffer;

    #[test]
    fn regions_are_staged_in_order() {
        let input = batch(ImageFormat::RGB8, &[(8, 8), (4, 6)], 0x1000);
        let output = batch(ImageFormat::RGB8, &[(8, 8), (4, 6)], 0x9000);
        let regions = [
            EraseRegion::fill(0, (1, 1), (3, 2), [1.0, 2.0, 3.0, 0.0]).with_mask(0b011),
            EraseRegion::random(1, (-2, 4), (9, 1)),
        ];
        let plan = ErasePlan::new(&input, &output, &regions, 7, 4).expect("valid call");
        assert!(!plan.in_place());
        // The random region starts left of its 4-wide image and is clipped to it.
        assert_eq!(plan.erase_grid(), GridExtent { width: 4, height: 2, depth: 2 });
        assert_eq!(plan.copy_grid(), GridExtent { width: 8, height: 8, depth: 2 });

        let bound = ShapeBound::new(2, Size2D::new(8, 8), Size2D::new(8, 8), ImageFormat::RGB8);
        assert!(workspace_requirements(&bound, 4).expect("sizing").covers(&plan.layout()));

        let mut host = AlignedHostBuffer::zeroed(plan.layout().staged_bytes());
        let mut arena = host.arena();
        plan.build(&mut arena).expect("build");
        let metas = arena.slice_mut(plan.staging().regions).expect("regions");
        assert_eq!(metas[0].channel_mask, 0b011);
        assert_eq!(metas[0].values, [1.0, 2.0, 3.0, 0.0]);
        assert_eq!((metas[1].anchor_x, metas[1].width, metas[1].random), (0, 4, 1));
        assert_eq!(metas[1].channel_mask, ALL_CHANNELS);
    }

    #[test]
    fn oversized_regions_are_clipped_before_sizing_the_grid() {
        let input = batch(ImageFormat::RGB8, &[(8, 8)], 0x1000);
        let output = batch(ImageFormat::RGB8, &[(8, 8)], 0x9000);
        let regions = [
            EraseRegion::fill(0, (2, 2), (8, 2_000_000), [9.0; 4]),
            EraseRegion::fill(0, (i32::MAX - 1, 0), (i32::MAX, 1), [0.0; 4]),
            EraseRegion::random(5, (0, 0), (1_000_000, 1_000_000)),
        ];
        let plan = ErasePlan::new(&input, &output, &regions, 0, 4).expect("valid call");
        assert_eq!(plan.erase_grid(), GridExtent { width: 6, height: 6, depth: 3 });

        let mut host = AlignedHostBuffer::zeroed(plan.layout().staged_bytes());
        let mut arena = host.arena();
        plan.build(&mut arena).expect("build");
        let metas = arena.slice_mut(plan.staging().regions).expect("regions");
        assert_eq!(
            (metas[0].anchor_x, metas[0].anchor_y, metas[0].width, metas[0].height),
            (2, 2, 6, 6)
        );
        assert_eq!((metas[1].width, metas[1].height), (0, 1));
        assert_eq!((metas[2].width, metas[2].height, metas[2].image_index), (0, 0, 5));
    }

    #[test]
    fn clipping_keeps_pixels_inside_the_image() {
        let r = EraseRegion::fill(0, (-3, 5), (10, 10), [0.0; 4]);
        let c = r.clipped_to(Size2D::new(4, 8));
        assert_eq!((c.anchor_x, c.anchor_y, c.width, c.height), (0, 5, 4, 3));
        assert_eq!(c.values, r.values);

        let outside = EraseRegion::fill(0, (-20, 0), (5, 5), [0.0; 4]).clipped_to(Size2D::new(4, 4));
        assert_eq!((outside.anchor_x, outside.width), (0, 0));
    }

    #[test]
    fn same_bases_mean_in_place() {
        let images = batch(ImageFormat::F32, &[(5, 5)], 0x1000);
        let plan = ErasePlan::new(&images, &images, &[], 0, 1).expect("valid call");
        assert!(plan.in_place());
        assert!(plan.erase_grid().is_empty());
    }

    #[test]
    fn capacity_and_sizes_are_enforced() {
        let input = batch(ImageFormat::U8, &[(8, 8)], 0x1000);
        let output = batch(ImageFormat::U8, &[(8, 8)], 0x9000);
        let regions = [EraseRegion::fill(0, (0, 0), (1, 1), [0.0; 4]); 3];
        let err = ErasePlan::new(&input, &output, &regions, 0, 2).expect_err("capacity");
        assert_eq!(err.status(), Status::InvalidParameter);

        let negative = [EraseRegion::fill(0, (0, 0), (-1, 1), [0.0; 4])];
        assert!(ErasePlan::new(&input, &output, &negative, 0, 2).is_err());

        let smaller = batch(ImageFormat::U8, &[(8, 7)], 0x9000);
        let err = ErasePlan::new(&input, &smaller, &[], 0, 2).expect_err("sizes");
        assert_eq!(err.status(), Status::InvalidDataShape);
    }
}
