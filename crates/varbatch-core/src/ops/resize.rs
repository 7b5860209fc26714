//! General resize: nearest, linear, cubic and area interpolation.

use tracing::debug;

use super::{DescRegions, GridExtent, HostPlan, KernelVariant, Support, fill, validate_pair};
use crate::error::{EngineError, Result};
use crate::format::DataKind;
use crate::image::ImageBatchVarShape;
use crate::interp::Interpolation;
use crate::meta::ResizeMeta;
use crate::workspace::{
    Arena, LayoutBuilder, Region, ShapeBound, WorkspaceLayout, WorkspaceRequirements,
};

pub const OP: &str = "resize";

const SUPPORT: Support = Support {
    op: OP,
    kinds: &[DataKind::U8, DataKind::U16, DataKind::S16, DataKind::F32],
    planar: false,
};

#[derive(Clone, Copy, Debug)]
pub struct ResizeRegions {
    pub descs: DescRegions,
    pub meta: Region<ResizeMeta>,
}

fn layout(batch: usize) -> Result<(ResizeRegions, WorkspaceLayout)> {
    let mut b = LayoutBuilder::new();
    let descs = DescRegions::reserve(&mut b, batch)?;
    let meta = b.staged(batch)?;
    Ok((ResizeRegions { descs, meta }, b.finish()))
}

/// Workspace able to serve any call within `bound`.
pub fn workspace_requirements(bound: &ShapeBound) -> Result<WorkspaceRequirements> {
    Ok(layout(bound.batch)?.1.requirements())
}

fn check_interpolation(interp: Interpolation) -> Result<()> {
    match interp {
        Interpolation::Nearest
        | Interpolation::Linear
        | Interpolation::Cubic
        | Interpolation::Area => Ok(()),
        other => Err(EngineError::InvalidParameter(format!(
            "{OP} does not support {other:?} interpolation"
        ))),
    }
}

/// Validated resize call, ready to stage.
#[derive(Debug)]
pub struct ResizePlan<'a> {
    input: &'a ImageBatchVarShape,
    output: &'a ImageBatchVarShape,
    interp: Interpolation,
    variant: KernelVariant,
    regions: ResizeRegions,
    layout: WorkspaceLayout,
}

impl<'a> ResizePlan<'a> {
    pub fn new(
        input: &'a ImageBatchVarShape,
        output: &'a ImageBatchVarShape,
        interp: Interpolation,
    ) -> Result<Self> {
        let variant = validate_pair(&SUPPORT, input, output)?;
        check_interpolation(interp)?;
        let (regions, layout) = layout(input.num_images())?;
        debug!(
            op = OP,
            images = input.num_images(),
            ?interp,
            staged = layout.staged_bytes(),
            "resize planned"
        );
        Ok(Self {
            input,
            output,
            interp,
            variant,
            regions,
            layout,
        })
    }

    pub fn variant(&self) -> KernelVariant {
        self.variant
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interp
    }

    pub fn regions(&self) -> &ResizeRegions {
        &self.regions
    }

    pub fn num_images(&self) -> usize {
        self.input.num_images()
    }

    /// One thread per output pixel.
    pub fn grid(&self) -> GridExtent {
        GridExtent::new(self.output.max_size(), self.num_images())
    }

    /// Per-image scale factors in batch order.
    pub fn meta(&self) -> impl Iterator<Item = ResizeMeta> + '_ {
        self.input
            .images()
            .iter()
            .zip(self.output.images())
            .map(|(i, o)| ResizeMeta::new(i.size.w, i.size.h, o.size.w, o.size.h))
    }
}

impl HostPlan for ResizePlan<'_> {
    fn op(&self) -> &'static str {
        OP
    }

    fn layout(&self) -> WorkspaceLayout {
        self.layout
    }

    fn build(&self, arena: &mut Arena<'_>) -> Result<()> {
        self.regions.descs.write(arena, self.input, self.output)?;
        fill(arena, self.regions.meta, self.meta())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use crate::format::ImageFormat;
    use crate::image::Size2D;
    use crate::meta::ImageDesc;
    use crate::ops::testing::batch;
    use crate::workspace::AlignedHostBuffer;

    #[test]
    fn plan_describes_every_image_pair() {
        let input = batch(ImageFormat::RGB8, &[(1920, 1080), (30, 30)], 0x10_0000);
        let output = batch(ImageFormat::RGB8, &[(640, 320), (60, 60)], 0x90_0000);
        let plan = ResizePlan::new(&input, &output, Interpolation::Area).expect("valid call");
        assert_eq!(plan.grid(), GridExtent { width: 640, height: 320, depth: 2 });

        let bound = ShapeBound::new(2, Size2D::new(1920, 1080), Size2D::new(640, 320), ImageFormat::RGB8);
        assert!(workspace_requirements(&bound).expect("sizing").covers(&plan.layout()));

        let mut host = AlignedHostBuffer::zeroed(plan.layout().staged_bytes());
        let mut arena = host.arena();
        plan.build(&mut arena).expect("build");
        let src: Vec<ImageDesc> = arena.slice_mut(plan.regions().descs.src).expect("src").to_vec();
        assert_eq!((src[1].width, src[1].height), (30, 30));
        assert_eq!(src[0].row_stride, 1920 * 3);
        let dst = arena.slice_mut(plan.regions().descs.dst).expect("dst").to_vec();
        assert_eq!((dst[0].width, dst[0].height), (640, 320));
        let meta = arena.slice_mut(plan.regions().meta).expect("meta");
        assert_eq!(meta[0].scale_x, 3.0);
        assert_eq!(meta[1].scale_y, 0.5);
    }

    #[test]
    fn resize_rejects_planar_and_pillow_filters() {
        let input = batch(ImageFormat::RGB8P, &[(4, 4)], 0x1000);
        let output = batch(ImageFormat::RGB8P, &[(4, 4)], 0x9000);
        let err = ResizePlan::new(&input, &output, Interpolation::Linear).expect_err("planar");
        assert_eq!(err.status(), Status::InvalidDataFormat);

        let input = batch(ImageFormat::RGB8, &[(4, 4)], 0x1000);
        let output = batch(ImageFormat::RGB8, &[(4, 4)], 0x9000);
        let err = ResizePlan::new(&input, &output, Interpolation::Lanczos).expect_err("lanczos");
        assert_eq!(err.status(), Status::InvalidParameter);
    }

    #[test]
    fn resize_rejects_s32_and_f16() {
        for fmt in [ImageFormat::S32, ImageFormat::F16] {
            let input = batch(fmt, &[(4, 4)], 0x1000);
            let output = batch(fmt, &[(4, 4)], 0x9000);
            let err = ResizePlan::new(&input, &output, Interpolation::Nearest).expect_err("kind");
            assert_eq!(err.status(), Status::InvalidDataType, "{fmt}");
        }
    }
}
