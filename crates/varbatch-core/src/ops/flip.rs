//! Per-image flip around the horizontal axis, the vertical axis, or both.

use tracing::debug;

use super::{
    DescRegions, GridExtent, HostPlan, KernelVariant, Support, check_same_sizes, fill,
    validate_pair,
};
use crate::error::{EngineError, Result};
use crate::format::DataKind;
use crate::image::ImageBatchVarShape;
use crate::workspace::{
    Arena, LayoutBuilder, Region, ShapeBound, WorkspaceLayout, WorkspaceRequirements,
};

pub const OP: &str = "flip";

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

#[derive(Clone, Copy, Debug)]
pub struct FlipRegions {
    pub descs: DescRegions,
    pub codes: Region<i32>,
}

fn layout(batch: usize) -> Result<(FlipRegions, WorkspaceLayout)> {
    let mut b = LayoutBuilder::new();
    let descs = DescRegions::reserve(&mut b, batch)?;
    let codes = b.staged(batch)?;
    Ok((FlipRegions { descs, codes }, b.finish()))
}

pub fn workspace_requirements(bound: &ShapeBound) -> Result<WorkspaceRequirements> {
    Ok(layout(bound.batch)?.1.requirements())
}

/// Validated flip call. `codes[i]` applies to image `i`.
#[derive(Debug)]
pub struct FlipPlan<'a> {
    input: &'a ImageBatchVarShape,
    output: &'a ImageBatchVarShape,
    codes: &'a [i32],
    variant: KernelVariant,
    regions: FlipRegions,
    layout: WorkspaceLayout,
}

impl<'a> FlipPlan<'a> {
    pub fn new(
        input: &'a ImageBatchVarShape,
        output: &'a ImageBatchVarShape,
        codes: &'a [i32],
    ) -> Result<Self> {
        let variant = validate_pair(&SUPPORT, input, output)?;
        check_same_sizes(OP, input, output)?;
        if codes.len() != input.num_images() {
            return Err(EngineError::ShapeMismatch(format!(
                "{OP}: {} flip codes for {} images",
                codes.len(),
                input.num_images()
            )));
        }
        let (regions, layout) = layout(input.num_images())?;
        debug!(op = OP, images = input.num_images(), "flip planned");
        Ok(Self {
            input,
            output,
            codes,
            variant,
            regions,
            layout,
        })
    }

    pub fn variant(&self) -> KernelVariant {
        self.variant
    }

    pub fn regions(&self) -> &FlipRegions {
        &self.regions
    }

    pub fn grid(&self) -> GridExtent {
        GridExtent::new(self.output.max_size(), self.output.num_images())
    }
}

impl HostPlan for FlipPlan<'_> {
    fn op(&self) -> &'static str {
        OP
    }

    fn layout(&self) -> WorkspaceLayout {
        self.layout
    }

    fn build(&self, arena: &mut Arena<'_>) -> Result<()> {
        self.regions.descs.write(arena, self.input, self.output)?;
        fill(arena, self.regions.codes, self.codes.iter().copied())
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
    fn codes_follow_images() {
        let input = batch(ImageFormat::RGBA8P, &[(3, 3), (9, 1), (2, 5)], 0x1000);
        let output = batch(ImageFormat::RGBA8P, &[(3, 3), (9, 1), (2, 5)], 0x9000);
        let codes = [0, 1, -1];
        let plan = FlipPlan::new(&input, &output, &codes).expect("valid call");
        assert_eq!(plan.grid(), GridExtent { width: 9, height: 5, depth: 3 });

        let mut host = AlignedHostBuffer::zeroed(plan.layout().staged_bytes());
        let mut arena = host.arena();
        plan.build(&mut arena).expect("build");
        assert_eq!(arena.slice_mut(plan.regions().codes).expect("codes"), &codes);
    }

    #[test]
    fn code_count_must_match_batch() {
        let input = batch(ImageFormat::S32, &[(3, 3), (3, 3)], 0x1000);
        let output = batch(ImageFormat::S32, &[(3, 3), (3, 3)], 0x9000);
        let err = FlipPlan::new(&input, &output, &[1]).expect_err("one code short");
        assert_eq!(err.status(), Status::InvalidDataShape);
    }
}
