//! `(x - base) * scale * global_scale + global_shift` with broadcast
//! per-sample and per-channel parameters.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    DescRegions, GridExtent, HostPlan, KernelVariant, Support, batch_format, check_counts,
    check_nonempty, check_same_sizes, fill,
};
use crate::error::{EngineError, Result};
use crate::format::DataKind;
use crate::image::ImageBatchVarShape;
use crate::meta::NormalizeMeta;
use crate::workspace::{
    Arena, LayoutBuilder, Region, ShapeBound, WorkspaceLayout, WorkspaceRequirements,
};

pub const OP: &str = "normalize";

const KINDS: &[DataKind] = &[
    DataKind::U8,
    DataKind::U16,
    DataKind::S16,
    DataKind::S32,
    DataKind::F32,
];

const SUPPORT: Support = Support {
    op: OP,
    kinds: KINDS,
    planar: true,
};

/// Base or scale values, shaped `[samples, channels]` where either axis may
/// be 1 to broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizeParam {
    pub values: Vec<f32>,
    pub samples: usize,
    pub channels: usize,
}

impl NormalizeParam {
    pub fn per_channel(values: Vec<f32>) -> Self {
        Self {
            samples: 1,
            channels: values.len(),
            values,
        }
    }

    pub fn per_sample(values: Vec<f32>) -> Self {
        Self {
            samples: values.len(),
            channels: 1,
            values,
        }
    }

    pub fn scalar(value: f32) -> Self {
        Self {
            values: vec![value],
            samples: 1,
            channels: 1,
        }
    }

    fn check(&self, name: &str, samples: usize, channels: usize) -> Result<()> {
        if self.values.len() != self.samples * self.channels {
            return Err(EngineError::ShapeMismatch(format!(
                "{OP}: {name} holds {} values for shape [{}, {}]",
                self.values.len(),
                self.samples,
                self.channels
            )));
        }
        if !(self.samples == 1 || self.samples == samples)
            || !(self.channels == 1 || self.channels == channels)
        {
            return Err(EngineError::ShapeMismatch(format!(
                "{OP}: {name} shape [{}, {}] does not broadcast to [{samples}, {channels}]",
                self.samples, self.channels
            )));
        }
        Ok(())
    }

    /// `(sample_stride, channel_stride)` into `values`; broadcast axes get 0.
    fn strides(&self) -> (i32, i32) {
        let sample = if self.samples == 1 { 0 } else { self.channels as i32 };
        let channel = if self.channels == 1 { 0 } else { 1 };
        (sample, channel)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizeArgs {
    pub base: NormalizeParam,
    pub scale: NormalizeParam,
    pub global_scale: f32,
    pub global_shift: f32,
    pub epsilon: f32,
    /// Treat `scale` as a standard deviation: `scale = 1 / sqrt(scale² + epsilon)`.
    pub scale_is_stddev: bool,
}

impl NormalizeArgs {
    fn meta(&self) -> NormalizeMeta {
        let (base_sample_stride, base_channel_stride) = self.base.strides();
        let (scale_sample_stride, scale_channel_stride) = self.scale.strides();
        NormalizeMeta {
            base_offset: 0,
            base_sample_stride,
            base_channel_stride,
            scale_offset: self.base.values.len() as i32,
            scale_sample_stride,
            scale_channel_stride,
            global_scale: self.global_scale,
            global_shift: self.global_shift,
            epsilon: self.epsilon,
            scale_is_stddev: i32::from(self.scale_is_stddev),
            _pad: [0; 2],
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NormalizeRegions {
    pub descs: DescRegions,
    pub meta: Region<NormalizeMeta>,
    /// Base values followed by scale values.
    pub values: Region<f32>,
}

fn layout(batch: usize, values: usize) -> Result<(NormalizeRegions, WorkspaceLayout)> {
    let mut b = LayoutBuilder::new();
    let descs = DescRegions::reserve(&mut b, batch)?;
    let meta = b.staged(1)?;
    let values = b.staged(values)?;
    Ok((NormalizeRegions { descs, meta, values }, b.finish()))
}

/// Worst case: full `[N, C]` base and scale tensors.
pub fn workspace_requirements(bound: &ShapeBound) -> Result<WorkspaceRequirements> {
    let values = 2 * bound.batch * bound.format.num_channels();
    Ok(layout(bound.batch, values)?.1.requirements())
}

/// Validated normalize call.
#[derive(Debug)]
pub struct NormalizePlan<'a> {
    input: &'a ImageBatchVarShape,
    output: &'a ImageBatchVarShape,
    args: &'a NormalizeArgs,
    variant: KernelVariant,
    out_kind: DataKind,
    regions: NormalizeRegions,
    layout: WorkspaceLayout,
}

impl<'a> NormalizePlan<'a> {
    pub fn new(
        input: &'a ImageBatchVarShape,
        output: &'a ImageBatchVarShape,
        args: &'a NormalizeArgs,
    ) -> Result<Self> {
        check_counts(OP, input, output)?;
        let in_fmt = batch_format(&SUPPORT, input)?;
        let out_fmt = batch_format(&SUPPORT, output)?;
        if in_fmt.channels != out_fmt.channels || in_fmt.packing != out_fmt.packing {
            return Err(EngineError::FormatMismatch {
                expected: in_fmt,
                actual: out_fmt,
            });
        }
        if out_fmt.kind != in_fmt.kind && out_fmt.kind != DataKind::F32 {
            return Err(EngineError::UnsupportedConversion {
                op: OP,
                input: in_fmt.kind,
                output: out_fmt.kind,
            });
        }
        check_nonempty(OP, input)?;
        check_same_sizes(OP, input, output)?;

        let n = input.num_images();
        let c = in_fmt.num_channels();
        args.base.check("base", n, c)?;
        args.scale.check("scale", n, c)?;

        let values = args.base.values.len() + args.scale.values.len();
        let (regions, layout) = layout(n, values)?;
        debug!(
            op = OP,
            images = n,
            input = %in_fmt,
            output = %out_fmt,
            stddev = args.scale_is_stddev,
            "normalize planned"
        );
        Ok(Self {
            input,
            output,
            args,
            variant: KernelVariant::of(in_fmt),
            out_kind: out_fmt.kind,
            regions,
            layout,
        })
    }

    /// Input element type, channels and layout.
    pub fn variant(&self) -> KernelVariant {
        self.variant
    }

    pub fn out_kind(&self) -> DataKind {
        self.out_kind
    }

    pub fn regions(&self) -> &NormalizeRegions {
        &self.regions
    }

    pub fn grid(&self) -> GridExtent {
        GridExtent::new(self.input.max_size(), self.input.num_images())
    }
}

impl HostPlan for NormalizePlan<'_> {
    fn op(&self) -> &'static str {
        OP
    }

    fn layout(&self) -> WorkspaceLayout {
        self.layout
    }

    fn build(&self, arena: &mut Arena<'_>) -> Result<()> {
        self.regions.descs.write(arena, self.input, self.output)?;
        arena.write(self.regions.meta, &[self.args.meta()])?;
        fill(
            arena,
            self.regions.values,
            self.args
                .base
                .values
                .iter()
                .chain(&self.args.scale.values)
                .copied(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use crate::format::ImageFormat;
    use crate::image::Size2D;
    use crate::ops::testing::batch;
    use crate::workspace::AlignedHostBuffer;

    fn args(base: NormalizeParam, scale: NormalizeParam) -> NormalizeArgs {
        NormalizeArgs {
            base,
            scale,
            global_scale: 1.0,
            global_shift: 0.0,
            epsilon: 0.0,
            scale_is_stddev: false,
        }
    }

    #[test]
    fn broadcast_strides_address_values() {
        let input = batch(ImageFormat::RGB8, &[(4, 4), (2, 8)], 0x1000);
        let output = batch(ImageFormat::RGBF32, &[(4, 4), (2, 8)], 0x9000);
        let a = args(
            NormalizeParam::per_channel(vec![1.0, 2.0, 3.0]),
            NormalizeParam::per_sample(vec![0.5, 0.25]),
        );
        let plan = NormalizePlan::new(&input, &output, &a).expect("u8 -> f32");
        assert_eq!(plan.out_kind(), DataKind::F32);
        assert_eq!(plan.grid(), GridExtent { width: 4, height: 8, depth: 2 });

        let bound = ShapeBound::new(2, Size2D::new(4, 8), Size2D::new(4, 8), ImageFormat::RGB8);
        assert!(workspace_requirements(&bound).expect("sizing").covers(&plan.layout()));

        let mut host = AlignedHostBuffer::zeroed(plan.layout().staged_bytes());
        let mut arena = host.arena();
        plan.build(&mut arena).expect("build");
        let meta = arena.slice_mut(plan.regions().meta).expect("meta")[0];
        assert_eq!((meta.base_sample_stride, meta.base_channel_stride), (0, 1));
        assert_eq!((meta.scale_sample_stride, meta.scale_channel_stride), (1, 0));
        assert_eq!(meta.scale_offset, 3);
        let values = arena.slice_mut(plan.regions().values).expect("values");
        assert_eq!(values, &[1.0, 2.0, 3.0, 0.5, 0.25]);
    }

    #[test]
    fn output_must_match_input_or_be_f32() {
        let input = batch(ImageFormat::RGB8, &[(4, 4)], 0x1000);
        let output = batch(ImageFormat::RGB16, &[(4, 4)], 0x9000);
        let a = args(NormalizeParam::scalar(0.0), NormalizeParam::scalar(1.0));
        let err = NormalizePlan::new(&input, &output, &a).expect_err("u8 -> u16");
        assert_eq!(err.status(), Status::InvalidDataType);

        let planar = batch(ImageFormat::RGBF32P, &[(4, 4)], 0x9000);
        let err = NormalizePlan::new(&input, &planar, &a).expect_err("layout change");
        assert_eq!(err.status(), Status::InvalidDataFormat);
    }

    #[test]
    fn parameter_shapes_must_broadcast() {
        let input = batch(ImageFormat::RGB8, &[(4, 4), (4, 4)], 0x1000);
        let output = batch(ImageFormat::RGB8, &[(4, 4), (4, 4)], 0x9000);
        let a = args(
            NormalizeParam::per_sample(vec![1.0, 2.0, 3.0]),
            NormalizeParam::scalar(1.0),
        );
        let err = NormalizePlan::new(&input, &output, &a).expect_err("three samples");
        assert_eq!(err.status(), Status::InvalidDataShape);

        let ragged = NormalizeParam {
            values: vec![1.0; 5],
            samples: 2,
            channels: 3,
        };
        let a = args(NormalizeParam::scalar(0.0), ragged);
        assert!(NormalizePlan::new(&input, &output, &a).is_err());
    }
}
