//! Two-pass separable resize compatible with Pillow's `ImagingResample`.
//!
//! Pass one filters every input row horizontally into an f32 intermediate of
//! `N × max_in_h × max_out_w × C`; pass two filters the intermediate
//! vertically into the output. Each image carries its own horizontal and
//! vertical coefficient tables, laid out back to back in two flat arrays and
//! addressed through [`PillowMeta`] offsets.

use tracing::debug;

use super::{DescRegions, GridExtent, HostPlan, KernelVariant, Support, fill, validate_pair};
use crate::coeffs::{AxisGeometry, build_axis, max_table_len, quantize};
use crate::config::PillowPrecision;
use crate::error::{EngineError, Result};
use crate::format::DataKind;
use crate::image::{ImageBatchVarShape, Size2D};
use crate::interp::{Interpolation, PillowFilter};
use crate::meta::PillowMeta;
use crate::workspace::{
    Arena, LayoutBuilder, Region, ShapeBound, WorkspaceLayout, WorkspaceRequirements,
};

pub const OP: &str = "pillow_resize";

const SUPPORT: Support = Support {
    op: OP,
    kinds: &[DataKind::U8, DataKind::U16, DataKind::S16, DataKind::F32],
    planar: true,
};

/// Entry counts that size one call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Counts {
    batch: usize,
    h_coeffs: usize,
    v_coeffs: usize,
    h_bounds: usize,
    v_bounds: usize,
    intermediate: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct PillowRegions {
    pub descs: DescRegions,
    pub meta: Region<PillowMeta>,
    /// f32 weights or 22-bit fixed-point weights, bit for bit.
    pub h_coeffs: Region<u32>,
    pub v_coeffs: Region<u32>,
    pub h_bounds: Region<i32>,
    pub v_bounds: Region<i32>,
    pub intermediate: Region<f32>,
}

fn layout(c: Counts) -> Result<(PillowRegions, WorkspaceLayout)> {
    let mut b = LayoutBuilder::new();
    let descs = DescRegions::reserve(&mut b, c.batch)?;
    let meta = b.staged(c.batch)?;
    let h_coeffs = b.staged(c.h_coeffs)?;
    let v_coeffs = b.staged(c.v_coeffs)?;
    let h_bounds = b.staged(c.h_bounds)?;
    let v_bounds = b.staged(c.v_bounds)?;
    let intermediate = b.scratch(c.intermediate);
    let regions = PillowRegions {
        descs,
        meta,
        h_coeffs,
        v_coeffs,
        h_bounds,
        v_bounds,
        intermediate,
    };
    Ok((regions, b.finish()))
}

/// Workspace able to serve any call within `bound`, whatever its filter.
///
/// Tables are sized for the widest filter (Lanczos, support 3).
pub fn workspace_requirements(bound: &ShapeBound) -> Result<WorkspaceRequirements> {
    let n = bound.batch;
    let counts = Counts {
        batch: n,
        h_coeffs: n * max_table_len(bound.max_in.w, bound.max_out.w),
        v_coeffs: n * max_table_len(bound.max_in.h, bound.max_out.h),
        h_bounds: n * 2 * bound.max_out.w,
        v_bounds: n * 2 * bound.max_out.h,
        intermediate: n * bound.max_in.h * bound.max_out.w * bound.format.num_channels(),
    };
    Ok(layout(counts)?.1.requirements())
}

/// Validated pillow resize call.
#[derive(Debug)]
pub struct PillowPlan<'a> {
    input: &'a ImageBatchVarShape,
    output: &'a ImageBatchVarShape,
    filter: PillowFilter,
    precision: PillowPrecision,
    variant: KernelVariant,
    geometry: Vec<(AxisGeometry, AxisGeometry)>,
    max_in: Size2D,
    max_out: Size2D,
    regions: PillowRegions,
    layout: WorkspaceLayout,
}

impl<'a> PillowPlan<'a> {
    pub fn new(
        input: &'a ImageBatchVarShape,
        output: &'a ImageBatchVarShape,
        interp: Interpolation,
        precision: PillowPrecision,
    ) -> Result<Self> {
        let variant = validate_pair(&SUPPORT, input, output)?;
        let filter = PillowFilter::from_interpolation(interp)?;
        if precision == PillowPrecision::Fixed && variant.kind != DataKind::U8 {
            return Err(EngineError::UnsupportedDataKind {
                op: OP,
                kind: variant.kind,
            });
        }

        let geometry: Vec<_> = input
            .images()
            .iter()
            .zip(output.images())
            .map(|(i, o)| {
                (
                    AxisGeometry::new(i.size.w, o.size.w, filter.support()),
                    AxisGeometry::new(i.size.h, o.size.h, filter.support()),
                )
            })
            .collect();

        let max_in = input.max_size();
        let max_out = output.max_size();
        let mut counts = Counts {
            batch: input.num_images(),
            intermediate: input.num_images() * max_in.h * max_out.w * variant.channels,
            ..Counts::default()
        };
        for ((h, v), o) in geometry.iter().zip(output.images()) {
            counts.h_coeffs += h.table_len(o.size.w);
            counts.v_coeffs += v.table_len(o.size.h);
            counts.h_bounds += 2 * o.size.w;
            counts.v_bounds += 2 * o.size.h;
        }
        let (regions, layout) = layout(counts)?;
        debug!(
            op = OP,
            images = counts.batch,
            ?filter,
            ?precision,
            h_coeffs = counts.h_coeffs,
            v_coeffs = counts.v_coeffs,
            "pillow resize planned"
        );
        Ok(Self {
            input,
            output,
            filter,
            precision,
            variant,
            geometry,
            max_in,
            max_out,
            regions,
            layout,
        })
    }

    pub fn variant(&self) -> KernelVariant {
        self.variant
    }

    pub fn filter(&self) -> PillowFilter {
        self.filter
    }

    pub fn precision(&self) -> PillowPrecision {
        self.precision
    }

    pub fn regions(&self) -> &PillowRegions {
        &self.regions
    }

    pub fn num_images(&self) -> usize {
        self.input.num_images()
    }

    /// Largest input and output extents, which fix the intermediate's pitch.
    pub fn max_in(&self) -> Size2D {
        self.max_in
    }

    pub fn max_out(&self) -> Size2D {
        self.max_out
    }

    /// Horizontal pass: one thread per intermediate pixel.
    pub fn horizontal_grid(&self) -> GridExtent {
        GridExtent::new(Size2D::new(self.max_out.w, self.max_in.h), self.num_images())
    }

    /// Vertical pass: one thread per output pixel.
    pub fn vertical_grid(&self) -> GridExtent {
        GridExtent::new(self.max_out, self.num_images())
    }

    fn write_axis(
        &self,
        dst_coeffs: &mut [u32],
        dst_bounds: &mut [i32],
        in_size: usize,
        out_size: usize,
        scratch: &mut Vec<f64>,
    ) {
        scratch.clear();
        scratch.resize(dst_coeffs.len(), 0.0);
        build_axis(in_size, out_size, self.filter, scratch, dst_bounds);
        for (slot, w) in dst_coeffs.iter_mut().zip(scratch.iter()) {
            *slot = match self.precision {
                PillowPrecision::Float => (*w as f32).to_bits(),
                PillowPrecision::Fixed => quantize(*w) as u32,
            };
        }
    }
}

fn offset(entries: usize) -> Result<i32> {
    i32::try_from(entries).map_err(|_| EngineError::CapacityExceeded {
        what: "coefficient entry",
        requested: entries,
        capacity: i32::MAX as usize,
    })
}

impl HostPlan for PillowPlan<'_> {
    fn op(&self) -> &'static str {
        OP
    }

    fn layout(&self) -> WorkspaceLayout {
        self.layout
    }

    fn build(&self, arena: &mut Arena<'_>) -> Result<()> {
        self.regions.descs.write(arena, self.input, self.output)?;

        let mut metas = Vec::with_capacity(self.num_images());
        let mut scratch = Vec::new();
        let (mut hc, mut vc, mut hb, mut vb) = (0usize, 0usize, 0usize, 0usize);
        for ((h, v), (i, o)) in self
            .geometry
            .iter()
            .zip(self.input.images().iter().zip(self.output.images()))
        {
            let h_len = h.table_len(o.size.w);
            let v_len = v.table_len(o.size.h);
            metas.push(PillowMeta {
                h_coeffs: offset(hc)?,
                h_bounds: offset(hb)?,
                h_ksize: offset(h.ksize)?,
                v_coeffs: offset(vc)?,
                v_bounds: offset(vb)?,
                v_ksize: offset(v.ksize)?,
            });

            let coeffs = arena.slice_mut(self.regions.h_coeffs)?;
            let coeffs = &mut coeffs[hc..hc + h_len];
            let mut bounds = vec![0i32; 2 * o.size.w];
            self.write_axis(coeffs, &mut bounds, i.size.w, o.size.w, &mut scratch);
            arena.slice_mut(self.regions.h_bounds)?[hb..hb + bounds.len()]
                .copy_from_slice(&bounds);

            let coeffs = arena.slice_mut(self.regions.v_coeffs)?;
            let coeffs = &mut coeffs[vc..vc + v_len];
            let mut bounds = vec![0i32; 2 * o.size.h];
            self.write_axis(coeffs, &mut bounds, i.size.h, o.size.h, &mut scratch);
            arena.slice_mut(self.regions.v_bounds)?[vb..vb + bounds.len()]
                .copy_from_slice(&bounds);

            hc += h_len;
            vc += v_len;
            hb += 2 * o.size.w;
            vb += 2 * o.size.h;
        }
        fill(arena, self.regions.meta, metas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coeffs::AxisTable;
    use crate::error::Status;
    use crate::format::ImageFormat;
    use crate::ops::testing::batch;
    use crate::workspace::AlignedHostBuffer;

    fn built(plan: &PillowPlan<'_>) -> AlignedHostBuffer {
        let mut host = AlignedHostBuffer::zeroed(plan.layout().staged_bytes());
        plan.build(&mut host.arena()).expect("build");
        host
    }

    #[test]
    fn tables_match_per_image_axis_tables() {
        let input = batch(ImageFormat::RGB8, &[(40, 20), (7, 9)], 0x10_0000);
        let output = batch(ImageFormat::RGB8, &[(10, 30), (21, 3)], 0x90_0000);
        let plan = PillowPlan::new(&input, &output, Interpolation::Lanczos, PillowPrecision::Float)
            .expect("valid call");
        let mut host = built(&plan);
        let mut arena = host.arena();

        let metas = arena.slice_mut(plan.regions().meta).expect("meta").to_vec();
        let expected = AxisTable::new(7, 21, PillowFilter::Lanczos);
        assert_eq!(metas[1].h_ksize as usize, expected.ksize());

        let hc = arena.slice_mut(plan.regions().h_coeffs).expect("coeffs").to_vec();
        let start = metas[1].h_coeffs as usize;
        let got: Vec<f32> = hc[start..start + expected.coeffs.len()]
            .iter()
            .map(|b| f32::from_bits(*b))
            .collect();
        assert_eq!(got, expected.as_f32());

        let hb = arena.slice_mut(plan.regions().h_bounds).expect("bounds").to_vec();
        let start = metas[1].h_bounds as usize;
        assert_eq!(&hb[start..start + 42], expected.bounds.as_slice());

        let vb = arena.slice_mut(plan.regions().v_bounds).expect("bounds").to_vec();
        let v0 = AxisTable::new(20, 30, PillowFilter::Lanczos);
        assert_eq!(&vb[..60], v0.bounds.as_slice());
    }

    #[test]
    fn fixed_point_tables_hold_quantized_weights() {
        let input = batch(ImageFormat::U8, &[(9, 4)], 0x1000);
        let output = batch(ImageFormat::U8, &[(4, 4)], 0x9000);
        let plan = PillowPlan::new(&input, &output, Interpolation::Cubic, PillowPrecision::Fixed)
            .expect("u8 fixed");
        let mut host = built(&plan);
        let mut arena = host.arena();
        let expected = AxisTable::new(9, 4, PillowFilter::Bicubic).quantized();
        let hc = arena.slice_mut(plan.regions().h_coeffs).expect("coeffs");
        let got: Vec<i32> = hc[..expected.len()].iter().map(|b| *b as i32).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn fixed_point_is_u8_only() {
        let input = batch(ImageFormat::F32, &[(8, 8)], 0x1000);
        let output = batch(ImageFormat::F32, &[(4, 4)], 0x9000);
        let err = PillowPlan::new(&input, &output, Interpolation::Linear, PillowPrecision::Fixed)
            .expect_err("f32 fixed");
        assert_eq!(err.status(), Status::InvalidDataType);
        let err = PillowPlan::new(&input, &output, Interpolation::Nearest, PillowPrecision::Float)
            .expect_err("nearest");
        assert_eq!(err.status(), Status::InvalidParameter);
    }

    #[test]
    fn area_is_not_a_pillow_filter() {
        let input = batch(ImageFormat::RGB8, &[(8, 8)], 0x1000);
        let output = batch(ImageFormat::RGB8, &[(4, 4)], 0x9000);
        let err = PillowPlan::new(&input, &output, Interpolation::Area, PillowPrecision::Float)
            .expect_err("area");
        assert_eq!(err.status(), Status::InvalidParameter);
    }

    #[test]
    fn worst_case_requirements_cover_every_filter() {
        let sizes_in = [(1920, 1080), (31, 17), (5, 300)];
        let sizes_out = [(640, 320), (100, 3), (17, 17)];
        let input = batch(ImageFormat::RGBA8, &sizes_in, 0x10_0000);
        let output = batch(ImageFormat::RGBA8, &sizes_out, 0x90_0000);
        let bound = ShapeBound::new(
            3,
            input.max_size(),
            output.max_size(),
            ImageFormat::RGBA8,
        );
        let req = workspace_requirements(&bound).expect("sizing");
        req.validate().expect("valid requirements");
        for interp in [
            Interpolation::Box,
            Interpolation::Linear,
            Interpolation::Hamming,
            Interpolation::Cubic,
            Interpolation::Lanczos,
        ] {
            let plan = PillowPlan::new(&input, &output, interp, PillowPrecision::Float)
                .expect("valid call");
            assert!(req.covers(&plan.layout()), "{interp:?}");
        }
    }

    #[test]
    fn grids_follow_the_two_passes() {
        let input = batch(ImageFormat::RGB8P, &[(40, 20), (7, 90)], 0x10_0000);
        let output = batch(ImageFormat::RGB8P, &[(10, 30), (21, 3)], 0x90_0000);
        let plan = PillowPlan::new(&input, &output, Interpolation::Box, PillowPrecision::Float)
            .expect("planar accepted");
        assert_eq!(plan.horizontal_grid(), GridExtent { width: 21, height: 90, depth: 2 });
        assert_eq!(plan.vertical_grid(), GridExtent { width: 21, height: 30, depth: 2 });
        assert_eq!(plan.regions().intermediate.len(), 2 * 90 * 21 * 3);
    }
}
