//! Rotation about an arbitrary point through per-image affine coefficients.
//!
//! Coefficients map destination to source (`[cos, sin, xs, -sin, cos, ys]`)
//! and come either from host angles or, for angles already on the device,
//! from a small prologue kernel that writes them into workspace scratch.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DescRegions, GridExtent, HostPlan, KernelVariant, Support, fill, validate_pair};
use crate::error::{EngineError, Result};
use crate::format::DataKind;
use crate::image::ImageBatchVarShape;
use crate::interp::Interpolation;
use crate::meta::AffineCoeffs;
use crate::tensor::TensorView;
use crate::workspace::{
    Arena, LayoutBuilder, Region, ShapeBound, WorkspaceLayout, WorkspaceRequirements,
};

pub const OP: &str = "rotate";

const SUPPORT: Support = Support {
    op: OP,
    kinds: &[
        DataKind::U8,
        DataKind::U16,
        DataKind::S16,
        DataKind::S32,
        DataKind::F32,
    ],
    planar: false,
};

/// Affine coefficients for a rotation of `angle_deg` degrees followed by a
/// shift.
pub fn affine_coeffs(angle_deg: f64, shift_x: f64, shift_y: f64) -> AffineCoeffs {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    [cos, sin, shift_x, -sin, cos, shift_y]
}

/// Shift that keeps `(cx, cy)` fixed under a rotation of `angle_deg`.
pub fn center_shift(cx: f64, cy: f64, angle_deg: f64) -> (f64, f64) {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    (
        (1.0 - cos) * cx - sin * cy,
        sin * cx + (1.0 - cos) * cy,
    )
}

/// Host-side rotation of one image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RotateAngle {
    pub angle_deg: f64,
    pub shift: (f64, f64),
}

impl RotateAngle {
    /// Rotation about the image point `(cx, cy)`.
    pub fn about(angle_deg: f64, cx: f64, cy: f64) -> Self {
        Self {
            angle_deg,
            shift: center_shift(cx, cy, angle_deg),
        }
    }

    pub fn coeffs(&self) -> AffineCoeffs {
        affine_coeffs(self.angle_deg, self.shift.0, self.shift.1)
    }
}

/// Where rotation parameters come from.
#[derive(Clone, Copy, Debug)]
pub enum RotateParams<'a> {
    Host(&'a [RotateAngle]),
    /// F64 `angle [N]` and `shift [N, 2]` tensors on the device.
    Device {
        angle: &'a TensorView,
        shift: &'a TensorView,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct RotateRegions {
    pub descs: DescRegions,
    /// Six coefficients per image; staged for host parameters, scratch
    /// otherwise.
    pub coeffs: Region<f64>,
}

fn layout(batch: usize, staged_coeffs: bool) -> Result<(RotateRegions, WorkspaceLayout)> {
    let mut b = LayoutBuilder::new();
    let descs = DescRegions::reserve(&mut b, batch)?;
    let coeffs = if staged_coeffs {
        b.staged(6 * batch)?
    } else {
        b.scratch(6 * batch)
    };
    Ok((RotateRegions { descs, coeffs }, b.finish()))
}

pub fn workspace_requirements(bound: &ShapeBound) -> Result<WorkspaceRequirements> {
    Ok(layout(bound.batch, true)?.1.requirements())
}

/// Validated rotate call.
#[derive(Debug)]
pub struct RotatePlan<'a> {
    input: &'a ImageBatchVarShape,
    output: &'a ImageBatchVarShape,
    params: RotateParams<'a>,
    interp: Interpolation,
    variant: KernelVariant,
    regions: RotateRegions,
    layout: WorkspaceLayout,
}

impl<'a> RotatePlan<'a> {
    /// `capacity` is the batch size the operator instance was built for.
    pub fn new(
        input: &'a ImageBatchVarShape,
        output: &'a ImageBatchVarShape,
        params: RotateParams<'a>,
        interp: Interpolation,
        capacity: usize,
    ) -> Result<Self> {
        let variant = validate_pair(&SUPPORT, input, output)?;
        let n = input.num_images();
        if n > capacity {
            return Err(EngineError::CapacityExceeded {
                what: "rotate image",
                requested: n,
                capacity,
            });
        }
        if !matches!(
            interp,
            Interpolation::Nearest | Interpolation::Linear | Interpolation::Cubic
        ) {
            return Err(EngineError::InvalidParameter(format!(
                "{OP} does not support {interp:?} interpolation"
            )));
        }
        let staged = match params {
            RotateParams::Host(angles) => {
                if angles.len() != n {
                    return Err(EngineError::ShapeMismatch(format!(
                        "{OP}: {} angles for {n} images",
                        angles.len()
                    )));
                }
                true
            }
            RotateParams::Device { angle, shift } => {
                angle.expect("angle", DataKind::F64, &[Some(n)])?;
                shift.expect("shift", DataKind::F64, &[Some(n), Some(2)])?;
                false
            }
        };
        let (regions, layout) = layout(n, staged)?;
        debug!(op = OP, images = n, ?interp, host_angles = staged, "rotate planned");
        Ok(Self {
            input,
            output,
            params,
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

    pub fn params(&self) -> RotateParams<'a> {
        self.params
    }

    pub fn regions(&self) -> &RotateRegions {
        &self.regions
    }

    pub fn num_images(&self) -> usize {
        self.input.num_images()
    }

    /// One thread per output pixel.
    pub fn grid(&self) -> GridExtent {
        GridExtent::new(self.output.max_size(), self.num_images())
    }
}

impl HostPlan for RotatePlan<'_> {
    fn op(&self) -> &'static str {
        OP
    }

    fn layout(&self) -> WorkspaceLayout {
        self.layout
    }

    fn build(&self, arena: &mut Arena<'_>) -> Result<()> {
        self.regions.descs.write(arena, self.input, self.output)?;
        if let RotateParams::Host(angles) = self.params {
            fill(
                arena,
                self.regions.coeffs,
                angles.iter().flat_map(RotateAngle::coeffs),
            )?;
        }
        Ok(())
    }
}
