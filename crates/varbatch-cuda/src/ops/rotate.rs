//! Rotation through per-image inverse affine coefficients.
//!
//! Host angles are turned into coefficients while the workspace is built.
//! Device angles go through `rotate_coeffs`, a one-thread-per-image prologue
//! that writes the same six coefficients into workspace scratch ahead of the
//! pixel kernel on the same stream.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaStream, LaunchAsync};
use varbatch_core::config::OperatorConfig;
use varbatch_core::error::Result;
use varbatch_core::format::DataKind;
use varbatch_core::image::{ImageBatchVarShape, TensorBatch};
use varbatch_core::interp::Interpolation;
use varbatch_core::ops::rotate::{OP, RotateParams, RotatePlan};
use varbatch_core::ops::{CallTracker, Phase};

use super::{planar_flag, select_kernel};
use crate::dispatch::execute;
use crate::launch::{KernelModule, launch_config_1d, launch_config_batched};
use crate::pool::WorkspaceMem;

const MODULE_NAME: &str = "varbatch_rotate";
const COEFFS_KERNEL: &str = "rotate_coeffs";
const KERNEL_NAMES: &[&str] = &[
    COEFFS_KERNEL,
    "rotate_u8",
    "rotate_u16",
    "rotate_s16",
    "rotate_s32",
    "rotate_f32",
];
const KERNELS: &[(DataKind, &str)] = &[
    (DataKind::U8, "rotate_u8"),
    (DataKind::U16, "rotate_u16"),
    (DataKind::S16, "rotate_s16"),
    (DataKind::S32, "rotate_s32"),
    (DataKind::F32, "rotate_f32"),
];

const ROTATE_CUDA_SRC: &str = r#"
extern "C" __global__ void rotate_coeffs(unsigned long long angle_base, long long angle_stride,
                                         unsigned long long shift_base, long long shift_stride0,
                                         long long shift_stride1, double* __restrict__ coeffs,
                                         int n)
{
    const int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i >= n) return;
    const double angle = *(const double*)((const char*)angle_base + (long long)i * angle_stride);
    const char* shift = (const char*)shift_base + (long long)i * shift_stride0;
    const double sx = *(const double*)shift;
    const double sy = *(const double*)(shift + shift_stride1);
    const double rad = angle * (3.141592653589793 / 180.0);
    double s, c;
    sincos(rad, &s, &c);
    double* a = coeffs + 6 * i;
    a[0] = c;
    a[1] = s;
    a[2] = sx;
    a[3] = -s;
    a[4] = c;
    a[5] = sy;
}

template <typename T>
__device__ void rotate_impl(const ImageDesc* __restrict__ src_descs,
                            const ImageDesc* __restrict__ dst_descs,
                            const double* __restrict__ coeffs,
                            int channels, int planar, int interp)
{
    const int n = blockIdx.z;
    const ImageDesc src = src_descs[n];
    const ImageDesc dst = dst_descs[n];
    const int x = blockIdx.x * blockDim.x + threadIdx.x;
    const int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= dst.width || y >= dst.height) return;
    const double* a = coeffs + 6 * n;

    const double xs = (double)x - a[2];
    const double ys = (double)y - a[5];
    const float src_x = (float)(xs * a[0] + ys * -a[1]);
    const float src_y = (float)(xs * -a[3] + ys * a[4]);
    // Uncovered destination pixels keep their value.
    if (!(src_x > -0.5f && src_x < (float)src.width && src_y > -0.5f && src_y < (float)src.height)) {
        return;
    }

    if (interp == 0) {
        const int x1 = min((int)floorf(src_x + 0.5f), src.width - 1);
        const int y1 = min((int)floorf(src_y + 0.5f), src.height - 1);
        for (int c = 0; c < channels; ++c) {
            *pixel_ptr<T>(dst, x, y, c, channels, planar) =
                *pixel_ptr<T>(src, x1, y1, c, channels, planar);
        }
    } else if (interp == 1) {
        const int x1 = (int)floorf(src_x);
        const int y1 = (int)floorf(src_y);
        const int x2 = x1 + 1;
        const int y2 = y1 + 1;
        const int x1r = max(x1, 0);
        const int y1r = max(y1, 0);
        const int x2r = min(x2, src.width - 1);
        const int y2r = min(y2, src.height - 1);
        const float x1f = (float)x1, x2f = (float)x2, y1f = (float)y1, y2f = (float)y2;
        for (int c = 0; c < channels; ++c) {
            float out = 0.0f;
            out += load_f<T>(src, x1r, y1r, c, channels, planar) * ((x2f - src_x) * (y2f - src_y));
            out += load_f<T>(src, x2r, y1r, c, channels, planar) * ((src_x - x1f) * (y2f - src_y));
            out += load_f<T>(src, x1r, y2r, c, channels, planar) * ((x2f - src_x) * (src_y - y1f));
            out += load_f<T>(src, x2r, y2r, c, channels, planar) * ((src_x - x1f) * (src_y - y1f));
            *pixel_ptr<T>(dst, x, y, c, channels, planar) = Sat<T>::round(out);
        }
    } else {
        const float sx = floorf(src_x);
        const float sy = floorf(src_y);
        for (int c = 0; c < channels; ++c) {
            const float v = cubic_sample<T>(src, (int)sx, (int)sy, src_x - sx, src_y - sy,
                                            c, channels, planar);
            *pixel_ptr<T>(dst, x, y, c, channels, planar) = Sat<T>::round(v);
        }
    }
}

#define ROTATE_KERNEL(SUFFIX, T)                                                        \
extern "C" __global__ void rotate_##SUFFIX(const ImageDesc* src, const ImageDesc* dst, \
                                           const double* coeffs, int channels,         \
                                           int planar, int interp)                     \
{                                                                                       \
    rotate_impl<T>(src, dst, coeffs, channels, planar, interp);                         \
}

ROTATE_KERNEL(u8, u8)
ROTATE_KERNEL(u16, u16)
ROTATE_KERNEL(s16, s16)
ROTATE_KERNEL(s32, s32)
ROTATE_KERNEL(f32, f32)
"#;

/// Batched rotate for up to `max_varshape_batch` images per call.
pub struct Rotate {
    kernels: KernelModule,
    block: [u32; 2],
    capacity: usize,
}

impl Rotate {
    pub fn compile(device: &Arc<CudaDevice>, config: &OperatorConfig) -> Result<Self> {
        Ok(Self {
            kernels: KernelModule::compile(
                device,
                MODULE_NAME,
                KERNEL_NAMES,
                ROTATE_CUDA_SRC,
                config,
            )?,
            block: config.block_dim,
            capacity: config.max_varshape_batch,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rotate image `i` of `input` into image `i` of `output`. Output pixels
    /// whose source falls outside the input are left unchanged.
    pub fn run(
        &self,
        stream: &CudaStream,
        ws: &mut WorkspaceMem,
        input: &ImageBatchVarShape,
        output: &ImageBatchVarShape,
        params: RotateParams<'_>,
        interp: Interpolation,
    ) -> Result<()> {
        let mut call = CallTracker::begin(OP);
        let plan = RotatePlan::new(input, output, params, interp, self.capacity)?;
        let func = self.kernels.get(select_kernel(OP, plan.variant(), KERNELS)?)?;
        let cfg = launch_config_batched(plan.grid(), self.block)?;
        let prologue = match plan.params() {
            RotateParams::Host(_) => None,
            RotateParams::Device { angle, shift } => Some((
                self.kernels.get(COEFFS_KERNEL)?,
                launch_config_1d(plan.num_images())?,
                angle,
                shift,
            )),
        };
        call.advance(Phase::Planning)?;

        execute(&mut call, stream, &plan, ws, |base| {
            let r = plan.regions();
            let v = plan.variant();
            let coeffs = r.coeffs.device_ptr(base);
            // SAFETY: the angle and shift tensors were checked for type, shape
            // and an f64-contiguous innermost axis; the prologue writes six
            // doubles per image into scratch sized for the batch, and runs
            // before the pixel kernel on the same stream.
            unsafe {
                if let Some((coeffs_fn, cfg_1d, angle, shift)) = prologue {
                    coeffs_fn.launch_on_stream(
                        stream,
                        cfg_1d,
                        (
                            angle.base,
                            angle.sample_stride() as i64,
                            shift.base,
                            shift.strides[0] as i64,
                            shift.strides[1] as i64,
                            coeffs,
                            plan.num_images() as i32,
                        ),
                    )?;
                }
                func.launch_on_stream(
                    stream,
                    cfg,
                    (
                        r.descs.src.device_ptr(base),
                        r.descs.dst.device_ptr(base),
                        coeffs,
                        v.channels as i32,
                        planar_flag(v),
                        plan.interpolation().code(),
                    ),
                )?;
            }
            Ok(())
        })
    }

    pub fn run_tensor(
        &self,
        stream: &CudaStream,
        ws: &mut WorkspaceMem,
        input: &TensorBatch,
        output: &TensorBatch,
        params: RotateParams<'_>,
        interp: Interpolation,
    ) -> Result<()> {
        let input = input.to_var_shape()?;
        let output = output.to_var_shape()?;
        self.run(stream, ws, &input, &output, params, interp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_table_matches_module() {
        for (_, name) in KERNELS {
            assert!(KERNEL_NAMES.contains(name));
            assert!(ROTATE_CUDA_SRC.contains(&format!("ROTATE_KERNEL({}", &name[7..])));
        }
        assert!(ROTATE_CUDA_SRC.contains(COEFFS_KERNEL));
    }
}
