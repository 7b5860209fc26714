//! Pillow-compatible antialiased resize as two separable passes through a
//! float intermediate held in workspace scratch.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaStream, LaunchAsync};
use varbatch_core::config::{OperatorConfig, PillowPrecision};
use varbatch_core::error::Result;
use varbatch_core::format::DataKind;
use varbatch_core::image::{ImageBatchVarShape, TensorBatch};
use varbatch_core::interp::Interpolation;
use varbatch_core::ops::pillow::{OP, PillowPlan};
use varbatch_core::ops::{CallTracker, Phase};

use super::{planar_flag, select_kernel};
use crate::dispatch::execute;
use crate::launch::{KernelModule, launch_config_batched};
use crate::pool::WorkspaceMem;

const MODULE_NAME: &str = "varbatch_pillow";
const KERNEL_NAMES: &[&str] = &[
    "pillow_h_u8",
    "pillow_h_u16",
    "pillow_h_s16",
    "pillow_h_f32",
    "pillow_v_u8",
    "pillow_v_u16",
    "pillow_v_s16",
    "pillow_v_f32",
    "pillow_h_fixed_u8",
    "pillow_v_fixed_u8",
];

/// `(horizontal, vertical)` kernels per element type.
const FLOAT_H: &[(DataKind, &str)] = &[
    (DataKind::U8, "pillow_h_u8"),
    (DataKind::U16, "pillow_h_u16"),
    (DataKind::S16, "pillow_h_s16"),
    (DataKind::F32, "pillow_h_f32"),
];
const FLOAT_V: &[(DataKind, &str)] = &[
    (DataKind::U8, "pillow_v_u8"),
    (DataKind::U16, "pillow_v_u16"),
    (DataKind::S16, "pillow_v_s16"),
    (DataKind::F32, "pillow_v_f32"),
];
const FIXED_H: &[(DataKind, &str)] = &[(DataKind::U8, "pillow_h_fixed_u8")];
const FIXED_V: &[(DataKind, &str)] = &[(DataKind::U8, "pillow_v_fixed_u8")];

const PILLOW_CUDA_SRC: &str = r#"
#define PILLOW_PRECISION_BITS 22

struct PillowMeta {
    int h_coeffs;
    int h_bounds;
    int h_ksize;
    int v_coeffs;
    int v_bounds;
    int v_ksize;
};

// Weights for this block's output positions, copied to shared memory when
// they fit. Every thread of the block must reach this call.
template <typename W>
__device__ const W* stage_coeffs(const W* table, int count)
{
    __shared__ W staged[COEFF_SMEM_BYTES / 4];
    const bool fits = count > 0 && count * 4 <= COEFF_SMEM_BYTES;
    if (fits) {
        const int tid = threadIdx.y * blockDim.x + threadIdx.x;
        const int threads = blockDim.x * blockDim.y;
        for (int i = tid; i < count; i += threads) {
            staged[i] = table[i];
        }
    }
    __syncthreads();
    return fits ? staged : table;
}

__device__ __forceinline__ int clip8(int acc)
{
    return min(max(acc >> PILLOW_PRECISION_BITS, 0), 255);
}

// Intermediate: per image max_in_h rows of max_out_w interleaved pixels.
__device__ __forceinline__ long long inter_index(int n, int y, int x, int max_in_h,
                                                 int max_out_w, int channels)
{
    return (((long long)n * max_in_h + y) * max_out_w + x) * channels;
}

template <typename T>
__device__ void pillow_h_impl(const ImageDesc* __restrict__ src_descs,
                              const ImageDesc* __restrict__ dst_descs,
                              const PillowMeta* __restrict__ metas,
                              const float* __restrict__ coeffs,
                              const int* __restrict__ bounds,
                              float* __restrict__ inter,
                              int max_in_h, int max_out_w, int channels, int planar)
{
    const int n = blockIdx.z;
    const ImageDesc src = src_descs[n];
    const int out_w = dst_descs[n].width;
    const PillowMeta m = metas[n];
    const int k = m.h_ksize;
    const int x0 = blockIdx.x * blockDim.x;
    const int span = min((int)blockDim.x, out_w - x0);
    const float* w = stage_coeffs<float>(coeffs + m.h_coeffs + (long long)x0 * k, span * k);

    const int x = x0 + threadIdx.x;
    const int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= out_w || y >= src.height) return;
    w += (x - x0) * k;
    const int xmin = bounds[m.h_bounds + 2 * x];
    const int count = bounds[m.h_bounds + 2 * x + 1] - xmin;
    float* out = inter + inter_index(n, y, x, max_in_h, max_out_w, channels);
    for (int c = 0; c < channels; ++c) {
        float acc = 0.0f;
        for (int i = 0; i < count; ++i) {
            acc += w[i] * load_f<T>(src, xmin + i, y, c, channels, planar);
        }
        out[c] = acc;
    }
}

template <typename T>
__device__ void pillow_v_impl(const ImageDesc* __restrict__ dst_descs,
                              const PillowMeta* __restrict__ metas,
                              const float* __restrict__ coeffs,
                              const int* __restrict__ bounds,
                              const float* __restrict__ inter,
                              int max_in_h, int max_out_w, int channels, int planar)
{
    const int n = blockIdx.z;
    const ImageDesc dst = dst_descs[n];
    const PillowMeta m = metas[n];
    const int k = m.v_ksize;
    const int y0 = blockIdx.y * blockDim.y;
    const int span = min((int)blockDim.y, dst.height - y0);
    const float* w = stage_coeffs<float>(coeffs + m.v_coeffs + (long long)y0 * k, span * k);

    const int x = blockIdx.x * blockDim.x + threadIdx.x;
    const int y = y0 + threadIdx.y;
    if (x >= dst.width || y >= dst.height) return;
    w += (y - y0) * k;
    const int ymin = bounds[m.v_bounds + 2 * y];
    const int count = bounds[m.v_bounds + 2 * y + 1] - ymin;
    for (int c = 0; c < channels; ++c) {
        float acc = 0.0f;
        for (int i = 0; i < count; ++i) {
            acc += w[i] * inter[inter_index(n, ymin + i, x, max_in_h, max_out_w, channels) + c];
        }
        *pixel_ptr<T>(dst, x, y, c, channels, planar) = Sat<T>::round(acc);
    }
}

extern "C" __global__ void pillow_h_fixed_u8(const ImageDesc* __restrict__ src_descs,
                                             const ImageDesc* __restrict__ dst_descs,
                                             const PillowMeta* __restrict__ metas,
                                             const int* __restrict__ coeffs,
                                             const int* __restrict__ bounds,
                                             float* __restrict__ inter,
                                             int max_in_h, int max_out_w, int channels, int planar)
{
    const int n = blockIdx.z;
    const ImageDesc src = src_descs[n];
    const int out_w = dst_descs[n].width;
    const PillowMeta m = metas[n];
    const int k = m.h_ksize;
    const int x0 = blockIdx.x * blockDim.x;
    const int span = min((int)blockDim.x, out_w - x0);
    const int* w = stage_coeffs<int>(coeffs + m.h_coeffs + (long long)x0 * k, span * k);

    const int x = x0 + threadIdx.x;
    const int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= out_w || y >= src.height) return;
    w += (x - x0) * k;
    const int xmin = bounds[m.h_bounds + 2 * x];
    const int count = bounds[m.h_bounds + 2 * x + 1] - xmin;
    float* out = inter + inter_index(n, y, x, max_in_h, max_out_w, channels);
    for (int c = 0; c < channels; ++c) {
        int acc = 1 << (PILLOW_PRECISION_BITS - 1);
        for (int i = 0; i < count; ++i) {
            acc += w[i] * (int)*pixel_ptr<u8>(src, xmin + i, y, c, channels, planar);
        }
        out[c] = (float)clip8(acc);
    }
}

extern "C" __global__ void pillow_v_fixed_u8(const ImageDesc* __restrict__ dst_descs,
                                             const PillowMeta* __restrict__ metas,
                                             const int* __restrict__ coeffs,
                                             const int* __restrict__ bounds,
                                             const float* __restrict__ inter,
                                             int max_in_h, int max_out_w, int channels, int planar)
{
    const int n = blockIdx.z;
    const ImageDesc dst = dst_descs[n];
    const PillowMeta m = metas[n];
    const int k = m.v_ksize;
    const int y0 = blockIdx.y * blockDim.y;
    const int span = min((int)blockDim.y, dst.height - y0);
    const int* w = stage_coeffs<int>(coeffs + m.v_coeffs + (long long)y0 * k, span * k);

    const int x = blockIdx.x * blockDim.x + threadIdx.x;
    const int y = y0 + threadIdx.y;
    if (x >= dst.width || y >= dst.height) return;
    w += (y - y0) * k;
    const int ymin = bounds[m.v_bounds + 2 * y];
    const int count = bounds[m.v_bounds + 2 * y + 1] - ymin;
    for (int c = 0; c < channels; ++c) {
        int acc = 1 << (PILLOW_PRECISION_BITS - 1);
        for (int i = 0; i < count; ++i) {
            acc += w[i] * (int)inter[inter_index(n, ymin + i, x, max_in_h, max_out_w, channels) + c];
        }
        *pixel_ptr<u8>(dst, x, y, c, channels, planar) = Sat<u8>::round((float)clip8(acc));
    }
}

#define PILLOW_KERNELS(SUFFIX, T)                                                          \
extern "C" __global__ void pillow_h_##SUFFIX(const ImageDesc* src, const ImageDesc* dst,  \
                                             const PillowMeta* meta, const float* coeffs, \
                                             const int* bounds, float* inter,             \
                                             int max_in_h, int max_out_w,                 \
                                             int channels, int planar)                    \
{                                                                                          \
    pillow_h_impl<T>(src, dst, meta, coeffs, bounds, inter, max_in_h, max_out_w,          \
                     channels, planar);                                                    \
}                                                                                          \
extern "C" __global__ void pillow_v_##SUFFIX(const ImageDesc* dst, const PillowMeta* meta, \
                                             const float* coeffs, const int* bounds,      \
                                             const float* inter, int max_in_h,            \
                                             int max_out_w, int channels, int planar)     \
{                                                                                          \
    pillow_v_impl<T>(dst, meta, coeffs, bounds, inter, max_in_h, max_out_w,               \
                     channels, planar);                                                    \
}

PILLOW_KERNELS(u8, u8)
PILLOW_KERNELS(u16, u16)
PILLOW_KERNELS(s16, s16)
PILLOW_KERNELS(f32, f32)
"#;

/// Batched Pillow-style resize (box, bilinear, hamming, bicubic, lanczos).
pub struct PillowResize {
    kernels: KernelModule,
    block: [u32; 2],
    precision: PillowPrecision,
}

impl PillowResize {
    pub fn compile(device: &Arc<CudaDevice>, config: &OperatorConfig) -> Result<Self> {
        Ok(Self {
            kernels: KernelModule::compile(
                device,
                MODULE_NAME,
                KERNEL_NAMES,
                PILLOW_CUDA_SRC,
                config,
            )?,
            block: config.block_dim,
            precision: config.pillow_precision,
        })
    }

    pub fn precision(&self) -> PillowPrecision {
        self.precision
    }

    /// `interp` selects the filter: Linear, Cubic, Lanczos, Hamming or Box.
    /// Nearest and Area are rejected.
    pub fn run(
        &self,
        stream: &CudaStream,
        ws: &mut WorkspaceMem,
        input: &ImageBatchVarShape,
        output: &ImageBatchVarShape,
        interp: Interpolation,
    ) -> Result<()> {
        let mut call = CallTracker::begin(OP);
        let plan = PillowPlan::new(input, output, interp, self.precision)?;
        let (h_table, v_table) = match plan.precision() {
            PillowPrecision::Float => (FLOAT_H, FLOAT_V),
            PillowPrecision::Fixed => (FIXED_H, FIXED_V),
        };
        let horizontal = self.kernels.get(select_kernel(OP, plan.variant(), h_table)?)?;
        let vertical = self.kernels.get(select_kernel(OP, plan.variant(), v_table)?)?;
        let h_cfg = launch_config_batched(plan.horizontal_grid(), self.block)?;
        let v_cfg = launch_config_batched(plan.vertical_grid(), self.block)?;
        let max_in_h = plan.max_in().h as i32;
        let max_out_w = plan.max_out().w as i32;
        call.advance(Phase::Planning)?;

        execute(&mut call, stream, &plan, ws, |base| {
            let r = plan.regions();
            let v = plan.variant();
            // SAFETY: every array was laid out for this batch by the plan; the
            // intermediate region holds `N × max_in_h × max_out_w × C` floats,
            // which bounds every index both passes compute. The vertical pass
            // is ordered after the horizontal one on the same stream.
            unsafe {
                horizontal.launch_on_stream(
                    stream,
                    h_cfg,
                    (
                        r.descs.src.device_ptr(base),
                        r.descs.dst.device_ptr(base),
                        r.meta.device_ptr(base),
                        r.h_coeffs.device_ptr(base),
                        r.h_bounds.device_ptr(base),
                        r.intermediate.device_ptr(base),
                        max_in_h,
                        max_out_w,
                        v.channels as i32,
                        planar_flag(v),
                    ),
                )?;
                vertical.launch_on_stream(
                    stream,
                    v_cfg,
                    (
                        r.descs.dst.device_ptr(base),
                        r.meta.device_ptr(base),
                        r.v_coeffs.device_ptr(base),
                        r.v_bounds.device_ptr(base),
                        r.intermediate.device_ptr(base),
                        max_in_h,
                        max_out_w,
                        v.channels as i32,
                        planar_flag(v),
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
        interp: Interpolation,
    ) -> Result<()> {
        self.run(stream, ws, &input.to_var_shape()?, &output.to_var_shape()?, interp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varbatch_core::coeffs::PRECISION_BITS;
    use varbatch_core::format::ImageFormat;
    use varbatch_core::ops::KernelVariant;

    #[test]
    fn fixed_point_shift_matches_host_tables() {
        assert!(PILLOW_CUDA_SRC.contains(&format!("#define PILLOW_PRECISION_BITS {PRECISION_BITS}")));
    }

    #[test]
    fn every_table_entry_is_compiled() {
        for (_, name) in FLOAT_H.iter().chain(FLOAT_V).chain(FIXED_H).chain(FIXED_V) {
            assert!(KERNEL_NAMES.contains(name), "{name}");
        }
    }

    #[test]
    fn fixed_point_has_only_u8_kernels() {
        let v = KernelVariant::of(ImageFormat::RGB16);
        assert!(select_kernel(OP, v, FLOAT_H).is_ok());
        assert!(select_kernel(OP, v, FIXED_H).is_err());
    }
}
