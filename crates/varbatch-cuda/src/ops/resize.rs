//! General resize: nearest, bilinear, bicubic and area.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaStream, LaunchAsync};
use varbatch_core::config::OperatorConfig;
use varbatch_core::error::Result;
use varbatch_core::format::DataKind;
use varbatch_core::image::{ImageBatchVarShape, TensorBatch};
use varbatch_core::interp::Interpolation;
use varbatch_core::ops::resize::{OP, ResizePlan};
use varbatch_core::ops::{CallTracker, Phase};

use super::{planar_flag, select_kernel};
use crate::dispatch::execute;
use crate::launch::{KernelModule, launch_config_batched};
use crate::pool::WorkspaceMem;

const MODULE_NAME: &str = "varbatch_resize";
const KERNEL_NAMES: &[&str] = &["resize_u8", "resize_u16", "resize_s16", "resize_f32"];
const KERNELS: &[(DataKind, &str)] = &[
    (DataKind::U8, "resize_u8"),
    (DataKind::U16, "resize_u16"),
    (DataKind::S16, "resize_s16"),
    (DataKind::F32, "resize_f32"),
];

const RESIZE_CUDA_SRC: &str = r#"
struct ResizeMeta {
    float scale_x;
    float scale_y;
    float inv_scale_x;
    float inv_scale_y;
};

__device__ __forceinline__ void linear_tap(int d, float scale, int size,
                                           int* s0, int* s1, float* frac)
{
    const float f = ((float)d + 0.5f) * scale - 0.5f;
    int s = (int)floorf(f);
    float fr = f - (float)s;
    if (s < 0) { fr = 0.0f; s = 0; }
    if (s >= size - 1) { fr = 0.0f; s = size - 1; }
    *s0 = s;
    *s1 = min(s + 1, size - 1);
    *frac = fr;
}

__device__ __forceinline__ void area_up_tap(int d, float scale, float inv_scale, int size,
                                            int* s0, int* s1, float* frac)
{
    int s = (int)floorf((float)d * scale);
    float f = (float)(d + 1) - (float)(s + 1) * inv_scale;
    f = f <= 0.0f ? 0.0f : f - floorf(f);
    if (s < 0) { f = 0.0f; s = 0; }
    if (s >= size - 1) { f = 0.0f; s = size - 1; }
    *s0 = s;
    *s1 = min(s + 1, size - 1);
    *frac = f;
}

template <typename T>
__device__ __forceinline__ float blend(const ImageDesc& src, int sx, int sx1, float fx,
                                       int sy, int sy1, float fy, int c, int channels, int planar)
{
    const float p00 = load_f<T>(src, sx, sy, c, channels, planar);
    const float p01 = load_f<T>(src, sx1, sy, c, channels, planar);
    const float p10 = load_f<T>(src, sx, sy1, c, channels, planar);
    const float p11 = load_f<T>(src, sx1, sy1, c, channels, planar);
    return (1.0f - fy) * ((1.0f - fx) * p00 + fx * p01) + fy * ((1.0f - fx) * p10 + fx * p11);
}

struct AreaSpan {
    float fs1, fs2, cell;
    int s1, s2, first, last;
};

__device__ __forceinline__ AreaSpan area_span(int d, float scale, int size)
{
    AreaSpan a;
    a.fs1 = (float)d * scale;
    a.fs2 = a.fs1 + scale;
    a.cell = fminf(scale, (float)size - a.fs1);
    a.s2 = min((int)floorf(a.fs2), size - 1);
    a.s1 = min((int)ceilf(a.fs1), a.s2);
    a.first = ((float)a.s1 - a.fs1 > 1e-3f) ? a.s1 - 1 : a.s1;
    a.last = (a.fs2 - (float)a.s2 > 1e-3f) ? a.s2 : a.s2 - 1;
    return a;
}

__device__ __forceinline__ float area_weight(const AreaSpan& a, int i)
{
    if (i < a.s1) return (float)a.s1 - a.fs1;
    if (i >= a.s2) return fminf(fminf(a.fs2 - (float)a.s2, 1.0f), a.cell);
    return 1.0f;
}

template <typename T>
__device__ void resize_impl(const ImageDesc* __restrict__ src_descs,
                            const ImageDesc* __restrict__ dst_descs,
                            const ResizeMeta* __restrict__ metas,
                            int channels, int planar, int interp)
{
    const int n = blockIdx.z;
    const ImageDesc src = src_descs[n];
    const ImageDesc dst = dst_descs[n];
    const int x = blockIdx.x * blockDim.x + threadIdx.x;
    const int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= dst.width || y >= dst.height) return;
    const ResizeMeta m = metas[n];

    if (interp == 0) {
        const int sx = min((int)floorf((float)x * m.scale_x), src.width - 1);
        const int sy = min((int)floorf((float)y * m.scale_y), src.height - 1);
        for (int c = 0; c < channels; ++c) {
            *pixel_ptr<T>(dst, x, y, c, channels, planar) =
                *pixel_ptr<T>(src, sx, sy, c, channels, planar);
        }
    } else if (interp == 1 || (interp == 3 && !(m.scale_x >= 1.0f && m.scale_y >= 1.0f))) {
        int sx, sx1, sy, sy1;
        float fx, fy;
        if (interp == 1) {
            linear_tap(x, m.scale_x, src.width, &sx, &sx1, &fx);
            linear_tap(y, m.scale_y, src.height, &sy, &sy1, &fy);
        } else {
            area_up_tap(x, m.scale_x, m.inv_scale_x, src.width, &sx, &sx1, &fx);
            area_up_tap(y, m.scale_y, m.inv_scale_y, src.height, &sy, &sy1, &fy);
        }
        for (int c = 0; c < channels; ++c) {
            const float v = blend<T>(src, sx, sx1, fx, sy, sy1, fy, c, channels, planar);
            *pixel_ptr<T>(dst, x, y, c, channels, planar) = Sat<T>::round(v);
        }
    } else if (interp == 2) {
        const float fx = ((float)x + 0.5f) * m.scale_x - 0.5f;
        const float fy = ((float)y + 0.5f) * m.scale_y - 0.5f;
        const float sx = floorf(fx);
        const float sy = floorf(fy);
        for (int c = 0; c < channels; ++c) {
            const float v = cubic_sample<T>(src, (int)sx, (int)sy, fx - sx, fy - sy, c, channels, planar);
            *pixel_ptr<T>(dst, x, y, c, channels, planar) = Sat<T>::round(v);
        }
    } else {
        const AreaSpan ax = area_span(x, m.scale_x, src.width);
        const AreaSpan ay = area_span(y, m.scale_y, src.height);
        const float norm = ax.cell * ay.cell;
        for (int c = 0; c < channels; ++c) {
            float acc = 0.0f;
            for (int sy = ay.first; sy <= ay.last; ++sy) {
                const float wy = area_weight(ay, sy);
                float row = 0.0f;
                for (int sx = ax.first; sx <= ax.last; ++sx) {
                    row += area_weight(ax, sx) * load_f<T>(src, sx, sy, c, channels, planar);
                }
                acc += wy * row;
            }
            *pixel_ptr<T>(dst, x, y, c, channels, planar) = Sat<T>::round(acc / norm);
        }
    }
}

#define RESIZE_KERNEL(SUFFIX, T)                                                        \
extern "C" __global__ void resize_##SUFFIX(const ImageDesc* src, const ImageDesc* dst, \
                                           const ResizeMeta* meta, int channels,       \
                                           int planar, int interp)                     \
{                                                                                       \
    resize_impl<T>(src, dst, meta, channels, planar, interp);                           \
}

RESIZE_KERNEL(u8, u8)
RESIZE_KERNEL(u16, u16)
RESIZE_KERNEL(s16, s16)
RESIZE_KERNEL(f32, f32)
"#;

/// Batched resize between two variable-shape batches of one format.
pub struct Resize {
    kernels: KernelModule,
    block: [u32; 2],
}

impl Resize {
    pub fn compile(device: &Arc<CudaDevice>, config: &OperatorConfig) -> Result<Self> {
        Ok(Self {
            kernels: KernelModule::compile(
                device,
                MODULE_NAME,
                KERNEL_NAMES,
                RESIZE_CUDA_SRC,
                config,
            )?,
            block: config.block_dim,
        })
    }

    /// Resize image `i` of `input` into image `i` of `output`.
    pub fn run(
        &self,
        stream: &CudaStream,
        ws: &mut WorkspaceMem,
        input: &ImageBatchVarShape,
        output: &ImageBatchVarShape,
        interp: Interpolation,
    ) -> Result<()> {
        let mut call = CallTracker::begin(OP);
        let plan = ResizePlan::new(input, output, interp)?;
        let func = self.kernels.get(select_kernel(OP, plan.variant(), KERNELS)?)?;
        let cfg = launch_config_batched(plan.grid(), self.block)?;
        call.advance(Phase::Planning)?;

        execute(&mut call, stream, &plan, ws, |base| {
            let r = plan.regions();
            let v = plan.variant();
            // SAFETY: descriptor and meta arrays were staged into the workspace
            // for exactly `plan.num_images()` images; the grid's z extent
            // matches that count and every thread bounds-checks its pixel.
            unsafe {
                func.launch_on_stream(
                    stream,
                    cfg,
                    (
                        r.descs.src.device_ptr(base),
                        r.descs.dst.device_ptr(base),
                        r.meta.device_ptr(base),
                        v.channels as i32,
                        planar_flag(v),
                        plan.interpolation().code(),
                    ),
                )?;
            }
            Ok(())
        })
    }

    /// Same as [`Resize::run`] for uniform tensors.
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
    use varbatch_core::format::ImageFormat;
    use varbatch_core::ops::KernelVariant;

    #[test]
    fn kernel_table_matches_module() {
        for (_, name) in KERNELS {
            assert!(KERNEL_NAMES.contains(name));
            assert!(RESIZE_CUDA_SRC.contains(&format!("RESIZE_KERNEL({}", &name[7..])));
        }
    }

    #[test]
    fn s32_has_no_resize_kernel() {
        let err = select_kernel(OP, KernelVariant::of(ImageFormat::S32), KERNELS)
            .expect_err("s32");
        assert_eq!(err.status(), varbatch_core::Status::InvalidDataType);
    }
}
