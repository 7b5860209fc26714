use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaStream, LaunchAsync};
use varbatch_core::config::OperatorConfig;
use varbatch_core::error::{EngineError, Result};
use varbatch_core::format::DataKind;
use varbatch_core::image::{ImageBatchVarShape, TensorBatch};
use varbatch_core::ops::normalize::{NormalizeArgs, NormalizePlan, OP};
use varbatch_core::ops::{CallTracker, KernelVariant, Phase};

use super::{planar_flag, select_kernel};
use crate::dispatch::execute;
use crate::launch::{KernelModule, launch_config_batched};
use crate::pool::WorkspaceMem;

const MODULE_NAME: &str = "varbatch_normalize";
const KERNEL_NAMES: &[&str] = &[
    "normalize_u8_u8",
    "normalize_u8_f32",
    "normalize_u16_u16",
    "normalize_u16_f32",
    "normalize_s16_s16",
    "normalize_s16_f32",
    "normalize_s32_s32",
    "normalize_s32_f32",
    "normalize_f32_f32",
];
/// Same-type kernels, keyed by input type.
const SAME_TYPE: &[(DataKind, &str)] = &[
    (DataKind::U8, "normalize_u8_u8"),
    (DataKind::U16, "normalize_u16_u16"),
    (DataKind::S16, "normalize_s16_s16"),
    (DataKind::S32, "normalize_s32_s32"),
    (DataKind::F32, "normalize_f32_f32"),
];
/// Kernels writing f32, keyed by input type.
const TO_F32: &[(DataKind, &str)] = &[
    (DataKind::U8, "normalize_u8_f32"),
    (DataKind::U16, "normalize_u16_f32"),
    (DataKind::S16, "normalize_s16_f32"),
    (DataKind::S32, "normalize_s32_f32"),
    (DataKind::F32, "normalize_f32_f32"),
];

const NORMALIZE_CUDA_SRC: &str = r#"
struct NormalizeMeta {
    int base_offset;
    int base_sample_stride;
    int base_channel_stride;
    int scale_offset;
    int scale_sample_stride;
    int scale_channel_stride;
    float global_scale;
    float global_shift;
    float epsilon;
    int scale_is_stddev;
    int _pad[2];
};

template <typename I, typename O>
__device__ void normalize_impl(const ImageDesc* __restrict__ src_descs,
                               const ImageDesc* __restrict__ dst_descs,
                               const NormalizeMeta* __restrict__ meta,
                               const float* __restrict__ values,
                               int channels, int planar)
{
    const int n = blockIdx.z;
    const ImageDesc src = src_descs[n];
    const ImageDesc dst = dst_descs[n];
    const int x = blockIdx.x * blockDim.x + threadIdx.x;
    const int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= src.width || y >= src.height) return;
    const NormalizeMeta m = *meta;
    for (int c = 0; c < channels; ++c) {
        const float base = values[m.base_offset + n * m.base_sample_stride
                                  + c * m.base_channel_stride];
        float scale = values[m.scale_offset + n * m.scale_sample_stride
                             + c * m.scale_channel_stride];
        if (m.scale_is_stddev) {
            scale = 1.0f / sqrtf(scale * scale + m.epsilon);
        }
        const float v = (load_f<I>(src, x, y, c, channels, planar) - base) * scale
                        * m.global_scale + m.global_shift;
        *pixel_ptr<O>(dst, x, y, c, channels, planar) = Sat<O>::round(v);
    }
}

#define NORMALIZE_KERNEL(IN, OUT)                                                       \
extern "C" __global__ void normalize_##IN##_##OUT(const ImageDesc* src,                \
                                                  const ImageDesc* dst,                \
                                                  const NormalizeMeta* meta,           \
                                                  const float* values,                 \
                                                  int channels, int planar)            \
{                                                                                       \
    normalize_impl<IN, OUT>(src, dst, meta, values, channels, planar);                  \
}

NORMALIZE_KERNEL(u8, u8)
NORMALIZE_KERNEL(u8, f32)
NORMALIZE_KERNEL(u16, u16)
NORMALIZE_KERNEL(u16, f32)
NORMALIZE_KERNEL(s16, s16)
NORMALIZE_KERNEL(s16, f32)
NORMALIZE_KERNEL(s32, s32)
NORMALIZE_KERNEL(s32, f32)
NORMALIZE_KERNEL(f32, f32)
"#;

pub struct Normalize {
    kernels: KernelModule,
    block: [u32; 2],
}

impl Normalize {
    pub fn compile(device: &Arc<CudaDevice>, config: &OperatorConfig) -> Result<Self> {
        Ok(Self {
            kernels: KernelModule::compile(
                device,
                MODULE_NAME,
                KERNEL_NAMES,
                NORMALIZE_CUDA_SRC,
                config,
            )?,
            block: config.block_dim,
        })
    }

    /// Normalize every image; the output keeps the input type or is f32.
    pub fn run(
        &self,
        stream: &CudaStream,
        ws: &mut WorkspaceMem,
        input: &ImageBatchVarShape,
        output: &ImageBatchVarShape,
        args: &NormalizeArgs,
    ) -> Result<()> {
        let mut call = CallTracker::begin(OP);
        let plan = NormalizePlan::new(input, output, args)?;
        let v = plan.variant();
        let func = self.kernels.get(kernel_for(v, plan.out_kind())?)?;
        let cfg = launch_config_batched(plan.grid(), self.block)?;
        call.advance(Phase::Planning)?;

        execute(&mut call, stream, &plan, ws, |base| {
            let r = plan.regions();
            // SAFETY: parameter indices were checked to broadcast over the
            // batch when the plan was built; pixel threads are bounds-checked.
            unsafe {
                func.launch_on_stream(
                    stream,
                    cfg,
                    (
                        r.descs.src.device_ptr(base),
                        r.descs.dst.device_ptr(base),
                        r.meta.device_ptr(base),
                        r.values.device_ptr(base),
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
        args: &NormalizeArgs,
    ) -> Result<()> {
        self.run(stream, ws, &input.to_var_shape()?, &output.to_var_shape()?, args)
    }
}

fn kernel_for(variant: KernelVariant, out: DataKind) -> Result<&'static str> {
    match out {
        DataKind::F32 => select_kernel(OP, variant, TO_F32),
        k if k == variant.kind => select_kernel(OP, variant, SAME_TYPE),
        _ => Err(EngineError::UnsupportedConversion {
            op: OP,
            input: variant.kind,
            output: out,
        }),
    }
}
