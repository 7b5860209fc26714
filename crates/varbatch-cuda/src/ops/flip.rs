//! Per-image flip. Code 0 flips around the x axis (rows reversed), a
//! positive code around the y axis (columns reversed), a negative code both.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaStream, LaunchAsync};
use varbatch_core::config::OperatorConfig;
use varbatch_core::error::Result;
use varbatch_core::format::DataKind;
use varbatch_core::image::{ImageBatchVarShape, TensorBatch};
use varbatch_core::ops::flip::{FlipPlan, OP};
use varbatch_core::ops::{CallTracker, Phase};

use super::{planar_flag, select_kernel};
use crate::dispatch::execute;
use crate::launch::{KernelModule, launch_config_batched};
use crate::pool::WorkspaceMem;

const MODULE_NAME: &str = "varbatch_flip";
const KERNEL_NAMES: &[&str] = &["flip_u8", "flip_u16", "flip_s16", "flip_s32", "flip_f32"];
const KERNELS: &[(DataKind, &str)] = &[
    (DataKind::U8, "flip_u8"),
    (DataKind::U16, "flip_u16"),
    (DataKind::S16, "flip_s16"),
    (DataKind::S32, "flip_s32"),
    (DataKind::F32, "flip_f32"),
];

const FLIP_CUDA_SRC: &str = r#"
template <typename T>
__device__ void flip_impl(const ImageDesc* __restrict__ src_descs,
                          const ImageDesc* __restrict__ dst_descs,
                          const int* __restrict__ codes,
                          int channels, int planar)
{
    const int n = blockIdx.z;
    const ImageDesc src = src_descs[n];
    const ImageDesc dst = dst_descs[n];
    const int x = blockIdx.x * blockDim.x + threadIdx.x;
    const int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= dst.width || y >= dst.height) return;
    const int code = codes[n];
    const int sx = code != 0 ? src.width - 1 - x : x;
    const int sy = code <= 0 ? src.height - 1 - y : y;
    for (int c = 0; c < channels; ++c) {
        *pixel_ptr<T>(dst, x, y, c, channels, planar) =
            *pixel_ptr<T>(src, sx, sy, c, channels, planar);
    }
}

#define FLIP_KERNEL(SUFFIX, T)                                                          \
extern "C" __global__ void flip_##SUFFIX(const ImageDesc* src, const ImageDesc* dst,   \
                                         const int* codes, int channels, int planar)   \
{                                                                                       \
    flip_impl<T>(src, dst, codes, channels, planar);                                    \
}

FLIP_KERNEL(u8, u8)
FLIP_KERNEL(u16, u16)
FLIP_KERNEL(s16, s16)
FLIP_KERNEL(s32, s32)
FLIP_KERNEL(f32, f32)
"#;

pub struct Flip {
    kernels: KernelModule,
    block: [u32; 2],
}

impl Flip {
    pub fn compile(device: &Arc<CudaDevice>, config: &OperatorConfig) -> Result<Self> {
        Ok(Self {
            kernels: KernelModule::compile(
                device,
                MODULE_NAME,
                KERNEL_NAMES,
                FLIP_CUDA_SRC,
                config,
            )?,
            block: config.block_dim,
        })
    }

    /// Flip image `i` according to `codes[i]`. Input and output must not
    /// overlap.
    pub fn run(
        &self,
        stream: &CudaStream,
        ws: &mut WorkspaceMem,
        input: &ImageBatchVarShape,
        output: &ImageBatchVarShape,
        codes: &[i32],
    ) -> Result<()> {
        let mut call = CallTracker::begin(OP);
        let plan = FlipPlan::new(input, output, codes)?;
        let func = self.kernels.get(select_kernel(OP, plan.variant(), KERNELS)?)?;
        let cfg = launch_config_batched(plan.grid(), self.block)?;
        call.advance(Phase::Planning)?;

        execute(&mut call, stream, &plan, ws, |base| {
            let r = plan.regions();
            let v = plan.variant();
            // SAFETY: one code and one descriptor pair per z slice; threads
            // outside their output image return before any access.
            unsafe {
                func.launch_on_stream(
                    stream,
                    cfg,
                    (
                        r.descs.src.device_ptr(base),
                        r.descs.dst.device_ptr(base),
                        r.codes.device_ptr(base),
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
        codes: &[i32],
    ) -> Result<()> {
        self.run(stream, ws, &input.to_var_shape()?, &output.to_var_shape()?, codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_table_matches_module() {
        assert_eq!(KERNELS.len(), KERNEL_NAMES.len());
        for (_, name) in KERNELS {
            assert!(FLIP_CUDA_SRC.contains(&format!("FLIP_KERNEL({}", &name[5..])));
        }
    }
}
