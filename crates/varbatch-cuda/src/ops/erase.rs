//! Rectangle erase. Out-of-place calls first copy every input image through
//! to its output, then overwrite the erased rectangles.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaStream, LaunchAsync};
use varbatch_core::config::OperatorConfig;
use varbatch_core::error::Result;
use varbatch_core::format::DataKind;
use varbatch_core::image::{ImageBatchVarShape, TensorBatch};
use varbatch_core::ops::erase::{ErasePlan, EraseRegion, OP};
use varbatch_core::ops::{CallTracker, Phase};

use super::{planar_flag, select_kernel};
use crate::dispatch::execute;
use crate::launch::{KernelModule, launch_config_batched};
use crate::pool::WorkspaceMem;

const MODULE_NAME: &str = "varbatch_erase";
const COPY_KERNEL: &str = "varshape_copy";
const KERNEL_NAMES: &[&str] = &[
    COPY_KERNEL,
    "erase_u8",
    "erase_u16",
    "erase_s16",
    "erase_s32",
    "erase_f32",
];
const KERNELS: &[(DataKind, &str)] = &[
    (DataKind::U8, "erase_u8"),
    (DataKind::U16, "erase_u16"),
    (DataKind::S16, "erase_s16"),
    (DataKind::S32, "erase_s32"),
    (DataKind::F32, "erase_f32"),
];

const ERASE_CUDA_SRC: &str = r#"
struct EraseMeta {
    int anchor_x;
    int anchor_y;
    int width;
    int height;
    unsigned int channel_mask;
    int image_index;
    int random;
    int _pad;
    float values[4];
};

// Byte copy of one pixel per thread, for every plane.
extern "C" __global__ void varshape_copy(const ImageDesc* __restrict__ src_descs,
                                         const ImageDesc* __restrict__ dst_descs,
                                         int pixel_bytes, int planes)
{
    const int n = blockIdx.z;
    const ImageDesc src = src_descs[n];
    const ImageDesc dst = dst_descs[n];
    const int x = blockIdx.x * blockDim.x + threadIdx.x;
    const int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= src.width || y >= src.height) return;
    for (int p = 0; p < planes; ++p) {
        const char* s = (const char*)src.base + (long long)p * src.plane_stride
                        + (long long)y * src.row_stride + (long long)x * pixel_bytes;
        char* d = (char*)dst.base + (long long)p * dst.plane_stride
                  + (long long)y * dst.row_stride + (long long)x * pixel_bytes;
        for (int b = 0; b < pixel_bytes; ++b) {
            d[b] = s[b];
        }
    }
}

// One z slice per region; rectangles are clipped to their image.
template <typename T>
__device__ void erase_impl(const ImageDesc* __restrict__ dst_descs,
                           const EraseMeta* __restrict__ regions,
                           int num_images, int channels, int planar, unsigned int seed)
{
    const int r = blockIdx.z;
    const EraseMeta m = regions[r];
    if (m.image_index < 0 || m.image_index >= num_images) return;
    const int x = blockIdx.x * blockDim.x + threadIdx.x;
    const int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= m.width || y >= m.height) return;
    const ImageDesc dst = dst_descs[m.image_index];
    const int ix = m.anchor_x + x;
    const int iy = m.anchor_y + y;
    if (ix < 0 || iy < 0 || ix >= dst.width || iy >= dst.height) return;
    for (int c = 0; c < channels; ++c) {
        if (!(m.channel_mask & (1u << c))) continue;
        const T v = m.random
            ? Sat<T>::from_hash(erase_hash(seed, (unsigned int)r, (unsigned int)ix,
                                           (unsigned int)iy, (unsigned int)c))
            : Sat<T>::trunc(m.values[c]);
        *pixel_ptr<T>(dst, ix, iy, c, channels, planar) = v;
    }
}

#define ERASE_KERNEL(SUFFIX, T)                                                         \
extern "C" __global__ void erase_##SUFFIX(const ImageDesc* dst, const EraseMeta* regions, \
                                          int num_images, int channels, int planar,     \
                                          unsigned int seed)                            \
{                                                                                       \
    erase_impl<T>(dst, regions, num_images, channels, planar, seed);                    \
}

ERASE_KERNEL(u8, u8)
ERASE_KERNEL(u16, u16)
ERASE_KERNEL(s16, s16)
ERASE_KERNEL(s32, s32)
ERASE_KERNEL(f32, f32)
"#;

/// Batched erase with up to `max_erase_regions` rectangles per call.
pub struct Erase {
    kernels: KernelModule,
    block: [u32; 2],
    capacity: usize,
}

impl Erase {
    pub fn compile(device: &Arc<CudaDevice>, config: &OperatorConfig) -> Result<Self> {
        Ok(Self {
            kernels: KernelModule::compile(
                device,
                MODULE_NAME,
                KERNEL_NAMES,
                ERASE_CUDA_SRC,
                config,
            )?,
            block: config.block_dim,
            capacity: config.max_erase_regions,
        })
    }

    /// Region capacity of this instance.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Erase `regions` from `input` into `output`. Passing the same batch as
    /// both erases in place. Random fills are a pure function of `seed`,
    /// region index, pixel and channel.
    pub fn run(
        &self,
        stream: &CudaStream,
        ws: &mut WorkspaceMem,
        input: &ImageBatchVarShape,
        output: &ImageBatchVarShape,
        regions: &[EraseRegion],
        seed: u32,
    ) -> Result<()> {
        let mut call = CallTracker::begin(OP);
        let plan = ErasePlan::new(input, output, regions, seed, self.capacity)?;
        let variant = plan.variant();
        let erase = self.kernels.get(select_kernel(OP, variant, KERNELS)?)?;
        let copy = if plan.in_place() {
            None
        } else {
            Some((
                self.kernels.get(COPY_KERNEL)?,
                launch_config_batched(plan.copy_grid(), self.block)?,
            ))
        };
        let erase_grid = plan.erase_grid();
        let erase_cfg = launch_config_batched(erase_grid, self.block)?;
        let (pixel_bytes, planes) = if variant.planar {
            (variant.kind.size_bytes(), variant.channels)
        } else {
            (variant.kind.size_bytes() * variant.channels, 1)
        };
        let num_images = output.num_images() as i32;
        call.advance(Phase::Planning)?;

        execute(&mut call, stream, &plan, ws, |base| {
            let s = plan.staging();
            // SAFETY: the copy grid covers the largest input and every thread
            // checks its image's extent; input and output sizes are equal.
            // Erase threads clip to their target image and skip regions whose
            // image index is outside the batch.
            unsafe {
                if let Some((copy, cfg)) = copy {
                    copy.launch_on_stream(
                        stream,
                        cfg,
                        (
                            s.descs.src.device_ptr(base),
                            s.descs.dst.device_ptr(base),
                            pixel_bytes as i32,
                            planes as i32,
                        ),
                    )?;
                }
                if !erase_grid.is_empty() {
                    erase.launch_on_stream(
                        stream,
                        erase_cfg,
                        (
                            s.descs.dst.device_ptr(base),
                            s.regions.device_ptr(base),
                            num_images,
                            variant.channels as i32,
                            planar_flag(variant),
                            plan.seed(),
                        ),
                    )?;
                }
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
        regions: &[EraseRegion],
        seed: u32,
    ) -> Result<()> {
        let input = input.to_var_shape()?;
        let output = output.to_var_shape()?;
        self.run(stream, ws, &input, &output, regions, seed)
    }
}
