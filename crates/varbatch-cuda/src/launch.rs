//! NVRTC module compilation and launch geometry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use cudarc::driver::{CudaDevice, CudaFunction, LaunchConfig};
use cudarc::nvrtc::{CompileOptions, compile_ptx_with_opts};
use tracing::{debug, info};
use varbatch_core::config::OperatorConfig;
use varbatch_core::error::{EngineError, Result};
use varbatch_core::ops::{GridExtent, MAX_BATCH};

use crate::cuda_common::COMMON_CUDA_SRC;

/// Compiled kernels of one operator.
pub(crate) struct KernelModule {
    module: &'static str,
    funcs: HashMap<&'static str, CudaFunction>,
}

impl KernelModule {
    /// Compile `source` behind the shared prelude and resolve `names`.
    ///
    /// A module already loaded on `device` under `module` is reused.
    pub fn compile(
        device: &Arc<CudaDevice>,
        module: &'static str,
        names: &'static [&'static str],
        source: &str,
        config: &OperatorConfig,
    ) -> Result<Self> {
        let loaded = names.iter().all(|name| device.has_func(module, name));
        if loaded {
            debug!(module, "NVRTC module already loaded");
        } else {
            let started = Instant::now();
            let ptx = compile_ptx_with_opts(
                format!("{COMMON_CUDA_SRC}\n{source}"),
                CompileOptions {
                    ftz: Some(false),
                    prec_div: Some(true),
                    prec_sqrt: Some(true),
                    fmad: Some(false),
                    options: config.nvrtc_defines(),
                    ..Default::default()
                },
            )?;
            device.load_ptx(ptx, module, names)?;
            info!(
                module,
                kernels = names.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "NVRTC module compiled"
            );
        }

        let mut funcs = HashMap::with_capacity(names.len());
        for &name in names {
            let func = device
                .get_func(module, name)
                .ok_or(EngineError::MissingKernel { module, name })?;
            funcs.insert(name, func);
        }
        Ok(Self { module, funcs })
    }

    pub fn get(&self, name: &'static str) -> Result<CudaFunction> {
        self.funcs
            .get(name)
            .cloned()
            .ok_or(EngineError::MissingKernel {
                module: self.module,
                name,
            })
    }
}

/// `gridDim.y` limit on every CUDA device.
const MAX_GRID_Y: usize = 65_535;

/// One thread per `(x, y)` of the extent, one z slice per image or region.
pub(crate) fn launch_config_batched(extent: GridExtent, block: [u32; 2]) -> Result<LaunchConfig> {
    if extent.depth > MAX_BATCH {
        return Err(EngineError::CapacityExceeded {
            what: "grid z slice",
            requested: extent.depth,
            capacity: MAX_BATCH,
        });
    }
    let dim = |v: usize| {
        u32::try_from(v).map_err(|_| {
            EngineError::InvalidParameter(format!("launch extent {v} does not fit a grid"))
        })
    };
    let [bx, by] = block;
    let rows = dim(extent.height)?.div_ceil(by);
    if rows as usize > MAX_GRID_Y {
        return Err(EngineError::InvalidParameter(format!(
            "launch height {} needs {rows} block rows, limit is {MAX_GRID_Y}",
            extent.height
        )));
    }
    Ok(LaunchConfig {
        grid_dim: (dim(extent.width)?.div_ceil(bx), rows, dim(extent.depth)?),
        block_dim: (bx, by, 1),
        shared_mem_bytes: 0,
    })
}

/// Flat 1-D launch over `n` items.
pub(crate) fn launch_config_1d(n: usize) -> Result<LaunchConfig> {
    const THREADS: u32 = 256;
    let n = u32::try_from(n)
        .map_err(|_| EngineError::InvalidParameter(format!("launch size {n} too large")))?;
    Ok(LaunchConfig {
        grid_dim: (n.div_ceil(THREADS), 1, 1),
        block_dim: (THREADS, 1, 1),
        shared_mem_bytes: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batched_grid_covers_largest_image() {
        let cfg = launch_config_batched(
            GridExtent {
                width: 1920,
                height: 1081,
                depth: 3,
            },
            [16, 16],
        )
        .expect("fits");
        assert_eq!(cfg.grid_dim, (120, 68, 3));
        assert_eq!(cfg.block_dim, (16, 16, 1));
    }

    #[test]
    fn batched_grid_respects_block_shape() {
        let cfg = launch_config_batched(
            GridExtent {
                width: 33,
                height: 7,
                depth: 1,
            },
            [32, 8],
        )
        .expect("fits");
        assert_eq!(cfg.grid_dim, (2, 1, 1));
        assert_eq!(cfg.block_dim, (32, 8, 1));
    }

    #[test]
    fn depth_is_capped_by_grid_z() {
        let err = launch_config_batched(
            GridExtent {
                width: 1,
                height: 1,
                depth: MAX_BATCH + 1,
            },
            [16, 16],
        )
        .expect_err("too deep");
        assert!(matches!(err, EngineError::CapacityExceeded { .. }));
    }

    #[test]
    fn grid_rows_are_capped() {
        let err = launch_config_batched(
            GridExtent {
                width: 8,
                height: 2_000_000,
                depth: 1,
            },
            [16, 16],
        )
        .expect_err("too tall");
        assert!(matches!(err, EngineError::InvalidParameter(_)));
    }

    #[test]
    fn oversized_erase_region_fits_the_grid() {
        use varbatch_core::format::ImageFormat;
        use varbatch_core::image::{Image, ImageBatchVarShape, Size2D};
        use varbatch_core::ops::erase::{ErasePlan, EraseRegion};

        let image = |base| {
            Image::new(ImageFormat::U8, Size2D::new(8, 8), base, 8).expect("valid image")
        };
        let input = ImageBatchVarShape::from_images(vec![image(0x1000)]);
        let output = ImageBatchVarShape::from_images(vec![image(0x2000)]);
        let regions = [EraseRegion::fill(0, (2, 2), (8, 2_000_000), [0.0; 4])];
        let plan = ErasePlan::new(&input, &output, &regions, 0, 1).expect("valid call");
        let cfg = launch_config_batched(plan.erase_grid(), [16, 16]).expect("fits");
        assert!(cfg.grid_dim.1 as usize <= MAX_GRID_Y);
        assert_eq!(cfg.grid_dim, (1, 1, 1));
    }

    #[test]
    fn flat_launch_rounds_up() {
        assert_eq!(launch_config_1d(257).expect("fits").grid_dim, (2, 1, 1));
        assert_eq!(launch_config_1d(256).expect("fits").grid_dim, (1, 1, 1));
    }
}
