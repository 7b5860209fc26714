//! Device half of every operator: NVRTC sources, kernel selection and
//! launches.
//!
//! Each operator compiles one module holding a kernel per element type;
//! channel count and planar layout are runtime arguments, so a call picks its
//! kernel by element type alone.

pub mod erase;
pub mod flip;
pub mod normalize;
pub mod pillow;
pub mod resize;
pub mod rotate;

use std::sync::Arc;

use cudarc::driver::CudaDevice;
use varbatch_core::config::OperatorConfig;
use varbatch_core::error::{EngineError, Result};
use varbatch_core::format::DataKind;
use varbatch_core::ops::{KernelVariant, MAX_CHANNELS};

pub use erase::Erase;
pub use flip::Flip;
pub use normalize::Normalize;
pub use pillow::PillowResize;
pub use resize::Resize;
pub use rotate::Rotate;

/// Kernel for `variant` from an operator's `(element type, kernel)` table.
pub(crate) fn select_kernel(
    op: &'static str,
    variant: KernelVariant,
    table: &[(DataKind, &'static str)],
) -> Result<&'static str> {
    if variant.channels == 0 || variant.channels > MAX_CHANNELS {
        return Err(EngineError::UnsupportedChannels {
            op,
            channels: variant.channels,
        });
    }
    table
        .iter()
        .find(|(kind, _)| *kind == variant.kind)
        .map(|(_, name)| *name)
        .ok_or(EngineError::UnsupportedDataKind {
            op,
            kind: variant.kind,
        })
}

/// Launch argument: 1 when the batch is planar.
#[inline]
pub(crate) fn planar_flag(variant: KernelVariant) -> i32 {
    i32::from(variant.planar)
}

/// Every operator compiled for one device.
pub struct Operators {
    pub resize: Resize,
    pub pillow_resize: PillowResize,
    pub erase: Erase,
    pub flip: Flip,
    pub normalize: Normalize,
    pub rotate: Rotate,
}

impl Operators {
    pub fn compile(device: &Arc<CudaDevice>, config: &OperatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            resize: Resize::compile(device, config)?,
            pillow_resize: PillowResize::compile(device, config)?,
            erase: Erase::compile(device, config)?,
            flip: Flip::compile(device, config)?,
            normalize: Normalize::compile(device, config)?,
            rotate: Rotate::compile(device, config)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varbatch_core::format::ImageFormat;

    const TABLE: &[(DataKind, &str)] = &[(DataKind::U8, "k_u8"), (DataKind::F32, "k_f32")];

    #[test]
    fn kernels_are_selected_by_element_type() {
        let name = select_kernel("test", KernelVariant::of(ImageFormat::RGBA8), TABLE).expect("u8");
        assert_eq!(name, "k_u8");
        let name = select_kernel("test", KernelVariant::of(ImageFormat::F32), TABLE).expect("f32");
        assert_eq!(name, "k_f32");
    }

    #[test]
    fn unknown_types_and_widths_are_rejected() {
        let err = select_kernel("test", KernelVariant::of(ImageFormat::RGB16), TABLE)
            .expect_err("u16 missing");
        assert!(matches!(err, EngineError::UnsupportedDataKind { kind: DataKind::U16, .. }));

        let wide = KernelVariant {
            kind: DataKind::U8,
            channels: 5,
            planar: false,
        };
        let err = select_kernel("test", wide, TABLE).expect_err("five channels");
        assert!(matches!(err, EngineError::UnsupportedChannels { channels: 5, .. }));
    }
}
