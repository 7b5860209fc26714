//! Device-visible per-image records.
//!
//! Every struct here is `#[repr(C)]` + `Pod` and mirrors a struct of the same
//! name in the CUDA sources, field for field. Changing one side without the
//! other corrupts every launch.

use bytemuck::{Pod, Zeroable};

/// One image as seen by a kernel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ImageDesc {
    pub base: u64,
    pub row_stride: i64,
    pub plane_stride: i64,
    pub width: i32,
    pub height: i32,
}

/// Per-image scale factors for the general resize kernels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ResizeMeta {
    /// `src_w / dst_w`.
    pub scale_x: f32,
    /// `src_h / dst_h`.
    pub scale_y: f32,
    pub inv_scale_x: f32,
    pub inv_scale_y: f32,
}

impl ResizeMeta {
    pub fn new(src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Self {
        let scale_x = src_w as f32 / dst_w as f32;
        let scale_y = src_h as f32 / dst_h as f32;
        Self {
            scale_x,
            scale_y,
            inv_scale_x: dst_w as f32 / src_w as f32,
            inv_scale_y: dst_h as f32 / src_h as f32,
        }
    }
}

/// Offsets of one image's coefficient tables inside the flat arrays.
///
/// Coefficient offsets count 4-byte entries, bound offsets count `i32`s.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PillowMeta {
    pub h_coeffs: i32,
    pub h_bounds: i32,
    pub h_ksize: i32,
    pub v_coeffs: i32,
    pub v_bounds: i32,
    pub v_ksize: i32,
}

/// One erase rectangle.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EraseMeta {
    pub anchor_x: i32,
    pub anchor_y: i32,
    pub width: i32,
    pub height: i32,
    pub channel_mask: u32,
    pub image_index: i32,
    pub random: i32,
    pub _pad: i32,
    pub values: [f32; 4],
}

/// Broadcast descriptors for normalize base/scale values.
///
/// Value for `(sample, channel)` lives at
/// `offset + sample * sample_stride + channel * channel_stride`; a zero stride
/// broadcasts that axis.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct NormalizeMeta {
    pub base_offset: i32,
    pub base_sample_stride: i32,
    pub base_channel_stride: i32,
    pub scale_offset: i32,
    pub scale_sample_stride: i32,
    pub scale_channel_stride: i32,
    pub global_scale: f32,
    pub global_shift: f32,
    pub epsilon: f32,
    pub scale_is_stddev: i32,
    pub _pad: [i32; 2],
}

/// Inverse-mapping affine coefficients for one rotated image.
pub type AffineCoeffs = [f64; 6];
