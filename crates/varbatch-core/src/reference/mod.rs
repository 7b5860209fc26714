//! Host reference implementations of every operator.
//!
//! Single-threaded, scalar, and written to follow the device arithmetic step
//! by step (same float types, same evaluation order, same saturation), so
//! device output can be checked against them with tight tolerances.

mod erase;
mod flip;
mod normalize;
mod pillow;
mod resize;
mod rotate;

pub use erase::erase;
pub use flip::flip;
pub use normalize::{NormalizeRef, normalize};
pub use pillow::pillow_resize;
pub use resize::resize;
pub use rotate::rotate;

use crate::format::ImageFormat;
use crate::image::{Size2D, row_stride_for};
use crate::pixel::Pixel;

/// Host image with the same row/plane stride convention as device images,
/// counted in elements instead of bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct HostImage<T> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub planar: bool,
    /// Elements between consecutive rows of one plane.
    pub row_stride: usize,
    pub data: Vec<T>,
}

impl<T: Pixel> HostImage<T> {
    /// Zeroed image with rows aligned to `row_align` bytes.
    pub fn new(format: ImageFormat, size: Size2D, row_align: usize) -> Self {
        let elem = std::mem::size_of::<T>();
        let row_stride = row_stride_for(format, size.w, row_align) / elem;
        let planes = format.num_planes();
        Self {
            width: size.w,
            height: size.h,
            channels: format.num_channels(),
            planar: format.is_planar(),
            row_stride,
            data: vec![T::default(); row_stride * size.h * planes],
        }
    }

    /// Image filled from `f(x, y, c)`.
    pub fn from_fn(
        format: ImageFormat,
        size: Size2D,
        row_align: usize,
        mut f: impl FnMut(usize, usize, usize) -> T,
    ) -> Self {
        let mut img = Self::new(format, size, row_align);
        for y in 0..img.height {
            for x in 0..img.width {
                for c in 0..img.channels {
                    img.set(x, y, c, f(x, y, c));
                }
            }
        }
        img
    }

    pub fn size(&self) -> Size2D {
        Size2D::new(self.width, self.height)
    }

    #[inline]
    fn index(&self, x: usize, y: usize, c: usize) -> usize {
        if self.planar {
            c * self.row_stride * self.height + y * self.row_stride + x
        } else {
            y * self.row_stride + x * self.channels + c
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, c: usize) -> T {
        self.data[self.index(x, y, c)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, c: usize, v: T) {
        let i = self.index(x, y, c);
        self.data[i] = v;
    }

    /// Read with coordinates clamped into the image (replicate border).
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64, c: usize) -> T {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.get(x, y, c)
    }

    #[inline]
    pub fn row_stride_bytes(&self) -> usize {
        self.row_stride * std::mem::size_of::<T>()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Overwrite the pixel data from raw bytes laid out like `self`.
    pub fn copy_from_bytes(&mut self, bytes: &[u8]) {
        let n = std::mem::size_of_val(self.data.as_slice()).min(bytes.len());
        bytemuck::cast_slice_mut::<T, u8>(&mut self.data)[..n].copy_from_slice(&bytes[..n]);
    }

    /// Largest absolute per-element difference over the visible pixels.
    pub fn max_abs_diff(&self, other: &Self) -> f32 {
        assert_eq!(self.size(), other.size(), "compared images differ in size");
        let mut worst = 0.0f32;
        for y in 0..self.height {
            for x in 0..self.width {
                for c in 0..self.channels {
                    let d = (self.get(x, y, c).to_f32() - other.get(x, y, c).to_f32()).abs();
                    worst = worst.max(d);
                }
            }
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_and_planar_indexing_agree_on_values() {
        let f = |x: usize, y: usize, c: usize| (x * 16 + y * 4 + c) as u8;
        let packed = HostImage::from_fn(ImageFormat::RGB8, Size2D::new(3, 2), 8, f);
        let planar = HostImage::from_fn(ImageFormat::RGB8P, Size2D::new(3, 2), 0, f);
        assert_eq!(packed.row_stride, 16);
        assert_eq!(planar.row_stride, 3);
        assert_eq!(planar.data.len(), 18);
        for y in 0..2 {
            for x in 0..3 {
                for c in 0..3 {
                    assert_eq!(packed.get(x, y, c), planar.get(x, y, c));
                }
            }
        }
        assert_eq!(packed.max_abs_diff(&packed.clone()), 0.0);
    }

    #[test]
    fn clamped_reads_replicate_border() {
        let img = HostImage::from_fn(ImageFormat::U8, Size2D::new(2, 2), 0, |x, y, _| {
            (x + 2 * y) as u8
        });
        assert_eq!(img.get_clamped(-5, -1, 0), 0);
        assert_eq!(img.get_clamped(9, 9, 0), 3);
    }
}
