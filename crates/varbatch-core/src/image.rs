//! Borrowed views of device images: single images, variable-shape batches and
//! uniform tensor batches.
//!
//! Nothing here owns device memory. Base addresses are raw `CUdeviceptr`
//! values that must outlive the operator call that reads them.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::ffi_types::CUdeviceptr;
use crate::format::{ImageFormat, unique_format};
use crate::meta::ImageDesc;

/// Width × height in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size2D {
    pub w: usize,
    pub h: usize,
}

impl Size2D {
    pub const fn new(w: usize, h: usize) -> Self {
        Self { w, h }
    }

    /// Component-wise maximum.
    pub fn max(self, other: Self) -> Self {
        Self::new(self.w.max(other.w), self.h.max(other.h))
    }

    pub const fn area(self) -> usize {
        self.w * self.h
    }

    pub const fn is_empty(self) -> bool {
        self.w == 0 || self.h == 0
    }
}

/// Round `width`'s row size up to a multiple of `row_align` bytes.
///
/// `row_align` of 0 or 1 means tightly packed rows.
pub fn row_stride_for(format: ImageFormat, width: usize, row_align: usize) -> usize {
    let row = format.row_bytes(width);
    if row_align <= 1 {
        row
    } else {
        row.div_ceil(row_align) * row_align
    }
}

/// One device image: format, extents and strided planes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Image {
    pub format: ImageFormat,
    pub size: Size2D,
    pub base: CUdeviceptr,
    /// Bytes between consecutive rows of one plane.
    pub row_stride: usize,
    /// Bytes between consecutive planes (0 for packed images).
    pub plane_stride: usize,
}

impl Image {
    /// Describe an image whose planes are laid out back to back.
    pub fn new(
        format: ImageFormat,
        size: Size2D,
        base: CUdeviceptr,
        row_stride: usize,
    ) -> Result<Self> {
        let plane_stride = if format.is_planar() {
            row_stride * size.h
        } else {
            0
        };
        Self::with_plane_stride(format, size, base, row_stride, plane_stride)
    }

    pub fn with_plane_stride(
        format: ImageFormat,
        size: Size2D,
        base: CUdeviceptr,
        row_stride: usize,
        plane_stride: usize,
    ) -> Result<Self> {
        let min_row = format.row_bytes(size.w);
        if row_stride < min_row {
            return Err(EngineError::ShapeMismatch(format!(
                "row stride {row_stride} is smaller than one row ({min_row} bytes) for {}x{} {format}",
                size.w, size.h
            )));
        }
        if format.is_planar() && plane_stride < row_stride * size.h {
            return Err(EngineError::ShapeMismatch(format!(
                "plane stride {plane_stride} overlaps planes of {} rows × {row_stride} bytes",
                size.h
            )));
        }
        Ok(Self {
            format,
            size,
            base,
            row_stride,
            plane_stride,
        })
    }

    /// Bytes spanned by all planes of this image.
    pub fn byte_size(&self) -> usize {
        if self.format.is_planar() {
            self.plane_stride * (self.format.num_planes() - 1) + self.row_stride * self.size.h
        } else {
            self.row_stride * self.size.h
        }
    }

    /// Device-visible descriptor.
    pub fn desc(&self) -> ImageDesc {
        ImageDesc {
            base: self.base,
            row_stride: self.row_stride as i64,
            plane_stride: self.plane_stride as i64,
            width: self.size.w as i32,
            height: self.size.h as i32,
        }
    }
}

/// Batch of images sharing one format but not one size.
///
/// Capacity is fixed at construction, like the device-side descriptor arrays
/// it is eventually flattened into.
#[derive(Clone, Debug)]
pub struct ImageBatchVarShape {
    images: Vec<Image>,
    capacity: usize,
}

impl ImageBatchVarShape {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            images: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a batch holding exactly `images`.
    pub fn from_images(images: Vec<Image>) -> Self {
        let capacity = images.len();
        Self { images, capacity }
    }

    pub fn push(&mut self, image: Image) -> Result<()> {
        if self.images.len() >= self.capacity {
            return Err(EngineError::CapacityExceeded {
                what: "batch image",
                requested: self.images.len() + 1,
                capacity: self.capacity,
            });
        }
        self.images.push(image);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.images.clear();
    }

    #[inline]
    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn get(&self, index: usize) -> Option<&Image> {
        self.images.get(index)
    }

    /// Largest width and largest height over the batch (not necessarily of
    /// the same image).
    pub fn max_size(&self) -> Size2D {
        self.images
            .iter()
            .fold(Size2D::default(), |acc, img| acc.max(img.size))
    }

    /// Format shared by every image, `None` for empty or mixed batches.
    pub fn unique_format(&self) -> Option<ImageFormat> {
        unique_format(self.images.iter().map(|img| img.format))
    }

    pub fn descs(&self) -> impl Iterator<Item = ImageDesc> + '_ {
        self.images.iter().map(Image::desc)
    }
}

/// Uniform-shape batch stored as one strided tensor (`NHWC` or `NCHW`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TensorBatch {
    pub format: ImageFormat,
    pub samples: usize,
    pub size: Size2D,
    pub base: CUdeviceptr,
    pub row_stride: usize,
    pub plane_stride: usize,
    pub sample_stride: usize,
}

impl TensorBatch {
    /// Tightly packed tensor with rows aligned to `row_align` bytes.
    pub fn packed(
        format: ImageFormat,
        samples: usize,
        size: Size2D,
        base: CUdeviceptr,
        row_align: usize,
    ) -> Self {
        let row_stride = row_stride_for(format, size.w, row_align);
        let plane_stride = if format.is_planar() {
            row_stride * size.h
        } else {
            0
        };
        let sample_stride = row_stride * size.h * format.num_planes();
        Self {
            format,
            samples,
            size,
            base,
            row_stride,
            plane_stride,
            sample_stride,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.sample_stride * self.samples
    }

    /// Same memory viewed as a variable-shape batch whose images happen to
    /// agree, so one dispatch path serves both batch kinds.
    pub fn to_var_shape(&self) -> Result<ImageBatchVarShape> {
        let mut batch = ImageBatchVarShape::with_capacity(self.samples);
        for i in 0..self.samples {
            let base = self.base + (i * self.sample_stride) as CUdeviceptr;
            batch.push(Image::with_plane_stride(
                self.format,
                self.size,
                base,
                self.row_stride,
                self.plane_stride,
            )?)?;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(fmt: ImageFormat, w: usize, h: usize) -> Image {
        Image::new(fmt, Size2D::new(w, h), 0x1000, fmt.row_bytes(w)).expect("valid image")
    }

    #[test]
    fn row_alignment_rounds_up() {
        assert_eq!(row_stride_for(ImageFormat::RGB8, 5, 0), 15);
        assert_eq!(row_stride_for(ImageFormat::RGB8, 5, 1), 15);
        assert_eq!(row_stride_for(ImageFormat::RGB8, 5, 16), 16);
        assert_eq!(row_stride_for(ImageFormat::RGBAF32, 3, 32), 64);
    }

    #[test]
    fn image_rejects_short_rows() {
        let err = Image::new(ImageFormat::RGB8, Size2D::new(4, 4), 0, 11).expect_err("short row");
        assert!(matches!(err, EngineError::ShapeMismatch(_)));
    }

    #[test]
    fn planar_image_gets_back_to_back_planes() {
        let image = img(ImageFormat::RGB8P, 8, 2);
        assert_eq!(image.plane_stride, 16);
        assert_eq!(image.byte_size(), 48);
        let desc = image.desc();
        assert_eq!((desc.width, desc.height, desc.plane_stride), (8, 2, 16));
    }

    #[test]
    fn batch_capacity_is_enforced() {
        let mut batch = ImageBatchVarShape::with_capacity(1);
        batch.push(img(ImageFormat::U8, 2, 2)).expect("first fits");
        let err = batch.push(img(ImageFormat::U8, 2, 2)).expect_err("second overflows");
        assert!(matches!(err, EngineError::CapacityExceeded { capacity: 1, .. }));
    }

    #[test]
    fn max_size_mixes_dimensions() {
        let batch = ImageBatchVarShape::from_images(vec![
            img(ImageFormat::RGB8, 10, 3),
            img(ImageFormat::RGB8, 4, 7),
        ]);
        assert_eq!(batch.max_size(), Size2D::new(10, 7));
        assert_eq!(batch.unique_format(), Some(ImageFormat::RGB8));
    }

    #[test]
    fn tensor_batch_expands_to_strided_images() {
        let tensor = TensorBatch::packed(ImageFormat::RGBA8, 3, Size2D::new(5, 2), 0x4000, 32);
        assert_eq!(tensor.row_stride, 32);
        assert_eq!(tensor.sample_stride, 64);
        let batch = tensor.to_var_shape().expect("tensor view");
        assert_eq!(batch.num_images(), 3);
        assert_eq!(batch.images()[2].base, 0x4000 + 128);
        assert!(batch.images().iter().all(|i| i.size == Size2D::new(5, 2)));
    }
}
