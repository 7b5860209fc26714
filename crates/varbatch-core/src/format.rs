//! Image format descriptors: element type, channel count and plane packing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of one channel value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    U8,
    S8,
    U16,
    S16,
    S32,
    F16,
    F32,
    F64,
}

impl DataKind {
    /// Size of one element in bytes.
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::U8 | Self::S8 => 1,
            Self::U16 | Self::S16 | Self::F16 => 2,
            Self::S32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }

    /// Short lowercase tag used in kernel names.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::S8 => "s8",
            Self::U16 => "u16",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

/// Channel interleaving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Packing {
    /// All channels interleaved in one plane (`HWC`).
    Packed,
    /// One plane per channel (`CHW`).
    Planar,
}

/// Opaque-ish image format: what every image of a batch must agree on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageFormat {
    pub kind: DataKind,
    pub channels: u8,
    pub packing: Packing,
}

impl ImageFormat {
    pub const U8: Self = Self::packed(DataKind::U8, 1);
    pub const S8: Self = Self::packed(DataKind::S8, 1);
    pub const U16: Self = Self::packed(DataKind::U16, 1);
    pub const S16: Self = Self::packed(DataKind::S16, 1);
    pub const S32: Self = Self::packed(DataKind::S32, 1);
    pub const F16: Self = Self::packed(DataKind::F16, 1);
    pub const F32: Self = Self::packed(DataKind::F32, 1);
    pub const F64: Self = Self::packed(DataKind::F64, 1);
    pub const RGB8: Self = Self::packed(DataKind::U8, 3);
    pub const RGBA8: Self = Self::packed(DataKind::U8, 4);
    pub const RGB8P: Self = Self::planar(DataKind::U8, 3);
    pub const RGBA8P: Self = Self::planar(DataKind::U8, 4);
    pub const RGB16: Self = Self::packed(DataKind::U16, 3);
    pub const RGBS16: Self = Self::packed(DataKind::S16, 3);
    pub const RGBF16: Self = Self::packed(DataKind::F16, 3);
    pub const RGBF32: Self = Self::packed(DataKind::F32, 3);
    pub const RGBAF32: Self = Self::packed(DataKind::F32, 4);
    pub const RGBF32P: Self = Self::planar(DataKind::F32, 3);

    pub const fn packed(kind: DataKind, channels: u8) -> Self {
        Self {
            kind,
            channels,
            packing: Packing::Packed,
        }
    }

    pub const fn planar(kind: DataKind, channels: u8) -> Self {
        Self {
            kind,
            channels,
            packing: Packing::Planar,
        }
    }

    #[inline]
    pub const fn num_channels(&self) -> usize {
        self.channels as usize
    }

    #[inline]
    pub const fn num_planes(&self) -> usize {
        match self.packing {
            Packing::Packed => 1,
            Packing::Planar => self.channels as usize,
        }
    }

    #[inline]
    pub const fn is_planar(&self) -> bool {
        matches!(self.packing, Packing::Planar) && self.channels > 1
    }

    /// Bytes between horizontally adjacent pixels of `plane` (0 if the plane doesn't exist).
    pub const fn plane_pixel_stride_bytes(&self, plane: usize) -> usize {
        if plane >= self.num_planes() {
            return 0;
        }
        match self.packing {
            Packing::Packed => self.kind.size_bytes() * self.channels as usize,
            Packing::Planar => self.kind.size_bytes(),
        }
    }

    /// Minimum row size in bytes of a plane `width` pixels wide.
    #[inline]
    pub const fn row_bytes(&self, width: usize) -> usize {
        self.plane_pixel_stride_bytes(0) * width
    }

    /// Same element type and channel count, packing aside.
    pub fn same_elements(&self, other: &Self) -> bool {
        self.kind == other.kind && self.channels == other.channels
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = match self.packing {
            Packing::Packed => "packed",
            Packing::Planar => "planar",
        };
        write!(f, "{}x{}/{}", self.channels, self.kind.tag(), layout)
    }
}

/// The single format shared by every entry, or `None` if they differ (or the
/// iterator is empty).
pub fn unique_format<I>(formats: I) -> Option<ImageFormat>
where
    I: IntoIterator<Item = ImageFormat>,
{
    let mut iter = formats.into_iter();
    let first = iter.next()?;
    iter.all(|fmt| fmt == first).then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_algebra_for_packed_and_planar() {
        assert_eq!(ImageFormat::RGB8.num_planes(), 1);
        assert_eq!(ImageFormat::RGB8.plane_pixel_stride_bytes(0), 3);
        assert_eq!(ImageFormat::RGB8.plane_pixel_stride_bytes(1), 0);

        assert_eq!(ImageFormat::RGB8P.num_planes(), 3);
        assert_eq!(ImageFormat::RGB8P.plane_pixel_stride_bytes(2), 1);
        assert_eq!(ImageFormat::RGBAF32.row_bytes(10), 160);
        assert_eq!(ImageFormat::F16.kind.size_bytes(), 2);
    }

    #[test]
    fn unique_format_requires_agreement() {
        assert_eq!(
            unique_format([ImageFormat::RGB8, ImageFormat::RGB8]),
            Some(ImageFormat::RGB8)
        );
        assert_eq!(unique_format([ImageFormat::RGB8, ImageFormat::RGB8P]), None);
        assert_eq!(unique_format(std::iter::empty()), None);
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(ImageFormat::RGB8P.to_string(), "3xu8/planar");
    }
}
