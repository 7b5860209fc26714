//! Element types operators can read and write, with the saturating
//! conversions the kernels apply.
//!
//! Rounding follows the device: `round` is round-half-to-even (`rintf`),
//! `trunc` drops the fraction (`truncf`); both clamp to the type's range.
//! NaN converts to 0 for integer types.

use bytemuck::Pod;

use crate::format::DataKind;

pub trait Pixel: Pod + Copy + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    const KIND: DataKind;

    fn to_f32(self) -> f32;

    /// Round to nearest (ties to even), then clamp.
    fn saturate_round(v: f32) -> Self;

    /// Truncate toward zero, then clamp.
    fn saturate_trunc(v: f32) -> Self;

    /// Map a 32-bit hash onto the value range used for random fills.
    fn from_hash(h: u32) -> Self;
}

macro_rules! small_int_pixel {
    ($ty:ty, $kind:expr) => {
        impl Pixel for $ty {
            const KIND: DataKind = $kind;

            #[inline]
            fn to_f32(self) -> f32 {
                self as f32
            }

            #[inline]
            fn saturate_round(v: f32) -> Self {
                // Float-to-int `as` saturates and maps NaN to 0.
                v.round_ties_even() as $ty
            }

            #[inline]
            fn saturate_trunc(v: f32) -> Self {
                v.trunc() as $ty
            }

            #[inline]
            fn from_hash(h: u32) -> Self {
                let span = (<$ty>::MAX as i64 - <$ty>::MIN as i64 + 1) as u64;
                ((h as u64 % span) as i64 + <$ty>::MIN as i64) as $ty
            }
        }
    };
}

small_int_pixel!(u8, DataKind::U8);
small_int_pixel!(u16, DataKind::U16);
small_int_pixel!(i16, DataKind::S16);

impl Pixel for i32 {
    const KIND: DataKind = DataKind::S32;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn saturate_round(v: f32) -> Self {
        (v as f64).round_ties_even() as i32
    }

    #[inline]
    fn saturate_trunc(v: f32) -> Self {
        (v as f64).trunc() as i32
    }

    #[inline]
    fn from_hash(h: u32) -> Self {
        h as i32
    }
}

impl Pixel for f32 {
    const KIND: DataKind = DataKind::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn saturate_round(v: f32) -> Self {
        v
    }

    #[inline]
    fn saturate_trunc(v: f32) -> Self {
        v
    }

    #[inline]
    fn from_hash(h: u32) -> Self {
        (h >> 8) as f32 * (1.0 / 16_777_216.0)
    }
}

/// Per-pixel hash behind random erase fills; identical to `erase_hash` in the
/// CUDA source.
pub fn erase_hash(seed: u32, region: u32, x: u32, y: u32, channel: u32) -> u32 {
    let mut h = seed ^ region.wrapping_mul(0x9E37_79B9);
    h ^= x.wrapping_mul(0x85EB_CA6B);
    h = h.rotate_left(13);
    h ^= y.wrapping_mul(0xC2B2_AE35);
    h = h.rotate_left(17);
    h ^= channel.wrapping_mul(0x27D4_EB2F);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85EB_CA6B);
    h ^= h >> 13;
    h = h.wrapping_mul(0xC2B2_AE35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_is_ties_to_even_and_saturating() {
        assert_eq!(u8::saturate_round(2.5), 2);
        assert_eq!(u8::saturate_round(3.5), 4);
        assert_eq!(u8::saturate_round(-3.0), 0);
        assert_eq!(u8::saturate_round(300.0), 255);
        assert_eq!(u8::saturate_round(f32::NAN), 0);
        assert_eq!(i16::saturate_round(-40_000.0), i16::MIN);
        assert_eq!(u16::saturate_round(65_535.4), u16::MAX);
        assert_eq!(i32::saturate_round(3e10), i32::MAX);
        assert_eq!(f32::saturate_round(1.25), 1.25);
    }

    #[test]
    fn s32_samples_load_through_f32() {
        assert_eq!(16_777_216i32.to_f32(), 16_777_216.0);
        // Past 2^24 the load rounds to the nearest f32.
        assert_eq!(16_777_217i32.to_f32(), 16_777_216.0);
        assert_eq!(i32::saturate_round(16_777_217i32.to_f32()), 16_777_216);
        assert_eq!(i32::saturate_round(-3e10), i32::MIN);
        assert_eq!(i32::saturate_trunc(-2.75), -2);
    }

    #[test]
    fn trunc_drops_fraction() {
        assert_eq!(u8::saturate_trunc(254.9), 254);
        assert_eq!(i16::saturate_trunc(-1.9), -1);
        assert_eq!(u8::saturate_trunc(-0.5), 0);
    }

    #[test]
    fn hash_values_cover_type_ranges() {
        assert_eq!(i16::from_hash(0), i16::MIN);
        assert_eq!(u8::from_hash(0x1ff), 255);
        assert!(f32::from_hash(u32::MAX) < 1.0);
        assert_ne!(erase_hash(1, 0, 0, 0, 0), erase_hash(2, 0, 0, 0, 0));
        assert_eq!(erase_hash(7, 1, 2, 3, 0), erase_hash(7, 1, 2, 3, 0));
    }
}
