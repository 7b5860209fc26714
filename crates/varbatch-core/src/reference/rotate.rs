use super::HostImage;
use super::resize::cubic_sample;
use crate::error::{EngineError, Result};
use crate::interp::Interpolation;
use crate::meta::AffineCoeffs;
use crate::pixel::Pixel;

/// Inverse-map every destination pixel through `a`; destination pixels whose
/// source falls outside `src` keep their current value.
pub fn rotate<T: Pixel>(
    src: &HostImage<T>,
    dst: &mut HostImage<T>,
    a: &AffineCoeffs,
    interp: Interpolation,
) -> Result<()> {
    if !matches!(
        interp,
        Interpolation::Nearest | Interpolation::Linear | Interpolation::Cubic
    ) {
        return Err(EngineError::InvalidParameter(format!(
            "rotate does not support {interp:?} interpolation"
        )));
    }
    let w = src.width as i64;
    let h = src.height as i64;
    for dy in 0..dst.height {
        for dx in 0..dst.width {
            let xs = dx as f64 - a[2];
            let ys = dy as f64 - a[5];
            let src_x = (xs * a[0] + ys * -a[1]) as f32;
            let src_y = (xs * -a[3] + ys * a[4]) as f32;
            if !(src_x > -0.5 && src_x < w as f32 && src_y > -0.5 && src_y < h as f32) {
                continue;
            }
            match interp {
                Interpolation::Nearest => {
                    let x1 = ((src_x + 0.5).floor() as i64).min(w - 1) as usize;
                    let y1 = ((src_y + 0.5).floor() as i64).min(h - 1) as usize;
                    for c in 0..dst.channels {
                        dst.set(dx, dy, c, src.get(x1, y1, c));
                    }
                }
                Interpolation::Linear => {
                    let x1 = src_x.floor() as i64;
                    let y1 = src_y.floor() as i64;
                    let x2 = x1 + 1;
                    let y2 = y1 + 1;
                    let (x1r, y1r) = (x1.max(0) as usize, y1.max(0) as usize);
                    let (x2r, y2r) = (x2.min(w - 1) as usize, y2.min(h - 1) as usize);
                    let (x1f, x2f, y1f, y2f) = (x1 as f32, x2 as f32, y1 as f32, y2 as f32);
                    for c in 0..dst.channels {
                        let mut out = 0.0f32;
                        out += src.get(x1r, y1r, c).to_f32() * ((x2f - src_x) * (y2f - src_y));
                        out += src.get(x2r, y1r, c).to_f32() * ((src_x - x1f) * (y2f - src_y));
                        out += src.get(x1r, y2r, c).to_f32() * ((x2f - src_x) * (src_y - y1f));
                        out += src.get(x2r, y2r, c).to_f32() * ((src_x - x1f) * (src_y - y1f));
                        dst.set(dx, dy, c, T::saturate_round(out));
                    }
                }
                _ => {
                    let sx = src_x.floor();
                    let sy = src_y.floor();
                    for c in 0..dst.channels {
                        let v = cubic_sample(src, sx as i64, sy as i64, src_x - sx, src_y - sy, c);
                        dst.set(dx, dy, c, T::saturate_round(v));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ImageFormat;
    use crate::image::Size2D;
    use crate::ops::rotate::{affine_coeffs, center_shift};

    fn numbered(w: usize, h: usize) -> HostImage<u8> {
        HostImage::from_fn(ImageFormat::RGB8, Size2D::new(w, h), 0, |x, y, c| {
            (x + w * y + c * 64) as u8
        })
    }

    fn rotated(src: &HostImage<u8>, angle: f64, interp: Interpolation) -> HostImage<u8> {
        let (sx, sy) = center_shift(
            (src.width as f64 - 1.0) / 2.0,
            (src.height as f64 - 1.0) / 2.0,
            angle,
        );
        let a = affine_coeffs(angle, sx, sy);
        let mut dst = HostImage::new(ImageFormat::RGB8, src.size(), 0);
        rotate(src, &mut dst, &a, interp).expect("rotate");
        dst
    }

    #[test]
    fn rotate_180_reverses_both_axes_exactly() {
        let src = numbered(5, 4);
        let dst = rotated(&src, 180.0, Interpolation::Nearest);
        for y in 0..4 {
            for x in 0..5 {
                for c in 0..3 {
                    assert_eq!(dst.get(x, y, c), src.get(4 - x, 3 - y, c), "({x},{y},{c})");
                }
            }
        }
    }

    #[test]
    fn rotate_90_square_is_a_transpose_flip() {
        let src = numbered(4, 4);
        let dst = rotated(&src, 90.0, Interpolation::Nearest);
        // Inverse mapping: src_x = n-1-dy, src_y = dx.
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(dst.get(x, y, 0), src.get(3 - y, x, 0), "({x},{y})");
            }
        }
        let cubic = rotated(&src, 90.0, Interpolation::Cubic);
        assert!(cubic.max_abs_diff(&dst) <= 1.0);
    }

    #[test]
    fn zero_angle_is_identity_for_all_modes() {
        let src = numbered(6, 3);
        for interp in [Interpolation::Nearest, Interpolation::Linear, Interpolation::Cubic] {
            assert_eq!(rotated(&src, 0.0, interp), src, "{interp:?}");
        }
    }

    #[test]
    fn uncovered_pixels_keep_prior_value() {
        let src = numbered(8, 2);
        let a = affine_coeffs(90.0, 0.0, 0.0);
        let mut dst = HostImage::from_fn(ImageFormat::RGB8, Size2D::new(8, 2), 0, |_, _, _| 7u8);
        rotate(&src, &mut dst, &a, Interpolation::Nearest).expect("rotate");
        assert_eq!(dst.get(7, 1, 0), 7);
    }

    #[test]
    fn lanczos_is_rejected() {
        let src = numbered(2, 2);
        let mut dst = src.clone();
        let a = affine_coeffs(0.0, 0.0, 0.0);
        assert!(rotate(&src, &mut dst, &a, Interpolation::Lanczos).is_err());
    }
}
