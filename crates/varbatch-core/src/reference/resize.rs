use super::HostImage;
use crate::error::{EngineError, Result};
use crate::interp::Interpolation;
use crate::meta::ResizeMeta;
use crate::pixel::Pixel;

/// OpenCV-convention resize of one image into `dst`'s extents.
pub fn resize<T: Pixel>(
    src: &HostImage<T>,
    dst: &mut HostImage<T>,
    interp: Interpolation,
) -> Result<()> {
    let meta = ResizeMeta::new(src.width, src.height, dst.width, dst.height);
    for y in 0..dst.height {
        for x in 0..dst.width {
            match interp {
                Interpolation::Nearest => nearest(src, dst, &meta, x, y),
                Interpolation::Linear => linear(src, dst, &meta, x, y),
                Interpolation::Cubic => cubic(src, dst, &meta, x, y),
                Interpolation::Area => {
                    if meta.scale_x >= 1.0 && meta.scale_y >= 1.0 {
                        area_down(src, dst, &meta, x, y)
                    } else {
                        area_up(src, dst, &meta, x, y)
                    }
                }
                other => {
                    return Err(EngineError::InvalidParameter(format!(
                        "resize does not support {other:?} interpolation"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn nearest<T: Pixel>(src: &HostImage<T>, dst: &mut HostImage<T>, m: &ResizeMeta, x: usize, y: usize) {
    let sx = ((x as f32 * m.scale_x).floor() as usize).min(src.width - 1);
    let sy = ((y as f32 * m.scale_y).floor() as usize).min(src.height - 1);
    for c in 0..dst.channels {
        dst.set(x, y, c, src.get(sx, sy, c));
    }
}

/// Source index and fraction for a linear tap, clamped at both borders.
fn linear_tap(d: usize, scale: f32, size: usize) -> (usize, usize, f32) {
    let f = (d as f32 + 0.5) * scale - 0.5;
    let mut s = f.floor() as i64;
    let mut frac = f - s as f32;
    if s < 0 {
        frac = 0.0;
        s = 0;
    }
    if s >= size as i64 - 1 {
        frac = 0.0;
        s = size as i64 - 1;
    }
    let s = s as usize;
    (s, (s + 1).min(size - 1), frac)
}

fn blend<T: Pixel>(
    src: &HostImage<T>,
    dst: &mut HostImage<T>,
    (x, y): (usize, usize),
    (sx, sx1, fx): (usize, usize, f32),
    (sy, sy1, fy): (usize, usize, f32),
) {
    for c in 0..dst.channels {
        let p00 = src.get(sx, sy, c).to_f32();
        let p01 = src.get(sx1, sy, c).to_f32();
        let p10 = src.get(sx, sy1, c).to_f32();
        let p11 = src.get(sx1, sy1, c).to_f32();
        let v = (1.0 - fy) * ((1.0 - fx) * p00 + fx * p01) + fy * ((1.0 - fx) * p10 + fx * p11);
        dst.set(x, y, c, T::saturate_round(v));
    }
}

fn linear<T: Pixel>(src: &HostImage<T>, dst: &mut HostImage<T>, m: &ResizeMeta, x: usize, y: usize) {
    let tx = linear_tap(x, m.scale_x, src.width);
    let ty = linear_tap(y, m.scale_y, src.height);
    blend(src, dst, (x, y), tx, ty);
}

/// OpenCV bicubic weights (A = -0.75) for fractional offset `x`.
pub(crate) fn cubic_weights(x: f32) -> [f32; 4] {
    const A: f32 = -0.75;
    let w0 = ((A * (x + 1.0) - 5.0 * A) * (x + 1.0) + 8.0 * A) * (x + 1.0) - 4.0 * A;
    let w1 = ((A + 2.0) * x - (A + 3.0)) * x * x + 1.0;
    let w2 = ((A + 2.0) * (1.0 - x) - (A + 3.0)) * (1.0 - x) * (1.0 - x) + 1.0;
    let w3 = 1.0 - w0 - w1 - w2;
    [w0, w1, w2, w3]
}

/// Bicubic sample around `(sx, sy)` with fractions `(fx, fy)`, replicate border.
pub(crate) fn cubic_sample<T: Pixel>(
    src: &HostImage<T>,
    sx: i64,
    sy: i64,
    fx: f32,
    fy: f32,
    c: usize,
) -> f32 {
    let wx = cubic_weights(fx);
    let wy = cubic_weights(fy);
    let mut acc = 0.0f32;
    for (j, wyj) in wy.iter().enumerate() {
        let yy = sy - 1 + j as i64;
        let mut row = 0.0f32;
        for (i, wxi) in wx.iter().enumerate() {
            row += wxi * src.get_clamped(sx - 1 + i as i64, yy, c).to_f32();
        }
        acc += wyj * row;
    }
    acc
}

fn cubic<T: Pixel>(src: &HostImage<T>, dst: &mut HostImage<T>, m: &ResizeMeta, x: usize, y: usize) {
    let fx = (x as f32 + 0.5) * m.scale_x - 0.5;
    let fy = (y as f32 + 0.5) * m.scale_y - 0.5;
    let sx = fx.floor();
    let sy = fy.floor();
    for c in 0..dst.channels {
        let v = cubic_sample(src, sx as i64, sy as i64, fx - sx, fy - sy, c);
        dst.set(x, y, c, T::saturate_round(v));
    }
}

/// Source cell of one destination index when downscaling by `scale >= 1`.
struct AreaSpan {
    fs1: f32,
    fs2: f32,
    s1: i64,
    s2: i64,
    first: i64,
    last: i64,
    cell: f32,
}

impl AreaSpan {
    fn new(d: usize, scale: f32, size: usize) -> Self {
        let fs1 = d as f32 * scale;
        let fs2 = fs1 + scale;
        let cell = scale.min(size as f32 - fs1);
        let s2 = (fs2.floor() as i64).min(size as i64 - 1);
        let s1 = (fs1.ceil() as i64).min(s2);
        let first = if s1 as f32 - fs1 > 1e-3 { s1 - 1 } else { s1 };
        let last = if fs2 - s2 as f32 > 1e-3 { s2 } else { s2 - 1 };
        Self {
            fs1,
            fs2,
            s1,
            s2,
            first,
            last,
            cell,
        }
    }

    fn weight(&self, i: i64) -> f32 {
        if i < self.s1 {
            self.s1 as f32 - self.fs1
        } else if i >= self.s2 {
            (self.fs2 - self.s2 as f32).min(1.0).min(self.cell)
        } else {
            1.0
        }
    }
}

fn area_down<T: Pixel>(
    src: &HostImage<T>,
    dst: &mut HostImage<T>,
    m: &ResizeMeta,
    x: usize,
    y: usize,
) {
    let ax = AreaSpan::new(x, m.scale_x, src.width);
    let ay = AreaSpan::new(y, m.scale_y, src.height);
    let norm = ax.cell * ay.cell;
    for c in 0..dst.channels {
        let mut acc = 0.0f32;
        for sy in ay.first..=ay.last {
            let wy = ay.weight(sy);
            let mut row = 0.0f32;
            for sx in ax.first..=ax.last {
                row += ax.weight(sx) * src.get(sx as usize, sy as usize, c).to_f32();
            }
            acc += wy * row;
        }
        dst.set(x, y, c, T::saturate_round(acc / norm));
    }
}

fn area_up_tap(d: usize, scale: f32, inv_scale: f32, size: usize) -> (usize, usize, f32) {
    let mut s = (d as f32 * scale).floor() as i64;
    let mut f = (d + 1) as f32 - (s + 1) as f32 * inv_scale;
    f = if f <= 0.0 { 0.0 } else { f - f.floor() };
    if s < 0 {
        f = 0.0;
        s = 0;
    }
    if s >= size as i64 - 1 {
        f = 0.0;
        s = size as i64 - 1;
    }
    let s = s as usize;
    (s, (s + 1).min(size - 1), f)
}

fn area_up<T: Pixel>(src: &HostImage<T>, dst: &mut HostImage<T>, m: &ResizeMeta, x: usize, y: usize) {
    let tx = area_up_tap(x, m.scale_x, m.inv_scale_x, src.width);
    let ty = area_up_tap(y, m.scale_y, m.inv_scale_y, src.height);
    blend(src, dst, (x, y), tx, ty);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ImageFormat;
    use crate::image::Size2D;

    fn gradient(w: usize, h: usize) -> HostImage<u8> {
        HostImage::from_fn(ImageFormat::RGB8, Size2D::new(w, h), 0, |x, y, c| {
            ((x * 7 + y * 3 + c * 50) % 256) as u8
        })
    }

    #[test]
    fn same_size_resize_is_identity() {
        let src = gradient(4, 4);
        for interp in [
            Interpolation::Nearest,
            Interpolation::Linear,
            Interpolation::Cubic,
            Interpolation::Area,
        ] {
            let mut dst = HostImage::new(ImageFormat::RGB8, Size2D::new(4, 4), 0);
            resize(&src, &mut dst, interp).expect("supported");
            assert_eq!(dst.max_abs_diff(&src), 0.0, "{interp:?}");
        }
    }

    #[test]
    fn integer_area_downscale_is_box_average() {
        let src = HostImage::from_fn(ImageFormat::U8, Size2D::new(4, 2), 0, |x, _, _| {
            [10u8, 20, 30, 41][x]
        });
        let mut dst = HostImage::new(ImageFormat::U8, Size2D::new(2, 1), 0);
        resize(&src, &mut dst, Interpolation::Area).expect("area");
        assert_eq!(dst.get(0, 0, 0), 15);
        // 35.5 rounds to even.
        assert_eq!(dst.get(1, 0, 0), 36);
    }

    #[test]
    fn constant_images_stay_constant() {
        let src = HostImage::from_fn(ImageFormat::RGBA8, Size2D::new(30, 30), 0, |_, _, c| {
            (40 + c * 30) as u8
        });
        for (w, h) in [(60, 60), (7, 11), (30, 9)] {
            for interp in [
                Interpolation::Nearest,
                Interpolation::Linear,
                Interpolation::Cubic,
                Interpolation::Area,
            ] {
                let mut dst = HostImage::new(ImageFormat::RGBA8, Size2D::new(w, h), 0);
                resize(&src, &mut dst, interp).expect("supported");
                for y in 0..h {
                    for x in 0..w {
                        for c in 0..4 {
                            assert_eq!(dst.get(x, y, c), (40 + c * 30) as u8, "{interp:?} {w}x{h}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn pillow_only_filters_are_rejected() {
        let src = gradient(4, 4);
        let mut dst = HostImage::new(ImageFormat::RGB8, Size2D::new(2, 2), 0);
        assert!(resize(&src, &mut dst, Interpolation::Hamming).is_err());
        assert!(resize(&src, &mut dst, Interpolation::Lanczos).is_err());
    }

    #[test]
    fn cubic_weights_partition_unity() {
        for f in [0.0f32, 0.25, 0.5, 0.9] {
            let w = cubic_weights(f);
            assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }
        assert_eq!(cubic_weights(0.0)[1], 1.0);
    }
}
