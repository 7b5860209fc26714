use super::HostImage;
use crate::coeffs::{AxisTable, PRECISION_BITS};
use crate::config::PillowPrecision;
use crate::error::{EngineError, Result};
use crate::format::DataKind;
use crate::interp::PillowFilter;
use crate::pixel::Pixel;

/// Two-pass separable resize: horizontal into an f32 intermediate of
/// `src.height × dst.width`, then vertical into `dst`.
pub fn pillow_resize<T: Pixel>(
    src: &HostImage<T>,
    dst: &mut HostImage<T>,
    filter: PillowFilter,
    precision: PillowPrecision,
) -> Result<()> {
    let h = AxisTable::new(src.width, dst.width, filter);
    let v = AxisTable::new(src.height, dst.height, filter);
    let channels = dst.channels;
    let inter_stride = dst.width * channels;
    let mut inter = vec![0.0f32; src.height * inter_stride];

    match precision {
        PillowPrecision::Float => {
            let hw = h.as_f32();
            let vw = v.as_f32();
            for y in 0..src.height {
                for x in 0..dst.width {
                    let (xmin, count) = span(&h.bounds, x);
                    let w = &hw[x * h.ksize()..];
                    for c in 0..channels {
                        let mut acc = 0.0f32;
                        for i in 0..count {
                            acc += w[i] * src.get(xmin + i, y, c).to_f32();
                        }
                        inter[y * inter_stride + x * channels + c] = acc;
                    }
                }
            }
            for y in 0..dst.height {
                let (ymin, count) = span(&v.bounds, y);
                let w = &vw[y * v.ksize()..];
                for x in 0..dst.width {
                    for c in 0..channels {
                        let mut acc = 0.0f32;
                        for i in 0..count {
                            acc += w[i] * inter[(ymin + i) * inter_stride + x * channels + c];
                        }
                        dst.set(x, y, c, T::saturate_round(acc));
                    }
                }
            }
        }
        PillowPrecision::Fixed => {
            if T::KIND != DataKind::U8 {
                return Err(EngineError::UnsupportedDataKind {
                    op: "pillow_resize",
                    kind: T::KIND,
                });
            }
            let hw = h.quantized();
            let vw = v.quantized();
            for y in 0..src.height {
                for x in 0..dst.width {
                    let (xmin, count) = span(&h.bounds, x);
                    let w = &hw[x * h.ksize()..];
                    for c in 0..channels {
                        let mut acc = 1i32 << (PRECISION_BITS - 1);
                        for i in 0..count {
                            acc += w[i] * src.get(xmin + i, y, c).to_f32() as i32;
                        }
                        inter[y * inter_stride + x * channels + c] = clip8(acc) as f32;
                    }
                }
            }
            for y in 0..dst.height {
                let (ymin, count) = span(&v.bounds, y);
                let w = &vw[y * v.ksize()..];
                for x in 0..dst.width {
                    for c in 0..channels {
                        let mut acc = 1i32 << (PRECISION_BITS - 1);
                        for i in 0..count {
                            acc += w[i] * inter[(ymin + i) * inter_stride + x * channels + c] as i32;
                        }
                        dst.set(x, y, c, T::saturate_round(clip8(acc) as f32));
                    }
                }
            }
        }
    }
    Ok(())
}

#[inline]
fn span(bounds: &[i32], i: usize) -> (usize, usize) {
    let lo = bounds[2 * i];
    (lo as usize, (bounds[2 * i + 1] - lo) as usize)
}

#[inline]
pub(crate) fn clip8(acc: i32) -> i32 {
    (acc >> PRECISION_BITS).clamp(0, 255)
}
