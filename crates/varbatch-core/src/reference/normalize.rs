use super::HostImage;
use crate::ops::normalize::{NormalizeArgs, NormalizeParam};
use crate::pixel::Pixel;

/// Per-image view of the normalize parameters.
#[derive(Clone, Copy, Debug)]
pub struct NormalizeRef<'a> {
    pub args: &'a NormalizeArgs,
    pub sample: usize,
}

fn value(param: &NormalizeParam, sample: usize, channel: usize) -> f32 {
    let s = if param.samples == 1 { 0 } else { sample };
    let c = if param.channels == 1 { 0 } else { channel };
    param.values[s * param.channels + c]
}

/// `(x - base) * scale * global_scale + global_shift`, saturated into `dst`.
pub fn normalize<I: Pixel, O: Pixel>(src: &HostImage<I>, dst: &mut HostImage<O>, p: NormalizeRef<'_>) {
    let args = p.args;
    for y in 0..src.height {
        for x in 0..src.width {
            for c in 0..src.channels {
                let base = value(&args.base, p.sample, c);
                let mut scale = value(&args.scale, p.sample, c);
                if args.scale_is_stddev {
                    scale = 1.0 / (scale * scale + args.epsilon).sqrt();
                }
                let v = (src.get(x, y, c).to_f32() - base) * scale * args.global_scale
                    + args.global_shift;
                dst.set(x, y, c, O::saturate_round(v));
            }
        }
    }
}
