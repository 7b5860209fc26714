//! Separable resampling coefficient tables (Pillow's `precompute_coeffs`).
//!
//! For an axis resized from `in_size` to `out_size`, output position `i`
//! reads input samples `[bounds[2i], bounds[2i+1])` weighted by the first
//! `bounds[2i+1] - bounds[2i]` entries of row `i` of the table; the remaining
//! `ksize - count` entries are zero.

use crate::interp::{MAX_FILTER_SUPPORT, PillowFilter};

/// Fractional bits of fixed-point weights: 32 - 8 (u8 sample) - 2 (headroom).
pub const PRECISION_BITS: u32 = 32 - 8 - 2;

/// Weight sums below this are left unnormalized.
const NORMALIZE_EPSILON: f64 = 1e-5;

/// Geometry of one axis' table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisGeometry {
    pub scale: f64,
    pub filterscale: f64,
    pub support: f64,
    pub ksize: usize,
}

impl AxisGeometry {
    pub fn new(in_size: usize, out_size: usize, base_support: f64) -> Self {
        let scale = in_size as f64 / out_size as f64;
        let filterscale = scale.max(1.0);
        let support = base_support * filterscale;
        let ksize = support.ceil() as usize * 2 + 1;
        Self {
            scale,
            filterscale,
            support,
            ksize,
        }
    }

    /// Entries of the full table (`out_size × ksize`).
    pub fn table_len(&self, out_size: usize) -> usize {
        self.ksize * out_size
    }
}

/// Upper bound on `table_len` for any axis with `in_size <= max_in` and
/// `out_size <= max_out`, using the worst-case support of every filter.
///
/// Downscaling: `out × (2⌈s·in/out⌉ + 1) <= 2·s·in + 3·out`.
/// Upscaling: `out × (2⌈s⌉ + 1)`.
pub fn max_table_len(max_in: usize, max_out: usize) -> usize {
    let s = MAX_FILTER_SUPPORT;
    let down = (2.0 * s * max_in as f64).ceil() as usize + 3 * max_out;
    let up = (2 * s.ceil() as usize + 1) * max_out;
    down.max(up)
}

/// Fill `coeffs` (`out_size × ksize` entries) and `bounds` (`2 × out_size`
/// entries: `xmin`, `xmax`) for one axis.
pub fn build_axis(
    in_size: usize,
    out_size: usize,
    filter: PillowFilter,
    coeffs: &mut [f64],
    bounds: &mut [i32],
) -> AxisGeometry {
    let geo = AxisGeometry::new(in_size, out_size, filter.support());
    let ss = 1.0 / geo.filterscale;
    for (i, (row, bound)) in coeffs
        .chunks_exact_mut(geo.ksize)
        .zip(bounds.chunks_exact_mut(2))
        .take(out_size)
        .enumerate()
    {
        let center = (i as f64 + 0.5) * geo.scale;
        // `as i32` truncates toward zero.
        let xmin = ((center - geo.support + 0.5) as i32).max(0);
        let xmax = ((center + geo.support + 0.5) as i32).min(in_size as i32);
        let count = (xmax - xmin).max(0) as usize;

        let mut sum = 0.0;
        for (x, w) in row.iter_mut().take(count).enumerate() {
            *w = filter.weight((x as f64 + xmin as f64 - center + 0.5) * ss);
            sum += *w;
        }
        if sum.abs() >= NORMALIZE_EPSILON {
            for w in row.iter_mut().take(count) {
                *w /= sum;
            }
        }
        row.iter_mut().skip(count).for_each(|w| *w = 0.0);

        bound[0] = xmin;
        bound[1] = xmin + count as i32;
    }
    geo
}

/// Convert normalized weights to fixed point, rounding half away from zero.
pub fn quantize(weight: f64) -> i32 {
    let scaled = weight * (1u32 << PRECISION_BITS) as f64;
    if scaled < 0.0 {
        (scaled - 0.5) as i32
    } else {
        (scaled + 0.5) as i32
    }
}

/// Owned coefficient table for one axis, convenient for host code and tests.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisTable {
    pub geometry: AxisGeometry,
    pub coeffs: Vec<f64>,
    pub bounds: Vec<i32>,
}

impl AxisTable {
    pub fn new(in_size: usize, out_size: usize, filter: PillowFilter) -> Self {
        let geo = AxisGeometry::new(in_size, out_size, filter.support());
        let mut coeffs = vec![0.0; geo.table_len(out_size)];
        let mut bounds = vec![0; 2 * out_size];
        let geometry = build_axis(in_size, out_size, filter, &mut coeffs, &mut bounds);
        Self {
            geometry,
            coeffs,
            bounds,
        }
    }

    pub fn ksize(&self) -> usize {
        self.geometry.ksize
    }

    /// `(xmin, weights)` for output position `i`, weights trimmed to the
    /// active span.
    pub fn row(&self, i: usize) -> (usize, &[f64]) {
        let xmin = self.bounds[2 * i] as usize;
        let count = (self.bounds[2 * i + 1] - self.bounds[2 * i]) as usize;
        let start = i * self.ksize();
        (xmin, &self.coeffs[start..start + count])
    }

    pub fn as_f32(&self) -> Vec<f32> {
        self.coeffs.iter().map(|w| *w as f32).collect()
    }

    pub fn quantized(&self) -> Vec<i32> {
        self.coeffs.iter().map(|w| quantize(*w)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILTERS: [PillowFilter; 5] = [
        PillowFilter::Box,
        PillowFilter::Bilinear,
        PillowFilter::Hamming,
        PillowFilter::Bicubic,
        PillowFilter::Lanczos,
    ];

    #[test]
    fn weights_sum_to_one() {
        for filter in FILTERS {
            for (inp, out) in [(1920, 640), (30, 60), (7, 7), (5, 3), (3, 11)] {
                let table = AxisTable::new(inp, out, filter);
                for i in 0..out {
                    let (_, row) = table.row(i);
                    let sum: f64 = row.iter().sum();
                    assert!((sum - 1.0).abs() < 1e-5, "{filter:?} {inp}->{out} row {i}: {sum}");
                }
            }
        }
    }

    #[test]
    fn filterscale_and_support_grow_only_when_downscaling() {
        for filter in FILTERS {
            let up = AxisGeometry::new(30, 60, filter.support());
            assert_eq!(up.filterscale, 1.0);
            assert_eq!(up.support, filter.support());

            let down = AxisGeometry::new(1920, 640, filter.support());
            assert_eq!(down.filterscale, 3.0);
            assert!(down.support >= filter.support());
            assert_eq!(down.ksize, (filter.support() * 3.0).ceil() as usize * 2 + 1);
        }
    }

    #[test]
    fn bounds_stay_inside_input() {
        let table = AxisTable::new(10, 4, PillowFilter::Lanczos);
        for i in 0..4 {
            let (xmin, xmax) = (table.bounds[2 * i], table.bounds[2 * i + 1]);
            assert!(xmin >= 0 && xmax <= 10 && xmin < xmax);
            assert!(((xmax - xmin) as usize) <= table.ksize());
        }
        // Slots past the active span are zero.
        let k = table.ksize();
        let count = (table.bounds[1] - table.bounds[0]) as usize;
        assert!(table.coeffs[count..k].iter().all(|w| *w == 0.0));
    }

    #[test]
    fn same_size_is_identity() {
        for filter in FILTERS {
            let table = AxisTable::new(6, 6, filter);
            for i in 0..6 {
                let (xmin, row) = table.row(i);
                for (j, w) in row.iter().enumerate() {
                    let expected = if xmin + j == i { 1.0 } else { 0.0 };
                    assert!((w - expected).abs() < 1e-12, "{filter:?} {i} {j}");
                }
            }
        }
    }

    #[test]
    fn quantization_rounds_half_away_from_zero() {
        let one = 1i32 << PRECISION_BITS;
        assert_eq!(quantize(1.0), one);
        assert_eq!(quantize(0.5), one / 2);
        assert_eq!(quantize(-0.25), -(one / 4));
        let half_step = 0.5 / one as f64;
        assert_eq!(quantize(half_step), 1);
        assert_eq!(quantize(-half_step), -1);

        let table = AxisTable::new(20, 7, PillowFilter::Bicubic);
        let q = table.quantized();
        for i in 0..7 {
            let start = i * table.ksize();
            let sum: i64 = q[start..start + table.ksize()].iter().map(|v| *v as i64).sum();
            assert!((sum - one as i64).abs() <= table.ksize() as i64);
        }
    }

    #[test]
    fn worst_case_table_bound_covers_every_filter() {
        for filter in FILTERS {
            for (max_in, max_out) in [(1920, 640), (30, 60), (101, 7), (7, 101), (1, 1)] {
                for inp in [1, max_in / 2 + 1, max_in] {
                    for out in [1, max_out / 3 + 1, max_out] {
                        let geo = AxisGeometry::new(inp, out, filter.support());
                        assert!(
                            geo.table_len(out) <= max_table_len(max_in, max_out),
                            "{filter:?} {inp}->{out} within {max_in}->{max_out}"
                        );
                    }
                }
            }
        }
    }
}
