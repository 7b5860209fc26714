//! Interpolation modes and the separable filters used by pillow-style resize.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    Linear,
    Cubic,
    Area,
    Lanczos,
    Hamming,
    Box,
}

impl Interpolation {
    /// Discriminant shared with the CUDA sources (`INTERP_*` defines).
    pub const fn code(self) -> i32 {
        match self {
            Self::Nearest => 0,
            Self::Linear => 1,
            Self::Cubic => 2,
            Self::Area => 3,
            Self::Lanczos => 4,
            Self::Hamming => 5,
            Self::Box => 6,
        }
    }
}

/// Largest base support of any [`PillowFilter`] (Lanczos).
pub const MAX_FILTER_SUPPORT: f64 = 3.0;

/// Filters understood by the pillow-compatible resize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PillowFilter {
    Box,
    Bilinear,
    Hamming,
    Bicubic,
    Lanczos,
}

impl PillowFilter {
    pub fn from_interpolation(interp: Interpolation) -> Result<Self> {
        match interp {
            Interpolation::Box => Ok(Self::Box),
            Interpolation::Linear => Ok(Self::Bilinear),
            Interpolation::Hamming => Ok(Self::Hamming),
            Interpolation::Cubic => Ok(Self::Bicubic),
            Interpolation::Lanczos => Ok(Self::Lanczos),
            Interpolation::Nearest | Interpolation::Area => Err(EngineError::InvalidParameter(
                format!("pillow resize does not support {interp:?} interpolation"),
            )),
        }
    }

    /// Half-width of the filter at scale 1.
    pub const fn support(self) -> f64 {
        match self {
            Self::Box => 0.5,
            Self::Bilinear | Self::Hamming => 1.0,
            Self::Bicubic => 2.0,
            Self::Lanczos => 3.0,
        }
    }

    pub fn weight(self, x: f64) -> f64 {
        match self {
            Self::Box => box_filter(x),
            Self::Bilinear => bilinear_filter(x),
            Self::Hamming => hamming_filter(x),
            Self::Bicubic => bicubic_filter(x),
            Self::Lanczos => lanczos_filter(x),
        }
    }
}

fn box_filter(x: f64) -> f64 {
    if x > -0.5 && x <= 0.5 { 1.0 } else { 0.0 }
}

fn bilinear_filter(x: f64) -> f64 {
    let x = x.abs();
    if x < 1.0 { 1.0 - x } else { 0.0 }
}

fn hamming_filter(x: f64) -> f64 {
    let x = x.abs();
    if x == 0.0 {
        1.0
    } else if x >= 1.0 {
        0.0
    } else {
        let x = x * PI;
        x.sin() / x * (0.54 + 0.46 * x.cos())
    }
}

fn bicubic_filter(x: f64) -> f64 {
    // Keys kernel with a = -0.5.
    const A: f64 = -0.5;
    let x = x.abs();
    if x < 1.0 {
        ((A + 2.0) * x - (A + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        (((x - 5.0) * x + 8.0) * x - 4.0) * A
    } else {
        0.0
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let x = x * PI;
        x.sin() / x
    }
}

fn lanczos_filter(x: f64) -> f64 {
    if (-3.0..3.0).contains(&x) {
        sinc(x) * sinc(x / 3.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PillowFilter; 5] = [
        PillowFilter::Box,
        PillowFilter::Bilinear,
        PillowFilter::Hamming,
        PillowFilter::Bicubic,
        PillowFilter::Lanczos,
    ];

    #[test]
    fn filters_are_interpolating_at_integers() {
        for filter in ALL {
            assert_eq!(filter.weight(0.0), 1.0, "{filter:?}");
            for k in 1..4 {
                assert!(filter.weight(k as f64).abs() < 1e-12, "{filter:?} at {k}");
                assert!(filter.weight(-(k as f64)).abs() < 1e-12, "{filter:?} at -{k}");
            }
        }
    }

    #[test]
    fn supports_never_exceed_worst_case() {
        for filter in ALL {
            assert!(filter.support() <= MAX_FILTER_SUPPORT);
            assert_eq!(filter.weight(filter.support() + 1e-9), 0.0, "{filter:?}");
        }
    }

    #[test]
    fn resize_only_modes_are_rejected() {
        assert!(PillowFilter::from_interpolation(Interpolation::Nearest).is_err());
        assert!(PillowFilter::from_interpolation(Interpolation::Area).is_err());
        assert_eq!(
            PillowFilter::from_interpolation(Interpolation::Cubic).expect("cubic"),
            PillowFilter::Bicubic
        );
    }
}
