//! Starting values for exchange parameters derived from detected peaks.

use std::f64::consts::PI;

use crate::guess::peaks::{baseline, CestPeak, PeakMode};

/// Largest minor population handed out as a guess.
const MAX_PB_GUESS: f64 = 0.25;

/// Population guess used when only one peak is available.
const DEFAULT_PB_GUESS: f64 = 0.1;

/// Estimates the minor state population from the relative peak depths.
///
/// # Arguments
/// * `peaks` - Output of [`crate::guess::peaks::cest_peak_guess`]
/// * `y` - Observed values of the curve
/// * `mode` - Sign convention of the profile
///
/// # Returns
/// * `f64` - Population estimate, at most 0.25
pub fn pb_guess(peaks: &[CestPeak], y: &[f64], mode: PeakMode) -> f64 {
    if peaks.len() < 2 {
        return DEFAULT_PB_GUESS;
    }
    let base = baseline(y, mode).value;
    let factor = match mode {
        PeakMode::Cest => 4.0,
        PeakMode::R1rho => 40.0,
    };
    let (d0, d1) = (peaks[0].depth, peaks[1].depth);
    let ratio = if d0 > d1 {
        (base - d0).abs() / (base - d1).abs()
    } else {
        (base - d1).abs() / (base - d0).abs()
    };
    (ratio / factor).min(MAX_PB_GUESS)
}

/// Estimates the transverse relaxation rates of both states from the half-height widths.
///
/// # Returns
/// * `[f64; 2]` - `[R2A, R2B]`; equal when only one peak is available
pub fn r2_guess(peaks: &[CestPeak], y: &[f64], mode: PeakMode) -> [f64; 2] {
    let Some(first) = peaks.first() else {
        return [f64::NAN, f64::NAN];
    };
    if peaks.len() < 2 {
        let width = first.width50.total / (2.0 * PI);
        return [width, width];
    }
    let pb = pb_guess(peaks, y, mode);
    let (a_factor, b_factor) = match mode {
        PeakMode::Cest => (1.0, 1.0),
        PeakMode::R1rho => (12.0, 6.0),
    };
    let (major, minor) = if peaks[0].depth > peaks[1].depth {
        (&peaks[1], &peaks[0])
    } else {
        (&peaks[0], &peaks[1])
    };
    let a_width = major.width50.total / (2.0 * PI);
    let b_width = minor.width50.total / (2.0 * PI);
    let kex = (a_width + b_width) / 2.0;
    [
        (a_width - (1.0 - pb) * kex).abs() / a_factor,
        (b_width - pb * kex).abs() / b_factor,
    ]
}

/// Estimates the exchange rate as the mean half-height width of the two peaks.
pub fn kex_guess(peaks: &[CestPeak], mode: PeakMode) -> f64 {
    let factor = match mode {
        PeakMode::Cest => 1.0,
        PeakMode::R1rho => 3.0,
    };
    match peaks {
        [] => f64::NAN,
        [only] => only.width50.total / (2.0 * PI) / factor,
        [first, second, ..] => {
            let a_width = second.width50.total / (2.0 * PI);
            let b_width = first.width50.total / (2.0 * PI);
            (a_width + b_width) / 2.0 / factor
        }
    }
}

/// Estimates R1 from the baseline.
///
/// CEST uses the saturation-free intensity `exp(-R1 Tex)`; R1rho takes the
/// baseline rate itself.
///
/// # Returns
/// * `Option<f64>` - `None` when the CEST baseline is not positive
pub fn r1_guess(y: &[f64], tex: f64, mode: PeakMode) -> Option<f64> {
    let base = baseline(y, mode).value;
    if !base.is_finite() {
        return None;
    }
    match mode {
        PeakMode::R1rho => Some(base),
        PeakMode::Cest if tex == 0.0 => Some(0.0),
        PeakMode::Cest if base <= 0.0 => None,
        PeakMode::Cest => Some(-base.ln() / tex),
    }
}

/// Bounds for R1 that keep the baseline intensity within `delta` of `exp(-r1 tex)`.
///
/// # Returns
/// * `(f64, f64)` - Lower and upper bound; both NaN for a non-positive `tex`
pub fn r1_boundaries(r1: f64, tex: f64, delta: f64) -> (f64, f64) {
    if tex <= 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let base = (-r1 * tex).exp();
    let low = -(base + 0.1).ln() / tex;
    let up = -(base - delta).max(0.01).ln() / tex;
    (low, up)
}
