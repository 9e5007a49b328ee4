//! Peak and baseline detection on a single CEST or R1rho curve.
//!
//! CEST profiles show dips below a saturation-free baseline, R1rho profiles show
//! maxima above it. [`cest_peak_guess`] finds at most two such features and
//! measures their widths at three heights; the estimators in
//! [`crate::guess::estimates`] turn them into starting values.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::guess::smoothing::{savitzky_golay, window_for};

/// Width of the sliding window used for the baseline estimate.
const BASELINE_WINDOW: usize = 8;

/// Neighbours on each side a candidate must dominate.
const NEIGHBOURS: usize = 2;

/// Peaks closer than this to the baseline collapse the pair into one peak.
const MIN_PEAK_DEPTH: f64 = 0.05;

/// Growth of the previous width when neither side of a level is bracketed.
const UNBRACKETED_GROWTH: f64 = 1.3;

/// Sign convention of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakMode {
    /// Dips below the baseline
    Cest,
    /// Maxima above the baseline
    R1rho,
}

impl PeakMode {
    /// `true` when `a` is further from the baseline than `b` in this mode.
    fn more_extreme(&self, a: f64, b: f64) -> bool {
        match self {
            PeakMode::Cest => a < b,
            PeakMode::R1rho => a > b,
        }
    }
}

/// Baseline level and the standard deviation of the window it was taken from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub value: f64,
    pub sd: f64,
}

/// Width of a peak at one height, in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakWidth {
    pub total: f64,
    /// Distance to the crossing found scanning towards lower indices
    pub lower: f64,
    /// Distance to the crossing found scanning towards higher indices
    pub upper: f64,
}

/// A detected peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CestPeak {
    /// Index of the peak center in the curve
    pub index: usize,
    /// Offset of the center in ppm
    pub position: f64,
    /// Observed value at the center
    pub depth: f64,
    /// Width at half height
    pub width50: PeakWidth,
    /// Width at a quarter of the height
    pub width25: PeakWidth,
    /// Width at three quarters of the height
    pub width75: PeakWidth,
    /// Baseline the widths were measured against
    pub baseline: f64,
}

impl CestPeak {
    /// Widths at 25, 50 and 75 percent height.
    pub fn widths(&self) -> [f64; 3] {
        [self.width25.total, self.width50.total, self.width75.total]
    }
}

/// Estimates the baseline as the most extreme mean over a sliding window of 8 points.
///
/// CEST takes the largest window mean, R1rho the smallest. Curves shorter than the
/// window use all points.
pub fn baseline(values: &[f64], mode: PeakMode) -> Baseline {
    let window = BASELINE_WINDOW.min(values.len());
    if window == 0 {
        return Baseline {
            value: f64::NAN,
            sd: f64::NAN,
        };
    }
    let mut best: Option<Baseline> = None;
    for chunk in values.windows(window) {
        let mean = chunk.iter().mean();
        let replace = match best {
            None => true,
            Some(b) => match mode {
                PeakMode::Cest => mean > b.value,
                PeakMode::R1rho => mean < b.value,
            },
        };
        if replace {
            let sd = if window > 1 { chunk.iter().std_dev() } else { 0.0 };
            best = Some(Baseline { value: mean, sd });
        }
    }
    best.unwrap_or(Baseline {
        value: f64::NAN,
        sd: f64::NAN,
    })
}

/// Finds up to two peaks of a CEST/R1rho profile.
///
/// # Arguments
/// * `x` - Offsets in ppm, ascending
/// * `y` - Observed intensities (CEST) or rates (R1rho)
/// * `field` - Field of the observed nucleus in MHz, converts ppm widths to Hz
/// * `mode` - Sign convention of the profile
///
/// # Returns
/// * `Vec<CestPeak>` - Peaks sorted by ascending depth. Empty when nothing stands
///   out of the baseline noise.
pub fn cest_peak_guess(x: &[f64], y: &[f64], field: f64, mode: PeakMode) -> Vec<CestPeak> {
    let n = x.len().min(y.len());
    if n <= 2 * NEIGHBOURS {
        return Vec::new();
    }
    let base = baseline(&y[..n], mode);
    if !base.value.is_finite() {
        return Vec::new();
    }

    let values = match (mode, window_for(n)) {
        (PeakMode::Cest, Some(size)) => {
            savitzky_golay(&y[..n], size).unwrap_or_else(|| y[..n].to_vec())
        }
        _ => y[..n].to_vec(),
    };

    let threshold = match mode {
        PeakMode::Cest => base.value - 3.0 * base.sd,
        PeakMode::R1rho => base.value + 1.5 * base.sd,
    };

    let mut peaks = (NEIGHBOURS..n - NEIGHBOURS)
        .filter(|&i| mode.more_extreme(values[i], threshold))
        .filter(|&i| {
            (i - NEIGHBOURS..=i + NEIGHBOURS).all(|j| !mode.more_extreme(values[j], values[i]))
        })
        .map(|i| measure_peak(x, &values, i, base.value, field, mode))
        .collect::<Vec<_>>();

    peaks.sort_by_key(|p| OrderedFloat(p.depth));

    let mut selected = match (mode, peaks.len()) {
        (_, 0) => return Vec::new(),
        (_, 1) => {
            let peak = peaks.remove(0);
            let mirror = mirror_peak(&peak, base.value, field);
            vec![peak, mirror]
        }
        (PeakMode::Cest, _) => peaks[..2].to_vec(),
        (PeakMode::R1rho, len) => peaks[len - 2..].to_vec(),
    };
    selected.sort_by_key(|p| OrderedFloat(p.depth));

    let first = (selected[0].depth - base.value).abs();
    let second = (selected[1].depth - base.value).abs();
    if first < MIN_PEAK_DEPTH || second < MIN_PEAK_DEPTH {
        let keep = if selected[0].depth > selected[1].depth && selected[1].depth != 0.0 {
            1
        } else {
            0
        };
        vec![selected.swap_remove(keep)]
    } else {
        selected
    }
}

/// Synthesizes the partner of a lone peak, stepping away from its larger
/// half-width.
fn mirror_peak(peak: &CestPeak, baseline: f64, field: f64) -> CestPeak {
    let position = if peak.width50.lower > peak.width50.upper {
        peak.position + peak.width50.lower / field / 2.0
    } else {
        peak.position - peak.width50.upper / field / 2.0
    };
    CestPeak {
        position,
        depth: (baseline + peak.depth) / 2.0,
        ..peak.clone()
    }
}

/// Measures the widths of the candidate centered at `center`.
///
/// A side whose crossing cannot be bracketed borrows the distance of the other
/// side; with neither side found the previous level's width grows by
/// [`UNBRACKETED_GROWTH`].
fn measure_peak(
    x: &[f64],
    y: &[f64],
    center: usize,
    baseline: f64,
    field: f64,
    mode: PeakMode,
) -> CestPeak {
    let yc = y[center];
    let levels = match mode {
        PeakMode::Cest => [
            (baseline - yc) / 2.0 + yc,
            (baseline - yc) / 4.0 + yc,
            3.0 * ((baseline - yc) / 4.0) + yc,
        ],
        PeakMode::R1rho => [
            (yc - baseline) / 8.0 + baseline,
            (yc - baseline) / 16.0 + baseline,
            3.0 * ((yc - baseline) / 16.0) + baseline,
        ],
    };

    let xc = x[center];
    let mut widths = [PeakWidth {
        total: 0.0,
        lower: 0.0,
        upper: 0.0,
    }; 3];
    let mut previous: Option<PeakWidth> = None;
    for (width, level) in widths.iter_mut().zip(levels) {
        let left = crossing(x, y, center, -1, level, mode).map(|v| (v - xc).abs() * field);
        let right = crossing(x, y, center, 1, level, mode).map(|v| (v - xc).abs() * field);
        let grown = |side: fn(&PeakWidth) -> f64| {
            previous.as_ref().map_or(0.0, |p| side(p) * UNBRACKETED_GROWTH)
        };
        let lower = left.or(right).unwrap_or_else(|| grown(|p| p.lower));
        let upper = right.or(left).unwrap_or_else(|| grown(|p| p.upper));
        *width = PeakWidth {
            total: lower + upper,
            lower,
            upper,
        };
        previous = Some(*width);
    }

    CestPeak {
        index: center,
        position: xc,
        depth: yc,
        width50: widths[0],
        width25: widths[1],
        width75: widths[2],
        baseline,
    }
}

/// Walks from `center` in direction `dir` and interpolates the position where the
/// profile crosses `level`.
fn crossing(x: &[f64], y: &[f64], center: usize, dir: isize, level: f64, mode: PeakMode) -> Option<f64> {
    let mut inside: Option<(usize, f64)> = None;
    let mut outside: Option<(usize, f64)> = None;
    let mut j = center as isize + dir;
    while j >= 0 && (j as usize) < y.len() {
        let idx = j as usize;
        let delta = y[idx] - level;
        if mode.more_extreme(delta, 0.0) {
            let keep = match (inside, mode) {
                (None, _) => true,
                (Some((_, d)), PeakMode::Cest) => delta.abs() < d,
                (Some((_, d)), PeakMode::R1rho) => delta.abs() > d,
            };
            if keep {
                inside = Some((idx, delta.abs()));
            }
        } else {
            outside = Some((idx, delta.abs()));
            break;
        }
        j += dir;
    }
    let (i_up, d_up) = inside?;
    let (i_low, d_low) = outside?;
    let total = d_low + d_up;
    if total == 0.0 {
        return Some(x[i_low]);
    }
    Some(x[i_low] * d_up / total + x[i_up] * d_low / total)
}
