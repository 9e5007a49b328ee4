//! Map layout, starting values and bounds shared by the CEST and R1rho families.
//!
//! Both families use the same eight parameter two-state layout
//! `[Kex, Pb, deltaA0, deltaB0, R1A, R1B, R2A, R2B]` or the three parameter
//! no-exchange layout `[deltaA0, R1A, R2A]`.

use crate::data::{Dataset, SamplePoint};
use crate::equations::formulas::{ExchangePars, Irradiation};
use crate::equations::map::ParameterMap;
use crate::guess::estimates::{kex_guess, pb_guess, r1_boundaries, r1_guess, r2_guess};
use crate::guess::peaks::{cest_peak_guess, CestPeak, PeakMode};
use crate::optim::{Bounds, FitError};

pub(crate) const TWO_STATE_NAMES: [&str; 8] =
    ["Kex", "Pb", "deltaA0", "deltaB0", "R1A", "R1B", "R2A", "R2B"];
pub(crate) const NOEX_NAMES: [&str; 3] = ["deltaA0", "R1A", "R2A"];

/// Local columns with R1A and R1B tied.
pub(crate) const TIED_R1: ([usize; 6], usize) = ([2, 3, 4, 4, 5, 6], 5);
/// Local columns with both relaxation pairs tied.
pub(crate) const TIED_R1_R2: ([usize; 6], usize) = ([2, 3, 4, 4, 5, 5], 4);
/// Local columns without ties.
pub(crate) const UNTIED: ([usize; 6], usize) = ([2, 3, 4, 5, 6, 7], 6);
/// Local columns with R2A and R2B tied.
pub(crate) const TIED_R2: ([usize; 6], usize) = ([2, 3, 4, 5, 6, 6], 5);

const KEX_LIMITS: (f64, f64) = (1.0, 500.0);
const PB_LIMITS: (f64, f64) = (0.01, 0.25);
const R2_LIMITS: (f64, f64) = (1.0, 250.0);
const R1_DELTA: f64 = 0.1;

/// Two-state map: Kex and Pb shared, the local block moves by `step` whenever
/// the residue state changes from one curve to the next.
pub(crate) fn two_state_map(
    states: &[Vec<usize>],
    (template, step): ([usize; 6], usize),
) -> Result<ParameterMap, FitError> {
    let mut offset = 0;
    let mut last = 0;
    let rows = states
        .iter()
        .map(|state| {
            let residue = state.first().copied().unwrap_or(0);
            if residue != last {
                offset += step;
            }
            last = residue;
            [0, 1]
                .into_iter()
                .chain(template.iter().map(|t| t + offset))
                .collect()
        })
        .collect();
    ParameterMap::new(rows, 2)
}

/// No-exchange map: every curve reads the same three parameters.
pub(crate) fn noex_map(n_curves: usize) -> Result<ParameterMap, FitError> {
    ParameterMap::new(vec![vec![0, 1, 2]; n_curves], 0)
}

/// Two-state parameters of the curve with map row `row`.
pub(crate) fn two_state_pars(pars: &[f64], row: &[usize]) -> ExchangePars {
    ExchangePars {
        kex: pars[row[0]],
        pb: pars[row[1]],
        r1a: pars[row[4]],
        r1b: pars[row[5]],
        r2a: pars[row[6]],
        r2b: pars[row[7]],
    }
}

/// Irradiation geometry of point `x = [offset, B1, ...]` for shifts in columns 2 and 3.
pub(crate) fn two_state_irradiation(pars: &[f64], row: &[usize], x: &[f64], field: f64) -> Irradiation {
    Irradiation::new(x[0], x[1], pars[row[2]], pars[row[3]], field)
}

/// Largest change in the prediction when exchange is switched off.
pub(crate) fn exchange_contribution<F>(pars: &[f64], row: &[usize], curve: &[SamplePoint], calc: F) -> f64
where
    F: Fn(&[f64], &SamplePoint) -> f64,
{
    let mut quenched = pars.to_vec();
    quenched[row[0]] = 0.0;
    quenched[row[1]] = 0.0;
    curve
        .iter()
        .map(|p| (calc(pars, p) - calc(&quenched, p)).abs())
        .fold(0.0, f64::max)
}

/// Peaks and profile of one curve.
struct CurvePeaks {
    peaks: Vec<CestPeak>,
    y: Vec<f64>,
    tex: f64,
    field: f64,
    /// Offset range covered by the curve, in ppm
    span: f64,
}

impl CurvePeaks {
    /// Reads curve `id`, which may turn out to have no peaks.
    fn read(data: &Dataset, id: usize, mode: PeakMode) -> Option<Self> {
        let curve = data.curve(id);
        let tex = curve.first()?.x.get(2).copied().unwrap_or(0.0);
        let field = data.curve_field(id);
        let x = curve.iter().map(|p| p.x[0]).collect::<Vec<_>>();
        let y = curve.iter().map(|p| p.y).collect::<Vec<_>>();
        let (low, high) = x
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        let peaks = cest_peak_guess(&x, &y, field, mode);
        Some(Self {
            peaks,
            y,
            tex,
            field,
            span: high - low,
        })
    }

    /// Reads curve `id` and requires at least one peak.
    fn detect(data: &Dataset, id: usize, mode: PeakMode) -> Option<Self> {
        let curve = Self::read(data, id, mode)?;
        if curve.peaks.is_empty() {
            log::debug!("no peak found in curve {}", id);
            return None;
        }
        Some(curve)
    }

    fn first(&self) -> &CestPeak {
        &self.peaks[0]
    }

    fn last(&self) -> &CestPeak {
        &self.peaks[self.peaks.len() - 1]
    }

    /// Shift guesses of the two states.
    ///
    /// CEST seeds the ground state from the deepest dip; R1rho from the highest
    /// maximum, which sorts last.
    fn shifts(&self, mode: PeakMode) -> (f64, f64) {
        match mode {
            PeakMode::Cest => (self.first().position, self.last().position),
            PeakMode::R1rho => (self.last().position, self.first().position),
        }
    }

    /// Half of the half-height width of the first and last peak, in ppm.
    ///
    /// A curve without peaks allows half of its offset span.
    fn shift_ranges(&self) -> (f64, f64) {
        let half = |p: &CestPeak| p.width50.total / self.field / 2.0;
        match (self.peaks.first(), self.peaks.last()) {
            (Some(first), Some(last)) => (half(first), half(last)),
            _ => (self.span / 2.0, self.span / 2.0),
        }
    }
}

/// Starting values of the two-state layout.
///
/// Kex and Pb are averaged over all curves.
pub(crate) fn two_state_guess(data: &Dataset, map: &ParameterMap, mode: PeakMode) -> Option<Vec<f64>> {
    let mut guesses = vec![0.0; map.n_params()];
    let mut kex = 0.0;
    let mut pb = 0.0;
    for (id, row) in map.rows().iter().enumerate() {
        let curve = CurvePeaks::detect(data, id, mode)?;
        let r1 = r1_guess(&curve.y, curve.tex, mode)?;
        let r2 = r2_guess(&curve.peaks, &curve.y, mode);
        let (delta_a, delta_b) = curve.shifts(mode);
        kex += kex_guess(&curve.peaks, mode);
        pb += pb_guess(&curve.peaks, &curve.y, mode);
        guesses[row[2]] = delta_a;
        guesses[row[3]] = delta_b;
        guesses[row[4]] = r1;
        guesses[row[5]] = r1;
        guesses[row[6]] = r2[0];
        guesses[row[7]] = r2[1];
    }
    let n = map.n_curves() as f64;
    let group = map.row(0).ok()?;
    guesses[group[0]] = kex / n;
    guesses[group[1]] = pb / n;
    Some(guesses)
}

/// Bounds of the two-state layout around `guesses`.
pub(crate) fn two_state_bounds(
    guesses: &[f64],
    data: &Dataset,
    map: &ParameterMap,
    mode: PeakMode,
) -> Option<Bounds> {
    if guesses.len() != map.n_params() {
        return None;
    }
    let mut bounds = Bounds::zeros(guesses.len());
    for (id, row) in map.rows().iter().enumerate() {
        let curve = CurvePeaks::read(data, id, mode)?;
        let (a_range, b_range) = curve.shift_ranges();
        bounds.set(row[0], KEX_LIMITS.0, KEX_LIMITS.1);
        bounds.set(row[1], PB_LIMITS.0, PB_LIMITS.1);
        bounds.set(row[2], guesses[row[2]] - a_range, guesses[row[2]] + a_range);
        bounds.set(row[3], guesses[row[3]] - b_range, guesses[row[3]] + b_range);
        for j in [4, 5] {
            let (low, up) = r1_boundaries(guesses[row[j]], curve.tex, R1_DELTA);
            bounds.set(row[j], low, up);
        }
        bounds.set(row[6], R2_LIMITS.0, R2_LIMITS.1);
        bounds.set(row[7], R2_LIMITS.0, R2_LIMITS.1);
    }
    bounds.widen_to(guesses);
    Some(bounds)
}

/// Starting values of the no-exchange layout, taken from the last curve.
pub(crate) fn noex_guess(data: &Dataset, map: &ParameterMap, mode: PeakMode) -> Option<Vec<f64>> {
    let mut guesses = vec![0.0; map.n_params()];
    for (id, row) in map.rows().iter().enumerate() {
        let curve = CurvePeaks::detect(data, id, mode)?;
        let r1 = r1_guess(&curve.y, curve.tex, mode)?;
        let r2 = r2_guess(&curve.peaks, &curve.y, mode);
        guesses[row[0]] = curve.shifts(mode).0;
        guesses[row[1]] = r1;
        guesses[row[2]] = r2[0] / 2.0;
    }
    Some(guesses)
}

/// Bounds of the no-exchange layout.
///
/// The R1rho shift range is half the raw width in Hz, which is far wider than
/// the CEST range in ppm. Curves without peaks fall back to half their offset
/// span.
pub(crate) fn noex_bounds(
    guesses: &[f64],
    data: &Dataset,
    map: &ParameterMap,
    mode: PeakMode,
) -> Option<Bounds> {
    if guesses.len() != map.n_params() {
        return None;
    }
    let row = map.row(0).ok()?;
    let curve = CurvePeaks::read(data, 0, mode)?;
    let (first, last) = curve.shift_ranges();
    let (shift_range, r2_upper) = match mode {
        PeakMode::Cest => (first, (4.0 * guesses[row[2]]).max(200.0)),
        PeakMode::R1rho => (last * curve.field, R2_LIMITS.1),
    };
    let (r1_low, r1_up) = r1_boundaries(guesses[row[1]], curve.tex, R1_DELTA);

    let mut bounds = Bounds::zeros(guesses.len());
    bounds.set(row[0], guesses[row[0]] - shift_range, guesses[row[0]] + shift_range);
    bounds.set(row[1], r1_low, r1_up);
    bounds.set(row[2], 0.1, r2_upper);
    bounds.widen_to(guesses);
    Some(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_two_state_map_steps_with_residue() {
        let states = vec![vec![0, 0, 0, 0], vec![0, 1, 0, 0], vec![1, 0, 0, 0]];
        let map = two_state_map(&states, TIED_R1).unwrap();
        assert_eq!(map.rows()[0], vec![0, 1, 2, 3, 4, 4, 5, 6]);
        assert_eq!(map.rows()[1], vec![0, 1, 2, 3, 4, 4, 5, 6]);
        assert_eq!(map.rows()[2], vec![0, 1, 7, 8, 9, 9, 10, 11]);
        assert_eq!(map.n_params(), 12);
    }

    #[test]
    fn test_untied_map_has_eight_parameters() {
        let map = two_state_map(&[vec![0, 0, 0, 0]], UNTIED).unwrap();
        assert_eq!(map.n_params(), 8);
        let map = two_state_map(&[vec![0, 0, 0, 0]], TIED_R1_R2).unwrap();
        assert_eq!(map.n_params(), 6);
    }

    #[test]
    fn test_noex_map_is_shared() {
        let map = noex_map(3).unwrap();
        assert_eq!(map.n_params(), 3);
        assert!(map.rows().iter().all(|r| r == &vec![0, 1, 2]));
    }
}
