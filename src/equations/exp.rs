//! Exponential decay models for relaxation series.
//!
//! Covariates are `[delay]` in seconds. The amplitude is shared by all curves,
//! the rate follows the R2 state mask and the offset of `EXPABC` is kept per
//! residue and temperature.

use serde::{Deserialize, Serialize};

use crate::config::FitOptions;
use crate::data::{Dataset, Experiment, SamplePoint};
use crate::equations::equation::{EquationModel, ShiftParameter};
use crate::equations::map::{MapBuilder, ParameterMap, R2_MASK};
use crate::optim::{Bounds, FitError};

/// State columns that distinguish decay offsets: residue and temperature.
const OFFSET_MASK: [usize; 2] = [0, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpEquation {
    /// `A exp(-R t)`
    #[serde(rename = "EXPAB")]
    Ab,
    /// `A exp(-R t) + C`
    #[serde(rename = "EXPABC")]
    Abc,
}

impl ExpEquation {
    pub const ALL: [ExpEquation; 2] = [ExpEquation::Ab, ExpEquation::Abc];
}

/// Delay at which a curve crosses half of `half_of`, interpolated between the
/// closest points above and below.
fn mid_delay(curve: &[SamplePoint], half_of: f64) -> Option<f64> {
    let hh = half_of / 2.0;
    let mut above: Option<(f64, f64)> = None;
    let mut below: Option<(f64, f64)> = None;
    for p in curve {
        let d = p.y - hh;
        if d >= 0.0 {
            if above.map_or(true, |(y, _)| d < y - hh) {
                above = Some((p.y, p.x[0]));
            }
        } else if below.map_or(true, |(y, _)| -d < hh - y) {
            below = Some((p.y, p.x[0]));
        }
    }
    let ((y_up, x_up), (y_down, x_down)) = (above?, below?);
    if y_up == y_down {
        return Some((x_up + x_down) / 2.0);
    }
    Some((hh - y_down) / (y_up - y_down) * (x_up - x_down) + x_down)
}

impl EquationModel for ExpEquation {
    fn name(&self) -> &'static str {
        match self {
            ExpEquation::Ab => "EXPAB",
            ExpEquation::Abc => "EXPABC",
        }
    }

    fn experiment(&self) -> Experiment {
        Experiment::Exp
    }

    fn par_names(&self) -> &'static [&'static str] {
        match self {
            ExpEquation::Ab => &["A", "R"],
            ExpEquation::Abc => &["A", "R", "C"],
        }
    }

    fn n_group_pars(&self) -> usize {
        1
    }

    fn n_covariates(&self) -> usize {
        1
    }

    fn make_map(&self, states: &[Vec<usize>], state_count: &[usize]) -> Result<ParameterMap, FitError> {
        let builder = MapBuilder::new(states.len())
            .group()
            .masked(states, state_count, &R2_MASK);
        let builder = match self {
            ExpEquation::Ab => builder,
            ExpEquation::Abc => builder.masked(states, state_count, &OFFSET_MASK),
        };
        builder.build(self.n_group_pars())
    }

    fn evaluate(&self, pars: &[f64], row: &[usize], x: &[f64], _field: f64) -> f64 {
        let decay = pars[row[0]] * (-pars[row[1]] * x[0]).exp();
        match self {
            ExpEquation::Ab => decay,
            ExpEquation::Abc => decay + pars[row[2]],
        }
    }

    /// Amplitude from the largest intensity, the rate from the half-intensity
    /// delay and the offset from the smallest intensity. Curves that do not
    /// decay have no guess.
    fn guess(&self, data: &Dataset, map: &ParameterMap, _options: &FitOptions) -> Option<Vec<f64>> {
        let global_max = data
            .points()
            .iter()
            .map(|p| p.y)
            .fold(f64::NEG_INFINITY, f64::max);
        let mut guesses = vec![0.0; map.n_params()];
        for (id, row) in map.rows().iter().enumerate() {
            let curve = data.curve(id);
            let (min_y, max_y) = curve
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.y), hi.max(p.y)));
            let first = curve.iter().min_by(|a, b| a.x[0].total_cmp(&b.x[0]))?;
            let last = curve.iter().max_by(|a, b| a.x[0].total_cmp(&b.x[0]))?;
            let mid = mid_delay(curve, global_max)?;
            let rate = std::f64::consts::LN_2 / mid;
            if first.y <= last.y || !rate.is_finite() || rate <= 0.0 || max_y <= 0.0 {
                log::debug!("no decay found in curve {}", id);
                return None;
            }
            guesses[row[0]] = max_y;
            guesses[row[1]] = rate;
            if *self == ExpEquation::Abc {
                guesses[row[2]] = min_y;
            }
        }
        Some(guesses)
    }

    fn boundaries(
        &self,
        guesses: &[f64],
        _data: &Dataset,
        map: &ParameterMap,
        _options: &FitOptions,
    ) -> Option<Bounds> {
        let mut bounds = Bounds::zeros(guesses.len());
        for row in map.rows() {
            let amplitude = *guesses.get(row[0])?;
            for (j, &index) in row.iter().enumerate() {
                let g = *guesses.get(index)?;
                match j {
                    2 if g <= 0.0 => bounds.set(index, -amplitude.abs(), amplitude.abs()),
                    _ => bounds.set(index, 0.0, g * 4.0),
                }
            }
        }
        bounds.widen_to(guesses);
        Some(bounds)
    }

    fn rex(&self, _pars: &[f64], _row: &[usize], _curve: &[SamplePoint]) -> f64 {
        0.0
    }

    fn kex(&self, _pars: &[f64]) -> f64 {
        0.0
    }

    fn shift_parameter(&self) -> ShiftParameter {
        ShiftParameter::None
    }

    fn min_x(&self) -> Option<f64> {
        Some(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    const DELAYS: [f64; 9] = [0.0, 0.05, 0.1, 0.2, 0.3, 0.45, 0.6, 0.8, 1.0];

    fn decay(eq: ExpEquation, pars: &[f64]) -> Dataset {
        let row = (0..pars.len()).collect::<Vec<_>>();
        let n = DELAYS.len();
        Dataset::from_arrays(
            Experiment::Exp,
            DELAYS.iter().map(|t| vec![*t]).collect(),
            DELAYS.iter().map(|t| eq.evaluate(pars, &row, &[*t], 0.0)).collect(),
            vec![1.0; n],
            vec![0.0; n],
            vec![0; n],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_decay_values() {
        assert_relative_eq!(ExpEquation::Ab.evaluate(&[100.0, 2.0], &[0, 1], &[0.0], 0.0), 100.0);
        assert_relative_eq!(
            ExpEquation::Abc.evaluate(&[100.0, 2.0, 5.0], &[0, 1, 2], &[0.5], 0.0),
            100.0 * (-1.0f64).exp() + 5.0
        );
    }

    #[test]
    fn test_map_shares_amplitude() {
        let states = vec![vec![0, 0, 0, 0], vec![1, 0, 0, 0]];
        let map = ExpEquation::Abc.make_map(&states, &[2, 1, 1, 1]).unwrap();
        assert_eq!(map.rows(), &[vec![0, 1, 3], vec![0, 2, 4]]);
        assert_eq!(map.n_params(), 5);
    }

    #[test]
    fn test_guess_from_half_intensity() {
        // ARRANGE
        let data = decay(ExpEquation::Ab, &[100.0, 2.5]);
        let map = ExpEquation::Ab.make_map(data.states(), &data.state_count()).unwrap();

        // ACT
        let guess = ExpEquation::Ab.guess(&data, &map, &FitOptions::default()).unwrap();
        let bounds = ExpEquation::Ab
            .boundaries(&guess, &data, &map, &FitOptions::default())
            .unwrap();

        // ASSERT
        assert_relative_eq!(guess[0], 100.0);
        assert_relative_eq!(guess[1], 2.5, max_relative = 0.1);
        assert_eq!(bounds.lower, vec![0.0, 0.0]);
        assert_relative_eq!(bounds.upper[1], 4.0 * guess[1]);
    }

    #[test]
    fn test_offset_bounds_allow_zero_baseline() {
        let data = decay(ExpEquation::Abc, &[100.0, 2.5, 0.0]);
        let map = ExpEquation::Abc.make_map(data.states(), &data.state_count()).unwrap();
        let guess = vec![100.0, 2.5, 0.0];
        let bounds = ExpEquation::Abc
            .boundaries(&guess, &data, &map, &FitOptions::default())
            .unwrap();
        assert_eq!(bounds.lower[2], -100.0);
        assert_eq!(bounds.upper[2], 100.0);
    }

    #[test]
    fn test_rising_curve_has_no_guess() {
        let n = DELAYS.len();
        let data = Dataset::from_arrays(
            Experiment::Exp,
            DELAYS.iter().map(|t| vec![*t]).collect(),
            DELAYS.iter().map(|t| 10.0 + 50.0 * t).collect(),
            vec![1.0; n],
            vec![0.0; n],
            vec![0; n],
            None,
        )
        .unwrap();
        let map = ExpEquation::Ab.make_map(data.states(), &data.state_count()).unwrap();
        assert!(ExpEquation::Ab.guess(&data, &map, &FitOptions::default()).is_none());
    }
}
