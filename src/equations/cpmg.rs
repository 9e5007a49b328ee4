//! CPMG relaxation dispersion models.
//!
//! Covariates are `[nu_cpmg]` for the single quantum models and
//! `[nu_cpmg, field_h, tau]` for the multiple quantum model. The point field is
//! the field of the observed heteronucleus.

use std::f64::consts::PI;

use nalgebra::Complex;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::config::FitOptions;
use crate::data::{Dataset, Experiment, SamplePoint};
use crate::equations::equation::{EquationModel, ShiftParameter};
use crate::equations::map::{MapBuilder, ParameterMap, R2_MASK, SHIFT_MASK};
use crate::optim::{Bounds, FitError};

/// kex at which the fast exchange dispersion reaches half height, in units of 1/tau_cp.
const HALF_HEIGHT_KEX: f64 = 1.915;

/// Major population used as a starting value by the two state models.
const PA_GUESS: f64 = 0.95;

/// Largest major population the two state models may reach.
const PA_UPPER: f64 = 0.999;

/// Proton shift difference guess of the multiple quantum model, in ppm.
const DELTA_H_GUESS: f64 = 0.1;

/// Pulsing rates used to measure the exchange contribution.
const REX_LOW_NU: f64 = 10.0;
const REX_HIGH_NU: f64 = 1.0e4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpmgEquation {
    #[serde(rename = "NOEX")]
    NoEx,
    #[serde(rename = "CPMGFAST")]
    Fast,
    #[serde(rename = "CPMGSLOW")]
    Slow,
    #[serde(rename = "CPMGMQ")]
    MultipleQuantum,
}

impl CpmgEquation {
    pub const ALL: [CpmgEquation; 4] = [
        CpmgEquation::NoEx,
        CpmgEquation::Fast,
        CpmgEquation::Slow,
        CpmgEquation::MultipleQuantum,
    ];
}

/// Fast exchange (Luz-Meiboom) dispersion.
pub fn fast(kex: f64, r2: f64, dppm_min: f64, nu: f64, field: f64) -> f64 {
    if kex <= 0.0 {
        return r2;
    }
    let tau_cp = 1.0 / (2.0 * nu);
    let dw = 2.0 * PI * dppm_min * field;
    let rex = dw * dw / 4.0 / kex;
    r2 + rex * (1.0 - 2.0 * (0.5 * kex * tau_cp).tanh() / (kex * tau_cp))
}

/// Carver-Richards two state dispersion valid at all exchange rates.
pub fn slow(kex: f64, pa: f64, r2: f64, dppm: f64, nu: f64, field: f64) -> f64 {
    let pb = 1.0 - pa;
    let p_delta = pa - pb;
    let dw = dppm * field * 2.0 * PI;
    let tau_cp = 1.0 / (2.0 * nu);
    let psi = (p_delta * kex).powi(2) - dw * dw + 4.0 * pa * pb * kex * kex;
    let zeta = -2.0 * dw * kex * p_delta;
    let eta1 = (psi * psi + zeta * zeta).sqrt();
    let eta_p = tau_cp / 2f64.sqrt() * (eta1 + psi).sqrt();
    let eta_m = tau_cp / 2f64.sqrt() * (eta1 - psi).sqrt();
    let d1 = (psi + 2.0 * dw * dw) / eta1;
    let d_p = 0.5 * (d1 + 1.0);
    let d_m = 0.5 * (d1 - 1.0);
    let ch = d_p * eta_p.cosh() - d_m * eta_m.cos();
    r2 + 0.5 * (kex - ch.acosh() / tau_cp)
}

/// Multiple quantum dispersion with optional proton shift and relaxation delay correction.
///
/// # Arguments
/// * `field_x` - Heteronucleus field in MHz
/// * `field_h` - Proton field in MHz, 0 when the proton shift is not resolved
/// * `tau` - Constant time delay in s, 0 to skip the correction
#[allow(clippy::too_many_arguments)]
pub fn multiple_quantum(
    kex: f64,
    pa: f64,
    r2: f64,
    dppm_c: f64,
    dppm_h: f64,
    nu: f64,
    field_x: f64,
    field_h: f64,
    tau: f64,
) -> f64 {
    let pb = 1.0 - pa;
    let delta_c = 2.0 * PI * dppm_c * field_x;
    let delta_h = if field_h > 1.0e-6 {
        2.0 * PI * dppm_h * field_h
    } else {
        0.0
    };
    let delta = 1.0 / (4.0 * nu);

    let num1 = Complex::new((pa - pb) * kex, delta_h);
    let zeta = num1 * (-2.0 * delta_c);
    let psi = num1 * num1 - delta_c * delta_c + 4.0 * pa * pb * kex * kex;
    let num2 = (psi * psi + zeta * zeta).sqrt();
    let eta_plus = (num2 + psi).sqrt() * (2f64.sqrt() * delta);
    let eta_minus = (num2 - psi).sqrt() * (2f64.sqrt() * delta);
    let ratio = (psi + 2.0 * delta_c * delta_c) / num2;
    let d_plus = (ratio + 1.0) * 0.5;
    let d_minus = (ratio - 1.0) * 0.5;
    let num3 = eta_plus.cosh() * d_plus - eta_minus.cos() * d_minus;
    let lambda1 =
        ((num3 + (num3 + 1.0).sqrt() * (num3 - 1.0).sqrt()).ln() / (-2.0 * delta) + kex) * 0.5
            + r2;

    let dp = Complex::new(delta_h + delta_c, kex);
    let dm = Complex::new(delta_h + delta_c, -kex);
    let zp = Complex::new(delta_h - delta_c, kex);
    let zm = Complex::new(delta_h - delta_c, -kex);
    let num4 = Complex::new(0.0, kex * (pa * pb).sqrt());

    let m_z = -((dm - (dm * delta).sin() / ((dm + zm) * delta).sin() * (2.0 * delta_c))
        * (num4 / (dm * zm)));
    let m_d = (zp + (zp * delta).sin() / ((dp + zp) * delta).sin() * (2.0 * delta_c))
        * (num4 / (dp * zp));
    let q = (-(m_d * m_d) + 1.0 + m_d * m_z - m_z * m_z + (m_d + m_z) * (0.5 * (pb / pa).sqrt()))
        .re;

    if tau > 1.0e-6 {
        lambda1.re - q.ln() / tau
    } else {
        lambda1.re
    }
}

/// Summary of one curve used by the guess heuristics.
struct CurveShape {
    min: f64,
    max: f64,
    mean: f64,
    mid_x: f64,
}

impl CurveShape {
    fn of(points: &[SamplePoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let y = points.iter().map(|p| p.y).collect::<Vec<_>>();
        let min = y.iter().copied().fold(f64::INFINITY, f64::min);
        let max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            min,
            max,
            mean: y.iter().mean(),
            mid_x: mid_value(points, min, max),
        })
    }
}

/// Covariate at which the curve crosses half height, by linear interpolation
/// between the nearest points above and below.
fn mid_value(points: &[SamplePoint], min: f64, max: f64) -> f64 {
    let half = (max + min) / 2.0;
    let mut above: Option<(f64, f64)> = None;
    let mut below: Option<(f64, f64)> = None;
    for p in points {
        let d = p.y - half;
        if d >= 0.0 {
            if above.map_or(true, |(y, _)| d < y - half) {
                above = Some((p.y, p.x[0]));
            }
        } else if below.map_or(true, |(y, _)| -d < half - y) {
            below = Some((p.y, p.x[0]));
        }
    }
    let (d_up, i_up) = above.unwrap_or((0.0, 0.0));
    let (d_down, i_down) = below.unwrap_or((0.0, 0.0));
    if d_up == d_down {
        (i_up + i_down) / 2.0
    } else {
        (half - d_down) / (d_up - d_down) * (i_up - i_down) + i_down
    }
}

fn kex_from_mid(mid_x: f64) -> f64 {
    let tau_mid = 1.0 / (2.0 * mid_x);
    HALF_HEIGHT_KEX / (0.5 * tau_mid)
}

impl EquationModel for CpmgEquation {
    fn name(&self) -> &'static str {
        match self {
            CpmgEquation::NoEx => "NOEX",
            CpmgEquation::Fast => "CPMGFAST",
            CpmgEquation::Slow => "CPMGSLOW",
            CpmgEquation::MultipleQuantum => "CPMGMQ",
        }
    }

    fn experiment(&self) -> Experiment {
        Experiment::Cpmg
    }

    fn par_names(&self) -> &'static [&'static str] {
        match self {
            CpmgEquation::NoEx => &["R2"],
            CpmgEquation::Fast => &["Kex", "R2", "dPPMmin"],
            CpmgEquation::Slow => &["Kex", "pA", "R2", "dPPM"],
            CpmgEquation::MultipleQuantum => &["kEx", "pA", "R2", "deltaCPPM", "deltaHPPM"],
        }
    }

    fn n_group_pars(&self) -> usize {
        match self {
            CpmgEquation::NoEx => 0,
            CpmgEquation::Fast => 1,
            CpmgEquation::Slow | CpmgEquation::MultipleQuantum => 2,
        }
    }

    fn n_covariates(&self) -> usize {
        match self {
            CpmgEquation::MultipleQuantum => 3,
            _ => 1,
        }
    }

    fn make_map(&self, states: &[Vec<usize>], state_count: &[usize]) -> Result<ParameterMap, FitError> {
        let builder = MapBuilder::new(states.len());
        let builder = match self {
            CpmgEquation::NoEx => builder.masked(states, state_count, &R2_MASK),
            CpmgEquation::Fast => builder
                .group()
                .masked(states, state_count, &R2_MASK)
                .masked(states, state_count, &SHIFT_MASK),
            CpmgEquation::Slow => builder
                .group()
                .group()
                .masked(states, state_count, &R2_MASK)
                .masked(states, state_count, &SHIFT_MASK),
            CpmgEquation::MultipleQuantum => builder
                .group()
                .group()
                .masked(states, state_count, &R2_MASK)
                .masked(states, state_count, &SHIFT_MASK)
                .masked(states, state_count, &SHIFT_MASK),
        };
        builder.build(self.n_group_pars())
    }

    fn evaluate(&self, pars: &[f64], row: &[usize], x: &[f64], field: f64) -> f64 {
        let p = |j: usize| pars[row[j]];
        let nu = x[0];
        match self {
            CpmgEquation::NoEx => p(0),
            CpmgEquation::Fast => fast(p(0), p(1), p(2), nu, field),
            CpmgEquation::Slow => slow(p(0), p(1), p(2), p(3), nu, field),
            CpmgEquation::MultipleQuantum => {
                let field_h = x.get(1).copied().unwrap_or(0.0);
                let tau = x.get(2).copied().unwrap_or(0.0);
                multiple_quantum(p(0), p(1), p(2), p(3), p(4), nu, field, field_h, tau)
            }
        }
    }

    fn guess(&self, data: &Dataset, map: &ParameterMap, options: &FitOptions) -> Option<Vec<f64>> {
        let mut guesses = vec![0.0; map.n_params()];
        let max_freq = options.cpmg_max_freq;
        let mut kex_sum = 0.0;
        for (id, row) in map.rows().iter().enumerate() {
            let shape = CurveShape::of(data.curve(id))?;
            let field = data.curve_field(id);
            match self {
                CpmgEquation::NoEx => guesses[row[0]] = shape.mean,
                CpmgEquation::Fast => {
                    let r2 = shape.min * 0.95;
                    let rex = (shape.max - shape.min).max(0.0);
                    let kex = kex_from_mid(shape.mid_x);
                    guesses[row[1]] = r2;
                    guesses[row[2]] = (4.0 * rex / (field * field) * kex).sqrt() / (2.0 * PI);
                    kex_sum += kex;
                }
                CpmgEquation::Slow | CpmgEquation::MultipleQuantum => {
                    let r2 = shape.min * 0.95;
                    let rex = shape.max - r2;
                    let mut kex = kex_from_mid(shape.mid_x);
                    if kex > max_freq {
                        kex = max_freq * 0.9;
                    }
                    let dw2 = rex / (PA_GUESS * (1.0 - PA_GUESS)) * kex;
                    guesses[row[2]] = r2;
                    guesses[row[3]] = dw2.sqrt() / (2.0 * PI) / field;
                    if *self == CpmgEquation::MultipleQuantum {
                        guesses[row[4]] = DELTA_H_GUESS;
                    }
                    kex_sum += kex;
                }
            }
        }
        let n_curves = map.n_curves() as f64;
        match self {
            CpmgEquation::NoEx => {}
            CpmgEquation::Fast => {
                let kex = kex_sum / n_curves;
                guesses[0] = if kex > max_freq { max_freq * 0.9 } else { kex };
            }
            CpmgEquation::Slow | CpmgEquation::MultipleQuantum => {
                guesses[0] = kex_sum / n_curves;
                guesses[1] = PA_GUESS;
            }
        }
        Some(guesses)
    }

    fn boundaries(
        &self,
        guesses: &[f64],
        _data: &Dataset,
        map: &ParameterMap,
        options: &FitOptions,
    ) -> Option<Bounds> {
        let mut bounds = Bounds::zeros(guesses.len());
        for row in map.rows() {
            for (j, &index) in row.iter().enumerate() {
                let g = *guesses.get(index)?;
                match (self, j) {
                    (CpmgEquation::NoEx, _) => bounds.set(index, 0.0, g * 4.0),
                    (_, 0) => bounds.set(index, 0.0, (g * 4.0).min(options.cpmg_max_freq)),
                    (CpmgEquation::Slow | CpmgEquation::MultipleQuantum, 1) => {
                        bounds.set(index, 0.5, PA_UPPER)
                    }
                    _ => bounds.set(index, 0.0, g * 4.0),
                }
            }
        }
        bounds.widen_to(guesses);
        Some(bounds)
    }

    fn rex(&self, pars: &[f64], row: &[usize], curve: &[SamplePoint]) -> f64 {
        let field = curve.first().map_or(0.0, |p| p.field);
        match self {
            CpmgEquation::NoEx => 0.0,
            CpmgEquation::Fast => {
                let kex = pars[row[0]];
                if kex <= 0.0 {
                    return 0.0;
                }
                let dw = 2.0 * PI * pars[row[2]] * field;
                dw * dw / 4.0 / kex
            }
            CpmgEquation::Slow | CpmgEquation::MultipleQuantum => {
                let at = |nu: f64| {
                    let mut x = vec![0.0; self.n_covariates()];
                    x[0] = nu;
                    self.evaluate(pars, row, &x, field)
                };
                at(REX_LOW_NU) - at(REX_HIGH_NU)
            }
        }
    }

    fn kex(&self, pars: &[f64]) -> f64 {
        match self {
            CpmgEquation::NoEx => 0.0,
            _ => pars.first().copied().unwrap_or(0.0),
        }
    }

    fn shift_parameter(&self) -> ShiftParameter {
        match self {
            CpmgEquation::NoEx => ShiftParameter::None,
            CpmgEquation::Fast => ShiftParameter::Column(2),
            CpmgEquation::Slow | CpmgEquation::MultipleQuantum => ShiftParameter::Column(3),
        }
    }

    fn min_x(&self) -> Option<f64> {
        Some(5.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn dispersion(eq: CpmgEquation, pars: &[f64], fields: &[f64]) -> Dataset {
        let nus = [25.0, 50.0, 100.0, 200.0, 300.0, 500.0, 700.0, 1000.0];
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut f = Vec::new();
        let mut ids = Vec::new();
        let states = fields
            .iter()
            .enumerate()
            .map(|(i, _)| vec![0, i, 0, 0])
            .collect::<Vec<_>>();
        let count = vec![1, fields.len(), 1, 1];
        let map = eq.make_map(&states, &count).unwrap();
        for (id, field) in fields.iter().enumerate() {
            for nu in nus {
                let v = eq.evaluate(pars, map.row(id).unwrap(), &[nu], *field);
                x.push(vec![nu]);
                y.push(v);
                f.push(*field);
                ids.push(id);
            }
        }
        Dataset::from_arrays(
            Experiment::Cpmg,
            x,
            y.clone(),
            vec![0.1; y.len()],
            f,
            ids,
            Some(states),
        )
        .unwrap()
    }

    #[test]
    fn test_noex_is_flat() {
        let eq = CpmgEquation::NoEx;
        for nu in [5.0, 50.0, 1000.0] {
            assert_eq!(eq.evaluate(&[10.0], &[0], &[nu], 60.8), 10.0);
        }
    }

    #[test]
    fn test_fast_limits() {
        // high pulsing rate quenches exchange
        let r = fast(1000.0, 10.0, 0.5, 1.0e6, 60.8);
        assert_relative_eq!(r, 10.0, epsilon = 1e-3);
        // low pulsing rate gives the full contribution
        let dw = 2.0 * PI * 0.5 * 60.8;
        let r = fast(1000.0, 10.0, 0.5, 0.01, 60.8);
        assert_relative_eq!(r, 10.0 + dw * dw / 4.0 / 1000.0, max_relative = 1e-3);
        assert_eq!(fast(0.0, 10.0, 0.5, 50.0, 60.8), 10.0);
    }

    #[test]
    fn test_slow_matches_fast_in_fast_exchange() {
        // Luz-Meiboom limit: dPPMmin^2 / 4 = pA pB dPPM^2
        let (kex, pa, dppm, field): (f64, f64, f64, f64) = (5000.0, 0.9, 0.5, 60.8);
        let dppm_min = 2.0 * (pa * (1.0 - pa)).sqrt() * dppm;
        for nu in [50.0, 200.0, 1000.0] {
            let s = slow(kex, pa, 10.0, dppm, nu, field);
            let f = fast(kex, 10.0, dppm_min, nu, field);
            assert_relative_eq!(s, f, max_relative = 1e-3);
        }
    }

    #[test]
    fn test_multiple_quantum_disperses() {
        let (kex, pa, field) = (400.0, 0.95, 60.8);
        let low = multiple_quantum(kex, pa, 10.0, 1.0, 0.0, 50.0, field, 0.0, 0.0);
        let high = multiple_quantum(kex, pa, 10.0, 1.0, 0.0, 2000.0, field, 0.0, 0.0);
        assert_relative_eq!(low, 16.974863, epsilon = 1e-5);
        assert_relative_eq!(high, 10.014423, epsilon = 1e-5);

        // proton shift and delay correction
        let low = multiple_quantum(kex, pa, 10.0, 1.0, 0.1, 50.0, field, 600.0, 0.02);
        assert_relative_eq!(low, 19.135441, epsilon = 1e-5);
    }

    #[test]
    fn test_map_shares_kex_and_shift_across_fields() {
        let states = vec![vec![0, 0, 0, 0], vec![0, 1, 0, 0]];
        let map = CpmgEquation::Slow.make_map(&states, &[1, 2, 1, 1]).unwrap();
        assert_eq!(map.rows(), &[vec![0, 1, 2, 4], vec![0, 1, 3, 4]]);
        let map = CpmgEquation::NoEx.make_map(&states, &[1, 2, 1, 1]).unwrap();
        assert_eq!(map.rows(), &[vec![0], vec![1]]);
    }

    #[test]
    fn test_guess_lies_within_boundaries() {
        let options = FitOptions::default();
        for eq in CpmgEquation::ALL {
            if eq == CpmgEquation::MultipleQuantum {
                continue;
            }
            let pars: &[f64] = match eq {
                CpmgEquation::NoEx => &[12.0, 15.0],
                CpmgEquation::Fast => &[800.0, 10.0, 12.0, 0.4],
                _ => &[600.0, 0.93, 10.0, 12.0, 1.2],
            };
            let data = dispersion(eq, pars, &[60.8, 81.1]);
            let map = eq.make_map(data.states(), &data.state_count()).unwrap();
            let guess = eq.guess(&data, &map, &options).unwrap();
            let bounds = eq.boundaries(&guess, &data, &map, &options).unwrap();
            for (i, g) in guess.iter().enumerate() {
                assert!(bounds.lower[i] <= *g && *g <= bounds.upper[i], "{:?} {}", eq, i);
            }
        }
    }

    #[test]
    fn test_two_state_population_reaches_upper_limit() {
        let options = FitOptions::default();
        let data = dispersion(CpmgEquation::Slow, &[600.0, 0.93, 10.0, 12.0, 1.2], &[60.8, 81.1]);
        for eq in [CpmgEquation::Slow, CpmgEquation::MultipleQuantum] {
            let map = eq.make_map(data.states(), &data.state_count()).unwrap();
            let guess = vec![600.0, 0.95, 10.0, 12.0, 1.2, 0.1];
            let guess = &guess[..map.n_params()];
            let bounds = eq.boundaries(guess, &data, &map, &options).unwrap();
            assert_eq!(bounds.lower[1], 0.5);
            assert_eq!(bounds.upper[1], 0.999, "{:?}", eq);
        }
    }

    #[test]
    fn test_slow_rex_is_positive_for_exchange() {
        let eq = CpmgEquation::Slow;
        let points = [SamplePoint {
            x: vec![100.0],
            y: 0.0,
            err: 1.0,
            field: 60.8,
            id: 0,
        }];
        let rex = eq.rex(&[600.0, 0.93, 10.0, 1.2], &[0, 1, 2, 3], &points);
        assert!(rex > 1.0);
    }
}
