//! R1rho spin-lock relaxation models.
//!
//! Covariates are `[offset (ppm), B1 (Hz), Tex (s)]`. Tex is only read by
//! R1RHOEXACT0, which integrates the magnetization over that delay.

use serde::{Deserialize, Serialize};

use crate::config::FitOptions;
use crate::data::{Dataset, Experiment, SamplePoint};
use crate::equations::equation::{EquationModel, ShiftParameter};
use crate::equations::exchange::{
    exchange_contribution, noex_bounds, noex_guess, noex_map, two_state_bounds, two_state_guess,
    two_state_irradiation, two_state_map, two_state_pars, NOEX_NAMES, TIED_R1, TIED_R1_R2,
    TWO_STATE_NAMES,
};
use crate::equations::formulas::{
    r1rho_baldwin_kay, r1rho_exact, r1rho_exact0, r1rho_laguerre, r1rho_perturbation,
    r1rho_perturbation_noex, Irradiation,
};
use crate::equations::map::ParameterMap;
use crate::guess::peaks::PeakMode;
use crate::optim::{Bounds, FitError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum R1rhoEquation {
    #[serde(rename = "R1RHOPERTURBATION")]
    Perturbation,
    #[serde(rename = "R1RHOPERTURBATIONNOEX")]
    PerturbationNoEx,
    #[serde(rename = "R1RHOBALDWINKAY")]
    BaldwinKay,
    #[serde(rename = "R1RHOLAGUERRE")]
    Laguerre,
    #[serde(rename = "R1RHOEXACT")]
    Exact,
    #[serde(rename = "R1RHOEXACT0")]
    Exact0,
}

impl R1rhoEquation {
    pub const ALL: [R1rhoEquation; 6] = [
        R1rhoEquation::Perturbation,
        R1rhoEquation::PerturbationNoEx,
        R1rhoEquation::BaldwinKay,
        R1rhoEquation::Laguerre,
        R1rhoEquation::Exact,
        R1rhoEquation::Exact0,
    ];
}

impl EquationModel for R1rhoEquation {
    fn name(&self) -> &'static str {
        match self {
            R1rhoEquation::Perturbation => "R1RHOPERTURBATION",
            R1rhoEquation::PerturbationNoEx => "R1RHOPERTURBATIONNOEX",
            R1rhoEquation::BaldwinKay => "R1RHOBALDWINKAY",
            R1rhoEquation::Laguerre => "R1RHOLAGUERRE",
            R1rhoEquation::Exact => "R1RHOEXACT",
            R1rhoEquation::Exact0 => "R1RHOEXACT0",
        }
    }

    fn experiment(&self) -> Experiment {
        Experiment::R1rho
    }

    fn par_names(&self) -> &'static [&'static str] {
        match self {
            R1rhoEquation::PerturbationNoEx => &NOEX_NAMES,
            _ => &TWO_STATE_NAMES,
        }
    }

    fn n_group_pars(&self) -> usize {
        match self {
            R1rhoEquation::PerturbationNoEx => 0,
            _ => 2,
        }
    }

    fn n_covariates(&self) -> usize {
        3
    }

    fn make_map(&self, states: &[Vec<usize>], _state_count: &[usize]) -> Result<ParameterMap, FitError> {
        match self {
            R1rhoEquation::PerturbationNoEx => noex_map(states.len()),
            R1rhoEquation::Laguerre => two_state_map(states, TIED_R1_R2),
            _ => two_state_map(states, TIED_R1),
        }
    }

    fn evaluate(&self, pars: &[f64], row: &[usize], x: &[f64], field: f64) -> f64 {
        if *self == R1rhoEquation::PerturbationNoEx {
            let irr = Irradiation::new(x[0], x[1], pars[row[0]], pars[row[0]], field);
            return r1rho_perturbation_noex(irr.omega_b1, irr.delta_a, pars[row[1]], pars[row[2]]);
        }
        let p = two_state_pars(pars, row);
        let irr = two_state_irradiation(pars, row, x, field);
        match self {
            R1rhoEquation::Perturbation | R1rhoEquation::PerturbationNoEx => {
                r1rho_perturbation(&irr, &p)
            }
            R1rhoEquation::BaldwinKay => r1rho_baldwin_kay(&irr, &p),
            R1rhoEquation::Laguerre => r1rho_laguerre(&irr, &p),
            R1rhoEquation::Exact => r1rho_exact(&irr, &p),
            R1rhoEquation::Exact0 => r1rho_exact0(&irr, &p, x[2]),
        }
    }

    fn guess(&self, data: &Dataset, map: &ParameterMap, _options: &FitOptions) -> Option<Vec<f64>> {
        match self {
            R1rhoEquation::PerturbationNoEx => noex_guess(data, map, PeakMode::R1rho),
            _ => two_state_guess(data, map, PeakMode::R1rho),
        }
    }

    fn boundaries(
        &self,
        guesses: &[f64],
        data: &Dataset,
        map: &ParameterMap,
        _options: &FitOptions,
    ) -> Option<Bounds> {
        match self {
            R1rhoEquation::PerturbationNoEx => noex_bounds(guesses, data, map, PeakMode::R1rho),
            _ => two_state_bounds(guesses, data, map, PeakMode::R1rho),
        }
    }

    fn rex(&self, pars: &[f64], row: &[usize], curve: &[SamplePoint]) -> f64 {
        match self {
            R1rhoEquation::PerturbationNoEx => 0.0,
            _ => exchange_contribution(pars, row, curve, |pars, p| {
                self.evaluate(pars, row, &p.x, p.field)
            }),
        }
    }

    fn kex(&self, pars: &[f64]) -> f64 {
        match self {
            R1rhoEquation::PerturbationNoEx => 0.0,
            _ => pars.first().copied().unwrap_or(0.0),
        }
    }

    fn shift_parameter(&self) -> ShiftParameter {
        match self {
            R1rhoEquation::PerturbationNoEx => ShiftParameter::None,
            _ => ShiftParameter::Difference(2, 3),
        }
    }
}
