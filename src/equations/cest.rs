//! CEST saturation profile models.
//!
//! Covariates are `[offset (ppm), B1 (Hz), Tex (s)]`; the observed value is the
//! ground-state intensity ratio after saturation for Tex.

use serde::{Deserialize, Serialize};

use crate::config::FitOptions;
use crate::data::{Dataset, Experiment, SamplePoint};
use crate::equations::equation::{EquationModel, ShiftParameter};
use crate::equations::exchange::{
    exchange_contribution, noex_bounds, noex_guess, noex_map, two_state_bounds, two_state_guess,
    two_state_irradiation, two_state_map, two_state_pars, NOEX_NAMES, TIED_R1, TIED_R1_R2,
    TIED_R2, TWO_STATE_NAMES, UNTIED,
};
use crate::equations::formulas::{
    cest_b1_averaged, cest_exact0, cest_signal, r1rho_baldwin_kay, r1rho_exact, r1rho_laguerre,
    r1rho_perturbation, r1rho_perturbation_noex, Irradiation,
};
use crate::equations::map::ParameterMap;
use crate::guess::peaks::PeakMode;
use crate::optim::{Bounds, FitError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CestEquation {
    #[serde(rename = "NOEX")]
    NoEx,
    TrottPalmer,
    Sd,
    #[serde(rename = "BALDWINKAY")]
    BaldwinKay,
    Laguerre,
    #[serde(rename = "EIGENEXACT1")]
    EigenExact1,
    #[serde(rename = "EXACT0")]
    Exact0,
    #[serde(rename = "EXACT1")]
    Exact1,
    #[serde(rename = "EXACT2")]
    Exact2,
}

impl CestEquation {
    pub const ALL: [CestEquation; 9] = [
        CestEquation::NoEx,
        CestEquation::TrottPalmer,
        CestEquation::Sd,
        CestEquation::BaldwinKay,
        CestEquation::Laguerre,
        CestEquation::EigenExact1,
        CestEquation::Exact0,
        CestEquation::Exact1,
        CestEquation::Exact2,
    ];

    fn layout(&self) -> ([usize; 6], usize) {
        match self {
            CestEquation::Laguerre => TIED_R1_R2,
            CestEquation::Exact0 => UNTIED,
            CestEquation::Exact2 => TIED_R2,
            _ => TIED_R1,
        }
    }
}

impl EquationModel for CestEquation {
    fn name(&self) -> &'static str {
        match self {
            CestEquation::NoEx => "NOEX",
            CestEquation::TrottPalmer => "TROTT_PALMER",
            CestEquation::Sd => "SD",
            CestEquation::BaldwinKay => "BALDWINKAY",
            CestEquation::Laguerre => "LAGUERRE",
            CestEquation::EigenExact1 => "EIGENEXACT1",
            CestEquation::Exact0 => "EXACT0",
            CestEquation::Exact1 => "EXACT1",
            CestEquation::Exact2 => "EXACT2",
        }
    }

    fn experiment(&self) -> Experiment {
        Experiment::Cest
    }

    fn par_names(&self) -> &'static [&'static str] {
        match self {
            CestEquation::NoEx => &NOEX_NAMES,
            _ => &TWO_STATE_NAMES,
        }
    }

    fn n_group_pars(&self) -> usize {
        match self {
            CestEquation::NoEx => 0,
            _ => 2,
        }
    }

    fn n_covariates(&self) -> usize {
        3
    }

    fn make_map(&self, states: &[Vec<usize>], _state_count: &[usize]) -> Result<ParameterMap, FitError> {
        match self {
            CestEquation::NoEx => noex_map(states.len()),
            _ => two_state_map(states, self.layout()),
        }
    }

    fn evaluate(&self, pars: &[f64], row: &[usize], x: &[f64], field: f64) -> f64 {
        let tex = x[2];
        if *self == CestEquation::NoEx {
            let irr = Irradiation::new(x[0], x[1], pars[row[0]], pars[row[0]], field);
            let r1rho = r1rho_perturbation_noex(irr.omega_b1, irr.delta_a, pars[row[1]], pars[row[2]]);
            return cest_signal(irr.omega_b1, irr.delta_a, tex, r1rho);
        }

        let p = two_state_pars(pars, row);
        let irr = two_state_irradiation(pars, row, x, field);
        let r1rho = match self {
            CestEquation::TrottPalmer => r1rho_perturbation(&irr, &p),
            CestEquation::BaldwinKay => r1rho_baldwin_kay(&irr, &p),
            CestEquation::Laguerre => r1rho_laguerre(&irr, &p),
            CestEquation::EigenExact1 => r1rho_exact(&irr, &p),
            CestEquation::Sd => return cest_b1_averaged(&irr, &p, tex),
            CestEquation::NoEx
            | CestEquation::Exact0
            | CestEquation::Exact1
            | CestEquation::Exact2 => return cest_exact0(&irr, &p, tex),
        };
        cest_signal(irr.omega_b1, irr.omega_bar(p.pb), tex, r1rho)
    }

    fn guess(&self, data: &Dataset, map: &ParameterMap, _options: &FitOptions) -> Option<Vec<f64>> {
        match self {
            CestEquation::NoEx => noex_guess(data, map, PeakMode::Cest),
            _ => two_state_guess(data, map, PeakMode::Cest),
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
            CestEquation::NoEx => noex_bounds(guesses, data, map, PeakMode::Cest),
            _ => two_state_bounds(guesses, data, map, PeakMode::Cest),
        }
    }

    fn rex(&self, pars: &[f64], row: &[usize], curve: &[SamplePoint]) -> f64 {
        match self {
            CestEquation::NoEx => 0.0,
            _ => exchange_contribution(pars, row, curve, |pars, p| {
                self.evaluate(pars, row, &p.x, p.field)
            }),
        }
    }

    fn kex(&self, pars: &[f64]) -> f64 {
        match self {
            CestEquation::NoEx => 0.0,
            _ => pars.first().copied().unwrap_or(0.0),
        }
    }

    fn shift_parameter(&self) -> ShiftParameter {
        match self {
            CestEquation::NoEx => ShiftParameter::None,
            _ => ShiftParameter::Difference(2, 3),
        }
    }
}
