//! Equation registry.
//!
//! Each experiment family has a closed list of equation variants, looked up by
//! the exact names persisted in fit results. [`Equation`] is the tagged union
//! over the four families and forwards the [`EquationModel`] capability set to
//! the family implementation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::FitOptions;
use crate::data::{Dataset, Experiment, SamplePoint};
use crate::equations::cest::CestEquation;
use crate::equations::cpmg::CpmgEquation;
use crate::equations::exp::ExpEquation;
use crate::equations::map::ParameterMap;
use crate::equations::r1rho::R1rhoEquation;
use crate::optim::{Bounds, FitError};

/// Parameter(s) tested for significance together with kex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftParameter {
    /// The equation has no exchange
    None,
    /// A single shift column
    Column(usize),
    /// Difference of two shift columns, `second - first`
    Difference(usize, usize),
}

/// Capability set of one physical model.
///
/// Evaluation is stateless: identical inputs always give bit-identical output.
pub trait EquationModel {
    /// Registry name, persisted verbatim in results.
    fn name(&self) -> &'static str;

    fn experiment(&self) -> Experiment;

    /// Parameter names in map column order.
    fn par_names(&self) -> &'static [&'static str];

    /// Leading map columns shared by all curves.
    fn n_group_pars(&self) -> usize;

    /// Covariates expected per sample point.
    fn n_covariates(&self) -> usize;

    /// Builds the parameter map for curves with the given state tuples.
    fn make_map(&self, states: &[Vec<usize>], state_count: &[usize]) -> Result<ParameterMap, FitError>;

    /// Model value at one point.
    ///
    /// # Arguments
    /// * `pars` - Shared parameter vector
    /// * `row` - Map row of the curve the point belongs to
    /// * `x` - Covariates of the point
    /// * `field` - Field of the observed nucleus in MHz
    fn evaluate(&self, pars: &[f64], row: &[usize], x: &[f64], field: f64) -> f64;

    /// Model values for all points of one curve.
    fn calculate(&self, pars: &[f64], row: &[usize], points: &[SamplePoint]) -> Vec<f64> {
        points
            .iter()
            .map(|p| self.evaluate(pars, row, &p.x, p.field))
            .collect()
    }

    /// Initial estimate of the shared parameter vector, or `None` when the curve
    /// shapes do not support one.
    fn guess(&self, data: &Dataset, map: &ParameterMap, options: &FitOptions) -> Option<Vec<f64>>;

    /// Bounds matching `guesses`, or `None` when they cannot be derived.
    fn boundaries(
        &self,
        guesses: &[f64],
        data: &Dataset,
        map: &ParameterMap,
        options: &FitOptions,
    ) -> Option<Bounds>;

    /// Exchange contribution of one curve.
    fn rex(&self, pars: &[f64], row: &[usize], curve: &[SamplePoint]) -> f64;

    /// Exchange rate, 0 for models without exchange.
    fn kex(&self, pars: &[f64]) -> f64;

    /// Shift parameter used by the exchange significance test.
    fn shift_parameter(&self) -> ShiftParameter;

    /// Smallest covariate worth plotting, `None` to use the observed minimum.
    fn min_x(&self) -> Option<f64> {
        None
    }
}

/// Any registered equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "EquationRecord", into = "EquationRecord")]
pub enum Equation {
    Cpmg(CpmgEquation),
    Cest(CestEquation),
    R1rho(R1rhoEquation),
    Exp(ExpEquation),
}

/// Wire form of an equation: family and registry name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquationRecord {
    pub experiment: Experiment,
    pub name: String,
}

impl Equation {
    /// Looks up an equation by family and exact registry name.
    pub fn from_name(experiment: Experiment, name: &str) -> Result<Self, FitError> {
        let found = match experiment {
            Experiment::Cpmg => CpmgEquation::ALL
                .iter()
                .find(|e| e.name() == name)
                .map(|e| Equation::Cpmg(*e)),
            Experiment::Cest => CestEquation::ALL
                .iter()
                .find(|e| e.name() == name)
                .map(|e| Equation::Cest(*e)),
            Experiment::R1rho => R1rhoEquation::ALL
                .iter()
                .find(|e| e.name() == name)
                .map(|e| Equation::R1rho(*e)),
            Experiment::Exp => ExpEquation::ALL
                .iter()
                .find(|e| e.name() == name)
                .map(|e| Equation::Exp(*e)),
        };
        found.ok_or_else(|| FitError::UnknownEquation {
            experiment,
            name: name.to_string(),
        })
    }

    /// Registry names of a family, in registry order.
    pub fn names(experiment: Experiment) -> Vec<&'static str> {
        match experiment {
            Experiment::Cpmg => CpmgEquation::ALL.iter().map(|e| e.name()).collect(),
            Experiment::Cest => CestEquation::ALL.iter().map(|e| e.name()).collect(),
            Experiment::R1rho => R1rhoEquation::ALL.iter().map(|e| e.name()).collect(),
            Experiment::Exp => ExpEquation::ALL.iter().map(|e| e.name()).collect(),
        }
    }

    /// One-based position of the equation in its family registry.
    pub fn ordinal(&self) -> usize {
        let position = match self {
            Equation::Cpmg(e) => CpmgEquation::ALL.iter().position(|x| x == e),
            Equation::Cest(e) => CestEquation::ALL.iter().position(|x| x == e),
            Equation::R1rho(e) => R1rhoEquation::ALL.iter().position(|x| x == e),
            Equation::Exp(e) => ExpEquation::ALL.iter().position(|x| x == e),
        };
        position.map_or(0, |p| p + 1)
    }

    fn model(&self) -> &dyn EquationModel {
        match self {
            Equation::Cpmg(e) => e,
            Equation::Cest(e) => e,
            Equation::R1rho(e) => e,
            Equation::Exp(e) => e,
        }
    }
}

impl EquationModel for Equation {
    fn name(&self) -> &'static str {
        self.model().name()
    }

    fn experiment(&self) -> Experiment {
        self.model().experiment()
    }

    fn par_names(&self) -> &'static [&'static str] {
        self.model().par_names()
    }

    fn n_group_pars(&self) -> usize {
        self.model().n_group_pars()
    }

    fn n_covariates(&self) -> usize {
        self.model().n_covariates()
    }

    fn make_map(&self, states: &[Vec<usize>], state_count: &[usize]) -> Result<ParameterMap, FitError> {
        self.model().make_map(states, state_count)
    }

    fn evaluate(&self, pars: &[f64], row: &[usize], x: &[f64], field: f64) -> f64 {
        self.model().evaluate(pars, row, x, field)
    }

    fn calculate(&self, pars: &[f64], row: &[usize], points: &[SamplePoint]) -> Vec<f64> {
        self.model().calculate(pars, row, points)
    }

    fn guess(&self, data: &Dataset, map: &ParameterMap, options: &FitOptions) -> Option<Vec<f64>> {
        self.model().guess(data, map, options)
    }

    fn boundaries(
        &self,
        guesses: &[f64],
        data: &Dataset,
        map: &ParameterMap,
        options: &FitOptions,
    ) -> Option<Bounds> {
        self.model().boundaries(guesses, data, map, options)
    }

    fn rex(&self, pars: &[f64], row: &[usize], curve: &[SamplePoint]) -> f64 {
        self.model().rex(pars, row, curve)
    }

    fn kex(&self, pars: &[f64]) -> f64 {
        self.model().kex(pars)
    }

    fn shift_parameter(&self) -> ShiftParameter {
        self.model().shift_parameter()
    }

    fn min_x(&self) -> Option<f64> {
        self.model().min_x()
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.experiment(), self.name())
    }
}

impl TryFrom<EquationRecord> for Equation {
    type Error = FitError;

    fn try_from(record: EquationRecord) -> Result<Self, Self::Error> {
        Equation::from_name(record.experiment, &record.name)
    }
}

impl From<Equation> for EquationRecord {
    fn from(equation: Equation) -> Self {
        EquationRecord {
            experiment: equation.experiment(),
            name: equation.name().to_string(),
        }
    }
}
