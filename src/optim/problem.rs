//! The objective minimized by every refinement.
//!
//! A [`FitFunction`] owns one equation, one dataset, the parameter map and the
//! bounds. Optimizers work in normalized coordinates where every parameter
//! spans `[0, 100]` between its bounds; points outside are clamped for
//! evaluation and charged a quadratic penalty.

use argmin::core::CostFunction;
use ndarray::Array1;

use crate::config::FitOptions;
use crate::data::Dataset;
use crate::equations::{Equation, EquationModel, ParameterMap};
use crate::optim::metrics::FitQuality;
use crate::optim::optimizers::neldermead::NelderMeadOpt;
use crate::optim::optimizers::optimizer::{Optimizer, Refinement};
use crate::optim::optimizers::pso::ParticleSwarmOpt;
use crate::optim::{Bounds, CallbackObserver, FitError, HaltFlag, OptimizerKind};

/// Upper end of the normalized coordinate range.
pub const SCALE: f64 = 100.0;

/// Starting points are kept this far inside the normalized box.
const START_MARGIN: f64 = 2.0;

/// Objective of one equation on one dataset.
///
/// The function is cheap to clone; bootstrap replicates each refine their own
/// copy carrying resampled data.
#[derive(Debug, Clone)]
pub struct FitFunction {
    equation: Equation,
    data: Dataset,
    map: ParameterMap,
    lower: Array1<f64>,
    upper: Array1<f64>,
    weight: bool,
    abs_value: bool,
}

impl FitFunction {
    /// Creates the objective after checking that data, map and bounds agree.
    ///
    /// # Errors
    /// * [`FitError::CovariateCount`] when points carry the wrong number of covariates
    /// * [`FitError::BoundsLength`] when the bounds do not cover the parameter vector
    /// * [`FitError::InvalidBounds`] for an empty or inverted interval
    /// * [`FitError::InsufficientData`] when there are no more points than parameters
    pub fn new(
        equation: Equation,
        data: Dataset,
        map: ParameterMap,
        bounds: &Bounds,
        options: &FitOptions,
    ) -> Result<Self, FitError> {
        if data.n_covariates() != equation.n_covariates() {
            return Err(FitError::CovariateCount {
                equation: equation.name().to_string(),
                expected: equation.n_covariates(),
                found: data.n_covariates(),
            });
        }
        if bounds.len() != map.n_params() {
            return Err(FitError::BoundsLength {
                expected: map.n_params(),
                found: bounds.len(),
            });
        }
        if let Some(index) = (0..bounds.len()).find(|&i| !(bounds.upper[i] > bounds.lower[i])) {
            return Err(FitError::InvalidBounds {
                index,
                lower: bounds.lower[index],
                upper: bounds.upper[index],
            });
        }
        if data.len() <= map.n_params() {
            return Err(FitError::InsufficientData {
                points: data.len(),
                params: map.n_params(),
            });
        }

        Ok(Self {
            equation,
            data,
            map,
            lower: Array1::from_vec(bounds.lower.clone()),
            upper: Array1::from_vec(bounds.upper.clone()),
            weight: options.weight_fit,
            abs_value: options.abs_value_fit,
        })
    }

    /// Same objective on different data.
    pub fn with_data(&self, data: Dataset) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    pub fn equation(&self) -> Equation {
        self.equation
    }

    pub fn data(&self) -> &Dataset {
        &self.data
    }

    pub fn map(&self) -> &ParameterMap {
        &self.map
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            lower: self.lower.to_vec(),
            upper: self.upper.to_vec(),
        }
    }

    pub fn n_points(&self) -> usize {
        self.data.len()
    }

    pub fn n_params(&self) -> usize {
        self.map.n_params()
    }

    /// Maps parameters into normalized coordinates.
    pub fn normalize(&self, pars: &[f64]) -> Array1<f64> {
        pars.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(p, (l, u))| SCALE * (p - l) / (u - l))
            .collect()
    }

    /// Maps normalized coordinates back to parameters, clamping to the bounds.
    pub fn denormalize(&self, point: &Array1<f64>) -> Vec<f64> {
        point
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(v, (l, u))| l + v.clamp(0.0, SCALE) / SCALE * (u - l))
            .collect()
    }

    /// Model values of every point, in dataset order.
    pub fn predict(&self, pars: &[f64]) -> Vec<f64> {
        let mut predicted = Vec::with_capacity(self.data.len());
        for (id, row) in self.map.rows().iter().enumerate() {
            predicted.extend(self.equation.calculate(pars, row, self.data.curve(id)));
        }
        predicted
    }

    /// Calculated minus observed value of every point.
    pub fn residuals(&self, pars: &[f64]) -> Vec<f64> {
        self.predict(pars)
            .iter()
            .zip(self.data.points())
            .map(|(calc, p)| calc - p.y)
            .collect()
    }

    /// Objective in parameter space: mean squared (or absolute) residual per
    /// degree of freedom, residuals divided by errors when weighting.
    pub fn value(&self, pars: &[f64]) -> f64 {
        let sum = self
            .residuals(pars)
            .iter()
            .zip(self.data.points())
            .map(|(delta, p)| {
                let delta = if self.weight { delta / p.err } else { *delta };
                if self.abs_value {
                    delta.abs()
                } else {
                    delta * delta
                }
            })
            .sum::<f64>();
        let value = sum / (self.n_points() - self.n_params()) as f64;
        if value.is_finite() {
            value
        } else {
            f64::MAX
        }
    }

    /// Goodness of fit statistics at `pars`.
    pub fn statistics(&self, pars: &[f64]) -> FitQuality {
        let errors = self.data.points().iter().map(|p| p.err).collect::<Vec<_>>();
        FitQuality::new(&self.residuals(pars), &errors, self.n_params())
    }

    /// Refines `start` with the configured optimizer.
    pub fn refine(&self, start: &[f64], settings: &RefineSettings) -> Result<Refinement, FitError> {
        let start = self
            .normalize(start)
            .mapv(|v| if v.is_finite() { v } else { SCALE / 2.0 })
            .mapv(|v| v.clamp(START_MARGIN, SCALE - START_MARGIN));
        match settings.kind {
            OptimizerKind::NelderMead => NelderMeadOpt::builder()
                .sigma(settings.sigma)
                .max_iters(settings.max_iters)
                .stop_radius(settings.stop_radius)
                .halt(settings.halt.clone())
                .maybe_observer(settings.observer.clone())
                .verbose(settings.verbose)
                .build()
                .optimize(self, Some(start)),
            OptimizerKind::ParticleSwarm => ParticleSwarmOpt::builder()
                .max_iters(settings.max_iters)
                .tolerance(settings.tolerance)
                .seed(settings.seed)
                .halt(settings.halt.clone())
                .maybe_observer(settings.observer.clone())
                .verbose(settings.verbose)
                .build()
                .optimize(self, Some(start)),
        }
    }
}

/// Optimizer settings of one refinement.
#[derive(Debug, Clone, bon::Builder)]
pub struct RefineSettings {
    pub kind: OptimizerKind,
    /// Initial simplex size in normalized units
    pub sigma: f64,
    pub max_iters: u64,
    /// Simplex radius in normalized units below which the local search stops
    pub stop_radius: f64,
    /// Relative improvement below which the population search counts as stalled
    pub tolerance: f64,
    #[builder(default)]
    pub seed: u64,
    #[builder(default)]
    pub halt: HaltFlag,
    pub observer: Option<CallbackObserver>,
    #[builder(default)]
    pub verbose: bool,
}

impl RefineSettings {
    /// Settings of the top level refinement.
    pub fn from_options(options: &FitOptions, halt: HaltFlag) -> Self {
        RefineSettings::builder()
            .kind(options.optimizer)
            .sigma(options.start_radius)
            .max_iters(options.max_iters)
            .stop_radius(options.stop_radius())
            .tolerance(options.population_tolerance())
            .seed(options.seed)
            .halt(halt)
            .maybe_observer(
                log::log_enabled!(log::Level::Trace).then(|| CallbackObserver::trace("refine")),
            )
            .verbose(options.verbose)
            .build()
    }
}

impl CostFunction for FitFunction {
    type Param = Array1<f64>;
    type Output = f64;

    /// Objective at a normalized point plus the out-of-box penalty.
    fn cost(&self, point: &Self::Param) -> Result<f64, argmin::core::Error> {
        let penalty = point
            .iter()
            .map(|v| (v - v.clamp(0.0, SCALE)).powi(2))
            .sum::<f64>();
        let value = self.value(&self.denormalize(point)) + penalty;
        Ok(if value.is_finite() { value } else { f64::MAX })
    }
}
