use serde::{Deserialize, Serialize};

use crate::data::{Dataset, Experiment};
use crate::equations::{Equation, EquationModel};

/// Fitted single-curve model that can be evaluated anywhere on its covariate axis.
///
/// `extras[0]` is the field of the curve; the remaining extras are the
/// auxiliary covariates (B1 and Tex, or proton field and relaxation delay)
/// held fixed while the first covariate is varied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotEquation {
    pub experiment: Experiment,
    pub equation: Equation,
    /// Parameter values in map column order
    pub pars: Vec<f64>,
    pub errs: Vec<f64>,
    pub extras: Vec<f64>,
    pub min_x: f64,
    pub max_x: f64,
}

impl PlotEquation {
    /// Plot equation of curve `id` with resolved values and errors.
    pub(crate) fn for_curve(
        equation: Equation,
        data: &Dataset,
        id: usize,
        pars: Vec<f64>,
        errs: Vec<f64>,
    ) -> Self {
        let curve = data.curve(id);
        let mut extras = vec![data.curve_field(id)];
        if let Some(first) = curve.first() {
            extras.extend(first.x.iter().skip(1));
        }
        let (observed_min, max_x) = curve
            .iter()
            .map(|p| p.x[0])
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
        let min_x = equation.min_x().map_or(observed_min, |m| m.min(observed_min));
        Self {
            experiment: equation.experiment(),
            equation,
            pars,
            errs,
            extras,
            min_x,
            max_x,
        }
    }

    /// Model value at first covariate `x`.
    pub fn calculate(&self, x: f64) -> f64 {
        let field = self.extras.first().copied().unwrap_or(0.0);
        let mut covariates = vec![x];
        covariates.extend(self.extras.iter().skip(1));
        let row = (0..self.pars.len()).collect::<Vec<_>>();
        self.equation.evaluate(&self.pars, &row, &covariates, field)
    }

    /// `n` evenly spaced `(x, y)` pairs from `min_x` to `max_x`.
    pub fn sample(&self, n: usize) -> Vec<(f64, f64)> {
        match n {
            0 => Vec::new(),
            1 => vec![(self.min_x, self.calculate(self.min_x))],
            _ => {
                let step = (self.max_x - self.min_x) / (n - 1) as f64;
                (0..n)
                    .map(|i| {
                        let x = self.min_x + step * i as f64;
                        (x, self.calculate(x))
                    })
                    .collect()
            }
        }
    }
}
