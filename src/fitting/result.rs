//! Immutable fit results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bootstrap::{BootstrapSet, TTest};
use crate::data::Dataset;
use crate::equations::{Equation, EquationModel, ParameterMap};
use crate::fitting::plot::PlotEquation;
use crate::optim::metrics::FitQuality;
use crate::optim::OptimizerKind;

/// Key of the objective distribution in [`FitResult::sim_pars`].
pub const FIT_KEY: &str = "fit";

/// One named parameter of one curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParValue {
    pub name: String,
    pub value: f64,
    pub error: f64,
}

/// Resolved parameters of one curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveFit {
    /// State tuple without the residue column, joined with ':'
    pub state: String,
    pub residue: usize,
    pub pars: Vec<ParValue>,
    /// Values keyed by name, errors by `name.sd`, plus the global statistics
    pub par_map: BTreeMap<String, f64>,
    pub plot: PlotEquation,
}

impl CurveFit {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.pars.iter().find(|p| p.name == name).map(|p| p.value)
    }

    pub fn error(&self, name: &str) -> Option<f64> {
        self.pars.iter().find(|p| p.name == name).map(|p| p.error)
    }
}

/// Provenance of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveFitStats {
    pub optimizer: OptimizerKind,
    pub bootstrap_optimizer: OptimizerKind,
    pub refine_iterations: u64,
    pub refine_seconds: f64,
    pub bootstrap_seconds: f64,
    pub n_samples: usize,
    pub non_parametric: bool,
    pub weight_fit: bool,
    pub abs_value_fit: bool,
    pub seed: u64,
}

/// Outcome of fitting one equation to one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub equation: Equation,
    pub curve_fits: Vec<CurveFit>,
    /// Best shared parameter vector
    pub params: Vec<f64>,
    /// Bootstrap error of each shared parameter, zero without a bootstrap
    pub errors: Vec<f64>,
    pub quality: FitQuality,
    pub stats: CurveFitStats,
    /// Replicate distributions keyed `"{name} {offset}"`, plus the objective under `"fit"`
    pub sim_pars: BTreeMap<String, Vec<f64>>,
    pub kex_test: Option<TTest>,
    pub shift_test: Option<TTest>,
    pub exchange_valid: bool,
}

impl FitResult {
    pub fn equation_name(&self) -> &'static str {
        self.equation.name()
    }

    pub fn aicc(&self) -> f64 {
        self.quality.aicc
    }

    pub fn rms(&self) -> f64 {
        self.quality.rms
    }

    /// Parameter values of curve `i`, in column order.
    pub fn pars(&self, i: usize) -> Option<Vec<f64>> {
        self.curve_fits
            .get(i)
            .map(|c| c.pars.iter().map(|p| p.value).collect())
    }

    /// Parameter errors of curve `i`, in column order.
    pub fn errs(&self, i: usize) -> Option<Vec<f64>> {
        self.curve_fits
            .get(i)
            .map(|c| c.pars.iter().map(|p| p.error).collect())
    }
}

/// Resolves the shared vector into one [`CurveFit`] per curve.
pub(crate) fn curve_fits(
    equation: Equation,
    data: &Dataset,
    map: &ParameterMap,
    params: &[f64],
    errors: &[f64],
    quality: &FitQuality,
) -> Vec<CurveFit> {
    let names = equation.par_names();
    map.rows()
        .iter()
        .enumerate()
        .map(|(id, row)| {
            let pars = names
                .iter()
                .zip(row)
                .map(|(name, &index)| ParValue {
                    name: name.to_string(),
                    value: params[index],
                    error: errors[index],
                })
                .collect::<Vec<_>>();

            let mut par_map = BTreeMap::new();
            for par in &pars {
                par_map.insert(par.name.clone(), par.value);
                par_map.insert(format!("{}.sd", par.name), par.error);
            }
            par_map.insert("AIC".to_string(), quality.aic);
            par_map.insert("AICc".to_string(), quality.aicc);
            par_map.insert("RMS".to_string(), quality.rms);
            par_map.insert("rChiSq".to_string(), quality.reduced_chi_sq);
            par_map.insert("Equation".to_string(), equation.ordinal() as f64);

            let state = data.states().get(id).cloned().unwrap_or_default();
            let plot = PlotEquation::for_curve(
                equation,
                data,
                id,
                pars.iter().map(|p| p.value).collect(),
                pars.iter().map(|p| p.error).collect(),
            );
            CurveFit {
                state: state_string(&state),
                residue: state.first().copied().unwrap_or(0),
                pars,
                par_map,
                plot,
            }
        })
        .collect()
}

/// State tuple without its residue column, e.g. `[3, 1, 0, 0]` gives `"1:0:0"`.
pub fn state_string(state: &[usize]) -> String {
    state
        .iter()
        .skip(1)
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(":")
}

/// Replicate distributions keyed by parameter name and offset from the first curve.
pub(crate) fn simulation_map(
    equation: Equation,
    map: &ParameterMap,
    set: &BootstrapSet,
) -> BTreeMap<String, Vec<f64>> {
    let names = equation.par_names();
    let mut sims = BTreeMap::new();
    let Some(first) = map.rows().first() else {
        return sims;
    };
    for row in map.rows() {
        for (j, (name, &index)) in names.iter().zip(row).enumerate() {
            let offset = index as i64 - first[j] as i64;
            sims.entry(format!("{} {}", name, offset))
                .or_insert_with(|| set.distribution(index).to_vec());
        }
    }
    sims.insert(FIT_KEY.to_string(), set.objective().to_vec());
    sims
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equations::cpmg::CpmgEquation;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_state_string_drops_residue() {
        assert_eq!(state_string(&[3, 1, 0, 0]), "1:0:0");
        assert_eq!(state_string(&[3]), "");
    }

    #[test]
    fn test_simulation_keys_use_offsets() {
        // ARRANGE
        let map = ParameterMap::new(vec![vec![0, 1, 2], vec![0, 3, 4]], 1).unwrap();
        let set = BootstrapSet {
            sim_pars: array![
                [1.0, 1.1],
                [2.0, 2.1],
                [3.0, 3.1],
                [4.0, 4.1],
                [5.0, 5.1],
                [0.5, 0.6]
            ],
            errors: vec![0.1; 5],
            complete: true,
        };

        // ACT
        let sims = simulation_map(Equation::Cpmg(CpmgEquation::Fast), &map, &set);

        // ASSERT
        assert_eq!(sims["Kex 0"], vec![1.0, 1.1]);
        assert_eq!(sims["R2 0"], vec![2.0, 2.1]);
        assert_eq!(sims["R2 2"], vec![4.0, 4.1]);
        assert_eq!(sims["dPPMmin 2"], vec![5.0, 5.1]);
        assert_eq!(sims[FIT_KEY], vec![0.5, 0.6]);
        assert_eq!(sims.len(), 6);
    }
}
