//! Fit configuration.
//!
//! [`FitOptions`] carries every tunable of a fit session explicitly: optimizer
//! choice and radii, objective weighting, bootstrap settings and the random seed.
//! Options can be assembled through [`FitOptionsBuilder`] or read from JSON.

use std::path::Path;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::optim::{FitError, OptimizerKind};

/// Configuration of a fit session.
///
/// # Examples
///
/// ```
/// use rdisp::config::FitOptionsBuilder;
///
/// let options = FitOptionsBuilder::default()
///     .sample_size(100)
///     .seed(7)
///     .build()
///     .unwrap();
/// assert_eq!(options.sample_size, 100);
/// assert_eq!(options.rex_ratio, 3.0);
/// ```
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[builder(default)]
#[serde(default)]
pub struct FitOptions {
    /// Reference proton field in MHz
    pub ref_field: f64,
    /// Upper limit for CPMG exchange rate guesses and bounds
    pub cpmg_max_freq: f64,
    /// Exchange contribution must exceed this multiple of the RMS
    pub rex_ratio: f64,
    /// Initial search radius in normalized units (parameters live in [0, 100])
    pub start_radius: f64,
    /// log10 of the stopping radius of the local search
    pub final_radius: f64,
    /// log10 of the convergence tolerance of the population search
    pub tolerance: f64,
    /// Minimum separation in ppm between the two CEST/R1rho states
    pub delta_ab_diff: f64,
    /// Divide residuals by the point error
    pub weight_fit: bool,
    /// Use the mean absolute residual instead of the mean squared residual
    pub abs_value_fit: bool,
    /// Resample rows (true) or perturb predictions with noise (false)
    pub non_parametric_bootstrap: bool,
    /// Number of bootstrap replicates
    pub sample_size: usize,
    /// Optimizer used for the top level refinement
    pub optimizer: OptimizerKind,
    /// Optimizer used inside bootstrap replicates
    pub bootstrap_optimizer: OptimizerKind,
    /// Redraws allowed for a non-parametric replicate lacking curve coverage
    pub max_resample_tries: usize,
    /// Significance level of the exchange t-test
    pub significance_level: f64,
    /// Seed of the session random stream
    pub seed: u64,
    /// Worker threads for the bootstrap; 0 uses all available cores
    pub n_threads: usize,
    /// Run the bootstrap to estimate parameter errors
    pub calc_error: bool,
    /// Iteration budget per refinement
    pub max_iters: u64,
    /// Stream optimizer iterations to the terminal
    pub verbose: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            ref_field: 500.0,
            cpmg_max_freq: 3000.0,
            rex_ratio: 3.0,
            start_radius: 20.0,
            final_radius: -5.0,
            tolerance: -5.0,
            delta_ab_diff: 0.1,
            weight_fit: true,
            abs_value_fit: false,
            non_parametric_bootstrap: true,
            sample_size: 50,
            optimizer: OptimizerKind::NelderMead,
            bootstrap_optimizer: OptimizerKind::NelderMead,
            max_resample_tries: 10,
            significance_level: 0.02,
            seed: 1,
            n_threads: 0,
            calc_error: true,
            max_iters: 5000,
            verbose: false,
        }
    }
}

impl FitOptions {
    /// Reads options from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FitError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| FitError::Config {
            message: format!("{}: {}", path.as_ref().display(), e),
        })?;
        let options: FitOptions =
            serde_json::from_str(&content).map_err(|e| FitError::Config {
                message: e.to_string(),
            })?;
        options.validate()?;
        Ok(options)
    }

    /// Checks value ranges that the type system does not capture.
    pub fn validate(&self) -> Result<(), FitError> {
        let invalid = |message: &str| {
            Err(FitError::Config {
                message: message.to_string(),
            })
        };
        if !(self.start_radius > 0.0 && self.start_radius <= 100.0) {
            return invalid("start_radius must be in (0, 100]");
        }
        if self.calc_error && self.sample_size < 2 {
            return invalid("sample_size must be at least 2 when errors are estimated");
        }
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return invalid("significance_level must be in (0, 1)");
        }
        if self.rex_ratio < 0.0 {
            return invalid("rex_ratio must not be negative");
        }
        if self.cpmg_max_freq <= 0.0 {
            return invalid("cpmg_max_freq must be positive");
        }
        Ok(())
    }

    pub(crate) fn stop_radius(&self) -> f64 {
        10f64.powf(self.final_radius)
    }

    pub(crate) fn population_tolerance(&self) -> f64 {
        10f64.powf(self.tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = FitOptions::default();
        assert_eq!(options.ref_field, 500.0);
        assert_eq!(options.cpmg_max_freq, 3000.0);
        assert_eq!(options.sample_size, 50);
        assert_eq!(options.max_resample_tries, 10);
        assert!(options.weight_fit);
        assert!(!options.abs_value_fit);
        assert_eq!(options.optimizer, OptimizerKind::NelderMead);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sample_size": 200, "optimizer": "PSO"}}"#).unwrap();

        let options = FitOptions::from_file(file.path()).unwrap();
        assert_eq!(options.sample_size, 200);
        assert_eq!(options.optimizer, OptimizerKind::ParticleSwarm);
        assert_eq!(options.rex_ratio, 3.0);
    }

    #[test]
    fn test_invalid_radius_is_rejected() {
        let options = FitOptionsBuilder::default()
            .start_radius(0.0)
            .build()
            .unwrap();
        assert!(options.validate().is_err());
    }
}
