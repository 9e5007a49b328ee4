//! The fit pipeline: guess, bound, refine, bootstrap, assemble.

use std::sync::Arc;
use std::time::Instant;

use crate::bootstrap::{t_test, Bootstrap, BootstrapSet, TTest};
use crate::config::FitOptions;
use crate::data::{Dataset, Experiment};
use crate::equations::{Equation, EquationModel, ParameterMap, ShiftParameter};
use crate::fitting::result::{curve_fits, simulation_map, CurveFitStats, FitResult};
use crate::optim::metrics::FitQuality;
use crate::optim::{Bound, FitError, FitFunction, HaltFlag, RefineSettings};

/// Called after each equation fit with `(finished, total, equation name)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// Runs complete fits of registered equations.
///
/// # Examples
///
/// ```no_run
/// use rdisp::config::FitOptions;
/// use rdisp::data::Dataset;
/// use rdisp::fitting::Fitter;
///
/// # fn run(data: Dataset) -> Result<(), rdisp::optim::FitError> {
/// let fitter = Fitter::new(FitOptions::default())?;
/// let result = fitter.fit(&data, "CPMGFAST", None)?;
/// println!("AICc {:.2}, exchange {}", result.aicc(), result.exchange_valid);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Fitter {
    options: FitOptions,
    constraints: Vec<Bound>,
    halt: HaltFlag,
    progress: Option<ProgressCallback>,
}

impl Fitter {
    pub fn new(options: FitOptions) -> Result<Self, FitError> {
        options.validate()?;
        Ok(Self {
            options,
            constraints: Vec::new(),
            halt: HaltFlag::new(),
            progress: None,
        })
    }

    /// Named parameter bounds applied on top of the derived ones.
    pub fn with_constraints(mut self, constraints: Vec<Bound>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize, &str) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Flag that stops running refinements and pending bootstrap replicates.
    pub fn halt_flag(&self) -> HaltFlag {
        self.halt.clone()
    }

    /// Fits the equation registered as `name` for the dataset's experiment.
    ///
    /// # Arguments
    /// * `data` - Curves to fit
    /// * `name` - Registry name of the equation
    /// * `guesses` - Starting values of the shared parameter vector, derived from the curves when absent
    pub fn fit(&self, data: &Dataset, name: &str, guesses: Option<Vec<f64>>) -> Result<FitResult, FitError> {
        let equation = Equation::from_name(data.experiment(), name)?;
        self.fit_equation(data, equation, guesses)
    }

    /// Fits every named equation and returns the results by ascending AICc.
    ///
    /// Equations that cannot be set up for the data are skipped with a warning.
    pub fn fit_all(&self, data: &Dataset, names: &[&str]) -> Result<Vec<FitResult>, FitError> {
        let mut results = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            match self.fit(data, name, None) {
                Ok(result) => results.push(result),
                Err(FitError::BootstrapHalted) => return Err(FitError::BootstrapHalted),
                Err(err) => log::warn!("skipping {}: {}", name, err),
            }
            if let Some(progress) = &self.progress {
                progress(i + 1, names.len(), name);
            }
        }
        results.sort_by(|a, b| a.aicc().total_cmp(&b.aicc()));
        Ok(results)
    }

    pub fn fit_equation(
        &self,
        data: &Dataset,
        equation: Equation,
        guesses: Option<Vec<f64>>,
    ) -> Result<FitResult, FitError> {
        if equation.experiment() != data.experiment() {
            return Err(FitError::ExperimentMismatch {
                equation: equation.name().to_string(),
                experiment: data.experiment(),
            });
        }
        if data.n_covariates() != equation.n_covariates() {
            return Err(FitError::CovariateCount {
                equation: equation.name().to_string(),
                expected: equation.n_covariates(),
                found: data.n_covariates(),
            });
        }
        log::info!(
            "fitting {} to {} curves ({} points)",
            equation,
            data.n_curves(),
            data.len()
        );

        let map = equation.make_map(data.states(), &data.state_count())?;
        let mut guesses = match guesses {
            Some(guesses) if guesses.len() != map.n_params() => {
                return Err(FitError::GuessLength {
                    expected: map.n_params(),
                    found: guesses.len(),
                })
            }
            Some(guesses) => guesses,
            None => equation
                .guess(data, &map, &self.options)
                .ok_or_else(|| FitError::GuessFailed {
                    equation: equation.name().to_string(),
                })?,
        };
        let mut bounds = equation
            .boundaries(&guesses, data, &map, &self.options)
            .ok_or_else(|| FitError::GuessFailed {
                equation: equation.name().to_string(),
            })?;
        bounds.constrain(&mut guesses, &self.constraints, equation.par_names(), &map)?;
        bounds.widen_to(&guesses);

        let problem = FitFunction::new(equation, data.clone(), map.clone(), &bounds, &self.options)?;

        let start = Instant::now();
        let refinement = problem.refine(&guesses, &RefineSettings::from_options(&self.options, self.halt.clone()))?;
        let refine_seconds = start.elapsed().as_secs_f64();
        let params = refinement.params;
        let quality = problem.statistics(&params);
        log::debug!(
            "{} refined in {} iterations, objective {:.4e}",
            equation,
            refinement.iterations,
            refinement.value
        );

        let start = Instant::now();
        let set = if self.options.calc_error {
            let set = Bootstrap::from_options(&self.options, self.halt.clone()).run(&problem, &params)?;
            if !set.complete {
                return Err(FitError::BootstrapHalted);
            }
            Some(set)
        } else {
            None
        };
        let bootstrap_seconds = start.elapsed().as_secs_f64();

        let errors = set
            .as_ref()
            .map_or_else(|| vec![0.0; params.len()], |s| s.errors.clone());
        let validity = Validity::assess(
            equation,
            data,
            &map,
            &params,
            &errors,
            set.as_ref(),
            &quality,
            &self.options,
        );

        let result = FitResult {
            equation,
            curve_fits: curve_fits(equation, data, &map, &params, &errors, &quality),
            sim_pars: set
                .as_ref()
                .map(|s| simulation_map(equation, &map, s))
                .unwrap_or_default(),
            params,
            errors,
            quality,
            stats: CurveFitStats {
                optimizer: self.options.optimizer,
                bootstrap_optimizer: self.options.bootstrap_optimizer,
                refine_iterations: refinement.iterations,
                refine_seconds,
                bootstrap_seconds,
                n_samples: set.as_ref().map_or(0, |s| s.n_samples()),
                non_parametric: self.options.non_parametric_bootstrap,
                weight_fit: self.options.weight_fit,
                abs_value_fit: self.options.abs_value_fit,
                seed: self.options.seed,
            },
            kex_test: validity.kex_test,
            shift_test: validity.shift_test,
            exchange_valid: validity.valid,
        };

        log::info!(
            "{}: RMS {:.4e}, AICc {:.3}, exchange valid {}",
            equation,
            result.quality.rms,
            result.quality.aicc,
            result.exchange_valid
        );
        Ok(result)
    }
}

/// Exchange significance of a finished fit.
struct Validity {
    valid: bool,
    kex_test: Option<TTest>,
    shift_test: Option<TTest>,
}

impl Validity {
    /// Without a bootstrap the t-tests are not run and only the fitted
    /// contributions decide.
    #[allow(clippy::too_many_arguments)]
    fn assess(
        equation: Equation,
        data: &Dataset,
        map: &ParameterMap,
        params: &[f64],
        errors: &[f64],
        set: Option<&BootstrapSet>,
        quality: &FitQuality,
        options: &FitOptions,
    ) -> Self {
        let invalid = Validity {
            valid: false,
            kex_test: None,
            shift_test: None,
        };
        let Some(first) = map.rows().first() else {
            return invalid;
        };
        let shift = equation.shift_parameter();
        if shift == ShiftParameter::None {
            return invalid;
        }

        let rex_ok = map.rows().iter().enumerate().any(|(id, row)| {
            equation.rex(params, row, data.curve(id)) > options.rex_ratio * quality.rms
        });
        let kex_index = first[0];
        let kex_ok = match equation.experiment() {
            Experiment::Cpmg => params[kex_index] >= errors[kex_index],
            Experiment::Cest | Experiment::R1rho => match shift {
                ShiftParameter::Difference(a, b) => {
                    (params[first[b]] - params[first[a]]).abs() >= options.delta_ab_diff
                }
                _ => true,
            },
            Experiment::Exp => false,
        };

        let (kex_test, shift_test) = match set {
            Some(set) => {
                let kex = set.distribution(kex_index).to_vec();
                let shifts = match shift {
                    ShiftParameter::Column(j) => set.distribution(first[j]).to_vec(),
                    ShiftParameter::Difference(a, b) => set
                        .distribution(first[b])
                        .iter()
                        .zip(set.distribution(first[a]).iter())
                        .map(|(b, a)| b - a)
                        .collect(),
                    ShiftParameter::None => Vec::new(),
                };
                (
                    Some(t_test(&kex, options.significance_level)),
                    Some(t_test(&shifts, options.significance_level)),
                )
            }
            None => (None, None),
        };
        let tests_ok = [kex_test, shift_test]
            .iter()
            .all(|t| t.map_or(true, |t| t.passed));

        Validity {
            valid: rex_ok && kex_ok && tests_ok,
            kex_test,
            shift_test,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitOptionsBuilder;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn flat_cpmg() -> Dataset {
        let nus = [50.0, 100.0, 200.0, 400.0, 600.0, 800.0, 1000.0];
        let noise = [0.05, -0.08, 0.02, 0.07, -0.04, -0.01, 0.03];
        Dataset::from_arrays(
            Experiment::Cpmg,
            nus.iter().map(|n| vec![*n]).collect(),
            noise.iter().map(|d| 12.0 + d).collect(),
            vec![0.1; nus.len()],
            vec![60.8; nus.len()],
            vec![0; nus.len()],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_noex_fit_is_never_valid() {
        // ARRANGE
        let options = FitOptionsBuilder::default()
            .sample_size(10)
            .build()
            .unwrap();
        let fitter = Fitter::new(options).unwrap();

        // ACT
        let result = fitter.fit(&flat_cpmg(), "NOEX", None).unwrap();

        // ASSERT
        assert!(!result.exchange_valid);
        assert_relative_eq!(result.params[0], 12.0 + 0.04 / 7.0, epsilon = 1e-3);
        assert_eq!(result.curve_fits.len(), 1);
        assert_eq!(result.curve_fits[0].par_map["Equation"], 1.0);
        assert_eq!(result.sim_pars["R2 0"].len(), 10);
        assert_eq!(result.stats.n_samples, 10);
    }

    #[test]
    fn test_wrong_guess_length_is_rejected() {
        let fitter = Fitter::new(FitOptions::default()).unwrap();
        let result = fitter.fit(&flat_cpmg(), "CPMGFAST", Some(vec![1.0]));
        assert!(matches!(result, Err(FitError::GuessLength { .. })));
    }

    /// CEST profile without any dip.
    fn featureless_cest() -> Dataset {
        let offsets = (0..41).map(|i| -10.0 + i as f64 * 0.5).collect::<Vec<_>>();
        let n = offsets.len();
        Dataset::from_arrays(
            Experiment::Cest,
            offsets.iter().map(|o| vec![*o, 25.0, 0.3]).collect(),
            vec![0.9; n],
            vec![0.01; n],
            vec![60.8; n],
            vec![0; n],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_featureless_cest_needs_explicit_guesses() {
        // ARRANGE
        let data = featureless_cest();
        let options = FitOptions {
            calc_error: false,
            ..FitOptions::default()
        };
        let fitter = Fitter::new(options).unwrap();

        // ACT
        let detected = fitter.fit(&data, "NOEX", None);
        let supplied = fitter.fit(&data, "NOEX", Some(vec![-9.0, 0.35, 20.0]));
        let two_state = fitter.fit(
            &data,
            "TROTT_PALMER",
            Some(vec![150.0, 0.05, -9.0, 9.0, 0.35, 20.0, 60.0]),
        );

        // ASSERT
        assert!(matches!(detected, Err(FitError::GuessFailed { .. })));
        let supplied = supplied.unwrap();
        assert_eq!(supplied.params.len(), 3);
        assert!(supplied.rms().is_finite());
        assert_eq!(two_state.unwrap().params.len(), 7);
    }

    #[test]
    fn test_unknown_equation_is_rejected() {
        let fitter = Fitter::new(FitOptions::default()).unwrap();
        let result = fitter.fit(&flat_cpmg(), "R1RHOEXACT", None);
        assert!(matches!(result, Err(FitError::UnknownEquation { .. })));
    }

    #[test]
    fn test_halted_bootstrap_is_an_error() {
        let fitter = Fitter::new(FitOptions::default()).unwrap();
        fitter.halt_flag().halt();
        let result = fitter.fit(&flat_cpmg(), "NOEX", None);
        assert!(matches!(result, Err(FitError::BootstrapHalted)));
    }

    #[test]
    fn test_fit_all_orders_by_aicc_and_reports_progress() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = calls.clone();
        let options = FitOptions {
            calc_error: false,
            ..FitOptions::default()
        };
        let fitter = Fitter::new(options)
            .unwrap()
            .with_progress(move |done, total, name| sink.lock().unwrap().push((done, total, name.to_string())));

        let results = fitter.fit_all(&flat_cpmg(), &["NOEX", "CPMGFAST"]).unwrap();

        assert!(results.windows(2).all(|w| w[0].aicc() <= w[1].aicc()));
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(calls.lock().unwrap()[1], (2, 2, "CPMGFAST".to_string()));
    }
}
