//! Bootstrap estimation of parameter errors.
//!
//! Every replicate refits a private copy of the [`FitFunction`] on perturbed
//! (parametric) or resampled (non-parametric) data, starting from the best fit.
//! Replicates run on a bounded rayon pool. Each replicate draws from its own
//! generator whose seed is taken, in replicate order, from one master stream,
//! so a seeded session reproduces bit for bit regardless of thread count.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use statrs::statistics::Statistics;

use crate::config::FitOptions;
use crate::data::Dataset;
use crate::optim::{FitError, FitFunction, HaltFlag, RefineSettings};

/// How replicate datasets are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResampleMode {
    /// Best-fit prediction plus Gaussian noise scaled by each point's error
    Parametric,
    /// Rows drawn with replacement
    NonParametric,
}

/// Bootstrap configuration.
#[derive(Debug, Clone, bon::Builder)]
pub struct Bootstrap {
    pub mode: ResampleMode,
    /// Number of replicates
    pub n_samples: usize,
    /// Refinement settings of every replicate
    pub settings: RefineSettings,
    #[builder(default = 10)]
    pub max_resample_tries: usize,
    /// Seed of the master stream
    #[builder(default = 1)]
    pub seed: u64,
    /// Worker threads, 0 for all cores
    #[builder(default)]
    pub n_threads: usize,
    #[builder(default)]
    pub halt: HaltFlag,
    #[builder(default)]
    pub show_progress: bool,
}

/// One replicate: refined parameters, objective value and whether it ran to completion.
struct Replicate {
    params: Vec<f64>,
    value: f64,
    halted: bool,
}

impl Bootstrap {
    /// Bootstrap as configured by the session options.
    ///
    /// Replicates start from half the top level search radius.
    pub fn from_options(options: &FitOptions, halt: HaltFlag) -> Self {
        let settings = RefineSettings::builder()
            .kind(options.bootstrap_optimizer)
            .sigma(options.start_radius / 2.0)
            .max_iters(options.max_iters)
            .stop_radius(options.stop_radius())
            .tolerance(options.population_tolerance())
            .halt(halt.clone())
            .build();
        let mode = if options.non_parametric_bootstrap {
            ResampleMode::NonParametric
        } else {
            ResampleMode::Parametric
        };
        Bootstrap::builder()
            .mode(mode)
            .n_samples(options.sample_size)
            .settings(settings)
            .max_resample_tries(options.max_resample_tries)
            .seed(options.seed)
            .n_threads(options.n_threads)
            .halt(halt)
            .show_progress(options.verbose)
            .build()
    }

    /// Runs all replicates around the best fit `best`.
    ///
    /// # Arguments
    /// * `problem` - The objective the best fit was found on
    /// * `best` - Best fit parameters, used as start point and for the parametric prediction
    ///
    /// # Returns
    /// * `Result<BootstrapSet, FitError>` - The replicate distribution. A set cut short by the
    ///   halt flag is returned with `complete == false`.
    pub fn run(&self, problem: &FitFunction, best: &[f64]) -> Result<BootstrapSet, FitError> {
        let mut master = StdRng::seed_from_u64(self.seed);
        let seeds = (0..self.n_samples).map(|_| master.gen::<u64>()).collect::<Vec<_>>();
        let predicted = problem.predict(best);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.n_threads)
            .build()
            .map_err(|e| FitError::ThreadPoolError(e.to_string()))?;
        let progress_bar = self.progress_bar();

        log::debug!(
            "bootstrapping {} with {} {:?} replicates",
            problem.equation(),
            self.n_samples,
            self.mode
        );

        let replicates: Vec<Option<Result<Replicate, FitError>>> = pool.install(|| {
            seeds
                .par_iter()
                .map(|&seed| {
                    if self.halt.is_halted() {
                        return None;
                    }
                    let replicate = self.replicate(problem, best, &predicted, seed);
                    progress_bar.inc(1);
                    Some(replicate)
                })
                .collect()
        });
        progress_bar.finish_and_clear();

        let n_params = problem.n_params();
        let mut complete = true;
        let mut finished = Vec::with_capacity(replicates.len());
        for replicate in replicates {
            match replicate {
                Some(replicate) => {
                    let replicate = replicate?;
                    complete &= !replicate.halted;
                    finished.push(replicate);
                }
                None => complete = false,
            }
        }

        let mut sim_pars = Array2::zeros((n_params + 1, finished.len()));
        for (j, replicate) in finished.iter().enumerate() {
            for (i, value) in replicate.params.iter().enumerate() {
                sim_pars[[i, j]] = *value;
            }
            sim_pars[[n_params, j]] = replicate.value;
        }
        let errors = (0..n_params)
            .map(|i| sim_pars.row(i).iter().std_dev())
            .collect();

        Ok(BootstrapSet {
            sim_pars,
            errors,
            complete,
        })
    }

    fn replicate(
        &self,
        problem: &FitFunction,
        best: &[f64],
        predicted: &[f64],
        seed: u64,
    ) -> Result<Replicate, FitError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = match self.mode {
            ResampleMode::Parametric => {
                let noise = Normal::standard();
                let y = predicted
                    .iter()
                    .zip(problem.data().points())
                    .map(|(calc, p)| calc + p.err * rng.sample(noise))
                    .collect::<Vec<_>>();
                problem.data().with_y(&y)
            }
            ResampleMode::NonParametric => self.resample(problem.data(), &mut rng),
        };

        let settings = RefineSettings {
            seed,
            ..self.settings.clone()
        };
        let refinement = problem.with_data(data).refine(best, &settings)?;
        Ok(Replicate {
            params: refinement.params,
            value: refinement.value,
            halted: refinement.halted,
        })
    }

    /// Draws rows with replacement until every curve is covered at least twice.
    ///
    /// After `max_resample_tries` failed draws the last draw is used as is.
    fn resample(&self, data: &Dataset, rng: &mut StdRng) -> Dataset {
        let n = data.len();
        let mut indices = Vec::new();
        for _ in 0..self.max_resample_tries.max(1) {
            indices = (0..n).map(|_| rng.gen_range(0..n)).collect::<Vec<_>>();
            if covers_every_curve(data, &indices) {
                return data.resampled(&indices);
            }
        }
        log::warn!(
            "resampled rows cover some curve fewer than twice after {} tries",
            self.max_resample_tries
        );
        data.resampled(&indices)
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress_bar = ProgressBar::new(self.n_samples as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("Bootstrap: {spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} | {elapsed}/{eta}")
        {
            progress_bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
        }
        progress_bar
    }
}

fn covers_every_curve(data: &Dataset, indices: &[usize]) -> bool {
    let mut counts = vec![0usize; data.n_curves()];
    for &i in indices {
        counts[data.points()[i].id] += 1;
    }
    counts.iter().all(|&c| c >= 2)
}

/// Replicate distribution of one bootstrap run.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapSet {
    /// Parameters by replicate, `(k + 1) x N`; the last row holds the objective values
    pub sim_pars: Array2<f64>,
    /// Standard deviation of each parameter
    pub errors: Vec<f64>,
    /// False when the run was halted before every replicate finished
    pub complete: bool,
}

impl BootstrapSet {
    pub fn n_samples(&self) -> usize {
        self.sim_pars.ncols()
    }

    /// Distribution of parameter `index`.
    pub fn distribution(&self, index: usize) -> ArrayView1<'_, f64> {
        self.sim_pars.row(index)
    }

    /// Distribution of the objective value.
    pub fn objective(&self) -> ArrayView1<'_, f64> {
        self.sim_pars.row(self.sim_pars.nrows() - 1)
    }
}

/// Outcome of a one-sample Student t-test against zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    pub t: f64,
    /// Two-sided p-value
    pub p: f64,
    pub passed: bool,
}

/// Two-sided one-sample t-test of `samples` against a zero mean.
///
/// Fewer than two samples never pass.
pub fn t_test(samples: &[f64], significance_level: f64) -> TTest {
    let n = samples.len();
    let failed = TTest {
        t: f64::NAN,
        p: f64::NAN,
        passed: false,
    };
    if n < 2 {
        return failed;
    }
    let mean = samples.mean();
    let sd = samples.std_dev();
    if sd == 0.0 {
        let p = if mean == 0.0 { 1.0 } else { 0.0 };
        return TTest {
            t: if mean == 0.0 { 0.0 } else { f64::INFINITY.copysign(mean) },
            p,
            passed: p < significance_level,
        };
    }
    let t = mean / (sd / (n as f64).sqrt());
    let Ok(dist) = StudentsT::new(0.0, 1.0, (n - 1) as f64) else {
        return failed;
    };
    let p = 2.0 * (1.0 - dist.cdf(t.abs()));
    TTest {
        t,
        p,
        passed: p.is_finite() && p < significance_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Experiment;
    use crate::equations::cpmg::CpmgEquation;
    use crate::equations::{Equation, EquationModel};
    use crate::optim::{Bounds, OptimizerKind};
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn noisy_flat() -> FitFunction {
        let y = vec![
            10.1, 9.9, 10.3, 9.8, 10.0, 10.2, 9.7, 10.1, 9.9, 10.0, 10.2, 9.8,
        ];
        let n = y.len();
        let data = Dataset::from_arrays(
            Experiment::Cpmg,
            (0..n).map(|i| vec![50.0 + i as f64 * 80.0]).collect(),
            y,
            vec![0.2; n],
            vec![60.8; n],
            (0..n).map(|i| i % 2).collect(),
            None,
        )
        .unwrap();
        let equation = Equation::Cpmg(CpmgEquation::NoEx);
        let map = equation.make_map(data.states(), &data.state_count()).unwrap();
        let bounds = Bounds::new(vec![0.0; map.n_params()], vec![40.0; map.n_params()]).unwrap();
        FitFunction::new(equation, data, map, &bounds, &FitOptions::default()).unwrap()
    }

    fn bootstrap(mode: ResampleMode, n_samples: usize, n_threads: usize) -> Bootstrap {
        let settings = RefineSettings::builder()
            .kind(OptimizerKind::NelderMead)
            .sigma(10.0)
            .max_iters(2000)
            .stop_radius(1e-6)
            .tolerance(1e-5)
            .build();
        Bootstrap::builder()
            .mode(mode)
            .n_samples(n_samples)
            .settings(settings)
            .seed(42)
            .n_threads(n_threads)
            .build()
    }

    #[test]
    fn test_parametric_bootstrap_shape() {
        // ARRANGE
        let problem = noisy_flat();
        let best = vec![10.0; problem.n_params()];

        // ACT
        let set = bootstrap(ResampleMode::Parametric, 20, 2).run(&problem, &best).unwrap();

        // ASSERT
        assert!(set.complete);
        assert_eq!(set.sim_pars.dim(), (problem.n_params() + 1, 20));
        assert_eq!(set.errors.len(), problem.n_params());
        // noise of 0.2 on six points per curve
        for error in &set.errors {
            assert!(*error > 0.01 && *error < 0.3, "error {}", error);
        }
        assert!(set.objective().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_seeded_bootstrap_is_reproducible_across_thread_counts() {
        let problem = noisy_flat();
        let best = vec![10.0; problem.n_params()];
        let a = bootstrap(ResampleMode::NonParametric, 12, 1).run(&problem, &best).unwrap();
        let b = bootstrap(ResampleMode::NonParametric, 12, 4).run(&problem, &best).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_halted_bootstrap_is_incomplete() {
        let problem = noisy_flat();
        let best = vec![10.0; problem.n_params()];
        let bootstrap = bootstrap(ResampleMode::Parametric, 8, 1);
        bootstrap.halt.halt();
        let set = bootstrap.run(&problem, &best).unwrap();
        assert!(!set.complete);
        assert_eq!(set.n_samples(), 0);
    }

    #[test]
    fn test_resample_covers_every_curve() {
        let problem = noisy_flat();
        let bootstrap = bootstrap(ResampleMode::NonParametric, 1, 1);
        let mut rng = StdRng::seed_from_u64(3);
        let data = bootstrap.resample(problem.data(), &mut rng);
        assert_eq!(data.len(), problem.data().len());
        assert!(data.curve(0).len() >= 2 && data.curve(1).len() >= 2);
    }

    #[test]
    fn test_t_test() {
        let shifted = [1.1, 0.9, 1.2, 1.0, 0.8, 1.05];
        let centered = [0.1, -0.2, 0.15, -0.05, 0.0, -0.1];
        assert!(t_test(&shifted, 0.02).passed);
        assert!(!t_test(&centered, 0.02).passed);
        assert!(!t_test(&[1.0], 0.02).passed);

        // t = mean / (sd / sqrt(n)) for [1, 2, 3]: 2 / (1 / sqrt 3)
        let result = t_test(&[1.0, 2.0, 3.0], 0.02);
        assert_relative_eq!(result.t, 2.0 * 3f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(result.p, 0.07417990022744847, epsilon = 1e-6);
    }
}
