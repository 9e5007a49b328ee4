//! Particle Swarm Optimization (PSO) refinement.
//!
//! The global search alternative to the simplex. The swarm covers the whole
//! normalized box; its size grows with the logarithm of the parameter count.
//! Each particle has a position and a velocity and moves according to:
//!
//! v_i(t+1) = w * v_i(t) + c1 * r1 * (p_i - x_i(t)) + c2 * r2 * (g - x_i(t))
//! x_i(t+1) = x_i(t) + v_i(t+1)
//!
//! where:
//! - p_i is the best position of particle i
//! - g is the best position of the entire swarm
//! - r1 and r2 are random numbers between 0 and 1
//! - c1 and c2 are the cognitive and social parameters
//! - w is the inertia weight
//!
//! The run stops when the best cost stalls, on a halt request or when the
//! iteration budget is spent.

use argmin::core::observers::ObserverMode;
use argmin::core::{CostFunction, Executor, State};
use argmin::solver::particleswarm::ParticleSwarm;
use argmin_observer_slog::SlogLogger;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::optim::optimizers::halt::{was_halted, Guarded};
use crate::optim::problem::SCALE;
use crate::optim::{
    CallbackObserver, FitError, FitFunction, HaltFlag, InitialGuesses, Optimizer, Refinement,
};

/// Iterations without relative improvement before the swarm is considered stalled.
const STALL_PATIENCE: u64 = 100;

/// Swarm size for `n_params` parameters.
pub fn population_size(n_params: usize) -> usize {
    let k = n_params.max(1) as f64;
    3 * (4.0 + 3.0 * k.ln()).round() as usize
}

/// Particle swarm optimizer over the normalized parameter box.
#[derive(Debug, Clone, bon::Builder)]
pub struct ParticleSwarmOpt {
    /// Maximum number of iterations before stopping
    #[builder(default = 2000)]
    pub max_iters: u64,
    /// Relative improvement of the best cost that still counts as progress
    #[builder(default = 1e-5)]
    pub tolerance: f64,
    /// Seed of the particle generator
    #[builder(default)]
    pub seed: u64,
    /// Population size, derived from the parameter count when absent
    pub pop_size: Option<usize>,
    #[builder(default)]
    pub halt: HaltFlag,
    pub observer: Option<CallbackObserver>,
    #[builder(default)]
    pub verbose: bool,
}

impl Optimizer for ParticleSwarmOpt {
    /// Optimizes the fit function with the particle swarm.
    ///
    /// # Arguments
    ///
    /// * `problem` - The fit function to minimize
    /// * `initial_guess` - Normalized start point; returned when no particle beats it
    ///
    /// # Returns
    ///
    /// * `Ok(Refinement)` - The best of the swarm optimum and the start point
    /// * `Err(FitError)` - Error if the swarm failed
    fn optimize<T>(&self, problem: &FitFunction, initial_guess: Option<T>) -> Result<Refinement, FitError>
    where
        T: Into<InitialGuesses>,
    {
        let n = problem.n_params();
        let start = initial_guess.map(|g| g.into().get_values());
        if let Some(start) = &start {
            if start.len() != n {
                return Err(FitError::GuessLength {
                    expected: n,
                    found: start.len(),
                });
            }
        }

        let bounds = (Array1::zeros(n), Array1::from_elem(n, SCALE));
        let pop_size = self.pop_size.unwrap_or_else(|| population_size(n));
        let solver = ParticleSwarm::new(bounds, pop_size)
            .with_rng_generator(StdRng::seed_from_u64(self.seed));
        let solver = Guarded::new(solver, self.halt.clone()).with_stall(self.tolerance, STALL_PATIENCE);

        let mut executor = Executor::new(problem.clone(), solver)
            .configure(|state| state.max_iters(self.max_iters));
        if let Some(observer) = self.observer.clone() {
            executor = executor.add_observer(observer, ObserverMode::Always);
        }
        if self.verbose {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
        }
        let mut res = executor.run()?;

        let halted = was_halted(res.state().get_termination_status());
        let iterations = res.state().get_iter();
        let best = res.state.take_best_individual();

        let mut candidates = Vec::new();
        if let Some(best) = best {
            candidates.push((best.position, best.cost));
        }
        if let Some(start) = start {
            let cost = problem.cost(&start)?;
            candidates.push((start, cost));
        }
        let (point, value) = candidates
            .into_iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| FitError::ArgMinError("swarm returned no particle".to_string()))?;

        Ok(Refinement {
            params: problem.denormalize(&point),
            point,
            value,
            iterations,
            halted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_population_grows_logarithmically() {
        assert_eq!(population_size(1), 12);
        assert_eq!(population_size(7), 30);
        assert_eq!(population_size(20), 39);
    }
}
