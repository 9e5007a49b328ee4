//! Nelder-Mead downhill simplex refinement.
//!
//! The local search used for top level fits and, by default, for bootstrap
//! replicates. The initial simplex is the start point plus one vertex per
//! parameter displaced by `sigma` normalized units, mirrored back into the box
//! when the step would leave it.
//!
//! The search stops once every vertex lies within `stop_radius` normalized
//! units of the best one, so the stopping rule does not depend on the scale of
//! the objective. A converged simplex is rebuilt around its best vertex and the
//! search continues while the restart still lowers the cost.

use argmin::core::observers::ObserverMode;
use argmin::core::{
    CostFunction, Error, Executor, IterState, Problem, Solver, State, TerminationReason,
    TerminationStatus, KV,
};
use argmin_observer_slog::SlogLogger;
use ndarray::Array1;

use crate::optim::optimizers::halt::{was_halted, Guarded};
use crate::optim::problem::SCALE;
use crate::optim::{
    CallbackObserver, FitError, FitFunction, HaltFlag, InitialGuesses, Optimizer, Refinement,
};

/// Simplex rebuilds after the first convergence.
const MAX_RESTARTS: usize = 3;

/// Relative cost gain a restart must achieve to earn another one.
const RESTART_GAIN: f64 = 1e-10;

type SimplexState = IterState<Array1<f64>, (), (), (), (), f64>;

/// Nelder-Mead optimizer over the normalized parameter box.
#[derive(Debug, Clone, bon::Builder)]
pub struct NelderMeadOpt {
    /// Initial simplex size
    #[builder(default = 20.0)]
    pub sigma: f64,
    /// Maximum number of iterations, shared by all restarts
    #[builder(default = 5000)]
    pub max_iters: u64,
    /// Simplex radius in normalized units below which the search stops
    #[builder(default = 1e-5)]
    pub stop_radius: f64,
    #[builder(default)]
    pub halt: HaltFlag,
    pub observer: Option<CallbackObserver>,
    /// Stream iterations to the terminal
    #[builder(default)]
    pub verbose: bool,
}

impl NelderMeadOpt {
    fn simplex(&self, start: &Array1<f64>) -> Vec<Array1<f64>> {
        let mut vertices = vec![start.clone()];
        for i in 0..start.len() {
            let mut vertex = start.clone();
            vertex[i] = if start[i] + self.sigma <= SCALE {
                start[i] + self.sigma
            } else {
                start[i] - self.sigma
            };
            vertices.push(vertex);
        }
        vertices
    }

    /// One simplex run from `start` with at most `budget` iterations.
    fn run(
        &self,
        problem: &FitFunction,
        start: &Array1<f64>,
        budget: u64,
    ) -> Result<(Array1<f64>, u64, bool), FitError> {
        let solver = Guarded::new(
            BoxSimplex::new(self.simplex(start), self.stop_radius),
            self.halt.clone(),
        );
        let mut executor =
            Executor::new(problem.clone(), solver).configure(|state| state.max_iters(budget));
        if let Some(observer) = self.observer.clone() {
            executor = executor.add_observer(observer, ObserverMode::Always);
        }
        if self.verbose {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
        }
        let res = executor.run()?;

        let halted = was_halted(res.state().get_termination_status());
        let point = res
            .state()
            .get_best_param()
            .cloned()
            .unwrap_or_else(|| start.clone());
        Ok((point, res.state().get_iter(), halted))
    }
}

impl Optimizer for NelderMeadOpt {
    /// Optimizes the fit function with the Nelder-Mead simplex method.
    ///
    /// # Arguments
    ///
    /// * `problem` - The fit function to minimize
    /// * `initial_guess` - Normalized start point, the box center when absent
    ///
    /// # Returns
    ///
    /// * `Ok(Refinement)` - The best vertex found
    /// * `Err(FitError)` - Error if the solver could not be set up or failed
    fn optimize<T>(&self, problem: &FitFunction, initial_guess: Option<T>) -> Result<Refinement, FitError>
    where
        T: Into<InitialGuesses>,
    {
        let start = match initial_guess {
            Some(guess) => guess.into().get_values(),
            None => Array1::from_elem(problem.n_params(), SCALE / 2.0),
        };
        if start.len() != problem.n_params() {
            return Err(FitError::GuessLength {
                expected: problem.n_params(),
                found: start.len(),
            });
        }

        let mut point = start.clone();
        let mut value = problem.cost(&start)?;
        let mut iterations = 0;
        let mut halted = false;
        for _ in 0..=MAX_RESTARTS {
            if iterations >= self.max_iters {
                break;
            }
            let (candidate, used, stopped) = self.run(problem, &point, self.max_iters - iterations)?;
            iterations += used;
            halted = stopped;

            let candidate_value = problem.cost(&candidate)?;
            let gain = value - candidate_value;
            if candidate_value <= value {
                point = candidate;
                value = candidate_value;
            }
            if halted || gain <= RESTART_GAIN * value.abs() {
                break;
            }
        }

        Ok(Refinement {
            params: problem.denormalize(&point),
            point,
            value,
            iterations,
            halted,
        })
    }
}

/// Downhill simplex that stops on the spread of its vertices.
#[derive(Debug, Clone)]
pub struct BoxSimplex {
    vertices: Vec<(Array1<f64>, f64)>,
    radius: f64,
}

impl BoxSimplex {
    const ALPHA: f64 = 1.0;
    const GAMMA: f64 = 2.0;
    const RHO: f64 = 0.5;
    const SIGMA: f64 = 0.5;

    pub fn new(vertices: Vec<Array1<f64>>, radius: f64) -> Self {
        Self {
            vertices: vertices.into_iter().map(|v| (v, f64::INFINITY)).collect(),
            radius,
        }
    }

    fn sort(&mut self) {
        self.vertices.sort_by(|a, b| a.1.total_cmp(&b.1));
    }

    /// Largest coordinate distance of any vertex from the best one.
    fn spread(&self) -> f64 {
        let Some((best, _)) = self.vertices.first() else {
            return 0.0;
        };
        self.vertices
            .iter()
            .skip(1)
            .flat_map(|(v, _)| v.iter().zip(best.iter()).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max)
    }

    fn centroid(&self) -> Array1<f64> {
        let n = self.vertices.len() - 1;
        let mut sum = Array1::<f64>::zeros(self.vertices[0].0.len());
        for (v, _) in &self.vertices[..n] {
            sum += v;
        }
        sum / n as f64
    }

    fn replace_worst(&mut self, vertex: Array1<f64>, cost: f64) {
        if let Some(worst) = self.vertices.last_mut() {
            *worst = (vertex, cost);
        }
    }

    fn shrink<O>(&mut self, problem: &mut Problem<O>) -> Result<(), Error>
    where
        O: CostFunction<Param = Array1<f64>, Output = f64>,
    {
        let best = self.vertices[0].0.clone();
        for (v, cost) in self.vertices.iter_mut().skip(1) {
            *v = &best + &((&*v - &best) * Self::SIGMA);
            *cost = problem.cost(v)?;
        }
        Ok(())
    }
}

impl<O> Solver<O, SimplexState> for BoxSimplex
where
    O: CostFunction<Param = Array1<f64>, Output = f64>,
{
    const NAME: &'static str = "Nelder-Mead";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: SimplexState,
    ) -> Result<(SimplexState, Option<KV>), Error> {
        for (v, cost) in self.vertices.iter_mut() {
            *cost = problem.cost(v)?;
        }
        self.sort();
        let (best, cost) = self.vertices[0].clone();
        Ok((state.param(best).cost(cost), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        state: SimplexState,
    ) -> Result<(SimplexState, Option<KV>), Error> {
        let n = self.vertices.len() - 1;
        let centroid = self.centroid();
        let (worst, worst_cost) = self.vertices[n].clone();
        let best_cost = self.vertices[0].1;
        let second_worst_cost = self.vertices[n - 1].1;

        let reflected = &centroid + &((&centroid - &worst) * Self::ALPHA);
        let reflected_cost = problem.cost(&reflected)?;

        if reflected_cost < best_cost {
            let expanded = &centroid + &((&reflected - &centroid) * Self::GAMMA);
            let expanded_cost = problem.cost(&expanded)?;
            if expanded_cost < reflected_cost {
                self.replace_worst(expanded, expanded_cost);
            } else {
                self.replace_worst(reflected, reflected_cost);
            }
        } else if reflected_cost < second_worst_cost {
            self.replace_worst(reflected, reflected_cost);
        } else if reflected_cost < worst_cost {
            let contracted = &centroid + &((&reflected - &centroid) * Self::RHO);
            let contracted_cost = problem.cost(&contracted)?;
            if contracted_cost <= reflected_cost {
                self.replace_worst(contracted, contracted_cost);
            } else {
                self.shrink(problem)?;
            }
        } else {
            let contracted = &centroid + &((&worst - &centroid) * Self::RHO);
            let contracted_cost = problem.cost(&contracted)?;
            if contracted_cost < worst_cost {
                self.replace_worst(contracted, contracted_cost);
            } else {
                self.shrink(problem)?;
            }
        }

        self.sort();
        let (best, cost) = self.vertices[0].clone();
        Ok((state.param(best).cost(cost), None))
    }

    fn terminate(&mut self, _state: &SimplexState) -> TerminationStatus {
        if self.vertices.len() < 2 || self.spread() <= self.radius {
            return TerminationStatus::Terminated(TerminationReason::SolverConverged);
        }
        TerminationStatus::NotTerminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitOptions;
    use crate::data::{Dataset, Experiment};
    use crate::equations::cpmg::CpmgEquation;
    use crate::equations::{Equation, EquationModel};
    use crate::optim::Bounds;
    use approx::assert_relative_eq;

    /// Flat profile around 1e-3 whose unweighted costs are far below 1e-5.
    fn small_scale_problem() -> FitFunction {
        let y = vec![1.0e-3, 1.02e-3, 0.98e-3, 1.01e-3, 0.99e-3, 1.0e-3, 1.03e-3, 0.97e-3];
        let n = y.len();
        let data = Dataset::from_arrays(
            Experiment::Cpmg,
            (1..=n).map(|i| vec![i as f64 * 100.0]).collect(),
            y,
            vec![1.0e-4; n],
            vec![60.8; n],
            vec![0; n],
            None,
        )
        .unwrap();
        let equation = Equation::Cpmg(CpmgEquation::NoEx);
        let map = equation.make_map(data.states(), &data.state_count()).unwrap();
        let bounds = Bounds::new(vec![0.0], vec![0.01]).unwrap();
        let options = FitOptions {
            weight_fit: false,
            ..FitOptions::default()
        };
        FitFunction::new(equation, data, map, &bounds, &options).unwrap()
    }

    #[test]
    fn test_simplex_stays_in_box() {
        let optimizer = NelderMeadOpt::builder().sigma(20.0).build();
        let vertices = optimizer.simplex(&Array1::from_vec(vec![50.0, 90.0]));
        assert_eq!(vertices.len(), 3);
        assert_eq!(vertices[1].to_vec(), vec![70.0, 90.0]);
        assert_eq!(vertices[2].to_vec(), vec![50.0, 70.0]);
    }

    #[test]
    fn test_spread_is_largest_coordinate_distance() {
        let mut simplex = BoxSimplex::new(
            vec![
                Array1::from_vec(vec![1.0, 1.0]),
                Array1::from_vec(vec![1.5, 0.0]),
                Array1::from_vec(vec![0.8, 1.1]),
            ],
            1e-5,
        );
        simplex.vertices[0].1 = 0.0;
        assert_relative_eq!(simplex.spread(), 1.0);
    }

    #[test]
    fn test_stop_does_not_depend_on_cost_scale() {
        // ARRANGE
        let problem = small_scale_problem();
        let optimizer = NelderMeadOpt::builder().sigma(20.0).stop_radius(1e-5).build();

        // ACT
        let refinement = optimizer
            .optimize(&problem, Some(problem.normalize(&[0.005])))
            .unwrap();

        // ASSERT
        assert!(refinement.iterations > 10, "{} iterations", refinement.iterations);
        assert_relative_eq!(refinement.params[0], 1.0e-3, epsilon = 1e-8);
        assert!(!refinement.halted);
    }

    #[test]
    fn test_halted_search_stops_immediately() {
        let problem = small_scale_problem();
        let halt = HaltFlag::new();
        halt.halt();
        let optimizer = NelderMeadOpt::builder().halt(halt).build();

        let start = problem.normalize(&[0.005]);
        let refinement = optimizer.optimize(&problem, Some(start)).unwrap();

        assert!(refinement.halted);
        assert!(refinement.iterations <= 1);
    }
}
