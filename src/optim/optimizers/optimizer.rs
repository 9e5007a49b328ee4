//! Traits and shared types for the refinement optimizers.
//!
//! This module provides:
//!
//! - The `Optimizer` trait implemented by every solver wrapper
//! - `InitialGuesses`, the normalized starting point handed to a solver
//! - `Refinement`, the best point a solver found
//! - `OptimizerKind`, the persisted optimizer identifier

use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::optim::{FitError, FitFunction};

/// Trait defining the interface for optimization algorithms.
pub trait Optimizer {
    /// Refines the given fit function starting from a normalized point.
    ///
    /// # Arguments
    /// * `problem` - The fit function to minimize
    /// * `initial_guess` - Starting point in normalized units
    ///
    /// # Returns
    /// * `Result<Refinement, FitError>` - The best point found within the iteration budget
    fn optimize<T>(&self, problem: &FitFunction, initial_guess: Option<T>) -> Result<Refinement, FitError>
    where
        T: Into<InitialGuesses>;
}

/// Wrapper type for initial parameter guesses used in optimization.
#[derive(Debug, Clone)]
pub struct InitialGuesses(pub Array1<f64>);

impl InitialGuesses {
    /// Get the values of the initial guesses.
    pub fn get_values(self) -> Array1<f64> {
        self.0
    }

    pub fn get_values_ref(&self) -> &Array1<f64> {
        &self.0
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Array1<f64>> for InitialGuesses {
    fn from(value: Array1<f64>) -> Self {
        InitialGuesses(value)
    }
}

impl From<Vec<f64>> for InitialGuesses {
    fn from(value: Vec<f64>) -> Self {
        InitialGuesses(Array1::from_vec(value))
    }
}

/// Outcome of one refinement.
#[derive(Debug, Clone, PartialEq)]
pub struct Refinement {
    /// Best point in normalized units
    pub point: Array1<f64>,
    /// Best point in parameter units
    pub params: Vec<f64>,
    /// Objective value at the best point
    pub value: f64,
    /// Iterations the solver ran
    pub iterations: u64,
    /// Whether the run stopped on a halt request
    pub halted: bool,
}

/// Optimizer identifier.
///
/// The local search also answers to `BOBYQA` and the population search to
/// `CMA-ES`, so option files written for either naming keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[serde(rename = "NELDER-MEAD", alias = "BOBYQA")]
    NelderMead,
    #[serde(rename = "PSO", alias = "CMA-ES")]
    ParticleSwarm,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::NelderMead => "NELDER-MEAD",
            OptimizerKind::ParticleSwarm => "PSO",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NELDER-MEAD" | "NELDERMEAD" | "BOBYQA" => Ok(OptimizerKind::NelderMead),
            "PSO" | "CMA-ES" | "CMAES" => Ok(OptimizerKind::ParticleSwarm),
            _ => Err(FitError::InvalidOptimizer(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_optimizer_aliases() {
        assert_eq!("BOBYQA".parse::<OptimizerKind>().unwrap(), OptimizerKind::NelderMead);
        assert_eq!("cma-es".parse::<OptimizerKind>().unwrap(), OptimizerKind::ParticleSwarm);
        assert!("LBFGS".parse::<OptimizerKind>().is_err());

        let kind: OptimizerKind = serde_json::from_str("\"CMA-ES\"").unwrap();
        assert_eq!(kind, OptimizerKind::ParticleSwarm);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"PSO\"");
    }
}
