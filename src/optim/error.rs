use thiserror::Error;

use crate::data::{DataError, Experiment};

#[derive(Error, Debug)]
pub enum FitError {
    #[error("Invalid dataset: {0}")]
    Data(#[from] DataError),
    #[error("Unknown {experiment} equation '{name}'")]
    UnknownEquation { experiment: Experiment, name: String },
    #[error("Equation {equation} cannot fit {experiment} data")]
    ExperimentMismatch { equation: String, experiment: Experiment },
    #[error("Invalid parameter map: {message}")]
    InvalidMap { message: String },
    #[error("Guesses have length {found}, expected {expected}")]
    GuessLength { expected: usize, found: usize },
    #[error("Bounds have length {found}, expected {expected}")]
    BoundsLength { expected: usize, found: usize },
    #[error("Lower bound {lower} exceeds upper bound {upper} for parameter {index}")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },
    #[error("No usable peak found to guess parameters of {equation}")]
    GuessFailed { equation: String },
    #[error("Equation {equation} expects {expected} covariates per point, found {found}")]
    CovariateCount {
        equation: String,
        expected: usize,
        found: usize,
    },
    #[error("{points} points are not enough to fit {params} parameters")]
    InsufficientData { points: usize, params: usize },
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("Unknown optimizer '{0}'")]
    InvalidOptimizer(String),
    #[error("Invalid configuration: {message}")]
    Config { message: String },
    #[error("Failed to build thread pool: {0}")]
    ThreadPoolError(String),
    #[error("Bootstrap was halted before all replicates finished")]
    BootstrapHalted,
    #[error("Error optimizing: {0}")]
    ArgMinError(String),
}

impl From<argmin::core::Error> for FitError {
    fn from(err: argmin::core::Error) -> Self {
        FitError::ArgMinError(err.to_string())
    }
}
