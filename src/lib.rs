//! rdisp: global fitting of NMR relaxation dispersion data
//!
//! This library estimates chemical exchange parameters from CPMG, CEST and
//! R1rho experiments:
//! - A registry of physical exchange models and their approximations
//! - Initial guesses and bounds from curve shape analysis
//! - Global multi-curve fits sharing group parameters across curves
//! - Bootstrap error estimation and exchange significance tests
//! - Immutable results with evaluable per-curve plot equations

#![warn(unused_imports)]

/// Fit configuration
pub mod config;

/// Sample points, curves and datasets
pub mod data;

/// Matrix exponential and eigenvalue helpers
pub mod linalg;

/// Bootstrap error estimation
pub mod bootstrap;

/// Physical models and the global parameter map
pub mod equations {
    pub use crate::equations::equation::{Equation, EquationModel, EquationRecord, ShiftParameter};
    pub use crate::equations::map::ParameterMap;

    pub mod cest;
    pub mod cpmg;
    pub mod equation;
    pub mod exp;
    pub(crate) mod exchange;
    pub mod formulas;
    pub mod map;
    pub mod r1rho;
}

/// Curve shape analysis used to seed guesses and bounds
pub mod guess {
    pub use crate::guess::peaks::{cest_peak_guess, CestPeak, PeakMode};

    pub mod estimates;
    pub mod peaks;
    pub mod smoothing;
}

pub mod optim {
    pub use crate::optim::bound::*;
    pub use crate::optim::error::*;
    pub use crate::optim::observer::*;
    pub use crate::optim::optimizers::*;
    pub use crate::optim::problem::*;
    pub use argmin::core::CostFunction;
    use argmin_math as _;

    pub mod bound;
    pub mod error;
    pub mod metrics;
    pub mod observer;
    pub mod problem;

    pub mod optimizers {
        pub use crate::optim::optimizers::halt::*;
        pub use crate::optim::optimizers::neldermead::*;
        pub use crate::optim::optimizers::optimizer::*;
        pub use crate::optim::optimizers::pso::*;
        pub mod halt;
        pub mod neldermead;
        pub mod optimizer;
        pub mod pso;
    }
}

/// Table rendering of fit results
pub mod info;

/// Fit pipeline and results
pub mod fitting {
    pub use crate::fitting::fitter::*;
    pub use crate::fitting::plot::*;
    pub use crate::fitting::result::*;

    pub mod fitter;
    pub mod plot;
    pub mod result;
}
