//! Cooperative stopping for argmin solvers.
//!
//! [`Guarded`] wraps any solver and ends the run between iterations when the
//! shared [`HaltFlag`] is raised, or when the best cost stops improving.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use argmin::core::{Error, Problem, Solver, State, TerminationReason, TerminationStatus, KV};

/// Termination message of a halted run.
pub const HALTED: &str = "halted";

/// Shared stop request, checked between iterations and between bootstrap replicates.
#[derive(Debug, Clone, Default)]
pub struct HaltFlag(Arc<AtomicBool>);

impl HaltFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests every run sharing this flag to stop.
    pub fn halt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ends a run once the best cost has not improved by more than `tolerance`
/// (relative) for `patience` iterations.
#[derive(Debug, Clone)]
struct Stall {
    tolerance: f64,
    patience: u64,
    best: f64,
    since: u64,
}

impl Stall {
    fn stalled(&mut self, best: f64, iter: u64) -> bool {
        let scale = self.best.abs().max(f64::MIN_POSITIVE);
        if !self.best.is_finite() || (self.best - best) / scale > self.tolerance {
            self.best = best;
            self.since = iter;
            return false;
        }
        iter - self.since >= self.patience
    }
}

/// Solver wrapper adding the halt and stall checks.
#[derive(Debug, Clone)]
pub struct Guarded<S> {
    inner: S,
    halt: HaltFlag,
    stall: Option<Stall>,
}

impl<S> Guarded<S> {
    pub fn new(inner: S, halt: HaltFlag) -> Self {
        Self {
            inner,
            halt,
            stall: None,
        }
    }

    /// Adds the stall rule.
    pub fn with_stall(mut self, tolerance: f64, patience: u64) -> Self {
        self.stall = Some(Stall {
            tolerance,
            patience,
            best: f64::INFINITY,
            since: 0,
        });
        self
    }
}

impl<O, I, S> Solver<O, I> for Guarded<S>
where
    I: State<Float = f64>,
    S: Solver<O, I>,
{
    const NAME: &'static str = <S as Solver<O, I>>::NAME;

    fn init(&mut self, problem: &mut Problem<O>, state: I) -> Result<(I, Option<KV>), Error> {
        self.inner.init(problem, state)
    }

    fn next_iter(&mut self, problem: &mut Problem<O>, state: I) -> Result<(I, Option<KV>), Error> {
        self.inner.next_iter(problem, state)
    }

    fn terminate(&mut self, state: &I) -> TerminationStatus {
        if self.halt.is_halted() {
            return TerminationStatus::Terminated(TerminationReason::SolverExit(HALTED.to_string()));
        }
        if let Some(stall) = self.stall.as_mut() {
            if stall.stalled(state.get_best_cost(), state.get_iter()) {
                return TerminationStatus::Terminated(TerminationReason::SolverConverged);
            }
        }
        self.inner.terminate(state)
    }
}

/// Whether a termination status came from a halt request.
pub fn was_halted(status: &TerminationStatus) -> bool {
    matches!(
        status,
        TerminationStatus::Terminated(TerminationReason::SolverExit(msg)) if msg == HALTED
    )
}
