use serde::{Deserialize, Serialize};

use crate::equations::ParameterMap;

use super::FitError;

/// Smallest width a bound interval is widened to.
const MIN_WIDTH: f64 = 1.0e-6;

/// A user constraint on a named parameter.
///
/// The constraint applies to every slot of the shared parameter vector that the
/// named parameter occupies in any curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    /// Name of the parameter being bounded
    param: String,
    /// Lower bound/minimum allowed value for the parameter
    lower: f64,
    /// Upper bound/maximum allowed value for the parameter
    upper: f64,
}

impl Bound {
    /// Creates a new parameter bound with the specified name and range.
    ///
    /// # Arguments
    ///
    /// * `param` - Name of the parameter to bound
    /// * `lower` - Lower bound/minimum allowed value
    /// * `upper` - Upper bound/maximum allowed value
    pub fn new(param: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            param: param.into(),
            lower,
            upper,
        }
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }
}

/// Lower and upper limits of the shared parameter vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, FitError> {
        if lower.len() != upper.len() {
            return Err(FitError::BoundsLength {
                expected: lower.len(),
                found: upper.len(),
            });
        }
        if let Some(index) = lower
            .iter()
            .zip(&upper)
            .position(|(l, u)| !(l <= u) || !l.is_finite() || !u.is_finite())
        {
            return Err(FitError::InvalidBounds {
                index,
                lower: lower[index],
                upper: upper[index],
            });
        }
        Ok(Self { lower, upper })
    }

    /// Bounds of `n` parameters, all zero, to be filled slot by slot.
    pub(crate) fn zeros(n: usize) -> Self {
        Self {
            lower: vec![0.0; n],
            upper: vec![0.0; n],
        }
    }

    pub(crate) fn set(&mut self, index: usize, lower: f64, upper: f64) {
        self.lower[index] = lower;
        self.upper[index] = upper;
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Makes every interval contain its guess and have a nonzero width.
    ///
    /// Non-finite limits are replaced around the guess.
    pub fn widen_to(&mut self, guesses: &[f64]) {
        for ((lower, upper), &g) in self.lower.iter_mut().zip(self.upper.iter_mut()).zip(guesses) {
            if !lower.is_finite() {
                *lower = g - g.abs().max(1.0);
            }
            if !upper.is_finite() {
                *upper = g + g.abs().max(1.0);
            }
            if *lower > *upper {
                std::mem::swap(lower, upper);
            }
            *lower = lower.min(g);
            *upper = upper.max(g);
            if *upper - *lower < MIN_WIDTH {
                let pad = (g.abs() * 0.1).max(MIN_WIDTH);
                *lower -= pad;
                *upper += pad;
            }
        }
    }

    /// Applies named constraints to guesses and bounds in place.
    ///
    /// The guess of a constrained slot is moved to the middle of its interval.
    ///
    /// # Errors
    /// [`FitError::UnknownParameter`] when a constraint names a parameter the equation lacks.
    pub fn constrain(
        &mut self,
        guesses: &mut [f64],
        constraints: &[Bound],
        par_names: &[&str],
        map: &ParameterMap,
    ) -> Result<(), FitError> {
        for bound in constraints {
            let column = par_names
                .iter()
                .position(|n| *n == bound.param)
                .ok_or_else(|| FitError::UnknownParameter(bound.param.clone()))?;
            if !(bound.lower <= bound.upper) {
                return Err(FitError::InvalidBounds {
                    index: column,
                    lower: bound.lower,
                    upper: bound.upper,
                });
            }
            for row in map.rows() {
                let index = row[column];
                self.set(index, bound.lower, bound.upper);
                guesses[index] = (bound.lower + bound.upper) / 2.0;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_widen_contains_guess() {
        let mut bounds = Bounds::new(vec![0.0, 5.0, 1.0], vec![1.0, 6.0, 1.0]).unwrap();
        bounds.widen_to(&[2.0, 4.0, 1.0]);
        assert_eq!(bounds.upper[0], 2.0);
        assert_eq!(bounds.lower[1], 4.0);
        assert!(bounds.lower[2] < 1.0 && bounds.upper[2] > 1.0);
    }

    #[test]
    fn test_constraint_applies_to_every_slot() {
        // ARRANGE
        let map = ParameterMap::new(vec![vec![0, 1], vec![0, 2]], 1).unwrap();
        let mut bounds = Bounds::new(vec![0.0; 3], vec![10.0; 3]).unwrap();
        let mut guesses = vec![1.0, 2.0, 3.0];

        // ACT
        bounds
            .constrain(&mut guesses, &[Bound::new("R2", 4.0, 6.0)], &["Kex", "R2"], &map)
            .unwrap();

        // ASSERT
        assert_eq!(guesses, vec![1.0, 5.0, 5.0]);
        assert_eq!(bounds.lower, vec![0.0, 4.0, 4.0]);
        assert_eq!(bounds.upper, vec![10.0, 6.0, 6.0]);
    }

    #[test]
    fn test_unknown_constraint_is_rejected() {
        let map = ParameterMap::new(vec![vec![0]], 0).unwrap();
        let mut bounds = Bounds::zeros(1);
        let result = bounds.constrain(&mut [0.0], &[Bound::new("pB", 0.0, 1.0)], &["R2"], &map);
        assert!(matches!(result, Err(FitError::UnknownParameter(_))));
    }

    #[test]
    fn test_inverted_bounds_are_rejected() {
        assert!(Bounds::new(vec![2.0], vec![1.0]).is_err());
    }
}
