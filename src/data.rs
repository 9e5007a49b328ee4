//! Sample points, curves and datasets.
//!
//! A [`Dataset`] is a flat arena of [`SamplePoint`]s sorted by curve id. Each curve
//! is addressed through an index range into that arena, so evaluation never copies
//! covariate arrays per curve. Datasets are constructed once per fit from the plain
//! arrays supplied by the caller (see [`Dataset::from_arrays`]) and are read-only
//! afterwards; resampling produces a new dataset.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relaxation dispersion experiment family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Experiment {
    Cpmg,
    Cest,
    R1rho,
    /// Intensity decay over a relaxation delay
    Exp,
}

impl Experiment {
    /// All experiment families in registry order.
    pub const ALL: [Experiment; 4] = [
        Experiment::Cpmg,
        Experiment::Cest,
        Experiment::R1rho,
        Experiment::Exp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Experiment::Cpmg => "cpmg",
            Experiment::Cest => "cest",
            Experiment::R1rho => "r1rho",
            Experiment::Exp => "exp",
        }
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Experiment {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpmg" => Ok(Experiment::Cpmg),
            "cest" => Ok(Experiment::Cest),
            "r1rho" => Ok(Experiment::R1rho),
            "exp" => Ok(Experiment::Exp),
            _ => Err(DataError::UnknownExperiment(s.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Unknown experiment family: {0}")]
    UnknownExperiment(String),
    #[error("Dataset contains no sample points")]
    Empty,
    #[error("Length of '{field}' ({found}) does not match number of observations ({expected})")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Point {point} has {found} covariates, expected {expected}")]
    CovariateCount {
        point: usize,
        expected: usize,
        found: usize,
    },
    #[error("Dataset ids must be contiguous from 0, missing: {missing:?}")]
    SparseIds { missing: Vec<usize> },
    #[error("Expected one state tuple per curve ({expected}), found {found}")]
    StateCount { expected: usize, found: usize },
    #[error("Point {point} has a non-positive or non-finite error ({value})")]
    InvalidError { point: usize, value: f64 },
    #[error("Point {point} has a non-finite value in '{field}'")]
    NonFinite { point: usize, field: &'static str },
}

/// One observation: covariates, observed value, error, field strength and curve id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// Experiment specific covariates (offset/B1/Tex for CEST and R1rho, nu_cpmg for CPMG, delay for decays)
    pub x: Vec<f64>,
    /// Observed rate or intensity ratio
    pub y: f64,
    /// Measurement error estimate
    pub err: f64,
    /// Spectrometer field of the observed nucleus in MHz
    pub field: f64,
    /// Curve identifier
    pub id: usize,
}

/// Wire representation of a dataset: parallel arrays as supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub experiment: Experiment,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
    pub err: Vec<f64>,
    pub fields: Vec<f64>,
    pub ids: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<Vec<usize>>>,
}

/// Validated collection of curves for one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DatasetRecord", into = "DatasetRecord")]
pub struct Dataset {
    experiment: Experiment,
    points: Vec<SamplePoint>,
    states: Vec<Vec<usize>>,
    ranges: Vec<Range<usize>>,
}

impl Dataset {
    /// Builds a dataset from parallel per-point arrays.
    ///
    /// # Arguments
    /// * `experiment` - Experiment family the covariates belong to
    /// * `x` - Covariate vector per point
    /// * `y` - Observed values
    /// * `err` - Per-point errors, must be positive
    /// * `fields` - Per-point field strength in MHz
    /// * `ids` - Curve id per point, contiguous from 0
    /// * `states` - Optional state tuple per curve; defaults to `[id, 0, 0, 0]`
    ///
    /// # Returns
    /// * `Result<Dataset, DataError>` - The dataset or the first validation failure
    pub fn from_arrays(
        experiment: Experiment,
        x: Vec<Vec<f64>>,
        y: Vec<f64>,
        err: Vec<f64>,
        fields: Vec<f64>,
        ids: Vec<usize>,
        states: Option<Vec<Vec<usize>>>,
    ) -> Result<Self, DataError> {
        let n = y.len();
        if n == 0 {
            return Err(DataError::Empty);
        }
        for (field, found) in [
            ("x", x.len()),
            ("err", err.len()),
            ("fields", fields.len()),
            ("ids", ids.len()),
        ] {
            if found != n {
                return Err(DataError::LengthMismatch {
                    field,
                    expected: n,
                    found,
                });
            }
        }

        let points = x
            .into_iter()
            .zip(y)
            .zip(err)
            .zip(fields)
            .zip(ids)
            .map(|((((x, y), err), field), id)| SamplePoint {
                x,
                y,
                err,
                field,
                id,
            })
            .collect::<Vec<_>>();

        Self::from_points(experiment, points, states)
    }

    /// Builds a dataset from already assembled sample points.
    pub fn from_points(
        experiment: Experiment,
        mut points: Vec<SamplePoint>,
        states: Option<Vec<Vec<usize>>>,
    ) -> Result<Self, DataError> {
        if points.is_empty() {
            return Err(DataError::Empty);
        }
        validate_points(&points)?;

        let n_curves = points.iter().map(|p| p.id).max().map_or(0, |m| m + 1);
        let mut seen = vec![false; n_curves];
        points.iter().for_each(|p| seen[p.id] = true);
        let missing = seen
            .iter()
            .enumerate()
            .filter(|(_, s)| !**s)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(DataError::SparseIds { missing });
        }

        let states = match states {
            Some(states) if states.len() != n_curves => {
                return Err(DataError::StateCount {
                    expected: n_curves,
                    found: states.len(),
                })
            }
            Some(states) => states,
            None => (0..n_curves).map(|i| vec![i, 0, 0, 0]).collect(),
        };

        points.sort_by_key(|p| p.id);
        let ranges = curve_ranges(&points, n_curves);

        Ok(Self {
            experiment,
            points,
            states,
            ranges,
        })
    }

    pub fn experiment(&self) -> Experiment {
        self.experiment
    }

    pub fn points(&self) -> &[SamplePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn n_curves(&self) -> usize {
        self.ranges.len()
    }

    /// Number of covariates per point (the dataset is validated to be uniform).
    pub fn n_covariates(&self) -> usize {
        self.points.first().map_or(0, |p| p.x.len())
    }

    /// Index range of the curve `id` inside [`Dataset::points`].
    pub fn curve_range(&self, id: usize) -> Range<usize> {
        self.ranges.get(id).cloned().unwrap_or(0..0)
    }

    /// Sample points of curve `id`. Empty for an id without points.
    pub fn curve(&self, id: usize) -> &[SamplePoint] {
        &self.points[self.curve_range(id)]
    }

    pub fn states(&self) -> &[Vec<usize>] {
        &self.states
    }

    /// Number of distinct values per state column (max + 1).
    pub fn state_count(&self) -> Vec<usize> {
        let width = self.states.iter().map(|s| s.len()).max().unwrap_or(0);
        (0..width)
            .map(|j| {
                self.states
                    .iter()
                    .filter_map(|s| s.get(j))
                    .max()
                    .map_or(1, |m| m + 1)
            })
            .collect()
    }

    /// Observed values in arena order.
    pub fn y(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.y).collect()
    }

    /// Field strength of the first point of curve `id`.
    pub fn curve_field(&self, id: usize) -> f64 {
        self.curve(id).first().map_or(0.0, |p| p.field)
    }

    /// Builds a new dataset from the rows at `indices` (with repetition).
    ///
    /// The curve count and state tuples are preserved even when a curve receives
    /// no rows; such a curve simply has an empty range.
    pub fn resampled(&self, indices: &[usize]) -> Dataset {
        let mut points = indices
            .iter()
            .filter_map(|&i| self.points.get(i).cloned())
            .collect::<Vec<_>>();
        points.sort_by_key(|p| p.id);
        let ranges = curve_ranges(&points, self.n_curves());
        Dataset {
            experiment: self.experiment,
            points,
            states: self.states.clone(),
            ranges,
        }
    }

    /// Returns a copy with observed values replaced, in arena order.
    pub fn with_y(&self, y: &[f64]) -> Dataset {
        let mut data = self.clone();
        data.points
            .iter_mut()
            .zip(y.iter())
            .for_each(|(p, y)| p.y = *y);
        data
    }
}

fn validate_points(points: &[SamplePoint]) -> Result<(), DataError> {
    let n_cov = points[0].x.len();
    for (i, p) in points.iter().enumerate() {
        if p.x.len() != n_cov {
            return Err(DataError::CovariateCount {
                point: i,
                expected: n_cov,
                found: p.x.len(),
            });
        }
        if !(p.err.is_finite() && p.err > 0.0) {
            return Err(DataError::InvalidError {
                point: i,
                value: p.err,
            });
        }
        if !p.y.is_finite() {
            return Err(DataError::NonFinite { point: i, field: "y" });
        }
        if !p.field.is_finite() {
            return Err(DataError::NonFinite {
                point: i,
                field: "fields",
            });
        }
        if p.x.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFinite { point: i, field: "x" });
        }
    }
    Ok(())
}

fn curve_ranges(points: &[SamplePoint], n_curves: usize) -> Vec<Range<usize>> {
    (0..n_curves)
        .map(|id| {
            let start = points.partition_point(|p| p.id < id);
            let end = points.partition_point(|p| p.id <= id);
            start..end
        })
        .collect()
}

impl TryFrom<DatasetRecord> for Dataset {
    type Error = DataError;

    fn try_from(record: DatasetRecord) -> Result<Self, Self::Error> {
        Dataset::from_arrays(
            record.experiment,
            record.x,
            record.y,
            record.err,
            record.fields,
            record.ids,
            record.states,
        )
    }
}

impl From<Dataset> for DatasetRecord {
    fn from(data: Dataset) -> Self {
        let mut record = DatasetRecord {
            experiment: data.experiment,
            x: Vec::with_capacity(data.points.len()),
            y: Vec::with_capacity(data.points.len()),
            err: Vec::with_capacity(data.points.len()),
            fields: Vec::with_capacity(data.points.len()),
            ids: Vec::with_capacity(data.points.len()),
            states: Some(data.states),
        };
        for p in data.points {
            record.x.push(p.x);
            record.y.push(p.y);
            record.err.push(p.err);
            record.fields.push(p.field);
            record.ids.push(p.id);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn two_curves() -> Dataset {
        Dataset::from_arrays(
            Experiment::Cpmg,
            vec![vec![50.0], vec![100.0], vec![50.0], vec![100.0]],
            vec![12.0, 11.0, 14.0, 12.5],
            vec![0.2; 4],
            vec![60.8, 60.8, 81.1, 81.1],
            vec![1, 0, 0, 1],
            Some(vec![vec![0, 0, 0, 0], vec![0, 1, 0, 0]]),
        )
        .unwrap()
    }

    #[test]
    fn test_points_are_grouped_by_curve() {
        let data = two_curves();
        assert_eq!(data.n_curves(), 2);
        assert_eq!(data.curve_range(0), 0..2);
        assert_eq!(data.curve_range(1), 2..4);
        // order inside a curve is preserved
        assert_eq!(data.curve(0)[0].x, vec![100.0]);
        assert_eq!(data.curve(1)[0].x, vec![50.0]);
        assert_eq!(data.state_count(), vec![1, 2, 1, 1]);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let result = Dataset::from_arrays(
            Experiment::Cest,
            vec![vec![0.0, 10.0, 0.3]; 3],
            vec![1.0, 0.9, 0.8],
            vec![0.01; 2],
            vec![600.0; 3],
            vec![0; 3],
            None,
        );
        assert_eq!(
            result,
            Err(DataError::LengthMismatch {
                field: "err",
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn test_sparse_ids_are_rejected() {
        let result = Dataset::from_arrays(
            Experiment::Cpmg,
            vec![vec![50.0]; 2],
            vec![1.0, 1.0],
            vec![0.1; 2],
            vec![600.0; 2],
            vec![0, 2],
            None,
        );
        assert_eq!(result, Err(DataError::SparseIds { missing: vec![1] }));
    }

    #[test]
    fn test_resample_keeps_curve_count() {
        let data = two_curves();
        let resampled = data.resampled(&[0, 0, 1]);
        assert_eq!(resampled.n_curves(), 2);
        assert_eq!(resampled.len(), 3);
        assert!(resampled.curve(1).is_empty());
    }

    #[test]
    fn test_record_roundtrip_through_json() {
        let data = two_curves();
        let json = serde_json::to_string(&data).unwrap();
        let back: Dataset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }
}
