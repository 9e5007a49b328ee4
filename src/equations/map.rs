//! Global parameter map.
//!
//! Every curve of a global fit owns one row of indices into a single shared
//! parameter vector. The first `n_group` columns are shared by all curves; the
//! remaining columns are either per curve or shared within a sub-group of curves
//! (for example all curves of one residue, or all curves at one field).

use serde::{Deserialize, Serialize};

use crate::optim::FitError;

/// State columns that distinguish transverse relaxation rates: residue, field, temperature index.
pub const R2_MASK: [usize; 3] = [0, 1, 3];

/// State columns that distinguish chemical shift differences: residue and temperature index.
pub const SHIFT_MASK: [usize; 2] = [0, 3];

/// Mixed radix index of `state` restricted to the columns in `mask`.
///
/// # Arguments
/// * `state` - State tuple of a curve; missing entries count as 0
/// * `state_count` - Number of distinct values per state column
/// * `mask` - Columns that participate in the index
pub fn map_index(state: &[usize], state_count: &[usize], mask: &[usize]) -> usize {
    let mut mult = 1;
    let mut index = 0;
    for &j in mask {
        index += state.get(j).copied().unwrap_or(0) * mult;
        mult *= state_count.get(j).copied().unwrap_or(1).max(1);
    }
    index
}

/// Curve to parameter index table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMap {
    rows: Vec<Vec<usize>>,
    n_group: usize,
}

impl ParameterMap {
    /// Builds a map from raw rows.
    ///
    /// Indices are compacted to a dense `0..n` range that keeps their relative
    /// order, so the shared vector never holds parameters no curve refers to.
    ///
    /// # Errors
    /// Returns [`FitError::InvalidMap`] when the table is empty, rows differ in
    /// length, or a group column is not identical across curves.
    pub fn new(rows: Vec<Vec<usize>>, n_group: usize) -> Result<Self, FitError> {
        let invalid = |message: String| Err(FitError::InvalidMap { message });
        let Some(width) = rows.first().map(|r| r.len()) else {
            return invalid("parameter map has no rows".to_string());
        };
        if width == 0 {
            return invalid("parameter map rows are empty".to_string());
        }
        if let Some(i) = rows.iter().position(|r| r.len() != width) {
            return invalid(format!(
                "row {} has {} entries, expected {}",
                i,
                rows[i].len(),
                width
            ));
        }
        if n_group > width {
            return invalid(format!(
                "{} group parameters exceed the row width {}",
                n_group, width
            ));
        }
        for j in 0..n_group {
            if rows.iter().any(|r| r[j] != rows[0][j]) {
                return invalid(format!("group column {} differs between curves", j));
            }
        }

        let mut used = rows.iter().flatten().copied().collect::<Vec<_>>();
        used.sort_unstable();
        used.dedup();
        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .filter_map(|v| used.binary_search(&v).ok())
                    .collect()
            })
            .collect();

        Ok(Self { rows, n_group })
    }

    /// Index row of curve `i`.
    pub fn row(&self, i: usize) -> Result<&[usize], FitError> {
        self.rows
            .get(i)
            .map(|r| r.as_slice())
            .ok_or_else(|| FitError::InvalidMap {
                message: format!("no map row for curve {}", i),
            })
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.rows
    }

    pub fn n_curves(&self) -> usize {
        self.rows.len()
    }

    pub fn n_group(&self) -> usize {
        self.n_group
    }

    /// Parameters per curve.
    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, |r| r.len())
    }

    /// Length of the shared parameter vector.
    pub fn n_params(&self) -> usize {
        self.rows
            .iter()
            .flatten()
            .max()
            .map_or(0, |m| m + 1)
    }

    /// Curves (with column) that read parameter `index`.
    pub fn usages(&self, index: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.rows.iter().enumerate().flat_map(move |(i, row)| {
            row.iter()
                .enumerate()
                .filter(move |(_, v)| **v == index)
                .map(move |(j, _)| (i, j))
        })
    }
}

/// Assembles map rows column by column.
///
/// Each local column draws its indices from a block that starts right after the
/// largest index handed out so far.
#[derive(Debug, Clone)]
pub(crate) struct MapBuilder {
    rows: Vec<Vec<usize>>,
    next: usize,
}

impl MapBuilder {
    pub(crate) fn new(n_curves: usize) -> Self {
        Self {
            rows: vec![Vec::new(); n_curves],
            next: 0,
        }
    }

    /// Appends a column shared by all curves.
    pub(crate) fn group(mut self) -> Self {
        let index = self.next;
        self.rows.iter_mut().for_each(|r| r.push(index));
        self.next += 1;
        self
    }

    /// Appends a column whose index is the mixed radix index of the masked state.
    pub(crate) fn masked(mut self, states: &[Vec<usize>], state_count: &[usize], mask: &[usize]) -> Self {
        let base = self.next;
        let mut top = base;
        for (row, state) in self.rows.iter_mut().zip(states) {
            let index = base + map_index(state, state_count, mask);
            top = top.max(index + 1);
            row.push(index);
        }
        self.next = top;
        self
    }

    pub(crate) fn build(self, n_group: usize) -> Result<ParameterMap, FitError> {
        ParameterMap::new(self.rows, n_group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_map_index_is_mixed_radix() {
        let count = [3, 2, 1, 4];
        assert_eq!(map_index(&[2, 1, 0, 3], &count, &R2_MASK), 2 + 3 + 18);
        assert_eq!(map_index(&[2, 1, 0, 3], &count, &SHIFT_MASK), 2 + 9);
        assert_eq!(map_index(&[1], &count, &R2_MASK), 1);
    }

    #[test]
    fn test_indices_are_compacted() {
        let map = ParameterMap::new(vec![vec![0, 4, 9], vec![0, 6, 9]], 1).unwrap();
        assert_eq!(map.rows(), &[vec![0, 1, 3], vec![0, 2, 3]]);
        assert_eq!(map.n_params(), 4);
    }

    #[test]
    fn test_group_columns_must_agree() {
        let result = ParameterMap::new(vec![vec![0, 1], vec![2, 3]], 1);
        assert!(matches!(result, Err(FitError::InvalidMap { .. })));
    }

    #[test]
    fn test_builder_layout_two_fields_one_residue() {
        // ARRANGE: one residue at two fields
        let states = vec![vec![0, 0, 0, 0], vec![0, 1, 0, 0]];
        let count = [1, 2, 1, 1];

        // ACT
        let map = MapBuilder::new(2)
            .group()
            .masked(&states, &count, &R2_MASK)
            .masked(&states, &count, &SHIFT_MASK)
            .build(1)
            .unwrap();

        // ASSERT: kex shared, R2 per field, shift per residue
        assert_eq!(map.rows(), &[vec![0, 1, 3], vec![0, 2, 3]]);
        assert_eq!(map.usages(3).count(), 2);
        assert!(map.row(2).is_err());
    }
}
