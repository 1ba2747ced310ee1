use nalgebra::DMatrix;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::{
    CcsPredError,
    DataProcessingError,
    Result,
};
use crate::utils::streaming_calculators::RunningStatsCalculator;

// Rows per partial aggregate in `column_stats`.
const STATS_BLOCK_ROWS: usize = 4096;

/// Dense row-major matrix, one row per compound.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureMatrix {
    values: Vec<f64>,
    nrows: usize,
    ncols: usize,
}

impl FeatureMatrix {
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            values: vec![0.0; nrows * ncols],
            nrows,
            ncols,
        }
    }

    pub fn from_vec(values: Vec<f64>, nrows: usize, ncols: usize) -> Result<Self> {
        if values.len() != nrows * ncols {
            return Err(DataProcessingError::ExpectedSlicesSameLength {
                expected: nrows * ncols,
                other: values.len(),
                context: "FeatureMatrix::from_vec".to_string(),
            }
            .into());
        }
        Ok(Self {
            values,
            nrows,
            ncols,
        })
    }

    /// Builds a matrix from rows, all of which must have the same length.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self> {
        let ncols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut values = Vec::with_capacity(rows.len() * ncols);
        for row in rows {
            let row = row.as_ref();
            if row.len() != ncols {
                return Err(CcsPredError::dimension_mismatch(
                    ncols,
                    row.len(),
                    "FeatureMatrix::from_rows",
                ));
            }
            values.extend_from_slice(row);
        }
        Ok(Self {
            values,
            nrows: rows.len(),
            ncols,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn is_empty(&self) -> bool {
        self.nrows == 0
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.ncols..(i + 1) * self.ncols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.values[i * self.ncols..(i + 1) * self.ncols]
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[f64]> + '_ {
        // chunks_exact would yield nothing useful for zero-width matrices
        (0..self.nrows).map(move |i| self.row(i))
    }

    pub fn column(&self, j: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows().map(move |r| r[j])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// New matrix holding the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut values = Vec::with_capacity(indices.len() * self.ncols);
        for &i in indices {
            values.extend_from_slice(self.row(i));
        }
        Self {
            values,
            nrows: indices.len(),
            ncols: self.ncols,
        }
    }

    /// Mean and variance of every column.
    ///
    /// Blocks of rows are aggregated in parallel and merged in block order,
    /// so the result does not depend on thread scheduling.
    pub fn column_stats(&self) -> Vec<RunningStatsCalculator> {
        let ncols = self.ncols;
        if ncols == 0 {
            return Vec::new();
        }
        let partials: Vec<Vec<RunningStatsCalculator>> = self
            .values
            .par_chunks(STATS_BLOCK_ROWS * ncols)
            .map(|block| {
                let mut stats = vec![RunningStatsCalculator::default(); ncols];
                for row in block.chunks(ncols) {
                    stats.iter_mut().zip(row).for_each(|(s, v)| s.add(*v));
                }
                stats
            })
            .collect();

        let mut merged = vec![RunningStatsCalculator::default(); ncols];
        for block in partials {
            merged.iter_mut().zip(block).for_each(|(m, b)| *m += b);
        }
        merged
    }

    pub fn to_ndarray(&self) -> Result<Array2<f64>> {
        Array2::from_shape_vec((self.nrows, self.ncols), self.values.clone()).map_err(|_| {
            CcsPredError::dimension_mismatch(
                self.nrows * self.ncols,
                self.values.len(),
                "FeatureMatrix::to_ndarray",
            )
        })
    }

    pub fn to_dmatrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.nrows, self.ncols, &self.values)
    }

    pub fn check_ncols(&self, expected: usize, context: &str) -> Result<()> {
        if self.ncols != expected {
            return Err(CcsPredError::dimension_mismatch(
                expected, self.ncols, context,
            ));
        }
        Ok(())
    }
}

pub fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_and_select() {
        let m = FeatureMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 2);
        let sel = m.select_rows(&[2, 0]);
        assert_eq!(sel.row(0), &[5.0, 6.0]);
        assert_eq!(sel.row(1), &[1.0, 2.0]);
        assert_eq!(m.column(1).collect::<Vec<_>>(), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_ragged_rows_fail() {
        let res = FeatureMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]);
        assert!(matches!(
            res,
            Err(CcsPredError::DataProcessing(
                DataProcessingError::DimensionMismatch { .. }
            ))
        ));
    }

    #[test]
    fn test_column_stats_merge_blocks() {
        let rows: Vec<Vec<f64>> = (0..(STATS_BLOCK_ROWS * 2 + 17))
            .map(|i| vec![(i % 13) as f64, 5.0])
            .collect();
        let m = FeatureMatrix::from_rows(&rows).unwrap();
        let stats = m.column_stats();

        let mut single = RunningStatsCalculator::default();
        m.column(0).for_each(|v| single.add(v));
        assert_eq!(stats[0].count(), single.count());
        assert!((stats[0].mean().unwrap() - single.mean().unwrap()).abs() < 1e-9);
        assert!((stats[0].variance().unwrap() - single.variance().unwrap()).abs() < 1e-9);
        assert!(stats[1].is_constant());
    }

    #[test]
    fn test_conversions_keep_row_major_layout() {
        let m = FeatureMatrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        let a = m.to_ndarray().unwrap();
        assert_eq!(a.dim(), (2, 3));
        assert_eq!(a[[1, 0]], 4.0);
        let d = m.to_dmatrix();
        assert_eq!(d.nrows(), 2);
        assert_eq!(d[(0, 2)], 3.0);
    }
}
