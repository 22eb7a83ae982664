//! Named feature matrices, imputation, and standardization.
//!
//! The scaler is fitted once on the training population and reused verbatim
//! for scoring. Reuse validates column names, so scoring data missing a
//! fitted feature fails with [`AnalysisError::MissingFeature`] instead of
//! silently substituting zeros.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};

const ZERO_VARIANCE_EPS: f64 = 1e-12;

/// Column-major numeric table with optional (missing) cells.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub columns: Vec<Vec<Option<f64>>>,
    n_rows: usize,
}

impl FeatureMatrix {
    pub fn new(n_rows: usize) -> Self {
        Self {
            names: Vec::new(),
            columns: Vec::new(),
            n_rows,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) {
        assert_eq!(values.len(), self.n_rows, "column length mismatch");
        self.names.push(name.into());
        self.columns.push(values);
    }

    pub fn push_dense_column(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.push_column(name, values.into_iter().map(Some).collect());
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Fraction of missing cells in a column.
    pub fn missing_fraction(&self, index: usize) -> f64 {
        if self.n_rows == 0 {
            return 0.0;
        }
        let missing = self.columns[index].iter().filter(|v| v.is_none()).count();
        missing as f64 / self.n_rows as f64
    }

    /// Population variance of a column with missing cells treated as zero.
    pub fn variance_zero_filled(&self, index: usize) -> f64 {
        let values: Vec<f64> = self.columns[index]
            .iter()
            .map(|v| v.unwrap_or(0.0))
            .collect();
        population_variance(&values)
    }

    /// Per-column means over present values. An all-missing column gets 0.0.
    pub fn column_means(&self) -> Vec<f64> {
        self.columns
            .iter()
            .map(|column| {
                let present: Vec<f64> = column.iter().filter_map(|v| *v).collect();
                if present.is_empty() {
                    0.0
                } else {
                    present.iter().sum::<f64>() / present.len() as f64
                }
            })
            .collect()
    }

    /// Materialize as a dense array, imputing missing cells with the
    /// per-column mean of present values.
    pub fn to_imputed_array(&self) -> Array2<f64> {
        let means = self.column_means();
        let mut data = Array2::zeros((self.n_rows, self.columns.len()));
        for (j, column) in self.columns.iter().enumerate() {
            for (i, value) in column.iter().enumerate() {
                data[[i, j]] = value.unwrap_or(means[j]);
            }
        }
        data
    }

    /// Keep only the columns marked `true`.
    pub fn select(&self, keep: &[bool]) -> FeatureMatrix {
        assert_eq!(keep.len(), self.columns.len());
        let mut selected = FeatureMatrix::new(self.n_rows);
        for (j, &kept) in keep.iter().enumerate() {
            if kept {
                selected.push_column(self.names[j].clone(), self.columns[j].clone());
            }
        }
        selected
    }
}

/// Zero-mean unit-variance scaler with named columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub feature_names: Vec<String>,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl StandardScaler {
    /// Fit on a dense matrix. Zero-variance columns keep a unit scale so
    /// they come out as exact zeros after centering.
    pub fn fit(feature_names: &[String], x: &Array2<f64>) -> Self {
        assert_eq!(feature_names.len(), x.ncols());
        let means = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let stds: Vec<f64> = (0..x.ncols())
            .map(|j| {
                let column = x.column(j);
                let mean = means[j];
                let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                    / column.len().max(1) as f64;
                let std = variance.sqrt();
                if std <= ZERO_VARIANCE_EPS {
                    1.0
                } else {
                    std
                }
            })
            .collect();
        Self {
            feature_names: feature_names.to_vec(),
            means: means.to_vec(),
            stds,
        }
    }

    /// Transform a dense matrix whose columns are already in fitted order.
    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut scaled = x.clone();
        for j in 0..scaled.ncols() {
            let mean = self.means[j];
            let std = self.stds[j];
            scaled.column_mut(j).mapv_inplace(|v| (v - mean) / std);
        }
        scaled
    }

    /// Reorder a named matrix into fitted column order, impute missing
    /// cells with the fitted means, and scale. Columns the scaler never saw
    /// are ignored; a fitted column absent from `matrix` is a
    /// [`AnalysisError::MissingFeature`].
    pub fn transform_named(&self, matrix: &FeatureMatrix) -> AnalysisResult<Array2<f64>> {
        let mut data = Array2::zeros((matrix.n_rows(), self.feature_names.len()));
        for (j, name) in self.feature_names.iter().enumerate() {
            let source = matrix
                .column_index(name)
                .ok_or_else(|| AnalysisError::MissingFeature(name.clone()))?;
            for (i, value) in matrix.columns[source].iter().enumerate() {
                let v = value.unwrap_or(self.means[j]);
                data[[i, j]] = (v - self.means[j]) / self.stds[j];
            }
        }
        Ok(data)
    }
}

/// Population variance (ddof 0).
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Linear-interpolation quantile over an ascending-sorted slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    assert!(!sorted.is_empty());
    let position = (sorted.len() - 1) as f64 * q;
    let low = position.floor() as usize;
    let high = position.ceil() as usize;
    if low == high {
        return sorted[low];
    }
    let fraction = position - low as f64;
    sorted[low] + fraction * (sorted[high] - sorted[low])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn scaler_centers_and_scales() {
        let names = vec!["a".to_string(), "b".to_string()];
        let x = array![[1.0, 10.0], [3.0, 30.0], [5.0, 50.0]];
        let scaler = StandardScaler::fit(&names, &x);
        let scaled = scaler.transform(&x);
        for j in 0..2 {
            let column = scaled.column(j);
            let mean: f64 = column.iter().sum::<f64>() / 3.0;
            assert!(mean.abs() < 1e-9);
        }
        assert!(scaled[[0, 0]] < 0.0 && scaled[[2, 0]] > 0.0);
    }

    #[test]
    fn zero_variance_column_stays_zero() {
        let names = vec!["constant".to_string()];
        let x = array![[7.0], [7.0], [7.0]];
        let scaler = StandardScaler::fit(&names, &x);
        let scaled = scaler.transform(&x);
        assert!(scaled.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn missing_fitted_feature_is_an_error() {
        let names = vec!["a".to_string(), "b".to_string()];
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let scaler = StandardScaler::fit(&names, &x);

        let mut matrix = FeatureMatrix::new(2);
        matrix.push_dense_column("a", vec![1.0, 3.0]);
        let err = scaler.transform_named(&matrix).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingFeature(name) if name == "b"));
    }

    #[test]
    fn transform_named_reorders_and_imputes() {
        let names = vec!["a".to_string(), "b".to_string()];
        let x = array![[1.0, 10.0], [3.0, 20.0]];
        let scaler = StandardScaler::fit(&names, &x);

        let mut matrix = FeatureMatrix::new(2);
        matrix.push_column("b", vec![Some(10.0), None]);
        matrix.push_dense_column("a", vec![1.0, 3.0]);
        let scaled = scaler.transform_named(&matrix).unwrap();
        // The missing cell imputes to the fitted mean, scaling to zero.
        assert!(scaled[[1, 1]].abs() < 1e-9);
        assert!(scaled[[0, 0]] < 0.0);
    }

    #[test]
    fn quantile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile_sorted(&sorted, 0.0), 1.0);
        assert_eq!(quantile_sorted(&sorted, 1.0), 5.0);
        assert!((quantile_sorted(&sorted, 0.5) - 3.0).abs() < 1e-9);
        assert!((quantile_sorted(&sorted, 0.25) - 2.0).abs() < 1e-9);
    }
}
