use crate::construction::{self, KernelStatistics, LinearSystem};
use crate::estimate::{self, EstimationError, FittedState};
use crate::kernel::{GaussianKernel, KernelError};
use crate::types::Coefficients;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---

/// Hyperparameters of one estimator instance. Serializable so it can be read from a
/// TOML file alongside whatever supplies the training data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Gaussian kernel bandwidth. Must be finite and positive.
    pub sigma: f64,
    /// Regularization strength. Must be finite and non-negative; `fit` additionally
    /// requires it to be nonzero.
    pub lambda: f64,
}

impl EstimatorConfig {
    pub fn new(sigma: f64, lambda: f64) -> Self {
        Self { sigma, lambda }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        GaussianKernel::new(self.sigma)?;
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(ModelError::InvalidRegularization(self.lambda));
        }
        Ok(())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ModelError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads an estimator configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }
}

/// Custom error type for model construction and evaluation.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("Regularization must be finite and non-negative, but was {0}.")]
    InvalidRegularization(f64),
    #[error(
        "Training data must contain at least one point of at least one dimension; got {num_dimensions} dimensions and {num_data} points."
    )]
    EmptyData {
        num_dimensions: usize,
        num_data: usize,
    },
    #[error("Training data contains a non-finite value in dimension {dimension} of point {index}.")]
    NonFiniteData { dimension: usize, index: usize },
    #[error("Query has {found} dimensions, but the model was trained on {expected}.")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Training index {index} is out of range for {num_data} training points.")]
    IndexOutOfRange { index: usize, num_data: usize },
    #[error("The model has not been fitted. Call `fit` before evaluating it.")]
    NotFitted,
    #[error("Fitting failed: {0}")]
    Estimation(#[from] EstimationError),
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// A Gaussian-kernel exponential family fit by score matching.
///
/// The training matrix and hyperparameters are fixed at construction. The fitted
/// coefficients live in a separate optional state that `fit` replaces wholesale;
/// every evaluation method takes `&self`, so a fitted model can be shared across
/// threads for read-only use.
#[derive(Debug, Clone)]
pub struct KernelExpFamily {
    /// Training points, one per column (`D x N`).
    data: Array2<f64>,
    kernel: GaussianKernel,
    config: EstimatorConfig,
    fitted: Option<FittedState>,
}

impl KernelExpFamily {
    /// Creates an unfitted estimator from a `D x N` data matrix.
    pub fn new(data: Array2<f64>, sigma: f64, lambda: f64) -> Result<Self, ModelError> {
        Self::with_config(data, EstimatorConfig::new(sigma, lambda))
    }

    pub fn with_config(data: Array2<f64>, config: EstimatorConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let kernel = GaussianKernel::new(config.sigma)?;

        let (num_dimensions, num_data) = data.dim();
        if num_dimensions == 0 || num_data == 0 {
            return Err(ModelError::EmptyData {
                num_dimensions,
                num_data,
            });
        }
        if let Some(((dimension, index), _)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ModelError::NonFiniteData { dimension, index });
        }

        Ok(Self {
            data,
            kernel,
            config,
            fitted: None,
        })
    }

    pub fn get_num_dimensions(&self) -> usize {
        self.data.nrows()
    }

    pub fn get_num_data(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn kernel_function(&self) -> &GaussianKernel {
        &self.kernel
    }

    // --- Fitting ---

    /// Computes the fitted state without touching `self`.
    pub fn estimate(&self) -> Result<FittedState, ModelError> {
        log::info!(
            "Fitting kernel exponential family: {} points, {} dimensions, sigma={}, lambda={}.",
            self.get_num_data(),
            self.get_num_dimensions(),
            self.config.sigma,
            self.config.lambda
        );
        let fitted =
            estimate::fit_coefficients(self.data.view(), &self.kernel, self.config.lambda)?;
        log::info!(
            "Fit complete (estimated condition number {:.3e}).",
            fitted.condition_number
        );
        Ok(fitted)
    }

    /// Fits the model and stores the coefficients, replacing any previous fit. On
    /// failure the model is left unfitted.
    pub fn fit(&mut self) -> Result<(), ModelError> {
        self.fitted = None;
        self.fitted = Some(self.estimate()?);
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn fitted(&self) -> Option<&FittedState> {
        self.fitted.as_ref()
    }

    pub(crate) fn coefficients(&self) -> Result<&Coefficients, ModelError> {
        self.fitted
            .as_ref()
            .map(|state| &state.coefficients)
            .ok_or(ModelError::NotFitted)
    }

    // --- Aggregate statistics and system ---

    pub fn compute_h(&self) -> Array1<f64> {
        construction::compute_h(self.data.view(), &self.kernel)
    }

    pub fn kernel_hessian_all(&self) -> Array2<f64> {
        construction::kernel_hessian_all(self.data.view(), &self.kernel)
    }

    pub fn compute_xi_norm_2(&self) -> f64 {
        construction::compute_xi_norm_2(self.data.view(), &self.kernel)
    }

    pub fn build_system(&self) -> LinearSystem {
        let statistics = KernelStatistics::compute(self.data.view(), &self.kernel);
        construction::build_system(&statistics, self.config.lambda)
    }

    // --- Kernel accessors by training index ---
    //
    // The pairwise accessors index straight into the training matrix and panic on an
    // out-of-range index, like slice indexing. The query accessors validate both the
    // query length and the index.

    pub fn kernel(&self, idx_a: usize, idx_b: usize) -> f64 {
        self.kernel
            .value(self.data.column(idx_a), self.data.column(idx_b))
    }

    pub fn kernel_hessian(&self, idx_a: usize, idx_b: usize) -> Array2<f64> {
        self.kernel
            .dx_dy(self.data.column(idx_a), self.data.column(idx_b))
    }

    pub fn kernel_dx_dx_dy(&self, idx_a: usize, idx_b: usize) -> Array2<f64> {
        self.kernel
            .dx_dx_dy(self.data.column(idx_a), self.data.column(idx_b))
    }

    pub fn kernel_dx_dx_dy_dy(&self, idx_a: usize, idx_b: usize) -> Array2<f64> {
        self.kernel
            .dx_dx_dy_dy(self.data.column(idx_a), self.data.column(idx_b))
    }

    pub fn kernel_dx(&self, x: ArrayView1<f64>, idx_b: usize) -> Result<Array1<f64>, ModelError> {
        let y = self.checked_pair(x, idx_b)?;
        Ok(self.kernel.dx(x, y))
    }

    pub fn kernel_dx_dx(&self, x: ArrayView1<f64>, idx_b: usize) -> Result<Array1<f64>, ModelError> {
        let y = self.checked_pair(x, idx_b)?;
        Ok(self.kernel.dx_dx(x, y))
    }

    pub fn kernel_dx_i_dx_i_dx_j(
        &self,
        x: ArrayView1<f64>,
        idx_b: usize,
    ) -> Result<Array2<f64>, ModelError> {
        let y = self.checked_pair(x, idx_b)?;
        Ok(self.kernel.dx_i_dx_i_dx_j(x, y))
    }

    pub fn kernel_dx_i_dx_j(
        &self,
        x: ArrayView1<f64>,
        idx_b: usize,
    ) -> Result<Array2<f64>, ModelError> {
        let y = self.checked_pair(x, idx_b)?;
        Ok(self.kernel.dx_i_dx_j(x, y))
    }

    pub(crate) fn check_query(&self, x: ArrayView1<f64>) -> Result<(), ModelError> {
        let expected = self.get_num_dimensions();
        if x.len() != expected {
            return Err(ModelError::DimensionMismatch {
                expected,
                found: x.len(),
            });
        }
        Ok(())
    }

    fn checked_pair(
        &self,
        x: ArrayView1<f64>,
        idx_b: usize,
    ) -> Result<ArrayView1<'_, f64>, ModelError> {
        self.check_query(x)?;
        let num_data = self.get_num_data();
        if idx_b >= num_data {
            return Err(ModelError::IndexOutOfRange {
                index: idx_b,
                num_data,
            });
        }
        Ok(self.data.column(idx_b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn two_points() -> Array2<f64> {
        array![[0.0, 1.0]]
    }

    #[test]
    fn test_construction_validates_hyperparameters() {
        assert!(matches!(
            KernelExpFamily::new(two_points(), 0.0, 0.1),
            Err(ModelError::Kernel(KernelError::InvalidBandwidth(_)))
        ));
        assert!(matches!(
            KernelExpFamily::new(two_points(), -2.0, 0.1),
            Err(ModelError::Kernel(_))
        ));
        assert!(matches!(
            KernelExpFamily::new(two_points(), 1.0, -0.1),
            Err(ModelError::InvalidRegularization(_))
        ));
        assert!(matches!(
            KernelExpFamily::new(two_points(), 1.0, f64::NAN),
            Err(ModelError::InvalidRegularization(_))
        ));
        assert!(KernelExpFamily::new(two_points(), 1.0, 0.0).is_ok());
    }

    #[test]
    fn test_construction_validates_data() {
        assert!(matches!(
            KernelExpFamily::new(Array2::zeros((0, 3)), 1.0, 0.1),
            Err(ModelError::EmptyData {
                num_dimensions: 0,
                num_data: 3
            })
        ));
        assert!(matches!(
            KernelExpFamily::new(Array2::zeros((2, 0)), 1.0, 0.1),
            Err(ModelError::EmptyData { .. })
        ));
        match KernelExpFamily::new(array![[0.0, 1.0], [2.0, f64::NAN]], 1.0, 0.1) {
            Err(ModelError::NonFiniteData { dimension, index }) => {
                assert_eq!((dimension, index), (1, 1));
            }
            other => panic!("Expected NonFiniteData, got {:?}", other),
        }
    }

    #[test]
    fn test_shape_accessors() {
        let model = KernelExpFamily::new(Array2::zeros((3, 5)), 1.0, 0.1).unwrap();
        assert_eq!(model.get_num_dimensions(), 3);
        assert_eq!(model.get_num_data(), 5);
        assert!(!model.is_fitted());
        assert!(model.fitted().is_none());
    }

    #[test]
    fn test_two_point_kernel_scenario() {
        let model = KernelExpFamily::new(two_points(), 2.0, 0.1).unwrap();
        assert_abs_diff_eq!(model.kernel(0, 1), (-0.5f64).exp(), epsilon = 1e-15);
        assert_eq!(model.kernel(0, 1), model.kernel(1, 0));
        assert_eq!(model.kernel(1, 1), 1.0);

        let query = array![0.5];
        let left = model.kernel_dx(query.view(), 0).unwrap();
        let right = model.kernel_dx(query.view(), 1).unwrap();
        assert!(left[0].is_finite() && right[0].is_finite());
        assert!(left[0] * right[0] < 0.0);
    }

    #[test]
    fn test_query_accessors_check_dimensions_and_index() {
        let model = KernelExpFamily::new(two_points(), 2.0, 0.1).unwrap();
        let wrong = array![0.5, 0.5];
        assert!(matches!(
            model.kernel_dx(wrong.view(), 0),
            Err(ModelError::DimensionMismatch {
                expected: 1,
                found: 2
            })
        ));
        assert!(matches!(
            model.kernel_dx_dx(wrong.view(), 0),
            Err(ModelError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            model.kernel_dx_i_dx_i_dx_j(wrong.view(), 1),
            Err(ModelError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            model.kernel_dx_i_dx_j(wrong.view(), 1),
            Err(ModelError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            model.kernel_dx(array![0.5].view(), 2),
            Err(ModelError::IndexOutOfRange {
                index: 2,
                num_data: 2
            })
        ));
    }

    #[test]
    fn test_failed_fit_leaves_model_unfitted() {
        let mut model = KernelExpFamily::new(two_points(), 2.0, 0.1).unwrap();
        model.fit().unwrap();
        assert!(model.is_fitted());

        // Same data without regularization is always rank deficient.
        let mut unregularized = KernelExpFamily::new(two_points(), 2.0, 0.0).unwrap();
        assert!(matches!(
            unregularized.fit(),
            Err(ModelError::Estimation(EstimationError::Unregularized))
        ));
        assert!(!unregularized.is_fitted());
    }

    #[test]
    fn test_config_from_toml() {
        let config = EstimatorConfig::from_toml_str("sigma = 2.0\nlambda = 0.1\n").unwrap();
        assert_eq!(config, EstimatorConfig::new(2.0, 0.1));

        // Zero regularization is a valid configuration; only fitting rejects it.
        let config = EstimatorConfig::from_toml_str("sigma = 1.5\nlambda = 0.0\n").unwrap();
        assert_eq!(config.lambda, 0.0);

        assert!(matches!(
            EstimatorConfig::from_toml_str("sigma = -1.0\nlambda = 0.1\n"),
            Err(ModelError::Kernel(_))
        ));
        assert!(matches!(
            EstimatorConfig::from_toml_str("sigma = 1.0\n"),
            Err(ModelError::TomlParse(_))
        ));
        assert!(matches!(
            EstimatorConfig::from_toml_str("sigma = 1.0\nlambda = -0.5\n"),
            Err(ModelError::InvalidRegularization(_))
        ));
    }

    #[test]
    fn test_config_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sigma = 0.5").unwrap();
        writeln!(file, "lambda = 0.01").unwrap();
        file.flush().unwrap();

        let config = EstimatorConfig::load(file.path()).unwrap();
        assert_eq!(config.sigma, 0.5);
        assert_eq!(config.lambda, 0.01);

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            EstimatorConfig::load(&missing),
            Err(ModelError::Io(_))
        ));
    }
}
