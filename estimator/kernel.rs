// ========================================================================================
//
//                  The kernel: closed-form Gaussian kernel derivatives
//
// ========================================================================================
//
// Every function in this module is a pure function of two positions and the bandwidth.
// Nothing is cached and nothing aliases the inputs; each call returns freshly allocated
// storage. With `t = 2 / sigma`, `k = exp(-|x - y|^2 / sigma)` and `d = x - y`, the
// derivatives follow from repeated application of `dk/dx_i = -t d_i k` and
// `dk/dy_i = t d_i k`.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("Kernel bandwidth must be finite and strictly positive, but was {0}.")]
    InvalidBandwidth(f64),
}

/// The isotropic Gaussian kernel `k(x, y) = exp(-|x - y|^2 / sigma)`.
///
/// Note that `sigma` multiplies the squared distance directly; it is not squared and
/// there is no factor of two.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianKernel {
    sigma: f64,
}

impl GaussianKernel {
    pub fn new(sigma: f64) -> Result<Self, KernelError> {
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(KernelError::InvalidBandwidth(sigma));
        }
        Ok(Self { sigma })
    }

    #[inline]
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    #[inline]
    fn from_squared_distance(&self, squared_distance: f64) -> f64 {
        (-squared_distance / self.sigma).exp()
    }

    /// Kernel value `k(x, y)`.
    pub fn value(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        let diff = &x - &y;
        self.from_squared_distance(diff.dot(&diff))
    }

    /// Gradient with respect to the first argument: `2 k (y - x) / sigma`.
    pub fn dx(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array1<f64> {
        let diff = &y - &x;
        let k = self.from_squared_distance(diff.dot(&diff));
        diff * (2.0 * k / self.sigma)
    }

    /// Diagonal of the second derivative with respect to the first argument,
    /// `d^2 k / dx_i^2` for each `i`.
    pub fn dx_dx(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array1<f64> {
        let sq_diff = (&x - &y).mapv(|v| v * v);
        let k = self.from_squared_distance(sq_diff.sum());
        let t = 2.0 / self.sigma;
        sq_diff.mapv(|s| k * (s * t * t - t))
    }

    /// Mixed second derivative `d^2 k / dx_i dy_j`.
    ///
    /// Symmetric in `(i, j)` bit for bit: the outer product entry is formed before
    /// scaling so that `[i, j]` and `[j, i]` see the same rounding.
    pub fn dx_dy(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array2<f64> {
        let diff = &x - &y;
        let k = self.from_squared_distance(diff.dot(&diff));
        let t = 2.0 / self.sigma;
        let dim = diff.len();
        Array2::from_shape_fn((dim, dim), |(i, j)| {
            let identity = if i == j { 1.0 } else { 0.0 };
            k * (identity * t - t * t * (diff[i] * diff[j]))
        })
    }

    /// Third-order mixed derivative `d^3 k / dx_i^2 dy_j`. Not symmetric in general.
    pub fn dx_dx_dy(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array2<f64> {
        let diff = &x - &y;
        let k = self.from_squared_distance(diff.dot(&diff));
        let t = 2.0 / self.sigma;
        let (t2, t3) = (t * t, t * t * t);
        let dim = diff.len();
        Array2::from_shape_fn((dim, dim), |(i, j)| {
            let identity = if i == j { 1.0 } else { 0.0 };
            k * (t3 * diff[i] * diff[i] * diff[j] - t2 * diff[j] - 2.0 * identity * t2 * diff[i])
        })
    }

    /// Column sums of [`Self::dx_dx_dy`], `j -> sum_i d^3 k / dx_i^2 dy_j`, without
    /// materializing the matrix.
    pub fn dx_dx_dy_column_sums(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array1<f64> {
        let diff = &x - &y;
        let squared_distance = diff.dot(&diff);
        let k = self.from_squared_distance(squared_distance);
        let t = 2.0 / self.sigma;
        let dim = diff.len() as f64;
        let scale = k * (t * t * t * squared_distance - t * t * (dim + 2.0));
        diff * scale
    }

    /// Fourth-order mixed derivative `d^4 k / dx_i^2 dy_j^2`.
    pub fn dx_dx_dy_dy(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array2<f64> {
        let sq_diff = (&x - &y).mapv(|v| v * v);
        let k = self.from_squared_distance(sq_diff.sum());
        let t = 2.0 / self.sigma;
        let (t2, t3, t4) = (t * t, t * t * t, t * t * t * t);
        let dim = sq_diff.len();
        Array2::from_shape_fn((dim, dim), |(i, j)| {
            let identity = if i == j { 1.0 } else { 0.0 };
            k * (t4 * sq_diff[i] * sq_diff[j] - t3 * (sq_diff[i] + sq_diff[j])
                - 4.0 * identity * t3 * sq_diff[i]
                + t2 * (1.0 + 2.0 * identity))
        })
    }

    /// Sum of all entries of [`Self::dx_dx_dy_dy`].
    pub fn dx_dx_dy_dy_sum(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        let diff = &x - &y;
        let s = diff.dot(&diff);
        let k = self.from_squared_distance(s);
        let t = 2.0 / self.sigma;
        let dim = diff.len() as f64;
        k * (t.powi(4) * s * s - (2.0 * dim + 4.0) * t.powi(3) * s + t * t * (dim * dim + 2.0 * dim))
    }

    /// Third derivative with respect to the first argument only, `d^3 k / dx_i^2 dx_j`.
    /// Column sums give the gradient of `sum_i d^2 k / dx_i^2`.
    pub fn dx_i_dx_i_dx_j(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array2<f64> {
        let diff = &y - &x;
        let k = self.from_squared_distance(diff.dot(&diff));
        let t = 2.0 / self.sigma;
        let (t2, t3) = (t * t, t * t * t);
        let dim = diff.len();
        Array2::from_shape_fn((dim, dim), |(i, j)| {
            let identity = if i == j { 1.0 } else { 0.0 };
            k * (t3 * diff[i] * diff[i] * diff[j] - t2 * diff[j] - 2.0 * identity * t2 * diff[i])
        })
    }

    /// Hessian with respect to the first argument, `d^2 k / dx_i dx_j`.
    pub fn dx_i_dx_j(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array2<f64> {
        let diff = &y - &x;
        let k = self.from_squared_distance(diff.dot(&diff));
        let t = 2.0 / self.sigma;
        let dim = diff.len();
        Array2::from_shape_fn((dim, dim), |(i, j)| {
            let identity = if i == j { 1.0 } else { 0.0 };
            k * (t * t * (diff[i] * diff[j]) - identity * t)
        })
    }
}
