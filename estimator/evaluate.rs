// estimator/evaluate.rs

//! # Density Evaluation
//!
//! Evaluates the fitted unnormalized log-density and its gradient at query points.
//! With `x` a query and `x_a` the training points,
//!
//! - `log_pdf(x) = alpha * xi(x) + sum_a <dk(x, x_a)/dx, beta_a>`, where
//!   `xi(x) = (1/N) sum_a sum_i d^2 k(x, x_a) / dx_i^2`;
//! - `grad(x)` is its exact gradient, built from the third-order and second-order
//!   first-argument derivatives.
//!
//! Each query costs O(N D^2) and touches nothing but `&self`. Batch evaluation runs
//! queries in parallel.

use crate::model::{KernelExpFamily, ModelError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

impl KernelExpFamily {
    /// Unnormalized log-density at `x`. Fails if the model is unfitted or `x` has the
    /// wrong length.
    pub fn log_pdf(&self, x: ArrayView1<f64>) -> Result<f64, ModelError> {
        let coefficients = self.coefficients()?;
        self.check_query(x)?;

        let data = self.data();
        let kernel = self.kernel_function();
        let num_dimensions = self.get_num_dimensions();
        let num_data = self.get_num_data();

        let mut xi = 0.0;
        let mut beta_sum = 0.0;
        for (a, point) in data.axis_iter(Axis(1)).enumerate() {
            xi += kernel.dx_dx(x, point).sum();
            beta_sum += kernel.dx(x, point).dot(&coefficients.beta(a, num_dimensions));
        }
        xi /= num_data as f64;

        Ok(coefficients.alpha() * xi + beta_sum)
    }

    /// Gradient of [`log_pdf`](Self::log_pdf) with respect to the query.
    pub fn grad(&self, x: ArrayView1<f64>) -> Result<Array1<f64>, ModelError> {
        let coefficients = self.coefficients()?;
        self.check_query(x)?;

        let data = self.data();
        let kernel = self.kernel_function();
        let num_dimensions = self.get_num_dimensions();
        let num_data = self.get_num_data();

        let mut xi_grad = Array1::<f64>::zeros(num_dimensions);
        let mut beta_sum_grad = Array1::<f64>::zeros(num_dimensions);
        for (a, point) in data.axis_iter(Axis(1)).enumerate() {
            xi_grad += &kernel.dx_i_dx_i_dx_j(x, point).sum_axis(Axis(0));
            beta_sum_grad += &kernel
                .dx_i_dx_j(x, point)
                .dot(&coefficients.beta(a, num_dimensions));
        }
        xi_grad /= num_data as f64;

        Ok(xi_grad * coefficients.alpha() + beta_sum_grad)
    }

    /// `log_pdf` for every column of a `D x M` query matrix.
    pub fn log_pdf_many(&self, points: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        self.check_batch(points)?;
        let values = points
            .axis_iter(Axis(1))
            .into_par_iter()
            .map(|point| self.log_pdf(point))
            .collect::<Result<Vec<f64>, ModelError>>()?;
        Ok(Array1::from_vec(values))
    }

    /// `grad` for every column of a `D x M` query matrix; column `m` of the result is
    /// the gradient at query `m`.
    pub fn grad_many(&self, points: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        self.check_batch(points)?;
        let gradients = points
            .axis_iter(Axis(1))
            .into_par_iter()
            .map(|point| self.grad(point))
            .collect::<Result<Vec<Array1<f64>>, ModelError>>()?;

        let mut result = Array2::<f64>::zeros(points.raw_dim());
        for (mut column, gradient) in result.axis_iter_mut(Axis(1)).zip(gradients) {
            column.assign(&gradient);
        }
        Ok(result)
    }

    fn check_batch(&self, points: ArrayView2<f64>) -> Result<(), ModelError> {
        self.coefficients()?;
        let expected = self.get_num_dimensions();
        if points.nrows() != expected {
            return Err(ModelError::DimensionMismatch {
                expected,
                found: points.nrows(),
            });
        }
        Ok(())
    }
}
