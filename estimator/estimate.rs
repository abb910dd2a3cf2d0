// estimator/estimate.rs

//! # Score-Matching Fit
//!
//! Solves the augmented system produced by [`crate::construction`] for the coefficient
//! vector `alpha_beta`. The system matrix is symmetric but not necessarily positive
//! definite, so the solve goes through a Bunch-Kaufman `LDL^T` factorization rather
//! than Cholesky or a general LU.
//!
//! Two inputs make the system singular by construction and are rejected before any
//! assembly: `lambda = 0`, and training points that coincide up to rounding. Otherwise
//! only an outright solver failure or non-finite coefficients fail the fit.
//!
//! Gaussian-kernel systems are routinely ill-conditioned while still yielding a stable
//! density, so the condition number is estimated after the solve and only reported.

use crate::construction::{KernelStatistics, LinearSystem, build_system, find_duplicate_points};
use crate::kernel::GaussianKernel;
use crate::types::Coefficients;

use ndarray::{Array2, ArrayView2};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{FactorizeH, ReciprocalConditionNum, SolveH};
use thiserror::Error;

/// Above this estimated condition number a fit still succeeds, but a warning is logged.
const CONDITION_WARNING_THRESHOLD: f64 = 1e12;

/// A comprehensive error type for the fitting process.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error(
        "Regularization is zero. The unregularized score-matching system is always rank deficient; use lambda > 0."
    )]
    Unregularized,

    #[error(
        "Training points {first} and {second} coincide up to rounding, which makes the score-matching system singular."
    )]
    DuplicatePoints { first: usize, second: usize },

    #[error("The assembled score-matching system contains non-finite entries.")]
    NonFiniteSystem,

    #[error("The symmetric-indefinite solve failed. The system matrix may be singular. Error: {0}")]
    LinearSystemSolveFailed(LinalgError),

    #[error("The solve produced {count} non-finite coefficients.")]
    NonFiniteCoefficients { count: usize },
}

/// The result of a successful fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedState {
    pub coefficients: Coefficients,
    /// Estimated 1-norm condition number of the solved system. Infinite when the
    /// estimate itself could not be formed.
    pub condition_number: f64,
}

/// Runs the full pipeline: input checks, statistics, system assembly, and solve.
pub fn fit_coefficients(
    data: ArrayView2<f64>,
    kernel: &GaussianKernel,
    lambda: f64,
) -> Result<FittedState, EstimationError> {
    if lambda == 0.0 {
        log::warn!("Refusing to fit with lambda = 0; the system would be rank deficient.");
        return Err(EstimationError::Unregularized);
    }
    if let Some((first, second)) = find_duplicate_points(data, kernel) {
        log::warn!(
            "Training points {} and {} coincide up to rounding; refusing to fit.",
            first,
            second
        );
        return Err(EstimationError::DuplicatePoints { first, second });
    }

    let statistics = KernelStatistics::compute(data, kernel);
    let system = build_system(&statistics, lambda);
    drop(statistics);
    solve_system(&system)
}

/// Solves `system` with a Bunch-Kaufman factorization, then estimates its conditioning.
pub fn solve_system(system: &LinearSystem) -> Result<FittedState, EstimationError> {
    log::debug!("Solving score-matching system of size {}.", system.dim());

    if !system.is_finite() {
        log::warn!("Score-matching system contains NaN or infinite entries.");
        return Err(EstimationError::NonFiniteSystem);
    }

    let factorization = system.matrix.factorizeh().map_err(|e| {
        log::warn!("Bunch-Kaufman factorization failed: {}", e);
        EstimationError::LinearSystemSolveFailed(e)
    })?;
    let solution = factorization
        .solveh(&system.rhs)
        .map_err(EstimationError::LinearSystemSolveFailed)?;

    let coefficients = Coefficients::new(solution);
    let count = coefficients.non_finite_count();
    if count > 0 {
        log::warn!("Symmetric solve returned {} non-finite coefficients.", count);
        return Err(EstimationError::NonFiniteCoefficients { count });
    }

    let condition_number = condition_number(&system.matrix);
    log::debug!("Estimated system condition number: {:.3e}", condition_number);
    if condition_number > CONDITION_WARNING_THRESHOLD {
        log::warn!(
            "Score-matching system is poorly conditioned (estimated condition number {:.3e}); individual coefficients may be inaccurate.",
            condition_number
        );
    }

    Ok(FittedState {
        coefficients,
        condition_number,
    })
}

/// LAPACK estimate of the 1-norm condition number, `1 / rcond`. Returns infinity when
/// the matrix is numerically singular or the estimate fails.
pub fn condition_number(matrix: &Array2<f64>) -> f64 {
    match matrix.rcond() {
        Ok(rcond) if rcond > 0.0 => 1.0 / rcond,
        Ok(_) => f64::INFINITY,
        Err(e) => {
            log::debug!("Condition number estimate unavailable: {}", e);
            f64::INFINITY
        }
    }
}
