//! # Score-Matching System Construction
//!
//! Reduces pairwise kernel derivatives over the training set into the statistics the
//! score-matching objective needs, and assembles them into the augmented symmetric
//! linear system `A theta = b`.
//!
//! The training matrix is `D x N` with one point per column. All reductions are
//! O(N^2) in kernel evaluations and run in parallel over the outer index:
//!
//! - `compute_h` and `compute_xi_norm_2` partition the work by outer index, accumulate
//!   locally, and combine the partial results in index order, so the result does not
//!   depend on thread scheduling.
//! - `kernel_hessian_all` writes disjoint block rows directly.
//!
//! The `ND x ND` block matrix and the `(ND+1) x (ND+1)` system are fully materialized,
//! which makes memory O(N^2 D^2). That is the scaling limit of the estimator.

use crate::kernel::GaussianKernel;
use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use rayon::prelude::*;

/// The reductions computed once per fit and consumed by [`build_system`].
#[derive(Debug, Clone)]
pub struct KernelStatistics {
    /// Averaged third-order mixed derivatives, length `N * D`.
    pub h: Array1<f64>,
    /// All pairwise `d^2 k / dx dy` blocks, `ND x ND`, exactly symmetric.
    pub hessians: Array2<f64>,
    /// Averaged sum of fourth-order mixed derivatives.
    pub xi_norm_2: f64,
    /// Number of training points `N`, the divisor of the averaged terms.
    pub num_data: usize,
}

impl KernelStatistics {
    pub fn compute(data: ArrayView2<f64>, kernel: &GaussianKernel) -> Self {
        let (num_dimensions, num_data) = data.dim();
        let nd = num_dimensions * num_data;
        log::debug!(
            "Computing kernel statistics for {} points in {} dimensions ({:.1} MiB block matrix).",
            num_data,
            num_dimensions,
            (nd * nd * std::mem::size_of::<f64>()) as f64 / (1024.0 * 1024.0)
        );

        let h = compute_h(data, kernel);
        let hessians = kernel_hessian_all(data, kernel);
        let xi_norm_2 = compute_xi_norm_2(data, kernel);

        Self {
            h,
            hessians,
            xi_norm_2,
            num_data,
        }
    }
}

/// The augmented system `matrix * alpha_beta = rhs`.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    pub matrix: Array2<f64>,
    pub rhs: Array1<f64>,
}

impl LinearSystem {
    pub fn dim(&self) -> usize {
        self.rhs.len()
    }

    pub fn is_finite(&self) -> bool {
        self.matrix.iter().chain(self.rhs.iter()).all(|v| v.is_finite())
    }
}

/// For every ordered pair `(a, b)`, adds the column sums of `d^3 k(x_a, x_b) / dx_i^2 dy_j`
/// into segment `b`, then divides by `N`.
pub fn compute_h(data: ArrayView2<f64>, kernel: &GaussianKernel) -> Array1<f64> {
    let (num_dimensions, num_data) = data.dim();

    let segments: Vec<Array1<f64>> = (0..num_data)
        .into_par_iter()
        .map(|b| {
            let x_b = data.column(b);
            let mut segment = Array1::<f64>::zeros(num_dimensions);
            for x_a in data.axis_iter(Axis(1)) {
                segment += &kernel.dx_dx_dy_column_sums(x_a, x_b);
            }
            segment
        })
        .collect();

    let mut h = Array1::<f64>::zeros(num_dimensions * num_data);
    for (b, segment) in segments.iter().enumerate() {
        h.slice_mut(s![b * num_dimensions..(b + 1) * num_dimensions])
            .assign(segment);
    }
    h /= num_data as f64;
    h
}

/// Builds the `ND x ND` matrix whose `(a, b)` block is `d^2 k(x_a, x_b) / dx dy`.
///
/// Each unordered pair is evaluated once. Block rows are filled in parallel for
/// `b >= a`, then every `(b, a)` block below the diagonal is copied from its mirror.
pub fn kernel_hessian_all(data: ArrayView2<f64>, kernel: &GaussianKernel) -> Array2<f64> {
    let (num_dimensions, num_data) = data.dim();
    let nd = num_dimensions * num_data;
    let mut result = Array2::<f64>::zeros((nd, nd));

    result
        .axis_chunks_iter_mut(Axis(0), num_dimensions)
        .into_par_iter()
        .enumerate()
        .for_each(|(a, mut block_row)| {
            let x_a = data.column(a);
            for b in a..num_data {
                let block = kernel.dx_dy(x_a, data.column(b));
                block_row
                    .slice_mut(s![.., b * num_dimensions..(b + 1) * num_dimensions])
                    .assign(&block);
            }
        });

    for a in 0..num_data {
        let rows_a = a * num_dimensions..(a + 1) * num_dimensions;
        for b in (a + 1)..num_data {
            let rows_b = b * num_dimensions..(b + 1) * num_dimensions;
            let (mut lower, upper) = result.multi_slice_mut((
                s![rows_b.clone(), rows_a.clone()],
                s![rows_a.clone(), rows_b],
            ));
            // The (a, b) block is itself symmetric, so the mirror is a plain copy.
            lower.assign(&upper);
        }
    }

    result
}

/// Sum of all entries of `d^4 k(x_a, x_b) / dx_i^2 dy_j^2` over ordered pairs, divided
/// by `N^2`.
pub fn compute_xi_norm_2(data: ArrayView2<f64>, kernel: &GaussianKernel) -> f64 {
    let num_data = data.ncols();

    let row_sums: Vec<f64> = (0..num_data)
        .into_par_iter()
        .map(|a| {
            let x_a = data.column(a);
            data.axis_iter(Axis(1))
                .map(|x_b| kernel.dx_dx_dy_dy_sum(x_a, x_b))
                .sum::<f64>()
        })
        .collect();

    row_sums.iter().sum::<f64>() / (num_data * num_data) as f64
}

/// Squared distances at or below this multiple of `sigma` count as coincident points.
const DUPLICATE_TOLERANCE: f64 = f64::EPSILON;

/// Finds the first pair `(a, b)`, `a < b`, of training points that coincide up to
/// rounding on the kernel's length scale. Two such points give identical block rows
/// in every term of the system.
pub fn find_duplicate_points(
    data: ArrayView2<f64>,
    kernel: &GaussianKernel,
) -> Option<(usize, usize)> {
    let num_data = data.ncols();
    let threshold = DUPLICATE_TOLERANCE * kernel.sigma();

    (0..num_data).into_par_iter().find_map_first(|a| {
        let x_a = data.column(a);
        ((a + 1)..num_data)
            .find(|&b| {
                let squared_distance: f64 = x_a
                    .iter()
                    .zip(data.column(b).iter())
                    .map(|(p, q)| (p - q) * (p - q))
                    .sum();
                squared_distance <= threshold
            })
            .map(|b| (a, b))
    })
}

/// Assembles the augmented `(ND+1) x (ND+1)` system from the kernel statistics.
///
/// ```text
/// A[0, 0]   = |h|^2 / N + lambda * xi_norm_2
/// A[1:, 1:] = H H / N + lambda * H
/// A[0, 1:]  = A[1:, 0] = H h / N + lambda * h
/// b         = -[xi_norm_2, h]
/// ```
///
/// `A` is symmetric bit for bit: the `H H` product is mirrored from its lower triangle
/// and both off-diagonal borders are written from the same vector.
pub fn build_system(statistics: &KernelStatistics, lambda: f64) -> LinearSystem {
    let h = &statistics.h;
    let hessians = &statistics.hessians;
    let nd = h.len();
    let n = statistics.num_data as f64;

    let mut gram = hessians.dot(hessians);
    gram /= n;
    gram.scaled_add(lambda, hessians);
    mirror_lower_triangle(&mut gram);

    let mut border = hessians.dot(h);
    border /= n;
    border.scaled_add(lambda, h);

    let mut matrix = Array2::<f64>::zeros((nd + 1, nd + 1));
    matrix[[0, 0]] = h.dot(h) / n + lambda * statistics.xi_norm_2;
    matrix.slice_mut(s![1.., 1..]).assign(&gram);
    matrix.slice_mut(s![0, 1..]).assign(&border);
    matrix.slice_mut(s![1.., 0]).assign(&border);

    let mut rhs = Array1::<f64>::zeros(nd + 1);
    rhs[0] = -statistics.xi_norm_2;
    rhs.slice_mut(s![1..]).assign(&h.mapv(|v| -v));

    LinearSystem { matrix, rhs }
}

fn mirror_lower_triangle(matrix: &mut Array2<f64>) {
    let n = matrix.nrows();
    for i in 0..n {
        for j in 0..i {
            matrix[[j, i]] = matrix[[i, j]];
        }
    }
}
