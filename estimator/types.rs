use ndarray::{Array1, ArrayView1, s};
use std::ops::Deref;

/// The fitted `alpha_beta` vector: `alpha` at index 0 followed by one `D`-vector
/// `beta_a` per training point.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct Coefficients(Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.0[0]
    }

    /// Zero-copy view of `beta_a` for training point `index`.
    #[inline]
    pub fn beta(&self, index: usize, num_dimensions: usize) -> ArrayView1<'_, f64> {
        let start = 1 + index * num_dimensions;
        self.0.slice(s![start..start + num_dimensions])
    }

    pub fn non_finite_count(&self) -> usize {
        self.0.iter().filter(|v| !v.is_finite()).count()
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
