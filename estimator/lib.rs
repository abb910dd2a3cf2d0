#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(unused_variables)]

pub mod construction;
pub mod estimate;
pub mod evaluate;
pub mod kernel;
pub mod model;
pub mod types;

pub use estimate::{EstimationError, FittedState};
pub use kernel::{GaussianKernel, KernelError};
pub use model::{EstimatorConfig, KernelExpFamily, ModelError};
pub use types::Coefficients;
