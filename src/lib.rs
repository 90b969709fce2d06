//! LeNet-5 style handwritten digit classifier built on burn.
//!
//! The crate reads the MNIST IDX files, pads every 28x28 image to 32x32 and
//! trains a small convolutional network with plain gradient descent. Tensor
//! execution, automatic differentiation and parameter persistence are provided
//! by the burn [backend](burn::tensor::backend::Backend) chosen by the caller.

pub mod cli;
pub mod data;
pub mod error;
pub mod estimator;
pub mod idx;
pub mod mode;
pub mod model;
pub mod training;

pub use error::{Error, Result};
pub use estimator::Estimator;
pub use mode::Mode;
pub use model::{Lenet, LenetConfig};
pub use training::TrainingConfig;

/// Backend for test cases
#[cfg(test)]
pub type TestBackend = burn::backend::NdArray<f32>;

/// Backend for autodiff test cases
#[cfg(test)]
pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
