#![recursion_limit = "256"]

pub mod factory;

#[cfg(feature = "backend-wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

pub use factory::{InferenceError, InferenceFactory, InferenceThresholds, RetinaNetDetector};

pub mod prelude {
    pub use crate::factory::{InferenceFactory, InferenceThresholds, RetinaNetDetector};
    pub use crate::InferenceBackend;
}

