//! Quantization: activation profiles from calibration statistics and weight requantization.

mod profile;
mod weights;

pub use profile::*;
pub use weights::{direct_index, QuantizedWeightSet, WeightLayout};
