//! 8-bit quantized 2-D convolution for inference.
//!
//! Activations are `u8` with per-channel zero-points, weights are `i8`, products
//! accumulate in `i32`. Dequantization, bias, activation and optional requantization to
//! `u8` are fused into the output stage. A layer picks one of three schedulers:
//! the blocked direct NHWC path (multi-pass over input-channel tiles), a depthwise
//! path and an im2col + GEMM fallback.
//!
//! # Example
//!
//! ```
//! use qconv::{CalibrationStats, ConvConfig, Dst, QuantizedConvolution, Src};
//!
//! let config = ConvConfig::new(1, 1, 4, 4, 1, 3).pad(1);
//! let mut conv = QuantizedConvolution::new(&config).unwrap();
//! let mut weights = vec![0.0f32; 9];
//! weights[4] = 1.0;
//! conv.set_params(&weights, None, &[], &CalibrationStats::uniform(1, 1, -1.0, 1.0)).unwrap();
//!
//! let src = vec![128u8; 16];
//! let mut dst = vec![0u8; 16];
//! conv.forward(Src::U8(&src), None, Dst::U8(&mut dst)).unwrap();
//! assert_eq!(dst, src);
//! ```

/// Elementwise activation functions fused into the output stage.
pub mod activation;
/// Shapes, planning and the convolution schedulers.
pub mod conv;
/// Error type shared by the crate.
pub mod error;
/// Microkernel capability, pass-state protocol and 8-bit multiply-add primitives.
pub mod kernel;
/// The public layer handle.
pub mod layer;
/// Quantization profiles and weight requantization.
pub mod quant;
/// 8-bit tensors, layouts and forward-call views.
pub mod tensor;

pub use activation::{Activation, ActivationKind};
pub use conv::{
    AlgorithmPlan, CacheSizes, ConvAlgorithm, ConvConfig, ConvShape, PadPolicy, PlanOptions,
};
pub use error::{ConvError, Result};
pub use kernel::{Microkernel, PassState, ReferenceKernel};
pub use layer::{QuantizedConvolution, Scratch};
pub use quant::{CalibrationStats, ChannelCalibrator, Compatibility, QuantProfile, QuantizedWeightSet};
pub use tensor::{Dst, ElemKind, Src, TensorFormat, TensorU8};
