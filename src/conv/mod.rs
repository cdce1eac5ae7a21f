//! Quantized convolution algorithms.
//!
//! Three schedulers share one contract ([`Convolution8i`]): the blocked direct NHWC
//! path, the depthwise path and the im2col + GEMM fallback. An unblocked reference
//! lives in [`conv_reference_quantized`] / [`conv_reference_f32`].
mod depthwise;
mod direct;
mod finish;
mod gemm;
mod naive;
mod pad;
mod plan;
mod shape;

use std::fmt;
use std::sync::Arc;

pub use depthwise::DepthwiseConvolution;
pub use direct::DirectConvolution;
pub use finish::OutputFinisher;
pub use gemm::GemmConvolution;
pub use naive::{conv_reference_f32, conv_reference_quantized};
pub use pad::{pad_image, padded_size};
pub use plan::{interior, AlgorithmPlan, CacheSizes, PadPolicy, PlanOptions};
pub use shape::{ConvConfig, ConvShape};

pub use crate::error::Result;

use crate::kernel::Microkernel;
use crate::quant::{QuantizedWeightSet, WeightLayout};
use crate::tensor::{Dst, TensorFormat};

/// Selects which scheduler runs a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvAlgorithm {
    /// Blocked NHWC convolution with multi-pass accumulation. NHWC, one group.
    Direct,
    /// One filter per channel. NHWC, `group == src_c == dst_c`.
    Depthwise,
    /// Im2col + integer GEMM. Any shape.
    Gemm,
}

impl ConvAlgorithm {
    /// The preferred algorithm for `shape`.
    pub fn select(shape: &ConvShape) -> Self {
        match shape.format {
            TensorFormat::Nhwc if shape.group == 1 => ConvAlgorithm::Direct,
            TensorFormat::Nhwc if shape.is_depthwise() => ConvAlgorithm::Depthwise,
            _ => ConvAlgorithm::Gemm,
        }
    }

    /// Whether this algorithm can run `shape` at all.
    pub fn supports(self, shape: &ConvShape) -> bool {
        match self {
            ConvAlgorithm::Direct => shape.format == TensorFormat::Nhwc && shape.group == 1,
            ConvAlgorithm::Depthwise => shape.format == TensorFormat::Nhwc && shape.is_depthwise(),
            ConvAlgorithm::Gemm => true,
        }
    }

    /// Build the scheduler for `shape`. The caller checks [`ConvAlgorithm::supports`].
    pub fn build(self, shape: &ConvShape, options: &PlanOptions, kernel: Arc<dyn Microkernel>) -> Box<dyn Convolution8i> {
        match self {
            ConvAlgorithm::Direct => {
                let plan = AlgorithmPlan::new(shape, kernel.width(), kernel.max_span(), options);
                Box::new(DirectConvolution::new(shape, plan, kernel))
            }
            ConvAlgorithm::Depthwise => Box::new(DepthwiseConvolution::new(shape)),
            ConvAlgorithm::Gemm => Box::new(GemmConvolution::new(shape)),
        }
    }
}

impl fmt::Display for ConvAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Scratch a scheduler needs per forward call, in elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Workspace {
    /// 8-bit working buffer (padded source or unfolded patches).
    pub work: usize,
    /// 32-bit accumulators.
    pub acc: usize,
}

/// A scheduler for one layer shape: 8-bit source in, finished output out.
pub trait Convolution8i: Send + Sync {
    /// Short name, e.g. `"Ref::NhwcDirect"`.
    fn description(&self) -> String;

    /// Weight arrangement the scheduler reads.
    fn layout(&self) -> WeightLayout;

    fn workspace(&self) -> Workspace;

    /// Convolve the whole batch of 8-bit `src` (layer format) into `dst`.
    /// `work` and `acc` hold at least [`Convolution8i::workspace`] elements.
    #[allow(clippy::too_many_arguments)]
    fn forward(
        &self,
        src: &[u8],
        weights: &QuantizedWeightSet,
        zero: &[u8],
        finisher: &OutputFinisher<'_>,
        work: &mut [u8],
        acc: &mut [i32],
        dst: Dst<'_>,
    );
}
