use std::sync::Arc;

use log::{debug, trace};

use crate::activation::Activation;
use crate::conv::{
    conv_reference_quantized, ConvAlgorithm, ConvConfig, ConvShape, Convolution8i, OutputFinisher, PlanOptions,
};
use crate::error::{ConvError, Result};
use crate::kernel::{Microkernel, ReferenceKernel};
use crate::quant::{convert_f32_to_u8, CalibrationStats, QuantProfile, QuantizedWeightSet};
use crate::tensor::{Dst, ElemKind, Src};

/// Per-call working memory of [`QuantizedConvolution::forward`].
///
/// Reusing one `Scratch` across calls avoids reallocation; buffers only grow.
#[derive(Debug, Clone, Default)]
pub struct Scratch {
    /// Float source converted to 8-bit codes.
    pub src: Vec<u8>,
    /// Padded source or unfolded patches.
    pub work: Vec<u8>,
    /// Partial sums across input-channel passes.
    pub acc: Vec<i32>,
}

impl Scratch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> usize {
        self.src.len() + self.work.len() + self.acc.len() * std::mem::size_of::<i32>()
    }

    fn reserve(&mut self, src: usize, work: usize, acc: usize) {
        if self.src.len() < src {
            self.src.resize(src, 0);
        }
        if self.work.len() < work {
            self.work.resize(work, 0);
        }
        if self.acc.len() < acc {
            self.acc.resize(acc, 0);
        }
    }
}

/// Everything `set_params` derives; read-only during inference.
#[derive(Debug, Clone)]
struct LayerParams {
    weights: QuantizedWeightSet,
    activation: Activation,
    src: QuantProfile,
    dst: QuantProfile,
}

/// An 8-bit convolution layer: fixed shape, one scheduler, requantized parameters.
pub struct QuantizedConvolution {
    shape: ConvShape,
    algorithm: ConvAlgorithm,
    conv: Box<dyn Convolution8i>,
    params: Option<LayerParams>,
}

impl QuantizedConvolution {
    /// Validate `config` and pick the scheduler with default plan options and the
    /// reference microkernel.
    pub fn new(config: &ConvConfig) -> Result<Self> {
        Self::with_options(config, &PlanOptions::default(), Arc::new(ReferenceKernel::default()))
    }

    pub fn with_options(config: &ConvConfig, options: &PlanOptions, kernel: Arc<dyn Microkernel>) -> Result<Self> {
        let shape = ConvShape::new(config)?;
        let algorithm = ConvAlgorithm::select(&shape);
        Self::build(shape, algorithm, options, kernel)
    }

    /// Force a specific scheduler, e.g. the GEMM fallback for a shape that would run direct.
    pub fn with_algorithm(
        config: &ConvConfig,
        algorithm: ConvAlgorithm,
        options: &PlanOptions,
        kernel: Arc<dyn Microkernel>,
    ) -> Result<Self> {
        let shape = ConvShape::new(config)?;
        if !algorithm.supports(&shape) {
            return Err(ConvError::InvalidShape(format!("{} cannot run {}", algorithm, shape)));
        }
        Self::build(shape, algorithm, options, kernel)
    }

    fn build(shape: ConvShape, algorithm: ConvAlgorithm, options: &PlanOptions, kernel: Arc<dyn Microkernel>) -> Result<Self> {
        let conv = algorithm.build(&shape, options, kernel);
        let ws = conv.workspace();
        debug!(
            "conv {} -> {} ({} / {}), workspace {} bytes + {} accumulators",
            shape,
            conv.description(),
            shape.src_kind,
            shape.dst_kind,
            ws.work,
            ws.acc
        );
        Ok(QuantizedConvolution {
            shape,
            algorithm,
            conv,
            params: None,
        })
    }

    pub fn shape(&self) -> &ConvShape {
        &self.shape
    }

    pub fn algorithm(&self) -> ConvAlgorithm {
        self.algorithm
    }

    pub fn description(&self) -> String {
        self.conv.description()
    }

    pub fn is_initialized(&self) -> bool {
        self.params.is_some()
    }

    /// Quantize profiles, requantize weights and bind the activation.
    ///
    /// `weights` follow the layer format (see [`ConvShape::weight_count`]); an empty
    /// `activation_params` selects the activation defaults.
    pub fn set_params(
        &mut self,
        weights: &[f32],
        bias: Option<&[f32]>,
        activation_params: &[f32],
        stats: &CalibrationStats,
    ) -> Result<()> {
        let shape = &self.shape;
        check_len("source calibration min", shape.src_c, stats.src_min.len())?;
        check_len("source calibration max", shape.src_c, stats.src_max.len())?;
        check_len("destination calibration min", shape.dst_c, stats.dst_min.len())?;
        check_len("destination calibration max", shape.dst_c, stats.dst_max.len())?;

        let src = QuantProfile::from_stats(&stats.src_min, &stats.src_max, shape.compatibility)?;
        let dst = QuantProfile::from_stats(&stats.dst_min, &stats.dst_max, shape.compatibility)?;
        let activation = Activation::new(shape.activation, activation_params, shape.dst_c)?;
        let weights = QuantizedWeightSet::build(shape, weights, bias, &src, self.conv.layout())?;
        debug!(
            "conv params: {} weights, src {} dst {}, overflow_16i {}",
            weights.data.len(),
            if src.signed { "signed" } else { "unsigned" },
            if dst.signed { "signed" } else { "unsigned" },
            weights.overflow_16i()
        );
        self.params = Some(LayerParams {
            weights,
            activation,
            src,
            dst,
        });
        Ok(())
    }

    pub fn weights(&self) -> Option<&QuantizedWeightSet> {
        self.params.as_ref().map(|p| &p.weights)
    }

    pub fn src_profile(&self) -> Option<&QuantProfile> {
        self.params.as_ref().map(|p| &p.src)
    }

    pub fn dst_profile(&self) -> Option<&QuantProfile> {
        self.params.as_ref().map(|p| &p.dst)
    }

    pub fn activation(&self) -> Option<&Activation> {
        self.params.as_ref().map(|p| &p.activation)
    }

    /// Bytes of caller-providable scratch one `forward` call needs.
    pub fn external_buffer_size(&self) -> usize {
        let ws = self.conv.workspace();
        self.converted_src_len() + ws.work + ws.acc * std::mem::size_of::<i32>()
    }

    /// Bytes held by the layer itself: packed weights, rescale, bias and profiles.
    pub fn internal_buffer_size(&self) -> usize {
        self.params.as_ref().map_or(0, |p| {
            let profile = |q: &QuantProfile| q.zero.len() + 4 * std::mem::size_of::<f32>() * q.scale.len();
            p.weights.memory_bytes() + profile(&p.src) + profile(&p.dst) + p.activation.params().len() * std::mem::size_of::<f32>()
        })
    }

    fn converted_src_len(&self) -> usize {
        match self.shape.src_kind {
            ElemKind::F32 => self.shape.batch * self.shape.src_size(),
            ElemKind::U8 => 0,
        }
    }

    fn check_call(&self, src: &Src<'_>, dst: &Dst<'_>) -> Result<&LayerParams> {
        let params = self.params.as_ref().ok_or(ConvError::NotInitialized)?;
        let shape = &self.shape;
        check_buffer("source", shape.src_kind, shape.batch * shape.src_size(), src.kind(), src.len())?;
        check_buffer("destination", shape.dst_kind, shape.batch * shape.dst_size(), dst.kind(), dst.len())?;
        Ok(params)
    }

    /// Same result as [`QuantizedConvolution::forward`] through the unblocked 64-bit
    /// reference instead of the selected scheduler.
    pub fn forward_reference(&self, src: Src<'_>, dst: Dst<'_>) -> Result<()> {
        let params = self.check_call(&src, &dst)?;
        let shape = &self.shape;
        let converted;
        let src_u8: &[u8] = match src {
            Src::U8(s) => s,
            Src::F32(s) => {
                let mut q = vec![0u8; s.len()];
                convert_f32_to_u8(s, shape.src_c, shape.src_h * shape.src_w, shape.format, &params.src, &mut q);
                converted = q;
                &converted
            }
        };
        let finisher = OutputFinisher::new(&params.weights, &params.activation, &params.dst);
        conv_reference_quantized(shape, src_u8, &params.weights, &params.src.zero, &finisher, dst);
        Ok(())
    }

    /// Convolve the whole batch. Allocates a private scratch when none is given.
    pub fn forward(&self, src: Src<'_>, scratch: Option<&mut Scratch>, dst: Dst<'_>) -> Result<()> {
        let params = self.check_call(&src, &dst)?;
        let shape = &self.shape;

        let mut own = Scratch::new();
        let scratch = scratch.unwrap_or(&mut own);
        let ws = self.conv.workspace();
        scratch.reserve(self.converted_src_len(), ws.work, ws.acc);
        trace!("forward {} batch {} via {}", shape, shape.batch, self.conv.description());

        let src_u8: &[u8] = match src {
            Src::U8(s) => s,
            Src::F32(s) => {
                let converted = &mut scratch.src[..s.len()];
                convert_f32_to_u8(s, shape.src_c, shape.src_h * shape.src_w, shape.format, &params.src, converted);
                converted
            }
        };
        let finisher = OutputFinisher::new(&params.weights, &params.activation, &params.dst);
        self.conv.forward(
            src_u8,
            &params.weights,
            &params.src.zero,
            &finisher,
            &mut scratch.work,
            &mut scratch.acc,
            dst,
        );
        Ok(())
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(ConvError::ParameterLength { what, expected, actual });
    }
    Ok(())
}

fn check_buffer(what: &str, kind: ElemKind, len: usize, actual_kind: ElemKind, actual_len: usize) -> Result<()> {
    if kind != actual_kind || len != actual_len {
        return Err(ConvError::BufferMismatch(format!(
            "{} expects {} x {}, got {} x {}",
            what, len, kind, actual_len, actual_kind
        )));
    }
    Ok(())
}
