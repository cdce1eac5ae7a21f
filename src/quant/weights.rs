use crate::conv::ConvShape;
use crate::error::{ConvError, Result};
use crate::tensor::TensorFormat;

use super::QuantProfile;

/// Arrangement of the packed int8 weights, chosen by the convolution algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightLayout {
    /// Tile-major for the direct scheduler:
    /// `[output tile][kernel tap][input quad][width][4]`, zero padded.
    Direct { width: usize },
    /// `[kernel tap][channel]`.
    Depthwise,
    /// `[output channel][patch]`, grouped output channels contiguous. The patch order is
    /// `tap * group_src_c + c` for NHWC and `c * kernel_area + tap` for NCHW.
    Gemm,
}

/// Requantized weights with per-output-channel rescale (`norm`) and zero-point corrected bias.
///
/// Built once from float weights and the source activation profile; read-only afterwards.
#[derive(Debug, Clone)]
pub struct QuantizedWeightSet {
    pub layout: WeightLayout,
    pub data: Vec<i8>,
    pub norm: Vec<f32>,
    pub bias: Vec<f32>,
    /// `[dst_c][tap * group_src_c + c]`, the unpacked quantized weights.
    canonical: Vec<i8>,
    patch: usize,
    kernel_area: usize,
    overflow_16i: bool,
}

impl QuantizedWeightSet {
    /// Requantize float `weights` (layout follows `shape.format`, see `ConvShape::weight_count`)
    /// against the source profile and pack them for `layout`.
    pub fn build(
        shape: &ConvShape,
        weights: &[f32],
        bias: Option<&[f32]>,
        src: &QuantProfile,
        layout: WeightLayout,
    ) -> Result<Self> {
        if weights.len() != shape.weight_count() {
            return Err(ConvError::ParameterLength {
                what: "weights",
                expected: shape.weight_count(),
                actual: weights.len(),
            });
        }
        if let Some(b) = bias {
            if b.len() != shape.dst_c {
                return Err(ConvError::ParameterLength {
                    what: "bias",
                    expected: shape.dst_c,
                    actual: b.len(),
                });
            }
        }
        if src.channels() != shape.src_c {
            return Err(ConvError::ParameterLength {
                what: "source calibration",
                expected: shape.src_c,
                actual: src.channels(),
            });
        }

        let kk = shape.kernel_area();
        let cg = shape.group_src_c();
        let dg = shape.group_dst_c();
        let d_total = shape.dst_c;
        let patch = kk * cg;
        let overflow_16i = shape.compatibility.overflow_16i;
        let (i_min, i_max) = shape.compatibility.i8_range();

        let mut canonical = vec![0i8; d_total * patch];
        let mut norm = vec![0f32; d_total];
        let mut out_bias = vec![0f32; d_total];
        let mut norm_w = vec![0f32; patch];

        for d in 0..d_total {
            let src_base = (d / dg) * cg;
            let (mut min_w, mut max_w) = (f32::MAX, f32::MIN);
            for tap in 0..kk {
                for c in 0..cg {
                    let w = match shape.format {
                        TensorFormat::Nhwc => weights[(tap * cg + c) * d_total + d],
                        TensorFormat::Nchw => weights[(d * cg + c) * kk + tap],
                    };
                    let v = w / src.scale[src_base + c];
                    norm_w[tap * cg + c] = v;
                    min_w = min_w.min(v);
                    max_w = max_w.max(v);
                }
            }
            let extreme = min_w.abs().max(max_w.abs());
            let scale = if extreme > 0.0 { i_max as f32 / extreme } else { 1.0 };

            let row = &mut canonical[d * patch..(d + 1) * patch];
            let mut correction = 0i64;
            for k in 0..patch {
                let mut w = ((norm_w[k] * scale).round() as i32).clamp(i_min, i_max);
                if overflow_16i {
                    if w & 1 != 0 {
                        w = (w as f32 * 0.25).round() as i32 * 4;
                    }
                    w /= 2;
                }
                row[k] = w as i8;
                correction -= w as i64 * src.zero[src_base + k % cg] as i64;
            }
            norm[d] = if overflow_16i { 2.0 } else { 1.0 } / scale;
            out_bias[d] = bias.map_or(0.0, |b| b[d]) + correction as f32 * norm[d];
        }

        let data = pack(shape, &canonical, layout);
        Ok(QuantizedWeightSet {
            layout,
            data,
            norm,
            bias: out_bias,
            canonical,
            patch,
            kernel_area: kk,
            overflow_16i,
        })
    }

    /// Stored weight of output channel `d` at kernel tap `tap` and in-group input channel `c`.
    #[inline]
    pub fn weight(&self, d: usize, tap: usize, c: usize) -> i8 {
        let cg = self.patch / self.kernel_area;
        self.canonical[d * self.patch + tap * cg + c]
    }

    /// Weight on the pre-halving grid: twice the stored value under overflow avoidance.
    pub fn full_scale(&self, d: usize, tap: usize, c: usize) -> i32 {
        let w = self.weight(d, tap, c) as i32;
        if self.overflow_16i {
            w * 2
        } else {
            w
        }
    }

    /// Unpacked weights, `[dst_c][tap * group_src_c + c]`.
    pub fn canonical(&self) -> &[i8] {
        &self.canonical
    }

    pub fn patch_len(&self) -> usize {
        self.patch
    }

    pub fn overflow_16i(&self) -> bool {
        self.overflow_16i
    }

    pub fn memory_bytes(&self) -> usize {
        self.data.len() + self.canonical.len() + (self.norm.len() + self.bias.len()) * std::mem::size_of::<f32>()
    }
}

/// Offset of weight `(tile, tap, c, i)` in the direct layout, where `i` is the
/// output channel inside the tile.
#[inline]
pub fn direct_index(width: usize, kernel_area: usize, quads: usize, tile: usize, tap: usize, c: usize, i: usize) -> usize {
    (((tile * kernel_area + tap) * quads + c / 4) * width + i) * 4 + c % 4
}

fn pack(shape: &ConvShape, canonical: &[i8], layout: WeightLayout) -> Vec<i8> {
    let kk = shape.kernel_area();
    let cg = shape.group_src_c();
    let patch = kk * cg;
    let d_total = shape.dst_c;
    match layout {
        WeightLayout::Direct { width } => {
            let tiles = d_total.div_ceil(width);
            let quads = cg.div_ceil(4);
            let mut data = vec![0i8; tiles * kk * quads * width * 4];
            for d in 0..d_total {
                let (tile, i) = (d / width, d % width);
                for tap in 0..kk {
                    for c in 0..cg {
                        data[direct_index(width, kk, quads, tile, tap, c, i)] = canonical[d * patch + tap * cg + c];
                    }
                }
            }
            data
        }
        WeightLayout::Depthwise => {
            let mut data = vec![0i8; kk * d_total];
            for d in 0..d_total {
                for tap in 0..kk {
                    data[tap * d_total + d] = canonical[d * patch + tap];
                }
            }
            data
        }
        WeightLayout::Gemm => match shape.format {
            TensorFormat::Nhwc => canonical.to_vec(),
            TensorFormat::Nchw => {
                let mut data = vec![0i8; canonical.len()];
                for d in 0..d_total {
                    for tap in 0..kk {
                        for c in 0..cg {
                            data[d * patch + c * kk + tap] = canonical[d * patch + tap * cg + c];
                        }
                    }
                }
                data
            }
        },
    }
}
