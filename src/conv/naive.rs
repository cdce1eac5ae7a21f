//! Unblocked reference convolutions.
//!
//! Plain nested loops over every output element, any format, group, padding and
//! dilation. Used to validate the blocked schedulers.
use super::{ConvShape, OutputFinisher};
use crate::activation::Activation;
use crate::error::{ConvError, Result};
use crate::quant::QuantizedWeightSet;
use crate::tensor::{Dst, TensorFormat};

/// Source offset of tap `(ky, kx)` for output `(dy, dx)`, or `None` when it reads padding.
#[inline]
fn source_pixel(shape: &ConvShape, dy: usize, dx: usize, ky: usize, kx: usize) -> Option<(usize, usize)> {
    let sy = (dy * shape.stride_y + ky * shape.dilation_y).checked_sub(shape.pad_y)?;
    let sx = (dx * shape.stride_x + kx * shape.dilation_x).checked_sub(shape.pad_x)?;
    (sy < shape.src_h && sx < shape.src_w).then_some((sy, sx))
}

/// Quantized convolution accumulated in 64 bits with exact products, finished through
/// `finisher`. Padding reads the source zero-point.
pub fn conv_reference_quantized(
    shape: &ConvShape,
    src: &[u8],
    weights: &QuantizedWeightSet,
    zero: &[u8],
    finisher: &OutputFinisher<'_>,
    mut dst: Dst<'_>,
) {
    let (cg, dg) = (shape.group_src_c(), shape.group_dst_c());
    let (src_size, dst_size) = (shape.src_size(), shape.dst_size());
    let format = shape.format;
    for b in 0..shape.batch {
        let image = &src[b * src_size..(b + 1) * src_size];
        for d in 0..shape.dst_c {
            let g = d / dg;
            for dy in 0..shape.dst_h {
                for dx in 0..shape.dst_w {
                    let mut sum = 0i64;
                    for ky in 0..shape.kernel_y {
                        for kx in 0..shape.kernel_x {
                            let tap = ky * shape.kernel_x + kx;
                            let pixel = source_pixel(shape, dy, dx, ky, kx);
                            for c in 0..cg {
                                let channel = g * cg + c;
                                let v = match pixel {
                                    Some((sy, sx)) => {
                                        image[format.offset(shape.src_c, shape.src_h, shape.src_w, channel, sy, sx)]
                                    }
                                    None => zero[channel],
                                };
                                sum += v as i64 * weights.weight(d, tap, c) as i64;
                            }
                        }
                    }
                    let acc = sum.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
                    let o = b * dst_size + format.offset(shape.dst_c, shape.dst_h, shape.dst_w, d, dy, dx);
                    match &mut dst {
                        Dst::U8(out) => finisher.finish_u8(&[acc], d, &mut out[o..o + 1]),
                        Dst::F32(out) => finisher.finish_f32(&[acc], d, &mut out[o..o + 1]),
                    }
                }
            }
        }
    }
}

/// Float convolution with bias and activation.
///
/// `weights` follow the layer layout: `[ky][kx][src_c / group][dst_c]` for NHWC,
/// `[dst_c][src_c / group][ky][kx]` for NCHW.
pub fn conv_reference_f32(
    shape: &ConvShape,
    src: &[f32],
    weights: &[f32],
    bias: Option<&[f32]>,
    activation: &Activation,
    dst: &mut [f32],
) -> Result<()> {
    let (cg, dg) = (shape.group_src_c(), shape.group_dst_c());
    let (src_size, dst_size) = (shape.src_size(), shape.dst_size());
    let kk = shape.kernel_area();
    if weights.len() != shape.weight_count() {
        return Err(ConvError::ParameterLength {
            what: "weights",
            expected: shape.weight_count(),
            actual: weights.len(),
        });
    }
    if src.len() < shape.batch * src_size || dst.len() < shape.batch * dst_size {
        return Err(ConvError::BufferMismatch(format!(
            "reference needs {} source and {} destination values, got {} and {}",
            shape.batch * src_size,
            shape.batch * dst_size,
            src.len(),
            dst.len()
        )));
    }
    let format = shape.format;
    for b in 0..shape.batch {
        let image = &src[b * src_size..(b + 1) * src_size];
        for d in 0..shape.dst_c {
            let g = d / dg;
            for dy in 0..shape.dst_h {
                for dx in 0..shape.dst_w {
                    let mut sum = 0.0f32;
                    for ky in 0..shape.kernel_y {
                        for kx in 0..shape.kernel_x {
                            let Some((sy, sx)) = source_pixel(shape, dy, dx, ky, kx) else {
                                continue;
                            };
                            let tap = ky * shape.kernel_x + kx;
                            for c in 0..cg {
                                let v = image[format.offset(shape.src_c, shape.src_h, shape.src_w, g * cg + c, sy, sx)];
                                let w = match format {
                                    TensorFormat::Nhwc => weights[(tap * cg + c) * shape.dst_c + d],
                                    TensorFormat::Nchw => weights[(d * cg + c) * kk + tap],
                                };
                                sum += v * w;
                            }
                        }
                    }
                    let o = b * dst_size + format.offset(shape.dst_c, shape.dst_h, shape.dst_w, d, dy, dx);
                    dst[o] = activation.apply(sum + bias.map_or(0.0, |bias| bias[d]), d);
                }
            }
        }
    }
    Ok(())
}
