use crate::activation::{activate_slice, Activation};
use crate::quant::{QuantProfile, QuantizedWeightSet};
use crate::tensor::{Dst, TensorFormat};

/// Turns int32 accumulators into the layer output:
/// `f = acc * norm[d] + bias[d]`, activation, then requantization for 8-bit outputs.
#[derive(Debug, Clone, Copy)]
pub struct OutputFinisher<'a> {
    norm: &'a [f32],
    bias: &'a [f32],
    activation: &'a Activation,
    dst: &'a QuantProfile,
}

impl<'a> OutputFinisher<'a> {
    pub fn new(weights: &'a QuantizedWeightSet, activation: &'a Activation, dst: &'a QuantProfile) -> Self {
        OutputFinisher {
            norm: &weights.norm,
            bias: &weights.bias,
            activation,
            dst,
        }
    }

    /// Dequantized value before activation.
    #[inline]
    pub fn linear(&self, acc: i32, d: usize) -> f32 {
        acc as f32 * self.norm[d] + self.bias[d]
    }

    #[inline]
    pub fn value(&self, acc: i32, d: usize) -> f32 {
        self.activation.apply(self.linear(acc, d), d)
    }

    /// Finish consecutive channels `d0..d0 + acc.len()` of one pixel into floats.
    pub fn finish_f32(&self, acc: &[i32], d0: usize, out: &mut [f32]) {
        for (i, (&a, o)) in acc.iter().zip(out.iter_mut()).enumerate() {
            *o = self.value(a, d0 + i);
        }
    }

    /// Finish consecutive channels `d0..d0 + acc.len()` of one pixel into 8-bit codes.
    pub fn finish_u8(&self, acc: &[i32], d0: usize, out: &mut [u8]) {
        for (i, (&a, o)) in acc.iter().zip(out.iter_mut()).enumerate() {
            *o = self.dst.quantize(self.value(a, d0 + i), d0 + i);
        }
    }

    /// `finish_f32` for the identity activation.
    pub fn finish_f32_linear(&self, acc: &[i32], d0: usize, out: &mut [f32]) {
        for (i, (&a, o)) in acc.iter().zip(out.iter_mut()).enumerate() {
            *o = self.linear(a, d0 + i);
        }
    }

    /// `finish_u8` for the identity activation.
    pub fn finish_u8_linear(&self, acc: &[i32], d0: usize, out: &mut [u8]) {
        for (i, (&a, o)) in acc.iter().zip(out.iter_mut()).enumerate() {
            *o = self.dst.quantize(self.linear(a, d0 + i), d0 + i);
        }
    }

    /// Finish a whole image of `channels x plane` accumulators laid out in `format`.
    pub fn finish_image(&self, acc: &[i32], channels: usize, plane: usize, format: TensorFormat, dst: Dst<'_>) {
        match dst {
            Dst::F32(out) => {
                for (i, (&a, o)) in acc.iter().zip(out.iter_mut()).enumerate() {
                    *o = self.linear(a, format.channel_of(channels, plane, i));
                }
                activate_slice(self.activation, out, channels, plane, format);
            }
            Dst::U8(out) => {
                for (i, (&a, o)) in acc.iter().zip(out.iter_mut()).enumerate() {
                    let d = format.channel_of(channels, plane, i);
                    *o = self.dst.quantize(self.value(a, d), d);
                }
            }
        }
    }
}
