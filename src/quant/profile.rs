use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{ConvError, Result};
use crate::tensor::TensorFormat;

pub const U8_PRECISE_MIN: i32 = 0;
pub const U8_PRECISE_MAX: i32 = 255;
pub const U8_NARROWED_MIN: i32 = 0;
pub const U8_NARROWED_MAX: i32 = 180;
pub const I8_PRECISE_MIN: i32 = -128;
pub const I8_PRECISE_MAX: i32 = 127;
pub const I8_NARROWED_MIN: i32 = -90;
pub const I8_NARROWED_MAX: i32 = 90;

const MIN_RANGE: f32 = 1e-7;

/// Numeric compatibility switches shared by quantization and the compute kernels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Compatibility {
    /// Use the narrowed 8-bit ranges (u8 0..180, i8 -90..90) instead of the full ones.
    #[serde(default)]
    pub narrowed: bool,
    /// Halve quantized weights so pairwise u8*i8 sums never saturate 16 bits.
    #[serde(default)]
    pub overflow_16i: bool,
}

impl Compatibility {
    pub fn precise() -> Self {
        Compatibility::default()
    }

    pub fn narrowed() -> Self {
        Compatibility {
            narrowed: true,
            overflow_16i: false,
        }
    }

    pub fn with_overflow_16i(mut self, on: bool) -> Self {
        self.overflow_16i = on;
        self
    }

    /// Whether 16-bit pairwise saturating multiply-add is exact for this mode.
    pub fn saturating_madd_safe(&self) -> bool {
        self.narrowed || self.overflow_16i
    }

    pub fn u8_range(&self) -> (i32, i32) {
        if self.narrowed {
            (U8_NARROWED_MIN, U8_NARROWED_MAX)
        } else {
            (U8_PRECISE_MIN, U8_PRECISE_MAX)
        }
    }

    pub fn i8_range(&self) -> (i32, i32) {
        if self.narrowed {
            (I8_NARROWED_MIN, I8_NARROWED_MAX)
        } else {
            (I8_PRECISE_MIN, I8_PRECISE_MAX)
        }
    }
}

/// Per-channel affine quantization of an activation tensor:
/// `q = clamp(round(x * scale + shift), u_min, u_max)` and `x = q * inv_scale + inv_shift`.
///
/// A profile is signed when any calibration minimum is negative; signed profiles keep
/// the unsigned storage range but place the zero-point at `-i_min`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantProfile {
    pub zero: Vec<u8>,
    pub scale: Vec<f32>,
    pub shift: Vec<f32>,
    pub inv_scale: Vec<f32>,
    pub inv_shift: Vec<f32>,
    pub signed: bool,
    pub u_min: i32,
    pub u_max: i32,
    pub i_min: i32,
    pub i_max: i32,
}

impl QuantProfile {
    /// Derive a profile from per-channel calibration statistics.
    pub fn from_stats(min: &[f32], max: &[f32], compatibility: Compatibility) -> Result<Self> {
        if min.len() != max.len() {
            return Err(ConvError::ParameterLength {
                what: "calibration max",
                expected: min.len(),
                actual: max.len(),
            });
        }
        for (channel, (&lo, &hi)) in min.iter().zip(max).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(ConvError::InvalidCalibration { channel, min: lo, max: hi });
            }
        }
        let signed = min.iter().any(|&v| v < 0.0);
        let (u_min, u_max) = compatibility.u8_range();
        let (i_min, i_max) = compatibility.i8_range();
        let (zero_point, range) = if signed { (-i_min, i_max) } else { (u_min, u_max) };

        let size = min.len();
        let mut profile = QuantProfile {
            zero: vec![zero_point as u8; size],
            scale: Vec::with_capacity(size),
            shift: vec![zero_point as f32; size],
            inv_scale: Vec::with_capacity(size),
            inv_shift: Vec::with_capacity(size),
            signed,
            u_min,
            u_max,
            i_min,
            i_max,
        };
        for c in 0..size {
            let abs = min[c].abs().max(max[c].abs());
            let inv = if abs < MIN_RANGE {
                warn!("channel {} has near-zero dynamic range {}, using scale 1", c, abs);
                1.0
            } else {
                abs / range as f32
            };
            profile.scale.push(1.0 / inv);
            profile.inv_scale.push(inv);
            profile.inv_shift.push(-(zero_point as f32) * inv);
        }
        Ok(profile)
    }

    pub fn channels(&self) -> usize {
        self.zero.len()
    }

    #[inline]
    pub fn quantize(&self, value: f32, c: usize) -> u8 {
        quantize_u8(value, self.scale[c], self.shift[c], self.u_min, self.u_max)
    }

    #[inline]
    pub fn dequantize(&self, value: u8, c: usize) -> f32 {
        value as f32 * self.inv_scale[c] + self.inv_shift[c]
    }

    /// The 8-bit code of real zero, used to fill padding.
    #[inline]
    pub fn zero_point(&self, c: usize) -> u8 {
        self.zero[c]
    }
}

#[inline]
pub fn quantize_u8(value: f32, scale: f32, shift: f32, lo: i32, hi: i32) -> u8 {
    ((value * scale + shift).round() as i32).clamp(lo, hi) as u8
}

/// Quantize `batch` float images of `channels x plane` elements into 8-bit codes.
pub fn convert_f32_to_u8(src: &[f32], channels: usize, plane: usize, format: TensorFormat, profile: &QuantProfile, dst: &mut [u8]) {
    let image = channels * plane;
    for (s, d) in src.chunks(image).zip(dst.chunks_mut(image)) {
        match format {
            TensorFormat::Nhwc => {
                for (sp, dp) in s.chunks(channels).zip(d.chunks_mut(channels)) {
                    for c in 0..channels {
                        dp[c] = profile.quantize(sp[c], c);
                    }
                }
            }
            TensorFormat::Nchw => {
                for (c, (sp, dp)) in s.chunks(plane).zip(d.chunks_mut(plane)).enumerate() {
                    for i in 0..plane {
                        dp[i] = profile.quantize(sp[i], c);
                    }
                }
            }
        }
    }
}

/// Dequantize `batch` 8-bit images of `channels x plane` elements back to float.
pub fn convert_u8_to_f32(src: &[u8], channels: usize, plane: usize, format: TensorFormat, profile: &QuantProfile, dst: &mut [f32]) {
    let image = channels * plane;
    for (s, d) in src.chunks(image).zip(dst.chunks_mut(image)) {
        for (i, (&q, out)) in s.iter().zip(d.iter_mut()).enumerate() {
            *out = profile.dequantize(q, format.channel_of(channels, plane, i));
        }
    }
}

/// Per-channel min/max statistics used to derive source and destination profiles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationStats {
    pub src_min: Vec<f32>,
    pub src_max: Vec<f32>,
    pub dst_min: Vec<f32>,
    pub dst_max: Vec<f32>,
}

impl CalibrationStats {
    /// The same `[min, max]` range for every source and destination channel.
    pub fn uniform(src_c: usize, dst_c: usize, min: f32, max: f32) -> Self {
        CalibrationStats {
            src_min: vec![min; src_c],
            src_max: vec![max; src_c],
            dst_min: vec![min; dst_c],
            dst_max: vec![max; dst_c],
        }
    }
}

/// Collects per-channel min/max over representative float activations.
///
/// Feed the layer input and the float reference output of each calibration sample,
/// then call [`ChannelCalibrator::stats`].
pub struct ChannelCalibrator {
    src_min: Vec<f32>,
    src_max: Vec<f32>,
    dst_min: Vec<f32>,
    dst_max: Vec<f32>,
    num_samples: usize,
}

impl ChannelCalibrator {
    pub fn new(src_c: usize, dst_c: usize) -> Self {
        ChannelCalibrator {
            src_min: vec![f32::MAX; src_c],
            src_max: vec![f32::MIN; src_c],
            dst_min: vec![f32::MAX; dst_c],
            dst_max: vec![f32::MIN; dst_c],
            num_samples: 0,
        }
    }

    fn observe(mins: &mut [f32], maxs: &mut [f32], data: &[f32], plane: usize, format: TensorFormat) {
        let channels = mins.len();
        for image in data.chunks(channels * plane) {
            for (i, &v) in image.iter().enumerate() {
                let c = format.channel_of(channels, plane, i);
                mins[c] = mins[c].min(v);
                maxs[c] = maxs[c].max(v);
            }
        }
    }

    pub fn observe_input(&mut self, data: &[f32], plane: usize, format: TensorFormat) {
        Self::observe(&mut self.src_min, &mut self.src_max, data, plane, format);
    }

    pub fn observe_output(&mut self, data: &[f32], plane: usize, format: TensorFormat) {
        Self::observe(&mut self.dst_min, &mut self.dst_max, data, plane, format);
    }

    pub fn finish_sample(&mut self) {
        self.num_samples += 1;
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Statistics so far. Channels never observed report `[0, 0]`.
    pub fn stats(&self) -> CalibrationStats {
        let fix = |mins: &[f32], maxs: &[f32]| -> (Vec<f32>, Vec<f32>) {
            mins.iter()
                .zip(maxs)
                .map(|(&lo, &hi)| if lo > hi { (0.0, 0.0) } else { (lo, hi) })
                .unzip()
        };
        let (src_min, src_max) = fix(&self.src_min, &self.src_max);
        let (dst_min, dst_max) = fix(&self.dst_min, &self.dst_max);
        CalibrationStats {
            src_min,
            src_max,
            dst_min,
            dst_max,
        }
    }
}
