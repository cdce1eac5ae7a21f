use std::fmt;

use serde::{Deserialize, Serialize};

/// Memory layout of a 4D activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorFormat {
    /// Channel-first: `[batch][channels][height][width]`.
    Nchw,
    /// Channel-last: `[batch][height][width][channels]`.
    Nhwc,
}

impl TensorFormat {
    /// Linear offset of `(c, y, x)` inside one image of `channels x height x width`.
    #[inline]
    pub fn offset(self, channels: usize, height: usize, width: usize, c: usize, y: usize, x: usize) -> usize {
        match self {
            TensorFormat::Nchw => (c * height + y) * width + x,
            TensorFormat::Nhwc => (y * width + x) * channels + c,
        }
    }

    /// Channel index of the element at linear offset `i` of one image.
    #[inline]
    pub fn channel_of(self, channels: usize, plane: usize, i: usize) -> usize {
        match self {
            TensorFormat::Nchw => i / plane,
            TensorFormat::Nhwc => i % channels,
        }
    }
}

impl fmt::Display for TensorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorFormat::Nchw => write!(f, "Nchw"),
            TensorFormat::Nhwc => write!(f, "Nhwc"),
        }
    }
}

/// Element type of a source or destination tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemKind {
    /// Quantized unsigned 8-bit activations.
    U8,
    /// Float activations, quantized/dequantized at the layer boundary.
    F32,
}

impl ElemKind {
    pub fn size(self) -> usize {
        match self {
            ElemKind::U8 => 1,
            ElemKind::F32 => 4,
        }
    }
}

impl fmt::Display for ElemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemKind::U8 => write!(f, "8u"),
            ElemKind::F32 => write!(f, "32f"),
        }
    }
}
