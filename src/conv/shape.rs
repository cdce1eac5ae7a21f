use std::fmt;

use serde::{Deserialize, Serialize};

use crate::activation::ActivationKind;
use crate::error::{ConvError, Result};
use crate::quant::Compatibility;
use crate::tensor::{ElemKind, TensorFormat};

/// Construction parameters of a quantized convolution layer.
///
/// Destination height/width are derived; everything else is given by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvConfig {
    pub src_kind: ElemKind,
    pub dst_kind: ElemKind,
    pub format: TensorFormat,
    pub batch: usize,
    pub src_c: usize,
    pub src_h: usize,
    pub src_w: usize,
    pub dst_c: usize,
    pub kernel: [usize; 2],
    #[serde(default = "unit_pair")]
    pub stride: [usize; 2],
    #[serde(default = "unit_pair")]
    pub dilation: [usize; 2],
    /// Padding as `[top, left, bottom, right]`.
    #[serde(default)]
    pub pad: [usize; 4],
    #[serde(default = "unit")]
    pub group: usize,
    #[serde(default = "identity")]
    pub activation: ActivationKind,
    #[serde(default)]
    pub compatibility: Compatibility,
}

fn unit() -> usize {
    1
}

fn unit_pair() -> [usize; 2] {
    [1, 1]
}

fn identity() -> ActivationKind {
    ActivationKind::Identity
}

impl ConvConfig {
    /// A `kernel x kernel` convolution with unit stride/dilation, no padding, one group,
    /// identity activation and NHWC u8 -> u8 data.
    pub fn new(batch: usize, src_c: usize, src_h: usize, src_w: usize, dst_c: usize, kernel: usize) -> Self {
        ConvConfig {
            src_kind: ElemKind::U8,
            dst_kind: ElemKind::U8,
            format: TensorFormat::Nhwc,
            batch,
            src_c,
            src_h,
            src_w,
            dst_c,
            kernel: [kernel, kernel],
            stride: [1, 1],
            dilation: [1, 1],
            pad: [0; 4],
            group: 1,
            activation: ActivationKind::Identity,
            compatibility: Compatibility::default(),
        }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = [stride, stride];
        self
    }

    pub fn dilation(mut self, dilation: usize) -> Self {
        self.dilation = [dilation, dilation];
        self
    }

    pub fn pad(mut self, pad: usize) -> Self {
        self.pad = [pad; 4];
        self
    }

    pub fn group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    pub fn format(mut self, format: TensorFormat) -> Self {
        self.format = format;
        self
    }

    pub fn kinds(mut self, src: ElemKind, dst: ElemKind) -> Self {
        self.src_kind = src;
        self.dst_kind = dst;
        self
    }

    pub fn activation(mut self, activation: ActivationKind) -> Self {
        self.activation = activation;
        self
    }

    pub fn compatibility(mut self, compatibility: Compatibility) -> Self {
        self.compatibility = compatibility;
        self
    }
}

/// Validated convolution geometry. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvShape {
    pub batch: usize,
    pub src_c: usize,
    pub src_h: usize,
    pub src_w: usize,
    pub dst_c: usize,
    pub dst_h: usize,
    pub dst_w: usize,
    pub kernel_y: usize,
    pub kernel_x: usize,
    pub stride_y: usize,
    pub stride_x: usize,
    pub dilation_y: usize,
    pub dilation_x: usize,
    pub pad_y: usize,
    pub pad_x: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub group: usize,
    pub format: TensorFormat,
    pub src_kind: ElemKind,
    pub dst_kind: ElemKind,
    pub activation: ActivationKind,
    pub compatibility: Compatibility,
}

impl ConvShape {
    pub fn new(cfg: &ConvConfig) -> Result<Self> {
        let fail = |msg: String| Err(ConvError::InvalidShape(msg));
        let [kernel_y, kernel_x] = cfg.kernel;
        let [stride_y, stride_x] = cfg.stride;
        let [dilation_y, dilation_x] = cfg.dilation;
        let [pad_y, pad_x, pad_h, pad_w] = cfg.pad;

        if cfg.batch == 0 || cfg.src_c == 0 || cfg.dst_c == 0 || cfg.src_h == 0 || cfg.src_w == 0 {
            return fail(format!(
                "zero-sized tensor: batch {} src {}x{}x{} dst_c {}",
                cfg.batch, cfg.src_c, cfg.src_h, cfg.src_w, cfg.dst_c
            ));
        }
        if kernel_y == 0 || kernel_x == 0 || stride_y == 0 || stride_x == 0 || dilation_y == 0 || dilation_x == 0 {
            return fail(format!(
                "kernel {:?}, stride {:?} and dilation {:?} must be positive",
                cfg.kernel, cfg.stride, cfg.dilation
            ));
        }
        if cfg.group == 0 || cfg.src_c % cfg.group != 0 || cfg.dst_c % cfg.group != 0 {
            return fail(format!(
                "group {} must divide src_c {} and dst_c {}",
                cfg.group, cfg.src_c, cfg.dst_c
            ));
        }
        let extent_y = dilation_y * (kernel_y - 1) + 1;
        let extent_x = dilation_x * (kernel_x - 1) + 1;
        let padded_h = cfg.src_h + pad_y + pad_h;
        let padded_w = cfg.src_w + pad_x + pad_w;
        if padded_h < extent_y || padded_w < extent_x {
            return fail(format!(
                "kernel extent {}x{} exceeds padded input {}x{}",
                extent_y, extent_x, padded_h, padded_w
            ));
        }
        Ok(ConvShape {
            batch: cfg.batch,
            src_c: cfg.src_c,
            src_h: cfg.src_h,
            src_w: cfg.src_w,
            dst_c: cfg.dst_c,
            dst_h: (padded_h - extent_y) / stride_y + 1,
            dst_w: (padded_w - extent_x) / stride_x + 1,
            kernel_y,
            kernel_x,
            stride_y,
            stride_x,
            dilation_y,
            dilation_x,
            pad_y,
            pad_x,
            pad_h,
            pad_w,
            group: cfg.group,
            format: cfg.format,
            src_kind: cfg.src_kind,
            dst_kind: cfg.dst_kind,
            activation: cfg.activation,
            compatibility: cfg.compatibility,
        })
    }

    pub fn is_1x1(&self) -> bool {
        self.kernel_y == 1
            && self.kernel_x == 1
            && self.stride_y == 1
            && self.stride_x == 1
            && self.pad_y == 0
            && self.pad_x == 0
            && self.pad_h == 0
            && self.pad_w == 0
    }

    pub fn is_depthwise(&self) -> bool {
        self.group > 1 && self.group == self.src_c && self.group == self.dst_c
    }

    pub fn is_kernel(&self, k: usize) -> bool {
        self.kernel_y == k && self.kernel_x == k
    }

    pub fn is_dilation(&self, d: usize) -> bool {
        self.dilation_y == d && self.dilation_x == d
    }

    pub fn has_padding(&self) -> bool {
        self.pad_y + self.pad_x + self.pad_h + self.pad_w > 0
    }

    pub fn kernel_area(&self) -> usize {
        self.kernel_y * self.kernel_x
    }

    /// Input channels seen by one output channel.
    pub fn group_src_c(&self) -> usize {
        self.src_c / self.group
    }

    pub fn group_dst_c(&self) -> usize {
        self.dst_c / self.group
    }

    pub fn src_size(&self) -> usize {
        self.src_c * self.src_h * self.src_w
    }

    pub fn dst_size(&self) -> usize {
        self.dst_c * self.dst_h * self.dst_w
    }

    pub fn dst_plane(&self) -> usize {
        self.dst_h * self.dst_w
    }

    /// Number of float weights expected by `set_params`.
    pub fn weight_count(&self) -> usize {
        self.kernel_area() * self.group_src_c() * self.dst_c
    }

    /// Multiply-accumulate count of one image.
    pub fn macs(&self) -> usize {
        self.dst_size() * self.kernel_area() * self.group_src_c()
    }
}

impl fmt::Display for ConvShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}-{}x{}x{} k{}x{} s{}x{} d{}x{} p{}x{}x{}x{} g{} {}",
            self.batch,
            self.src_c,
            self.src_h,
            self.src_w,
            self.dst_c,
            self.dst_h,
            self.dst_w,
            self.kernel_y,
            self.kernel_x,
            self.stride_y,
            self.stride_x,
            self.dilation_y,
            self.dilation_x,
            self.pad_y,
            self.pad_x,
            self.pad_h,
            self.pad_w,
            self.group,
            self.format
        )
    }
}
