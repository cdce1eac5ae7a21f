use std::fmt;

use serde::{Deserialize, Serialize};

use super::ConvShape;

/// Data cache sizes in bytes, used to size the macro-tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSizes {
    pub l1: usize,
    pub l2: usize,
    pub l3: usize,
}

impl Default for CacheSizes {
    fn default() -> Self {
        CacheSizes {
            l1: 32 * 1024,
            l2: 256 * 1024,
            l3: 2 * 1024 * 1024,
        }
    }
}

/// When to copy the source into a zero-point padded buffer before the direct pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadPolicy {
    /// Copy when the border cost estimate says it pays off.
    #[default]
    Auto,
    /// Copy whenever the layer has padding.
    Always,
    /// Always handle borders in place.
    Never,
}

/// Tuning knobs for the direct scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanOptions {
    #[serde(default)]
    pub cache: CacheSizes,
    #[serde(default)]
    pub padding: PadPolicy,
    /// Fixed input-channel macro-tile; any value in `1..=src_c`.
    #[serde(default)]
    pub macro_c: Option<usize>,
    #[serde(default)]
    pub macro_h: Option<usize>,
    /// Fixed output-channel macro-tile; rounded up to a multiple of the micro-tile.
    #[serde(default)]
    pub macro_d: Option<usize>,
    /// Run row bands on the rayon pool.
    #[serde(default)]
    pub parallel: bool,
}

impl PlanOptions {
    pub fn cache(mut self, cache: CacheSizes) -> Self {
        self.cache = cache;
        self
    }

    pub fn padding(mut self, padding: PadPolicy) -> Self {
        self.padding = padding;
        self
    }

    pub fn macro_c(mut self, macro_c: usize) -> Self {
        self.macro_c = Some(macro_c);
        self
    }

    pub fn macro_h(mut self, macro_h: usize) -> Self {
        self.macro_h = Some(macro_h);
        self
    }

    pub fn macro_d(mut self, macro_d: usize) -> Self {
        self.macro_d = Some(macro_d);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Blocking parameters of the direct scheduler. Constant for the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmPlan {
    /// Output channels per packed weight tile (F).
    pub width: usize,
    /// Output channels per microkernel call (2F).
    pub micro_d: usize,
    pub macro_c: usize,
    pub macro_h: usize,
    pub macro_d: usize,
    pub max_span: usize,
    pub pad_source: bool,
    pub parallel: bool,
}

/// Border overhead factor above which the padded copy wins.
const PAD_COPY_RATIO: f64 = 1.3;

#[inline]
fn align_lo(value: usize, align: usize) -> usize {
    value / align * align
}

#[inline]
fn align_hi(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

impl AlgorithmPlan {
    pub fn new(shape: &ConvShape, width: usize, max_span: usize, options: &PlanOptions) -> Self {
        let cache = options.cache;
        let micro_d = 2 * width;
        let kk = shape.kernel_area();
        let src_c = shape.src_c;

        let macro_c = match options.macro_c {
            Some(c) => c.clamp(1, src_c),
            None => {
                let fit = (cache.l1 / (kk * micro_d)).min(src_c);
                if fit >= src_c {
                    src_c
                } else {
                    align_lo(fit, 4).max(4).min(src_c)
                }
            }
        };

        let macro_h = match options.macro_h {
            Some(h) => h.clamp(1, shape.dst_h),
            None => {
                let rows = cache.l2 / (macro_c * shape.src_w).max(1);
                ((rows + 1).saturating_sub(shape.kernel_y * shape.dilation_y) / shape.stride_y).clamp(1, shape.dst_h)
            }
        };

        let macro_d = match options.macro_d {
            Some(d) => align_hi(d.max(1), micro_d).min(align_hi(shape.dst_c, micro_d)),
            None => align_lo(cache.l3 / (kk * macro_c), micro_d)
                .min(align_hi(shape.dst_c, micro_d))
                .max(micro_d),
        };

        let pad_source = shape.has_padding()
            && match options.padding {
                PadPolicy::Never => false,
                PadPolicy::Always => true,
                PadPolicy::Auto => {
                    macro_h == shape.dst_h && {
                        let (in_place, copy) = border_costs(shape, micro_d);
                        in_place as f64 > PAD_COPY_RATIO * copy as f64
                    }
                }
            };

        AlgorithmPlan {
            width,
            micro_d,
            macro_c,
            macro_h,
            macro_d,
            max_span,
            pad_source,
            parallel: options.parallel,
        }
    }

    /// Number of input-channel passes per output macro-tile.
    pub fn passes(&self, src_c: usize) -> usize {
        src_c.div_ceil(self.macro_c)
    }
}

impl fmt::Display for AlgorithmPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "F={} microD={} macroC={} macroH={} macroD={} span={} pad={} parallel={}",
            self.width,
            self.micro_d,
            self.macro_c,
            self.macro_h,
            self.macro_d,
            self.max_span,
            self.pad_source,
            self.parallel
        )
    }
}

/// Output positions `[begin, end)` along one axis whose taps all fall inside the source.
pub fn interior(dst: usize, src: usize, kernel: usize, stride: usize, dilation: usize, pad_before: usize) -> (usize, usize) {
    let begin = pad_before.div_ceil(stride).min(dst);
    let extent = (kernel - 1) * dilation + 1;
    let end = if src + pad_before >= extent {
        ((src + pad_before - extent) / stride + 1).min(dst)
    } else {
        0
    };
    (begin, end.max(begin))
}

/// Estimated work of checked border handling vs. a padded source copy.
fn border_costs(shape: &ConvShape, micro_d: usize) -> (usize, usize) {
    let (y0, y1) = interior(shape.dst_h, shape.src_h, shape.kernel_y, shape.stride_y, shape.dilation_y, shape.pad_y);
    let (x0, x1) = interior(shape.dst_w, shape.src_w, shape.kernel_x, shape.stride_x, shape.dilation_x, shape.pad_x);
    let border = shape.dst_plane() - (y1 - y0) * (x1 - x0);
    let quads = shape.src_c.div_ceil(4);
    let in_place = border * shape.kernel_area() * quads * shape.dst_c.div_ceil(micro_d);
    let padded = (shape.src_h + shape.pad_y + shape.pad_h) * (shape.src_w + shape.pad_x + shape.pad_w);
    (in_place, padded * quads)
}
