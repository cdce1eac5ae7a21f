use log::trace;

use super::plan::interior;
use super::{ConvShape, Convolution8i, OutputFinisher, Workspace};
use crate::quant::{QuantizedWeightSet, WeightLayout};
use crate::tensor::Dst;

/// Pixels finished together on the 3x3 interior.
const RUN: usize = 4;

/// Depthwise NHWC convolution (`group == src_c == dst_c`), single pass per pixel.
pub struct DepthwiseConvolution {
    shape: ConvShape,
    fast_3x3: bool,
}

impl DepthwiseConvolution {
    pub fn new(shape: &ConvShape) -> Self {
        DepthwiseConvolution {
            shape: shape.clone(),
            fast_3x3: shape.is_kernel(3) && shape.is_dilation(1),
        }
    }

    /// Force the generic path, e.g. to cross-check the 3x3 specialisation.
    pub fn generic(shape: &ConvShape) -> Self {
        DepthwiseConvolution {
            shape: shape.clone(),
            fast_3x3: false,
        }
    }

    pub fn is_fast_3x3(&self) -> bool {
        self.fast_3x3
    }

    /// Accumulate one output pixel with full bounds checks; padding reads the zero-point.
    fn pixel_checked(&self, src: &[u8], weights: &[i8], zero: &[u8], dy: usize, dx: usize, acc: &mut [i32]) {
        let s = &self.shape;
        let c = s.src_c;
        acc.fill(0);
        for ky in 0..s.kernel_y {
            let sy = (dy * s.stride_y + ky * s.dilation_y).checked_sub(s.pad_y).filter(|&y| y < s.src_h);
            for kx in 0..s.kernel_x {
                let sx = (dx * s.stride_x + kx * s.dilation_x).checked_sub(s.pad_x).filter(|&x| x < s.src_w);
                let w = &weights[(ky * s.kernel_x + kx) * c..][..c];
                let pixel = match (sy, sx) {
                    (Some(y), Some(x)) => &src[(y * s.src_w + x) * c..][..c],
                    _ => zero,
                };
                for ((a, &v), &k) in acc.iter_mut().zip(pixel).zip(w) {
                    *a += v as i32 * k as i32;
                }
            }
        }
    }

    /// Accumulate `N` horizontally adjacent interior pixels, loading each tap's weights once.
    fn run_interior<const N: usize>(&self, src: &[u8], weights: &[i8], dy: usize, dx: usize, acc: &mut [i32]) {
        let s = &self.shape;
        let c = s.src_c;
        acc[..N * c].fill(0);
        let y = dy * s.stride_y - s.pad_y;
        for ky in 0..3 {
            let row = &src[(y + ky) * s.src_w * c..];
            for kx in 0..3 {
                let w = &weights[(ky * 3 + kx) * c..][..c];
                for p in 0..N {
                    let x = (dx + p) * s.stride_x + kx - s.pad_x;
                    let pixel = &row[x * c..][..c];
                    for ((a, &v), &k) in acc[p * c..(p + 1) * c].iter_mut().zip(pixel).zip(w) {
                        *a += v as i32 * k as i32;
                    }
                }
            }
        }
    }

    fn store(&self, finisher: &OutputFinisher<'_>, acc: &[i32], pixel: usize, dst: &mut Dst<'_>) {
        let c = self.shape.dst_c;
        match dst {
            Dst::U8(d) => finisher.finish_u8(acc, 0, &mut d[pixel * c..(pixel + 1) * c]),
            Dst::F32(d) => finisher.finish_f32(acc, 0, &mut d[pixel * c..(pixel + 1) * c]),
        }
    }

    fn forward_generic(&self, src: &[u8], weights: &[i8], zero: &[u8], finisher: &OutputFinisher<'_>, acc: &mut [i32], dst: &mut Dst<'_>) {
        let s = &self.shape;
        let acc = &mut acc[..s.dst_c];
        for dy in 0..s.dst_h {
            for dx in 0..s.dst_w {
                self.pixel_checked(src, weights, zero, dy, dx, acc);
                self.store(finisher, acc, dy * s.dst_w + dx, dst);
            }
        }
    }

    fn forward_3x3(&self, src: &[u8], weights: &[i8], zero: &[u8], finisher: &OutputFinisher<'_>, acc: &mut [i32], dst: &mut Dst<'_>) {
        let s = &self.shape;
        let c = s.dst_c;
        let (y0, y1) = interior(s.dst_h, s.src_h, 3, s.stride_y, 1, s.pad_y);
        let (x0, x1) = interior(s.dst_w, s.src_w, 3, s.stride_x, 1, s.pad_x);
        for dy in 0..s.dst_h {
            let border_row = dy < y0 || dy >= y1;
            let mut dx = 0;
            while dx < s.dst_w {
                let pixel = dy * s.dst_w + dx;
                if border_row || dx < x0 || dx >= x1 {
                    self.pixel_checked(src, weights, zero, dy, dx, &mut acc[..c]);
                    self.store(finisher, &acc[..c], pixel, dst);
                    dx += 1;
                    continue;
                }
                let n = match x1 - dx {
                    r if r >= 4 => 4,
                    r if r >= 2 => 2,
                    _ => 1,
                };
                match n {
                    4 => self.run_interior::<4>(src, weights, dy, dx, acc),
                    2 => self.run_interior::<2>(src, weights, dy, dx, acc),
                    _ => self.run_interior::<1>(src, weights, dy, dx, acc),
                }
                for p in 0..n {
                    self.store(finisher, &acc[p * c..(p + 1) * c], pixel + p, dst);
                }
                dx += n;
            }
        }
    }
}

impl Convolution8i for DepthwiseConvolution {
    fn description(&self) -> String {
        if self.fast_3x3 {
            "Ref::DepthwiseConv3x3".to_string()
        } else {
            "Ref::DepthwiseConv".to_string()
        }
    }

    fn layout(&self) -> WeightLayout {
        WeightLayout::Depthwise
    }

    fn workspace(&self) -> Workspace {
        Workspace {
            work: 0,
            acc: RUN * self.shape.dst_c,
        }
    }

    fn forward(
        &self,
        src: &[u8],
        weights: &QuantizedWeightSet,
        zero: &[u8],
        finisher: &OutputFinisher<'_>,
        _work: &mut [u8],
        acc: &mut [i32],
        mut dst: Dst<'_>,
    ) {
        let s = &self.shape;
        let (src_size, dst_size) = (s.src_size(), s.dst_size());
        for b in 0..s.batch {
            trace!("depthwise image {} of {}", b + 1, s.batch);
            let image = &src[b * src_size..(b + 1) * src_size];
            let mut out = dst.reborrow().slice(b * dst_size, dst_size);
            if self.fast_3x3 {
                self.forward_3x3(image, &weights.data, zero, finisher, acc, &mut out);
            } else {
                self.forward_generic(image, &weights.data, zero, finisher, acc, &mut out);
            }
        }
    }
}
