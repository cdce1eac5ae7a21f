//! Im2col + blocked integer GEMM convolution.
//!
//! Handles every shape, including NCHW and grouped convolutions. Patches are unfolded
//! with the source zero-point in place of padding, then each group is one
//! `u8 x i8 -> i32` matrix multiply. NHWC unfolds pixel-major and uses dot products;
//! NCHW unfolds channel-major and uses row updates.
use log::trace;

use super::{ConvShape, Convolution8i, OutputFinisher, Workspace};
use crate::kernel::simd::{axpy2_u8, axpy_u8, dot_u8i8};
use crate::quant::{QuantizedWeightSet, WeightLayout};
use crate::tensor::{Dst, TensorFormat};

const TILE: usize = 32;

pub struct GemmConvolution {
    shape: ConvShape,
    /// 1x1, unit stride, no padding: the source already is the column matrix.
    identity: bool,
}

impl GemmConvolution {
    pub fn new(shape: &ConvShape) -> Self {
        GemmConvolution {
            shape: shape.clone(),
            identity: shape.is_1x1(),
        }
    }

    fn patch(&self) -> usize {
        self.shape.kernel_area() * self.shape.group_src_c()
    }

    /// Unfold group `g` of an NHWC image: `col_t[n * patch + tap * cg + c]`.
    fn im2col_nhwc(&self, src: &[u8], zero: &[u8], g: usize, col_t: &mut [u8]) {
        let s = &self.shape;
        let cg = s.group_src_c();
        let patch = self.patch();
        let zero = &zero[g * cg..(g + 1) * cg];
        for dy in 0..s.dst_h {
            for dx in 0..s.dst_w {
                let row = &mut col_t[(dy * s.dst_w + dx) * patch..][..patch];
                for ky in 0..s.kernel_y {
                    let sy = (dy * s.stride_y + ky * s.dilation_y).checked_sub(s.pad_y).filter(|&y| y < s.src_h);
                    for kx in 0..s.kernel_x {
                        let sx = (dx * s.stride_x + kx * s.dilation_x).checked_sub(s.pad_x).filter(|&x| x < s.src_w);
                        let out = &mut row[(ky * s.kernel_x + kx) * cg..][..cg];
                        match (sy, sx) {
                            (Some(y), Some(x)) => out.copy_from_slice(&src[(y * s.src_w + x) * s.src_c + g * cg..][..cg]),
                            _ => out.copy_from_slice(zero),
                        }
                    }
                }
            }
        }
    }

    /// Unfold group `g` of an NCHW image: `col[(c * kernel_area + tap) * plane + n]`.
    fn im2col_nchw(&self, src: &[u8], zero: &[u8], g: usize, col: &mut [u8]) {
        let s = &self.shape;
        let cg = s.group_src_c();
        let kk = s.kernel_area();
        let plane = s.dst_plane();
        for c in 0..cg {
            let channel = g * cg + c;
            let src_plane = &src[channel * s.src_h * s.src_w..][..s.src_h * s.src_w];
            for ky in 0..s.kernel_y {
                for kx in 0..s.kernel_x {
                    let row = &mut col[(c * kk + ky * s.kernel_x + kx) * plane..][..plane];
                    for dy in 0..s.dst_h {
                        let sy = (dy * s.stride_y + ky * s.dilation_y).checked_sub(s.pad_y).filter(|&y| y < s.src_h);
                        for dx in 0..s.dst_w {
                            let sx = (dx * s.stride_x + kx * s.dilation_x).checked_sub(s.pad_x).filter(|&x| x < s.src_w);
                            row[dy * s.dst_w + dx] = match (sy, sx) {
                                (Some(y), Some(x)) => src_plane[y * s.src_w + x],
                                _ => zero[channel],
                            };
                        }
                    }
                }
            }
        }
    }

    /// `acc[n * dst_c + d] = dot(col_t row n, weight row d)` for the output channels of group `g`.
    fn gemm_nhwc(&self, src: &[u8], weights: &[i8], g: usize, col_t: Option<&[u8]>, acc: &mut [i32], saturate: bool) {
        let s = &self.shape;
        let (cg, dg) = (s.group_src_c(), s.group_dst_c());
        let patch = self.patch();
        let plane = s.dst_plane();
        let mut nn = 0;
        while nn < plane {
            let n_end = (nn + TILE).min(plane);
            for d in g * dg..(g + 1) * dg {
                let w = &weights[d * patch..][..patch];
                for n in nn..n_end {
                    let row = match col_t {
                        Some(col) => &col[n * patch..][..patch],
                        None => &src[n * s.src_c + g * cg..][..cg],
                    };
                    acc[n * s.dst_c + d] = dot_u8i8(row, w, saturate);
                }
            }
            nn += TILE;
        }
    }

    /// `acc[d * plane + n] = sum_k w[d][k] * col[k][n]`, pairing consecutive `k` like the
    /// 16-bit multiply-add.
    fn gemm_nchw(&self, src: &[u8], weights: &[i8], g: usize, col: Option<&[u8]>, acc: &mut [i32], saturate: bool) {
        let s = &self.shape;
        let (cg, dg) = (s.group_src_c(), s.group_dst_c());
        let patch = self.patch();
        let plane = s.dst_plane();
        let rows = match col {
            Some(col) => col,
            None => &src[g * cg * plane..(g + 1) * cg * plane],
        };
        for d in g * dg..(g + 1) * dg {
            let w = &weights[d * patch..][..patch];
            let out = &mut acc[d * plane..(d + 1) * plane];
            out.fill(0);
            let mut jj = 0;
            while jj < plane {
                let j_end = (jj + TILE).min(plane);
                let mut k = 0;
                while k + 2 <= patch {
                    axpy2_u8(
                        &mut out[jj..j_end],
                        &rows[k * plane + jj..k * plane + j_end],
                        w[k],
                        &rows[(k + 1) * plane + jj..(k + 1) * plane + j_end],
                        w[k + 1],
                        saturate,
                    );
                    k += 2;
                }
                if k < patch {
                    axpy_u8(&mut out[jj..j_end], &rows[k * plane + jj..k * plane + j_end], w[k]);
                }
                jj += TILE;
            }
        }
    }
}

impl Convolution8i for GemmConvolution {
    fn description(&self) -> String {
        format!("Ref::Gemm{}", if self.shape.format == TensorFormat::Nhwc { "Nhwc" } else { "Nchw" })
    }

    fn layout(&self) -> WeightLayout {
        WeightLayout::Gemm
    }

    fn workspace(&self) -> Workspace {
        Workspace {
            work: if self.identity { 0 } else { self.patch() * self.shape.dst_plane() },
            acc: self.shape.dst_size(),
        }
    }

    fn forward(
        &self,
        src: &[u8],
        weights: &QuantizedWeightSet,
        zero: &[u8],
        finisher: &OutputFinisher<'_>,
        work: &mut [u8],
        acc: &mut [i32],
        mut dst: Dst<'_>,
    ) {
        let s = &self.shape;
        let (src_size, dst_size) = (s.src_size(), s.dst_size());
        let saturate = s.compatibility.saturating_madd_safe();
        let col = &mut work[..if self.identity { 0 } else { self.patch() * s.dst_plane() }];
        let acc = &mut acc[..dst_size];
        for b in 0..s.batch {
            trace!("gemm image {} of {}", b + 1, s.batch);
            let image = &src[b * src_size..(b + 1) * src_size];
            for g in 0..s.group {
                match s.format {
                    TensorFormat::Nhwc => {
                        if !self.identity {
                            self.im2col_nhwc(image, zero, g, col);
                        }
                        let unfolded = (!self.identity).then_some(&*col);
                        self.gemm_nhwc(image, &weights.data, g, unfolded, acc, saturate);
                    }
                    TensorFormat::Nchw => {
                        if !self.identity {
                            self.im2col_nchw(image, zero, g, col);
                        }
                        let unfolded = (!self.identity).then_some(&*col);
                        self.gemm_nchw(image, &weights.data, g, unfolded, acc, saturate);
                    }
                }
            }
            finisher.finish_image(acc, s.dst_c, s.dst_plane(), s.format, dst.reborrow().slice(b * dst_size, dst_size));
        }
    }
}
