use super::simd::madd4;
use super::{Microkernel, TileTask};
use crate::quant::direct_index;

/// Portable backend. Defaults to 8 output channels per weight tile and up to 5 pixels
/// per unchecked call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceKernel {
    width: usize,
    max_span: usize,
}

impl ReferenceKernel {
    pub const WIDTH: usize = 8;
    pub const MAX_SPAN: usize = 5;

    pub fn new(width: usize, max_span: usize) -> Self {
        ReferenceKernel {
            width: width.max(1),
            max_span: max_span.max(1),
        }
    }
}

impl Default for ReferenceKernel {
    fn default() -> Self {
        Self::new(Self::WIDTH, Self::MAX_SPAN)
    }
}

impl Microkernel for ReferenceKernel {
    fn name(&self) -> &'static str {
        "Ref"
    }

    fn width(&self) -> usize {
        self.width
    }

    fn max_span(&self) -> usize {
        self.max_span
    }

    fn accumulate_checked(&self, task: &TileTask<'_>, acc: &mut [i32]) {
        let geo = task.geo;
        for ky in 0..geo.kernel_y {
            let sy = geo.src_row(task.dy, ky);
            for kx in 0..geo.kernel_x {
                let tap = ky * geo.kernel_x + kx;
                match (sy, geo.src_col(task.dx, kx)) {
                    (Some(sy), Some(sx)) => {
                        let offs = (sy * geo.src_w + sx) * geo.src_c;
                        madd_tap(task, tap, &task.src[offs..offs + geo.src_c], acc);
                    }
                    _ if task.zero_is_null => {}
                    _ => madd_tap(task, tap, task.zero, acc),
                }
            }
        }
    }

    fn accumulate_span(&self, task: &TileTask<'_>, span: usize, acc: &mut [i32]) {
        let geo = task.geo;
        let micro_d = self.micro_d();
        for ky in 0..geo.kernel_y {
            match geo.src_row(task.dy, ky) {
                Some(sy) => {
                    for kx in 0..geo.kernel_x {
                        let tap = ky * geo.kernel_x + kx;
                        for p in 0..span {
                            let sx = (task.dx + p) * geo.stride_x + kx * geo.dilation_x - geo.pad_x;
                            debug_assert!(sx < geo.src_w);
                            let offs = (sy * geo.src_w + sx) * geo.src_c;
                            madd_tap(task, tap, &task.src[offs..offs + geo.src_c], &mut acc[p * micro_d..(p + 1) * micro_d]);
                        }
                    }
                }
                None if task.zero_is_null => {}
                None => {
                    for p in 0..span {
                        let pixel = &mut acc[p * micro_d..(p + 1) * micro_d];
                        for kx in 0..geo.kernel_x {
                            madd_tap(task, ky * geo.kernel_x + kx, task.zero, pixel);
                        }
                    }
                }
            }
        }
    }
}

/// Multiply the input channels `[c_begin, c_end)` of one source pixel against kernel tap
/// `tap` of every output channel in the tile. Quads that straddle the pass boundary
/// are completed with zero activations.
fn madd_tap(task: &TileTask<'_>, tap: usize, pixel: &[u8], acc: &mut [i32]) {
    let geo = task.geo;
    let kk = geo.kernel_area();
    let mut c = task.c_begin;
    while c < task.c_end {
        let end = (c / 4 * 4 + 4).min(task.c_end);
        let mut quad = [0u8; 4];
        for k in c..end {
            quad[k % 4] = pixel[k];
        }
        for (i, a) in acc.iter_mut().take(task.dst_count).enumerate() {
            let w = direct_index(geo.width, kk, geo.quads, task.tile + i / geo.width, tap, c, i % geo.width) - c % 4;
            *a += madd4(&quad, &task.weights[w..w + 4], task.saturate);
        }
        c = end;
    }
}
