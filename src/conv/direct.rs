use std::sync::Arc;

use log::trace;
use rayon::prelude::*;

use super::pad::{pad_image, padded_size};
use super::plan::interior;
use super::{AlgorithmPlan, ConvShape, Convolution8i, OutputFinisher, Workspace};
use crate::kernel::{DirectGeometry, KernelTable, Microkernel, PassState, TileOut, TileTask};
use crate::quant::{QuantizedWeightSet, WeightLayout};
use crate::tensor::Dst;

/// Blocked NHWC convolution for one group: output macro-tiles, input-channel passes and
/// row bands, with the microkernel producing `micro_d` channels of up to `max_span`
/// pixels per call.
pub struct DirectConvolution {
    shape: ConvShape,
    plan: AlgorithmPlan,
    kernel: Arc<dyn Microkernel>,
    table: KernelTable,
    geo: DirectGeometry,
}

/// Everything fixed for one (output macro-tile, input pass) over an image.
struct PassContext<'a> {
    task: TileTask<'a>,
    state: PassState,
    d_begin: usize,
    d_end: usize,
    buf_stride: usize,
    finisher: &'a OutputFinisher<'a>,
}

impl DirectConvolution {
    pub fn new(shape: &ConvShape, plan: AlgorithmPlan, kernel: Arc<dyn Microkernel>) -> Self {
        let (padded_h, padded_w) = padded_size(shape);
        let (src_h, src_w, pad_y, pad_x) = if plan.pad_source {
            (padded_h, padded_w, 0, 0)
        } else {
            (shape.src_h, shape.src_w, shape.pad_y, shape.pad_x)
        };
        let geo = DirectGeometry {
            src_h,
            src_w,
            src_c: shape.src_c,
            pad_y,
            pad_x,
            kernel_y: shape.kernel_y,
            kernel_x: shape.kernel_x,
            stride_y: shape.stride_y,
            stride_x: shape.stride_x,
            dilation_y: shape.dilation_y,
            dilation_x: shape.dilation_x,
            width: plan.width,
            quads: shape.src_c.div_ceil(4),
        };
        DirectConvolution {
            shape: shape.clone(),
            plan,
            table: KernelTable::new(shape.activation),
            kernel,
            geo,
        }
    }

    pub fn plan(&self) -> &AlgorithmPlan {
        &self.plan
    }

    /// Channel stride of the accumulation buffer.
    fn buf_channels(&self) -> usize {
        self.plan.macro_d.min(self.shape.dst_c)
    }

    /// `tile` is the band's microkernel accumulator, `max_span * micro_d` values.
    #[allow(clippy::too_many_arguments)]
    fn run_band(
        &self,
        ctx: &PassContext<'_>,
        y0: usize,
        y1: usize,
        dst: &mut Dst<'_>,
        buf: &mut [i32],
        tile: &mut [i32],
    ) {
        let shape = &self.shape;
        let kernel = self.kernel.as_ref();
        let geo = &self.geo;
        let micro_d = self.plan.micro_d;
        let (x0, x1) = interior(shape.dst_w, geo.src_w, geo.kernel_x, geo.stride_x, geo.dilation_x, geo.pad_x);

        for d0 in (ctx.d_begin..ctx.d_end).step_by(micro_d) {
            let mut task = ctx.task;
            task.tile = d0 / self.plan.width;
            task.dst_count = micro_d.min(ctx.d_end - d0);
            for dy in y0..y1 {
                task.dy = dy;
                let row = (dy - y0) * shape.dst_w;
                let mut dx = 0;
                while dx < shape.dst_w {
                    let (span, checked) = if dx < x0 || dx >= x1 {
                        (1, true)
                    } else {
                        (self.plan.max_span.min(x1 - dx), false)
                    };
                    task.dx = dx;
                    let mut out = TileOut {
                        dst: &mut *dst,
                        buf: &mut *buf,
                        pixel: row + dx,
                        channel: d0,
                        dst_stride: shape.dst_c,
                        buf_channel: d0 - ctx.d_begin,
                        buf_stride: ctx.buf_stride,
                    };
                    self.table.run(kernel, ctx.state, &task, span, checked, tile, &mut out, ctx.finisher);
                    dx += span;
                }
            }
        }
    }

    fn forward_image(
        &self,
        src: &[u8],
        weights: &[i8],
        zero: &[u8],
        finisher: &OutputFinisher<'_>,
        acc: &mut [i32],
        mut dst: Dst<'_>,
    ) {
        let shape = &self.shape;
        let plan = &self.plan;
        let passes = plan.passes(shape.src_c);
        let buf_stride = self.buf_channels();
        let band_pixels = plan.macro_h * shape.dst_w;
        let acc = &mut acc[..buf_stride * shape.dst_plane()];
        let tile_len = plan.max_span * plan.micro_d;
        let mut tiles = vec![0i32; shape.dst_h.div_ceil(plan.macro_h) * tile_len];

        for d_begin in (0..shape.dst_c).step_by(plan.macro_d) {
            let d_end = (d_begin + plan.macro_d).min(shape.dst_c);
            for pass in 0..passes {
                let c_begin = pass * plan.macro_c;
                let ctx = PassContext {
                    task: TileTask {
                        geo: &self.geo,
                        src,
                        zero,
                        zero_is_null: zero.iter().all(|&z| z == 0),
                        weights,
                        tile: 0,
                        dst_count: 0,
                        c_begin,
                        c_end: (c_begin + plan.macro_c).min(shape.src_c),
                        dy: 0,
                        dx: 0,
                        saturate: shape.compatibility.saturating_madd_safe(),
                    },
                    state: PassState::select(pass, passes, shape.dst_kind),
                    d_begin,
                    d_end,
                    buf_stride,
                    finisher,
                };
                let bands = dst.reborrow().chunks(band_pixels * shape.dst_c);
                let work = bands
                    .into_iter()
                    .zip(acc.chunks_mut(band_pixels * buf_stride))
                    .zip(tiles.chunks_mut(tile_len))
                    .enumerate();
                if plan.parallel {
                    work.collect::<Vec<_>>().into_par_iter().for_each(|(band, ((mut d, b), t))| {
                        let y0 = band * plan.macro_h;
                        self.run_band(&ctx, y0, (y0 + plan.macro_h).min(shape.dst_h), &mut d, b, t);
                    });
                } else {
                    for (band, ((mut d, b), t)) in work {
                        let y0 = band * plan.macro_h;
                        self.run_band(&ctx, y0, (y0 + plan.macro_h).min(shape.dst_h), &mut d, b, t);
                    }
                }
            }
        }
    }
}

impl Convolution8i for DirectConvolution {
    fn description(&self) -> String {
        format!("{}::NhwcDirect", self.kernel.name())
    }

    fn layout(&self) -> WeightLayout {
        WeightLayout::Direct { width: self.plan.width }
    }

    fn workspace(&self) -> Workspace {
        let (padded_h, padded_w) = padded_size(&self.shape);
        Workspace {
            work: if self.plan.pad_source { padded_h * padded_w * self.shape.src_c } else { 0 },
            acc: self.buf_channels() * self.shape.dst_plane(),
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
        let shape = &self.shape;
        let (src_size, dst_size) = (shape.src_size(), shape.dst_size());
        for b in 0..shape.batch {
            trace!("direct image {} of {}", b + 1, shape.batch);
            let image = &src[b * src_size..(b + 1) * src_size];
            let out = dst.reborrow().slice(b * dst_size, dst_size);
            if self.plan.pad_source {
                let padded = &mut work[..self.geo.src_h * self.geo.src_w * shape.src_c];
                pad_image(image, shape, zero, padded);
                self.forward_image(padded, &weights.data, zero, finisher, acc, out);
            } else {
                self.forward_image(image, &weights.data, zero, finisher, acc, out);
            }
        }
    }
}
