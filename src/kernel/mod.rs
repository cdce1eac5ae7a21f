//! The microkernel capability: computes one output tile of the direct convolution.
//!
//! A backend implements [`Microkernel`] (tile width, widest unrolled span, checked and
//! unchecked accumulation). The pass-state protocol around it (accumulator init,
//! partial-sum load/store, fused output stage) is shared by every backend and
//! dispatched through a [`KernelTable`].

mod reference;
pub mod simd;

pub use reference::ReferenceKernel;

use std::fmt;

use crate::activation::ActivationKind;
use crate::conv::OutputFinisher;
use crate::tensor::{Dst, ElemKind};

/// Position of one microkernel call in the multi-pass accumulation over input channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassState {
    /// Only pass, 8-bit output.
    Single8u,
    /// Only pass, float output.
    Single32f,
    /// First of several passes: zero the accumulator, store the partial sum.
    First,
    /// Middle pass: load the partial sum, add, store it back.
    Interim,
    /// Last pass, 8-bit output: load, add, finish.
    Last8u,
    /// Last pass, float output: load, add, finish.
    Last32f,
}

impl PassState {
    pub const ALL: [PassState; 6] = [
        PassState::Single8u,
        PassState::Single32f,
        PassState::First,
        PassState::Interim,
        PassState::Last8u,
        PassState::Last32f,
    ];

    /// State of input pass `pass` out of `passes`.
    pub fn select(pass: usize, passes: usize, dst_kind: ElemKind) -> Self {
        match (passes == 1, pass == 0, pass + 1 == passes, dst_kind) {
            (true, _, _, ElemKind::U8) => PassState::Single8u,
            (true, _, _, ElemKind::F32) => PassState::Single32f,
            (false, true, _, _) => PassState::First,
            (false, false, false, _) => PassState::Interim,
            (false, false, true, ElemKind::U8) => PassState::Last8u,
            (false, false, true, ElemKind::F32) => PassState::Last32f,
        }
    }

    /// Whether the accumulator starts from the stored partial sum.
    pub fn loads_partial(self) -> bool {
        matches!(self, PassState::Interim | PassState::Last8u | PassState::Last32f)
    }

    /// Whether the call finishes and writes the destination.
    pub fn is_final(self) -> bool {
        !matches!(self, PassState::First | PassState::Interim)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Source geometry and weight packing seen by the direct microkernel.
///
/// When the source was pre-padded, `src_h/src_w` are the padded sizes and the
/// pads are zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectGeometry {
    pub src_h: usize,
    pub src_w: usize,
    pub src_c: usize,
    pub pad_y: usize,
    pub pad_x: usize,
    pub kernel_y: usize,
    pub kernel_x: usize,
    pub stride_y: usize,
    pub stride_x: usize,
    pub dilation_y: usize,
    pub dilation_x: usize,
    /// Output channels per packed weight tile.
    pub width: usize,
    /// Packed input quads per kernel tap, `ceil(src_c / 4)`.
    pub quads: usize,
}

impl DirectGeometry {
    pub fn kernel_area(&self) -> usize {
        self.kernel_y * self.kernel_x
    }

    /// Source row of kernel row `ky` for output row `dy`, if inside the image.
    #[inline]
    pub fn src_row(&self, dy: usize, ky: usize) -> Option<usize> {
        (dy * self.stride_y + ky * self.dilation_y)
            .checked_sub(self.pad_y)
            .filter(|&y| y < self.src_h)
    }

    /// Source column of kernel column `kx` for output column `dx`, if inside the image.
    #[inline]
    pub fn src_col(&self, dx: usize, kx: usize) -> Option<usize> {
        (dx * self.stride_x + kx * self.dilation_x)
            .checked_sub(self.pad_x)
            .filter(|&x| x < self.src_w)
    }
}

/// Inputs of one microkernel call: `span` output pixels starting at `(dy, dx)`, up to
/// `micro_d` output channels starting at weight tile `tile`, input channels
/// `[c_begin, c_end)`.
#[derive(Debug, Clone, Copy)]
pub struct TileTask<'a> {
    pub geo: &'a DirectGeometry,
    /// One NHWC source image.
    pub src: &'a [u8],
    /// Per source channel fill value for out-of-image taps.
    pub zero: &'a [u8],
    /// All zero-points are 0, so out-of-image taps contribute nothing.
    pub zero_is_null: bool,
    pub weights: &'a [i8],
    pub tile: usize,
    pub dst_count: usize,
    pub c_begin: usize,
    pub c_end: usize,
    pub dy: usize,
    pub dx: usize,
    pub saturate: bool,
}

/// Compute primitive for one direct-convolution tile.
pub trait Microkernel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Output channels per packed weight tile (F).
    fn width(&self) -> usize;

    /// Output channels per call; two weight tiles.
    fn micro_d(&self) -> usize {
        2 * self.width()
    }

    /// Widest run of output pixels a single unchecked call produces.
    fn max_span(&self) -> usize;

    /// Add the products of one output pixel into `acc[..micro_d]`, checking every tap
    /// against the image bounds.
    fn accumulate_checked(&self, task: &TileTask<'_>, acc: &mut [i32]);

    /// Add the products of `span` adjacent output pixels into `acc[p * micro_d + i]`.
    /// Rows are checked; the caller guarantees every column tap is inside the image.
    fn accumulate_span(&self, task: &TileTask<'_>, span: usize, acc: &mut [i32]);
}

/// Output window of one microkernel call inside a row band.
pub struct TileOut<'a, 'b> {
    pub dst: &'a mut Dst<'b>,
    pub buf: &'a mut [i32],
    /// Band-local index of the first output pixel.
    pub pixel: usize,
    /// First output channel (absolute).
    pub channel: usize,
    pub dst_stride: usize,
    /// Channel offset and pixel stride inside the accumulation buffer.
    pub buf_channel: usize,
    pub buf_stride: usize,
}

type Epilogue = fn(&OutputFinisher<'_>, &[i32], &mut TileOut<'_, '_>, usize, usize, usize);

/// Pass-state dispatch table for one activation kind.
pub struct KernelTable {
    epilogues: [Epilogue; 6],
    activation: ActivationKind,
}

impl KernelTable {
    pub fn new(activation: ActivationKind) -> Self {
        let (finish_u8, finish_f32): (Epilogue, Epilogue) = match activation {
            ActivationKind::Identity => (finish_u8_identity, finish_f32_identity),
            _ => (finish_u8_any, finish_f32_any),
        };
        let mut epilogues: [Epilogue; 6] = [store_partial; 6];
        for pass in PassState::ALL {
            epilogues[pass.index()] = match pass {
                PassState::Single8u | PassState::Last8u => finish_u8,
                PassState::Single32f | PassState::Last32f => finish_f32,
                PassState::First | PassState::Interim => store_partial,
            };
        }
        KernelTable { epilogues, activation }
    }

    pub fn activation(&self) -> ActivationKind {
        self.activation
    }

    /// Run one tile: initialise the accumulator per `pass`, accumulate through `kernel`,
    /// then store the partial sum or finish into the destination.
    ///
    /// `acc` must hold `span * kernel.micro_d()` values.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        kernel: &dyn Microkernel,
        pass: PassState,
        task: &TileTask<'_>,
        span: usize,
        checked: bool,
        acc: &mut [i32],
        out: &mut TileOut<'_, '_>,
        finisher: &OutputFinisher<'_>,
    ) {
        let micro_d = kernel.micro_d();
        let acc = &mut acc[..span * micro_d];
        if pass.loads_partial() {
            for p in 0..span {
                let b = (out.pixel + p) * out.buf_stride + out.buf_channel;
                acc[p * micro_d..p * micro_d + task.dst_count].copy_from_slice(&out.buf[b..b + task.dst_count]);
            }
        } else {
            acc.fill(0);
        }
        if checked {
            debug_assert_eq!(span, 1);
            kernel.accumulate_checked(task, acc);
        } else {
            kernel.accumulate_span(task, span, acc);
        }
        (self.epilogues[pass.index()])(finisher, acc, out, span, task.dst_count, micro_d);
    }
}

fn store_partial(_: &OutputFinisher<'_>, acc: &[i32], out: &mut TileOut<'_, '_>, span: usize, count: usize, micro_d: usize) {
    for p in 0..span {
        let b = (out.pixel + p) * out.buf_stride + out.buf_channel;
        out.buf[b..b + count].copy_from_slice(&acc[p * micro_d..p * micro_d + count]);
    }
}

fn finish_u8_any(fin: &OutputFinisher<'_>, acc: &[i32], out: &mut TileOut<'_, '_>, span: usize, count: usize, micro_d: usize) {
    if let Dst::U8(dst) = out.dst {
        for p in 0..span {
            let o = (out.pixel + p) * out.dst_stride + out.channel;
            fin.finish_u8(&acc[p * micro_d..p * micro_d + count], out.channel, &mut dst[o..o + count]);
        }
    }
}

fn finish_f32_any(fin: &OutputFinisher<'_>, acc: &[i32], out: &mut TileOut<'_, '_>, span: usize, count: usize, micro_d: usize) {
    if let Dst::F32(dst) = out.dst {
        for p in 0..span {
            let o = (out.pixel + p) * out.dst_stride + out.channel;
            fin.finish_f32(&acc[p * micro_d..p * micro_d + count], out.channel, &mut dst[o..o + count]);
        }
    }
}

fn finish_u8_identity(fin: &OutputFinisher<'_>, acc: &[i32], out: &mut TileOut<'_, '_>, span: usize, count: usize, micro_d: usize) {
    if let Dst::U8(dst) = out.dst {
        for p in 0..span {
            let o = (out.pixel + p) * out.dst_stride + out.channel;
            fin.finish_u8_linear(&acc[p * micro_d..p * micro_d + count], out.channel, &mut dst[o..o + count]);
        }
    }
}

fn finish_f32_identity(fin: &OutputFinisher<'_>, acc: &[i32], out: &mut TileOut<'_, '_>, span: usize, count: usize, micro_d: usize) {
    if let Dst::F32(dst) = out.dst {
        for p in 0..span {
            let o = (out.pixel + p) * out.dst_stride + out.channel;
            fin.finish_f32_linear(&acc[p * micro_d..p * micro_d + count], out.channel, &mut dst[o..o + count]);
        }
    }
}
