//! 8-bit multiply-add primitives with NEON acceleration and scalar fallbacks.
//!
//! Every product is unsigned activation x signed weight. The `saturate` variants
//! model the 16-bit pairwise multiply-add found on x86 (`maddubs`): two adjacent
//! products are summed and clamped to i16 before widening. They are exact as long as
//! weights were halved (overflow avoidance) or the narrowed ranges are in use.

// ── pairwise saturating multiply-add ──

#[inline]
fn sat16(v: i32) -> i32 {
    v.clamp(i16::MIN as i32, i16::MAX as i32)
}

/// Sum of `u0*w0 + u1*w1`, clamped to i16 when `saturate` is set.
#[inline]
pub fn madd2(u0: u8, w0: i8, u1: u8, w1: i8, saturate: bool) -> i32 {
    let s = u0 as i32 * w0 as i32 + u1 as i32 * w1 as i32;
    if saturate {
        sat16(s)
    } else {
        s
    }
}

/// Four-element multiply-add of one input quad against one weight quad.
#[inline]
pub fn madd4(src: &[u8], w: &[i8], saturate: bool) -> i32 {
    madd2(src[0], w[0], src[1], w[1], saturate) + madd2(src[2], w[2], src[3], w[3], saturate)
}

// ── dot product: sum(a[i] * b[i]) ──
//
// NEON path widens u8 -> u16 -> s16 and i8 -> s16, then vmlal_s16 into i32 lanes.

#[cfg(all(target_arch = "aarch64", feature = "simd"))]
fn dot_exact(a: &[u8], b: &[i8]) -> i32 {
    use core::arch::aarch64::*;
    let len = a.len().min(b.len());
    let mut j = 0usize;
    // SAFETY: loads stay within `len`, which bounds both slices.
    unsafe {
        let mut acc0 = vdupq_n_s32(0);
        let mut acc1 = vdupq_n_s32(0);
        while j + 8 <= len {
            let va = vreinterpretq_s16_u16(vmovl_u8(vld1_u8(a.as_ptr().add(j))));
            let vb = vmovl_s8(vld1_s8(b.as_ptr().add(j)));
            acc0 = vmlal_s16(acc0, vget_low_s16(va), vget_low_s16(vb));
            acc1 = vmlal_s16(acc1, vget_high_s16(va), vget_high_s16(vb));
            j += 8;
        }
        let mut sum = vaddvq_s32(vaddq_s32(acc0, acc1));
        // scalar tail
        while j < len {
            sum += a[j] as i32 * b[j] as i32;
            j += 1;
        }
        sum
    }
}

#[cfg(not(all(target_arch = "aarch64", feature = "simd")))]
fn dot_exact(a: &[u8], b: &[i8]) -> i32 {
    a.iter().zip(b).map(|(&x, &w)| x as i32 * w as i32).sum()
}

/// Dot product of activations and weights over the shorter of the two slices.
pub fn dot_u8i8(a: &[u8], b: &[i8], saturate: bool) -> i32 {
    if !saturate {
        return dot_exact(a, b);
    }
    let len = a.len().min(b.len());
    let mut sum = 0i32;
    let mut j = 0usize;
    while j + 2 <= len {
        sum += madd2(a[j], b[j], a[j + 1], b[j + 1], true);
        j += 2;
    }
    if j < len {
        sum += madd2(a[j], b[j], 0, 0, true);
    }
    sum
}

// ── row update: acc[i] += w0 * a0[i] + w1 * a1[i] ──

/// Accumulate two weighted activation rows, pairing them like `madd2`.
pub fn axpy2_u8(acc: &mut [i32], a0: &[u8], w0: i8, a1: &[u8], w1: i8, saturate: bool) {
    for ((d, &x0), &x1) in acc.iter_mut().zip(a0).zip(a1) {
        *d += madd2(x0, w0, x1, w1, saturate);
    }
}

/// Accumulate one weighted activation row.
pub fn axpy_u8(acc: &mut [i32], a: &[u8], w: i8) {
    let w = w as i32;
    if w == 0 {
        return;
    }
    for (d, &x) in acc.iter_mut().zip(a) {
        *d += x as i32 * w;
    }
}
