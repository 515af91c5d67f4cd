//! Precision-preserving vector kernels used by every filter in the crate.
//!
//! All reductions over `f32` samples accumulate in `f64`, so the rounding
//! error of a dot product or sum is bounded by the input magnitudes rather
//! than by the vector length. The vector bodies run `wide::f64x4`
//! accumulators, eight samples per iteration on AVX2 targets and four
//! elsewhere; every tail (and the `*_kahan` reference functions) uses
//! scalar Kahan-compensated summation, so the vector and scalar paths agree
//! to within float epsilon on the same input.
//!
//! These are total functions over equal-length slices; a length mismatch is
//! a caller bug and is only checked in debug builds.

use num_complex::Complex32;
use wide::f64x4;

/// Samples consumed per vector iteration, fixed per target at compile time.
#[cfg(target_feature = "avx2")]
pub const SAMPLES_PER_ITER: usize = 8;
/// Samples consumed per vector iteration, fixed per target at compile time.
#[cfg(not(target_feature = "avx2"))]
pub const SAMPLES_PER_ITER: usize = 4;

#[inline(always)]
fn widen4(chunk: &[f32]) -> f64x4 {
    f64x4::from([
        chunk[0] as f64,
        chunk[1] as f64,
        chunk[2] as f64,
        chunk[3] as f64,
    ])
}

#[inline(always)]
fn horizontal_sum(v: f64x4) -> f64 {
    let a = v.to_array();
    (a[0] + a[1]) + (a[2] + a[3])
}

/// Dot product of two `f32` slices, accumulated in `f64`.
///
/// # Example
///
/// ```
/// let a = [1.0f32, 2.0, 3.0];
/// let b = [4.0f32, 5.0, 6.0];
/// assert_eq!(millrace::kernel::dot(&a, &b), 32.0);
/// ```
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let split = a.len() - a.len() % SAMPLES_PER_ITER;
    let (body_a, tail_a) = a.split_at(split);
    let (body_b, tail_b) = b.split_at(split);

    #[cfg(target_feature = "avx2")]
    let body = {
        let mut acc0 = f64x4::splat(0.0);
        let mut acc1 = f64x4::splat(0.0);
        for (ca, cb) in body_a.chunks_exact(8).zip(body_b.chunks_exact(8)) {
            acc0 = widen4(&ca[..4]).mul_add(widen4(&cb[..4]), acc0);
            acc1 = widen4(&ca[4..]).mul_add(widen4(&cb[4..]), acc1);
        }
        horizontal_sum(acc0 + acc1)
    };

    #[cfg(not(target_feature = "avx2"))]
    let body = {
        let mut acc = f64x4::splat(0.0);
        for (ca, cb) in body_a.chunks_exact(4).zip(body_b.chunks_exact(4)) {
            acc = widen4(ca).mul_add(widen4(cb), acc);
        }
        horizontal_sum(acc)
    };

    body + dot_kahan(tail_a, tail_b)
}

/// Sum of an `f32` slice, accumulated in `f64`.
#[inline]
pub fn sum(x: &[f32]) -> f64 {
    let split = x.len() - x.len() % SAMPLES_PER_ITER;
    let (body_x, tail_x) = x.split_at(split);

    #[cfg(target_feature = "avx2")]
    let body = {
        let mut acc0 = f64x4::splat(0.0);
        let mut acc1 = f64x4::splat(0.0);
        for c in body_x.chunks_exact(8) {
            acc0 += widen4(&c[..4]);
            acc1 += widen4(&c[4..]);
        }
        horizontal_sum(acc0 + acc1)
    };

    #[cfg(not(target_feature = "avx2"))]
    let body = {
        let mut acc = f64x4::splat(0.0);
        for c in body_x.chunks_exact(4) {
            acc += widen4(c);
        }
        horizontal_sum(acc)
    };

    body + sum_kahan(tail_x)
}

/// Sum of squares of an `f32` slice, accumulated in `f64`.
#[inline]
pub fn sum_of_squares(x: &[f32]) -> f64 {
    let split = x.len() - x.len() % SAMPLES_PER_ITER;
    let (body_x, tail_x) = x.split_at(split);

    #[cfg(target_feature = "avx2")]
    let body = {
        let mut acc0 = f64x4::splat(0.0);
        let mut acc1 = f64x4::splat(0.0);
        for c in body_x.chunks_exact(8) {
            let lo = widen4(&c[..4]);
            let hi = widen4(&c[4..]);
            acc0 = lo.mul_add(lo, acc0);
            acc1 = hi.mul_add(hi, acc1);
        }
        horizontal_sum(acc0 + acc1)
    };

    #[cfg(not(target_feature = "avx2"))]
    let body = {
        let mut acc = f64x4::splat(0.0);
        for c in body_x.chunks_exact(4) {
            let v = widen4(c);
            acc = v.mul_add(v, acc);
        }
        horizontal_sum(acc)
    };

    body + sum_of_squares_kahan(tail_x)
}

/// Scalar reference dot product with Kahan-compensated `f64` accumulation.
///
/// This is the correctness oracle for [`dot`]; the two agree to within
/// float epsilon on the same input.
pub fn dot_kahan(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = 0.0f64;
    let mut comp = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let term = x as f64 * y as f64 - comp;
        let next = acc + term;
        comp = (next - acc) - term;
        acc = next;
    }
    acc
}

/// Scalar reference sum with Kahan-compensated `f64` accumulation.
pub fn sum_kahan(x: &[f32]) -> f64 {
    let mut acc = 0.0f64;
    let mut comp = 0.0f64;
    for &v in x {
        let term = v as f64 - comp;
        let next = acc + term;
        comp = (next - acc) - term;
        acc = next;
    }
    acc
}

/// Scalar reference sum of squares with Kahan-compensated `f64` accumulation.
pub fn sum_of_squares_kahan(x: &[f32]) -> f64 {
    let mut acc = 0.0f64;
    let mut comp = 0.0f64;
    for &v in x {
        let term = v as f64 * v as f64 - comp;
        let next = acc + term;
        comp = (next - acc) - term;
        acc = next;
    }
    acc
}

/// Multiplies every element by `a` in place.
#[inline]
pub fn scale_in_place(x: &mut [f32], a: f32) {
    for v in x.iter_mut() {
        *v *= a;
    }
}

/// Adds `a * x` into `acc` element-wise.
#[inline]
pub fn scaled_add(acc: &mut [f32], x: &[f32], a: f32) {
    debug_assert_eq!(acc.len(), x.len());
    for (d, &s) in acc.iter_mut().zip(x) {
        *d += a * s;
    }
}

/// Replaces every element with its absolute value.
#[inline]
pub fn abs_in_place(x: &mut [f32]) {
    for v in x.iter_mut() {
        *v = v.abs();
    }
}

/// Clamps every element into `[lo, hi]`. Requires `lo <= hi`.
#[inline]
pub fn clamp_in_place(x: &mut [f32], lo: f32, hi: f32) {
    debug_assert!(lo <= hi);
    for v in x.iter_mut() {
        *v = v.clamp(lo, hi);
    }
}

/// Element-wise complex product of two spectra.
#[inline]
pub fn complex_multiply(a: &[Complex32], b: &[Complex32], out: &mut [Complex32]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), out.len());
    for ((&x, &y), o) in a.iter().zip(b).zip(out.iter_mut()) {
        *o = x * y;
    }
}

/// Element-wise magnitude `sqrt(re² + im²)` of a spectrum.
#[inline]
pub fn complex_magnitude(src: &[Complex32], out: &mut [f32]) {
    debug_assert_eq!(src.len(), out.len());
    for (&c, o) in src.iter().zip(out.iter_mut()) {
        *o = c.norm();
    }
}

/// Element-wise power `re² + im²` of a spectrum.
#[inline]
pub fn complex_power(src: &[Complex32], out: &mut [f32]) {
    debug_assert_eq!(src.len(), out.len());
    for (&c, o) in src.iter().zip(out.iter_mut()) {
        *o = c.norm_sqr();
    }
}

/// Splits an interleaved buffer `[c0, c1, ..., c0, c1, ...]` into
/// per-channel planar vectors. Existing planar contents are replaced.
///
/// [`interleave`] is the exact inverse for any frame count.
pub fn deinterleave(interleaved: &[f32], channels: usize, planar: &mut [Vec<f32>]) {
    debug_assert!(channels > 0);
    debug_assert_eq!(planar.len(), channels);
    debug_assert_eq!(interleaved.len() % channels, 0);
    let frames = interleaved.len() / channels;
    for ch in planar.iter_mut() {
        ch.clear();
        ch.reserve(frames);
    }
    if channels == 2 {
        let (left, right) = planar.split_at_mut(1);
        for pair in interleaved.chunks_exact(2) {
            left[0].push(pair[0]);
            right[0].push(pair[1]);
        }
    } else {
        for frame in interleaved.chunks_exact(channels) {
            for (ch, &s) in planar.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
    }
}

/// Packs per-channel planar vectors back into an interleaved buffer.
///
/// All planar channels must have equal length and `out` must hold exactly
/// `channels * frames` samples.
pub fn interleave(planar: &[Vec<f32>], out: &mut [f32]) {
    let channels = planar.len();
    debug_assert!(channels > 0);
    let frames = planar[0].len();
    debug_assert!(planar.iter().all(|ch| ch.len() == frames));
    debug_assert_eq!(out.len(), channels * frames);
    if channels == 2 {
        for (i, pair) in out.chunks_exact_mut(2).enumerate() {
            pair[0] = planar[0][i];
            pair[1] = planar[1][i];
        }
    } else {
        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
            for (o, ch) in frame.iter_mut().zip(planar) {
                *o = ch[i];
            }
        }
    }
}
