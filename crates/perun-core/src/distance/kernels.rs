//! SIMD-accelerated accumulation loops shared by every metric.
//!
//! The `wide` crate provides portable 8-wide f32 lanes (AVX2/SSE on `x86_64`,
//! NEON on `aarch64`, scalar elsewhere). Remainder elements are handled with
//! multi-accumulator scalar tails so short vectors do not collapse onto a
//! single dependency chain.
//!
//! Results agree with a single-precision scalar accumulation to within a few
//! ULPs; bit-exact parity across architectures is not a goal.

use wide::f32x8;

/// Computes the squared L2 distance between two equal-length slices.
///
/// # Panics
///
/// Panics if the slices have different lengths.
#[inline]
#[must_use]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let simd_len = a.len() / 8;
    let mut sum = f32x8::ZERO;
    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        let vb = f32x8::from(&b[offset..offset + 8]);
        let diff = va - vb;
        sum = diff.mul_add(diff, sum);
    }
    let mut result = sum.reduce_add();

    let base = simd_len * 8;
    for i in base..a.len() {
        let diff = a[i] - b[i];
        result += diff * diff;
    }
    result
}

/// Computes the dot product of two equal-length slices.
///
/// # Panics
///
/// Panics if the slices have different lengths.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let simd_len = a.len() / 8;
    let mut sum = f32x8::ZERO;
    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        let vb = f32x8::from(&b[offset..offset + 8]);
        sum = va.mul_add(vb, sum);
    }
    let mut result = sum.reduce_add();

    let base = simd_len * 8;
    for i in base..a.len() {
        result += a[i] * b[i];
    }
    result
}

/// Fused single pass over `(a, b)` yielding `(dot, |b|^2)`.
///
/// Used by the cosine inner loop: the query norm is fixed once, the candidate
/// norm comes out of the same pass as the dot product.
///
/// # Panics
///
/// Panics if the slices have different lengths.
#[inline]
#[must_use]
pub fn dot_and_sqnorm(a: &[f32], b: &[f32]) -> (f32, f32) {
    assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let simd_len = a.len() / 8;
    let mut dot_sum = f32x8::ZERO;
    let mut norm_sum = f32x8::ZERO;
    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        let vb = f32x8::from(&b[offset..offset + 8]);
        dot_sum = va.mul_add(vb, dot_sum);
        norm_sum = vb.mul_add(vb, norm_sum);
    }
    let mut dot = dot_sum.reduce_add();
    let mut sqnorm = norm_sum.reduce_add();

    let base = simd_len * 8;
    for i in base..a.len() {
        dot += a[i] * b[i];
        sqnorm += b[i] * b[i];
    }
    (dot, sqnorm)
}

/// Fused single pass yielding `(dot, |a|^2, |b|^2)` for pairwise cosine.
///
/// # Panics
///
/// Panics if the slices have different lengths.
#[inline]
#[must_use]
pub fn dot_and_norms(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let simd_len = a.len() / 8;
    let mut dot_sum = f32x8::ZERO;
    let mut a_norm = f32x8::ZERO;
    let mut b_norm = f32x8::ZERO;
    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        let vb = f32x8::from(&b[offset..offset + 8]);
        dot_sum = va.mul_add(vb, dot_sum);
        a_norm = va.mul_add(va, a_norm);
        b_norm = vb.mul_add(vb, b_norm);
    }
    let mut dot = dot_sum.reduce_add();
    let mut na = a_norm.reduce_add();
    let mut nb = b_norm.reduce_add();

    let base = simd_len * 8;
    for i in base..a.len() {
        dot += a[i] * b[i];
        na += a[i] * a[i];
        nb += b[i] * b[i];
    }
    (dot, na, nb)
}

/// Computes `|a|^2`.
#[inline]
#[must_use]
pub fn sqnorm(a: &[f32]) -> f32 {
    dot(a, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_l2(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    fn scalar_dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_l2_squared_against_scalar() {
        // Cover both the lane loop and the tail with a non-multiple-of-8 dim.
        let a: Vec<f32> = (0..37).map(|i| i as f32 * 0.37 - 5.0).collect();
        let b: Vec<f32> = (0..37).map(|i| (i as f32).sin()).collect();
        assert!((l2_squared(&a, &b) - scalar_l2(&a, &b)).abs() < 1e-3);
    }

    #[test]
    fn test_dot_against_scalar() {
        let a: Vec<f32> = (0..64).map(|i| i as f32 * 0.01).collect();
        let b: Vec<f32> = (0..64).map(|i| 1.0 - i as f32 * 0.02).collect();
        assert!((dot(&a, &b) - scalar_dot(&a, &b)).abs() < 1e-3);
    }

    #[test]
    fn test_fused_passes_agree() {
        let a: Vec<f32> = (0..19).map(|i| (i as f32).cos()).collect();
        let b: Vec<f32> = (0..19).map(|i| (i as f32 * 0.5).sin()).collect();
        let (d, nb) = dot_and_sqnorm(&a, &b);
        assert!((d - scalar_dot(&a, &b)).abs() < 1e-4);
        assert!((nb - scalar_dot(&b, &b)).abs() < 1e-4);
        let (d2, na, nb2) = dot_and_norms(&a, &b);
        assert!((d2 - d).abs() < 1e-4);
        assert!((na - scalar_dot(&a, &a)).abs() < 1e-4);
        assert!((nb2 - nb).abs() < 1e-4);
    }

    #[test]
    fn test_empty_slices() {
        assert_eq!(l2_squared(&[], &[]), 0.0);
        assert_eq!(dot(&[], &[]), 0.0);
    }
}
