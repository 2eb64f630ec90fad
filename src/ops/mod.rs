//! Dense vector kernels with runtime SIMD dispatch.
//!
//! Every public function picks the best implementation the host CPU
//! supports (AVX2+FMA on x86_64, NEON on aarch64) and falls back to the
//! scalar reference otherwise. The dispatch is a single branch per call;
//! the feature probe itself is cached by the standard library.
//!
//! Contracts inherited from the underlying ANN semantics:
//! - `inner_product_distance` of two empty vectors is exactly `1.0`
//! - `l2_distance_squared` of a vector with itself is exactly `0.0`
//! - normalization divides by `sqrt(sum of squares) + 1e-30`; the additive
//!   term is the guard against division by zero and must not be removed

pub mod scalar;
pub mod simd;

use half::{bf16, f16};

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn have_avx2() -> bool {
    is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn have_f16c() -> bool {
    have_avx2() && is_x86_feature_detected!("f16c")
}

// ============================================================================
// Inner product
// ============================================================================

/// Dot product of two f32 slices. `a` and `b` may alias, in which case the
/// dedicated squared-sum path is used.
#[inline]
#[allow(unreachable_code)]
pub fn inner_product_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    if std::ptr::eq(a.as_ptr(), b.as_ptr()) {
        return squared_sum_f32(a);
    }
    #[cfg(target_arch = "x86_64")]
    {
        if have_avx2() {
            return unsafe { simd::inner_product_f32(a, b) };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { simd::inner_product_f32(a, b) };
    }
    scalar::inner_product(a, b)
}

#[inline]
#[allow(unreachable_code)]
pub fn inner_product_bf16(a: &[bf16], b: &[bf16]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "x86_64")]
    {
        if have_avx2() {
            return unsafe { simd::inner_product_bf16(a, b) };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { simd::inner_product_bf16(a, b) };
    }
    if std::ptr::eq(a.as_ptr(), b.as_ptr()) {
        return scalar::squared_sum(a);
    }
    scalar::inner_product(a, b)
}

#[inline]
#[allow(unreachable_code)]
pub fn inner_product_f16(a: &[f16], b: &[f16]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "x86_64")]
    {
        if have_f16c() {
            return unsafe { simd::inner_product_f16(a, b) };
        }
    }
    if std::ptr::eq(a.as_ptr(), b.as_ptr()) {
        return scalar::squared_sum(a);
    }
    scalar::inner_product(a, b)
}

/// `1 - inner_product`. Returns exactly `1.0` on empty input.
#[inline]
pub fn inner_product_distance_f32(a: &[f32], b: &[f32]) -> f32 {
    1.0 - inner_product_f32(a, b)
}

#[inline]
pub fn inner_product_distance_bf16(a: &[bf16], b: &[bf16]) -> f32 {
    1.0 - inner_product_bf16(a, b)
}

#[inline]
pub fn inner_product_distance_f16(a: &[f16], b: &[f16]) -> f32 {
    1.0 - inner_product_f16(a, b)
}

// ============================================================================
// Squared sums
// ============================================================================

#[inline]
#[allow(unreachable_code)]
pub fn squared_sum_f32(v: &[f32]) -> f32 {
    #[cfg(target_arch = "x86_64")]
    {
        if have_avx2() {
            return unsafe { simd::squared_sum_f32(v) };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { simd::squared_sum_f32(v) };
    }
    scalar::squared_sum(v)
}

// ============================================================================
// Squared L2 distance
// ============================================================================

/// Squared Euclidean distance. Returns exactly `0.0` when `a` and `b` alias.
#[inline]
#[allow(unreachable_code)]
pub fn l2_distance_squared_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    if std::ptr::eq(a.as_ptr(), b.as_ptr()) {
        return 0.0;
    }
    #[cfg(target_arch = "x86_64")]
    {
        if have_avx2() {
            return unsafe { simd::l2_distance_squared_f32(a, b) };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { simd::l2_distance_squared_f32(a, b) };
    }
    scalar::l2_distance_squared(a, b)
}

#[inline]
#[allow(unreachable_code)]
pub fn l2_distance_squared_bf16(a: &[bf16], b: &[bf16]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    if std::ptr::eq(a.as_ptr(), b.as_ptr()) {
        return 0.0;
    }
    #[cfg(target_arch = "x86_64")]
    {
        if have_avx2() {
            return unsafe { simd::l2_distance_squared_bf16(a, b) };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { simd::l2_distance_squared_bf16(a, b) };
    }
    scalar::l2_distance_squared(a, b)
}

#[inline]
#[allow(unreachable_code)]
pub fn l2_distance_squared_f16(a: &[f16], b: &[f16]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    if std::ptr::eq(a.as_ptr(), b.as_ptr()) {
        return 0.0;
    }
    #[cfg(target_arch = "x86_64")]
    {
        if have_f16c() {
            return unsafe { simd::l2_distance_squared_f16(a, b) };
        }
    }
    scalar::l2_distance_squared(a, b)
}

/// Mixed-precision squared L2: f32 query against bf16 storage. This is the
/// only legal cross-precision pair; the inputs must not alias.
#[inline]
#[allow(unreachable_code)]
pub fn l2_distance_squared_f32_bf16(a: &[f32], b: &[bf16]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "x86_64")]
    {
        if have_avx2() {
            return unsafe { simd::l2_distance_squared_f32_bf16(a, b) };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { simd::l2_distance_squared_f32_bf16(a, b) };
    }
    scalar::l2_distance_squared_f32_bf16(a, b)
}

// ============================================================================
// Normalization
// ============================================================================

/// Rescale to unit L2 norm in place.
#[inline]
#[allow(unreachable_code)]
pub fn normalize_f32(inout: &mut [f32]) {
    let factor = 1.0f32 / (squared_sum_f32(inout).sqrt() + 1e-30f32);
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return unsafe { simd::scale_f32(inout, factor) };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { simd::scale_f32(inout, factor) };
    }
    for x in inout.iter_mut() {
        *x *= factor;
    }
}

/// Half-precision normalization widens to f32 for the reduction and the
/// multiply, then demotes on store.
pub fn normalize_bf16(inout: &mut [bf16]) {
    let squared_sum = {
        let v: &[bf16] = inout;
        inner_product_bf16(v, v)
    };
    let factor = 1.0f32 / (squared_sum.sqrt() + 1e-30f32);
    for x in inout.iter_mut() {
        *x = bf16::from_f32(x.to_f32() * factor);
    }
}

pub fn normalize_f16(inout: &mut [f16]) {
    let squared_sum = {
        let v: &[f16] = inout;
        inner_product_f16(v, v)
    };
    let factor = 1.0f32 / (squared_sum.sqrt() + 1e-30f32);
    for x in inout.iter_mut() {
        *x = f16::from_f32(x.to_f32() * factor);
    }
}

// ============================================================================
// Precision conversion
// ============================================================================

pub fn quantize_f32_to_bf16(input: &[f32], out: &mut [bf16]) {
    scalar::convert(input, out);
}

pub fn quantize_f32_to_f16(input: &[f32], out: &mut [f16]) {
    scalar::convert(input, out);
}

pub fn bf16_to_f32(input: &[bf16], out: &mut [f32]) {
    scalar::convert(input, out);
}

pub fn f16_to_f32(input: &[f16], out: &mut [f32]) {
    scalar::convert(input, out);
}

// ============================================================================
// Target introspection
// ============================================================================

/// SIMD targets this build can dispatch to on the current host.
pub fn supported_targets() -> Vec<&'static str> {
    let mut targets = Vec::new();
    #[cfg(target_arch = "x86_64")]
    {
        if have_f16c() {
            targets.push("avx2+f16c");
        }
        if have_avx2() {
            targets.push("avx2");
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        targets.push("neon");
    }
    targets.push("scalar");
    targets
}

/// The target the dispatcher actually selects for f32 kernels.
#[allow(unreachable_code)]
pub fn runtime_target() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    {
        if have_avx2() {
            return "avx2";
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        return "neon";
    }
    "scalar"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize, scale: f32, offset: f32) -> Vec<f32> {
        (0..n).map(|i| (i as f32) * scale + offset).collect()
    }

    #[test]
    fn test_inner_product_agrees_with_scalar_reference() {
        // Cover remainders around the unroll widths
        for n in [0, 1, 2, 7, 8, 9, 31, 32, 33, 100, 257] {
            let a = sample(n, 0.01, -1.0);
            let b = sample(n, -0.02, 0.5);
            let reference: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
            let got = inner_product_f32(&a, &b);
            assert!(
                (got - reference).abs() <= 1e-3,
                "n={n}: {got} vs {reference}"
            );
        }
    }

    #[test]
    fn test_l2_agrees_with_scalar_reference() {
        for n in [0, 1, 5, 8, 16, 33, 128, 300] {
            let a = sample(n, 0.03, -2.0);
            let b = sample(n, 0.01, 1.0);
            let reference: f32 = a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum();
            let got = l2_distance_squared_f32(&a, &b);
            assert!(
                (got - reference).abs() <= 1e-2,
                "n={n}: {got} vs {reference}"
            );
        }
    }

    #[test]
    fn test_alias_safety() {
        let v = sample(65, 0.1, -3.0);
        let squared: f32 = v.iter().map(|x| x * x).sum();
        assert!((inner_product_f32(&v, &v) - squared).abs() <= 1e-3);
        assert_eq!(l2_distance_squared_f32(&v, &v), 0.0);
    }

    #[test]
    fn test_empty_input_contracts() {
        let empty: [f32; 0] = [];
        assert_eq!(inner_product_distance_f32(&empty, &empty), 1.0);
        assert_eq!(l2_distance_squared_f32(&empty, &empty), 0.0);
    }

    #[test]
    fn test_normalize_f32_idempotent_norm() {
        for n in [1, 3, 8, 17, 100] {
            let mut v = sample(n, 0.7, 1.0);
            normalize_f32(&mut v);
            let norm_sq = squared_sum_f32(&v);
            assert!((norm_sq - 1.0).abs() <= 1e-6, "n={n}: {norm_sq}");
        }
    }

    #[test]
    fn test_normalize_half_precision_norm() {
        let src = sample(64, 0.5, -10.0);

        let mut v: Vec<half::bf16> = src.iter().map(|&x| half::bf16::from_f32(x)).collect();
        normalize_bf16(&mut v);
        let norm_sq: f32 = v.iter().map(|x| x.to_f32() * x.to_f32()).sum();
        assert!((norm_sq - 1.0).abs() <= 1e-2, "bf16 norm: {norm_sq}");

        let mut v: Vec<half::f16> = src.iter().map(|&x| half::f16::from_f32(x)).collect();
        normalize_f16(&mut v);
        let norm_sq: f32 = v.iter().map(|x| x.to_f32() * x.to_f32()).sum();
        assert!((norm_sq - 1.0).abs() <= 1e-2, "f16 norm: {norm_sq}");
    }

    #[test]
    fn test_bf16_kernels_agree_with_f32() {
        let a = sample(99, 0.02, -1.0);
        let b = sample(99, -0.01, 0.7);
        let a16: Vec<half::bf16> = a.iter().map(|&x| half::bf16::from_f32(x)).collect();
        let b16: Vec<half::bf16> = b.iter().map(|&x| half::bf16::from_f32(x)).collect();

        let exact: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        assert!((inner_product_bf16(&a16, &b16) - exact).abs() < 0.1);

        let exact_l2: f32 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        assert!((l2_distance_squared_bf16(&a16, &b16) - exact_l2).abs() < 0.1);
        assert!((l2_distance_squared_f32_bf16(&a, &b16) - exact_l2).abs() < 0.1);
    }

    #[test]
    fn test_f16_kernels_agree_with_f32() {
        let a = sample(50, 0.02, -0.5);
        let b = sample(50, -0.015, 0.4);
        let a16: Vec<half::f16> = a.iter().map(|&x| half::f16::from_f32(x)).collect();
        let b16: Vec<half::f16> = b.iter().map(|&x| half::f16::from_f32(x)).collect();

        let exact: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        assert!((inner_product_f16(&a16, &b16) - exact).abs() < 0.05);

        let exact_l2: f32 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        assert!((l2_distance_squared_f16(&a16, &b16) - exact_l2).abs() < 0.05);
    }

    #[test]
    fn test_quantize_round_trips() {
        let src = sample(40, 0.25, -5.0);

        let mut b = vec![half::bf16::ZERO; 40];
        quantize_f32_to_bf16(&src, &mut b);
        let mut back = vec![0.0f32; 40];
        bf16_to_f32(&b, &mut back);
        for (x, y) in src.iter().zip(back.iter()) {
            assert!((x - y).abs() <= x.abs() * 0.01 + 0.05);
        }

        let mut h = vec![half::f16::ZERO; 40];
        quantize_f32_to_f16(&src, &mut h);
        let mut back = vec![0.0f32; 40];
        f16_to_f32(&h, &mut back);
        for (x, y) in src.iter().zip(back.iter()) {
            assert!((x - y).abs() <= x.abs() * 0.01 + 0.05);
        }
    }

    #[test]
    fn test_target_introspection() {
        let targets = supported_targets();
        assert!(!targets.is_empty());
        assert!(targets.contains(&"scalar"));
        assert!(targets.contains(&runtime_target()));
    }
}
