//! SIMD kernels for x86_64 (AVX2+FMA, F16C) and aarch64 (NEON).
//!
//! All reductions use four unrolled accumulators combined with a pairwise
//! tree before the final horizontal sum, and hand the lane remainder to the
//! 2x unrolled scalar kernels. Numerical results therefore agree with the
//! scalar reference only within a small epsilon, never bitwise.

#![allow(clippy::missing_safety_doc)]

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
use super::scalar;
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
use half::bf16;
#[cfg(target_arch = "x86_64")]
use half::f16;

// ============================================================================
// x86_64: AVX2 + FMA (+ F16C for the f16 kernels)
// ============================================================================

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use super::*;
    use std::arch::x86_64::*;
    use half::bf16;

    #[inline(always)]
    unsafe fn hsum256(v: __m256) -> f32 {
        unsafe {
            let lo = _mm256_castps256_ps128(v);
            let hi = _mm256_extractf128_ps::<1>(v);
            let sum = _mm_add_ps(lo, hi);
            let shuf = _mm_movehl_ps(sum, sum);
            let sum = _mm_add_ps(sum, shuf);
            let shuf = _mm_shuffle_ps::<0x1>(sum, sum);
            _mm_cvtss_f32(_mm_add_ss(sum, shuf))
        }
    }

    /// Load 8 bf16 values and widen them to f32 lanes (bf16 is the upper
    /// half of an f32 bit pattern).
    #[inline(always)]
    unsafe fn load_bf16x8(ptr: *const bf16) -> __m256 {
        unsafe {
            let raw = _mm_loadu_si128(ptr as *const __m128i);
            let widened = _mm256_cvtepu16_epi32(raw);
            _mm256_castsi256_ps(_mm256_slli_epi32::<16>(widened))
        }
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn inner_product_f32(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = _mm256_setzero_ps();
            let mut s1 = _mm256_setzero_ps();
            let mut s2 = _mm256_setzero_ps();
            let mut s3 = _mm256_setzero_ps();

            let mut i = 0;
            while i + 32 <= n {
                s0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), s0);
                s1 = _mm256_fmadd_ps(
                    _mm256_loadu_ps(pa.add(i + 8)),
                    _mm256_loadu_ps(pb.add(i + 8)),
                    s1,
                );
                s2 = _mm256_fmadd_ps(
                    _mm256_loadu_ps(pa.add(i + 16)),
                    _mm256_loadu_ps(pb.add(i + 16)),
                    s2,
                );
                s3 = _mm256_fmadd_ps(
                    _mm256_loadu_ps(pa.add(i + 24)),
                    _mm256_loadu_ps(pb.add(i + 24)),
                    s3,
                );
                i += 32;
            }
            while i + 8 <= n {
                s0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), s0);
                i += 8;
            }

            s0 = _mm256_add_ps(s0, s1);
            s2 = _mm256_add_ps(s2, s3);
            let sum = hsum256(_mm256_add_ps(s0, s2));
            sum + scalar::inner_product(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn squared_sum_f32(v: &[f32]) -> f32 {
        let n = v.len();
        let p = v.as_ptr();
        unsafe {
            let mut s0 = _mm256_setzero_ps();
            let mut s1 = _mm256_setzero_ps();
            let mut s2 = _mm256_setzero_ps();
            let mut s3 = _mm256_setzero_ps();

            let mut i = 0;
            while i + 32 <= n {
                let a0 = _mm256_loadu_ps(p.add(i));
                let a1 = _mm256_loadu_ps(p.add(i + 8));
                let a2 = _mm256_loadu_ps(p.add(i + 16));
                let a3 = _mm256_loadu_ps(p.add(i + 24));
                s0 = _mm256_fmadd_ps(a0, a0, s0);
                s1 = _mm256_fmadd_ps(a1, a1, s1);
                s2 = _mm256_fmadd_ps(a2, a2, s2);
                s3 = _mm256_fmadd_ps(a3, a3, s3);
                i += 32;
            }
            while i + 8 <= n {
                let a = _mm256_loadu_ps(p.add(i));
                s0 = _mm256_fmadd_ps(a, a, s0);
                i += 8;
            }

            s0 = _mm256_add_ps(s0, s1);
            s2 = _mm256_add_ps(s2, s3);
            let sum = hsum256(_mm256_add_ps(s0, s2));
            sum + scalar::squared_sum(&v[i..])
        }
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn l2_distance_squared_f32(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = _mm256_setzero_ps();
            let mut s1 = _mm256_setzero_ps();
            let mut s2 = _mm256_setzero_ps();
            let mut s3 = _mm256_setzero_ps();

            let mut i = 0;
            while i + 32 <= n {
                let d0 = _mm256_sub_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)));
                let d1 = _mm256_sub_ps(
                    _mm256_loadu_ps(pa.add(i + 8)),
                    _mm256_loadu_ps(pb.add(i + 8)),
                );
                let d2 = _mm256_sub_ps(
                    _mm256_loadu_ps(pa.add(i + 16)),
                    _mm256_loadu_ps(pb.add(i + 16)),
                );
                let d3 = _mm256_sub_ps(
                    _mm256_loadu_ps(pa.add(i + 24)),
                    _mm256_loadu_ps(pb.add(i + 24)),
                );
                s0 = _mm256_fmadd_ps(d0, d0, s0);
                s1 = _mm256_fmadd_ps(d1, d1, s1);
                s2 = _mm256_fmadd_ps(d2, d2, s2);
                s3 = _mm256_fmadd_ps(d3, d3, s3);
                i += 32;
            }
            while i + 8 <= n {
                let d = _mm256_sub_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)));
                s0 = _mm256_fmadd_ps(d, d, s0);
                i += 8;
            }

            s0 = _mm256_add_ps(s0, s1);
            s2 = _mm256_add_ps(s2, s3);
            let sum = hsum256(_mm256_add_ps(s0, s2));
            sum + scalar::l2_distance_squared(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn inner_product_bf16(a: &[bf16], b: &[bf16]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = _mm256_setzero_ps();
            let mut s1 = _mm256_setzero_ps();

            let mut i = 0;
            while i + 16 <= n {
                s0 = _mm256_fmadd_ps(load_bf16x8(pa.add(i)), load_bf16x8(pb.add(i)), s0);
                s1 = _mm256_fmadd_ps(load_bf16x8(pa.add(i + 8)), load_bf16x8(pb.add(i + 8)), s1);
                i += 16;
            }
            while i + 8 <= n {
                s0 = _mm256_fmadd_ps(load_bf16x8(pa.add(i)), load_bf16x8(pb.add(i)), s0);
                i += 8;
            }

            let sum = hsum256(_mm256_add_ps(s0, s1));
            sum + scalar::inner_product(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn l2_distance_squared_bf16(a: &[bf16], b: &[bf16]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = _mm256_setzero_ps();
            let mut s1 = _mm256_setzero_ps();

            let mut i = 0;
            while i + 16 <= n {
                let d0 = _mm256_sub_ps(load_bf16x8(pa.add(i)), load_bf16x8(pb.add(i)));
                let d1 = _mm256_sub_ps(load_bf16x8(pa.add(i + 8)), load_bf16x8(pb.add(i + 8)));
                s0 = _mm256_fmadd_ps(d0, d0, s0);
                s1 = _mm256_fmadd_ps(d1, d1, s1);
                i += 16;
            }
            while i + 8 <= n {
                let d = _mm256_sub_ps(load_bf16x8(pa.add(i)), load_bf16x8(pb.add(i)));
                s0 = _mm256_fmadd_ps(d, d, s0);
                i += 8;
            }

            let sum = hsum256(_mm256_add_ps(s0, s1));
            sum + scalar::l2_distance_squared(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn l2_distance_squared_f32_bf16(a: &[f32], b: &[bf16]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = _mm256_setzero_ps();
            let mut s1 = _mm256_setzero_ps();

            let mut i = 0;
            while i + 16 <= n {
                let d0 = _mm256_sub_ps(_mm256_loadu_ps(pa.add(i)), load_bf16x8(pb.add(i)));
                let d1 = _mm256_sub_ps(
                    _mm256_loadu_ps(pa.add(i + 8)),
                    load_bf16x8(pb.add(i + 8)),
                );
                s0 = _mm256_fmadd_ps(d0, d0, s0);
                s1 = _mm256_fmadd_ps(d1, d1, s1);
                i += 16;
            }
            while i + 8 <= n {
                let d = _mm256_sub_ps(_mm256_loadu_ps(pa.add(i)), load_bf16x8(pb.add(i)));
                s0 = _mm256_fmadd_ps(d, d, s0);
                i += 8;
            }

            let sum = hsum256(_mm256_add_ps(s0, s1));
            sum + scalar::l2_distance_squared_f32_bf16(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "avx2", enable = "fma", enable = "f16c")]
    pub unsafe fn inner_product_f16(a: &[f16], b: &[f16]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = _mm256_setzero_ps();
            let mut s1 = _mm256_setzero_ps();

            let mut i = 0;
            while i + 16 <= n {
                let a0 = _mm256_cvtph_ps(_mm_loadu_si128(pa.add(i) as *const __m128i));
                let b0 = _mm256_cvtph_ps(_mm_loadu_si128(pb.add(i) as *const __m128i));
                let a1 = _mm256_cvtph_ps(_mm_loadu_si128(pa.add(i + 8) as *const __m128i));
                let b1 = _mm256_cvtph_ps(_mm_loadu_si128(pb.add(i + 8) as *const __m128i));
                s0 = _mm256_fmadd_ps(a0, b0, s0);
                s1 = _mm256_fmadd_ps(a1, b1, s1);
                i += 16;
            }
            while i + 8 <= n {
                let a0 = _mm256_cvtph_ps(_mm_loadu_si128(pa.add(i) as *const __m128i));
                let b0 = _mm256_cvtph_ps(_mm_loadu_si128(pb.add(i) as *const __m128i));
                s0 = _mm256_fmadd_ps(a0, b0, s0);
                i += 8;
            }

            let sum = hsum256(_mm256_add_ps(s0, s1));
            sum + scalar::inner_product(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "avx2", enable = "fma", enable = "f16c")]
    pub unsafe fn l2_distance_squared_f16(a: &[f16], b: &[f16]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = _mm256_setzero_ps();
            let mut s1 = _mm256_setzero_ps();

            let mut i = 0;
            while i + 16 <= n {
                let d0 = _mm256_sub_ps(
                    _mm256_cvtph_ps(_mm_loadu_si128(pa.add(i) as *const __m128i)),
                    _mm256_cvtph_ps(_mm_loadu_si128(pb.add(i) as *const __m128i)),
                );
                let d1 = _mm256_sub_ps(
                    _mm256_cvtph_ps(_mm_loadu_si128(pa.add(i + 8) as *const __m128i)),
                    _mm256_cvtph_ps(_mm_loadu_si128(pb.add(i + 8) as *const __m128i)),
                );
                s0 = _mm256_fmadd_ps(d0, d0, s0);
                s1 = _mm256_fmadd_ps(d1, d1, s1);
                i += 16;
            }
            while i + 8 <= n {
                let d = _mm256_sub_ps(
                    _mm256_cvtph_ps(_mm_loadu_si128(pa.add(i) as *const __m128i)),
                    _mm256_cvtph_ps(_mm_loadu_si128(pb.add(i) as *const __m128i)),
                );
                s0 = _mm256_fmadd_ps(d, d, s0);
                i += 8;
            }

            let sum = hsum256(_mm256_add_ps(s0, s1));
            sum + scalar::l2_distance_squared(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn scale_f32(inout: &mut [f32], factor: f32) {
        let n = inout.len();
        let p = inout.as_mut_ptr();
        unsafe {
            let f = _mm256_set1_ps(factor);
            let mut i = 0;
            while i + 8 <= n {
                _mm256_storeu_ps(p.add(i), _mm256_mul_ps(_mm256_loadu_ps(p.add(i)), f));
                i += 8;
            }
            for x in &mut inout[i..] {
                *x *= factor;
            }
        }
    }
}

#[cfg(target_arch = "x86_64")]
pub use avx2::*;

// ============================================================================
// aarch64: NEON
// ============================================================================

#[cfg(target_arch = "aarch64")]
mod neon {
    use super::*;
    use std::arch::aarch64::*;

    /// Widen 4 bf16 values to f32 lanes (bf16 is the upper half of an f32
    /// bit pattern).
    #[inline(always)]
    unsafe fn load_bf16x4(ptr: *const bf16) -> float32x4_t {
        unsafe {
            let raw = vld1_u16(ptr as *const u16);
            let widened = vmovl_u16(raw);
            vreinterpretq_f32_u32(vshlq_n_u32::<16>(widened))
        }
    }

    #[target_feature(enable = "neon")]
    pub unsafe fn inner_product_f32(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = vdupq_n_f32(0.0);
            let mut s1 = vdupq_n_f32(0.0);
            let mut s2 = vdupq_n_f32(0.0);
            let mut s3 = vdupq_n_f32(0.0);

            let mut i = 0;
            while i + 16 <= n {
                s0 = vfmaq_f32(s0, vld1q_f32(pa.add(i)), vld1q_f32(pb.add(i)));
                s1 = vfmaq_f32(s1, vld1q_f32(pa.add(i + 4)), vld1q_f32(pb.add(i + 4)));
                s2 = vfmaq_f32(s2, vld1q_f32(pa.add(i + 8)), vld1q_f32(pb.add(i + 8)));
                s3 = vfmaq_f32(s3, vld1q_f32(pa.add(i + 12)), vld1q_f32(pb.add(i + 12)));
                i += 16;
            }
            while i + 4 <= n {
                s0 = vfmaq_f32(s0, vld1q_f32(pa.add(i)), vld1q_f32(pb.add(i)));
                i += 4;
            }

            s0 = vaddq_f32(s0, s1);
            s2 = vaddq_f32(s2, s3);
            let sum = vaddvq_f32(vaddq_f32(s0, s2));
            sum + scalar::inner_product(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "neon")]
    pub unsafe fn squared_sum_f32(v: &[f32]) -> f32 {
        let n = v.len();
        let p = v.as_ptr();
        unsafe {
            let mut s0 = vdupq_n_f32(0.0);
            let mut s1 = vdupq_n_f32(0.0);
            let mut s2 = vdupq_n_f32(0.0);
            let mut s3 = vdupq_n_f32(0.0);

            let mut i = 0;
            while i + 16 <= n {
                let a0 = vld1q_f32(p.add(i));
                let a1 = vld1q_f32(p.add(i + 4));
                let a2 = vld1q_f32(p.add(i + 8));
                let a3 = vld1q_f32(p.add(i + 12));
                s0 = vfmaq_f32(s0, a0, a0);
                s1 = vfmaq_f32(s1, a1, a1);
                s2 = vfmaq_f32(s2, a2, a2);
                s3 = vfmaq_f32(s3, a3, a3);
                i += 16;
            }
            while i + 4 <= n {
                let a = vld1q_f32(p.add(i));
                s0 = vfmaq_f32(s0, a, a);
                i += 4;
            }

            s0 = vaddq_f32(s0, s1);
            s2 = vaddq_f32(s2, s3);
            let sum = vaddvq_f32(vaddq_f32(s0, s2));
            sum + scalar::squared_sum(&v[i..])
        }
    }

    #[target_feature(enable = "neon")]
    pub unsafe fn l2_distance_squared_f32(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = vdupq_n_f32(0.0);
            let mut s1 = vdupq_n_f32(0.0);
            let mut s2 = vdupq_n_f32(0.0);
            let mut s3 = vdupq_n_f32(0.0);

            let mut i = 0;
            while i + 16 <= n {
                let d0 = vsubq_f32(vld1q_f32(pa.add(i)), vld1q_f32(pb.add(i)));
                let d1 = vsubq_f32(vld1q_f32(pa.add(i + 4)), vld1q_f32(pb.add(i + 4)));
                let d2 = vsubq_f32(vld1q_f32(pa.add(i + 8)), vld1q_f32(pb.add(i + 8)));
                let d3 = vsubq_f32(vld1q_f32(pa.add(i + 12)), vld1q_f32(pb.add(i + 12)));
                s0 = vfmaq_f32(s0, d0, d0);
                s1 = vfmaq_f32(s1, d1, d1);
                s2 = vfmaq_f32(s2, d2, d2);
                s3 = vfmaq_f32(s3, d3, d3);
                i += 16;
            }
            while i + 4 <= n {
                let d = vsubq_f32(vld1q_f32(pa.add(i)), vld1q_f32(pb.add(i)));
                s0 = vfmaq_f32(s0, d, d);
                i += 4;
            }

            s0 = vaddq_f32(s0, s1);
            s2 = vaddq_f32(s2, s3);
            let sum = vaddvq_f32(vaddq_f32(s0, s2));
            sum + scalar::l2_distance_squared(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "neon")]
    pub unsafe fn inner_product_bf16(a: &[bf16], b: &[bf16]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = vdupq_n_f32(0.0);
            let mut s1 = vdupq_n_f32(0.0);

            let mut i = 0;
            while i + 8 <= n {
                s0 = vfmaq_f32(s0, load_bf16x4(pa.add(i)), load_bf16x4(pb.add(i)));
                s1 = vfmaq_f32(s1, load_bf16x4(pa.add(i + 4)), load_bf16x4(pb.add(i + 4)));
                i += 8;
            }
            while i + 4 <= n {
                s0 = vfmaq_f32(s0, load_bf16x4(pa.add(i)), load_bf16x4(pb.add(i)));
                i += 4;
            }

            let sum = vaddvq_f32(vaddq_f32(s0, s1));
            sum + scalar::inner_product(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "neon")]
    pub unsafe fn l2_distance_squared_bf16(a: &[bf16], b: &[bf16]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = vdupq_n_f32(0.0);
            let mut s1 = vdupq_n_f32(0.0);

            let mut i = 0;
            while i + 8 <= n {
                let d0 = vsubq_f32(load_bf16x4(pa.add(i)), load_bf16x4(pb.add(i)));
                let d1 = vsubq_f32(load_bf16x4(pa.add(i + 4)), load_bf16x4(pb.add(i + 4)));
                s0 = vfmaq_f32(s0, d0, d0);
                s1 = vfmaq_f32(s1, d1, d1);
                i += 8;
            }
            while i + 4 <= n {
                let d = vsubq_f32(load_bf16x4(pa.add(i)), load_bf16x4(pb.add(i)));
                s0 = vfmaq_f32(s0, d, d);
                i += 4;
            }

            let sum = vaddvq_f32(vaddq_f32(s0, s1));
            sum + scalar::l2_distance_squared(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "neon")]
    pub unsafe fn l2_distance_squared_f32_bf16(a: &[f32], b: &[bf16]) -> f32 {
        let n = a.len();
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        unsafe {
            let mut s0 = vdupq_n_f32(0.0);
            let mut s1 = vdupq_n_f32(0.0);

            let mut i = 0;
            while i + 8 <= n {
                let d0 = vsubq_f32(vld1q_f32(pa.add(i)), load_bf16x4(pb.add(i)));
                let d1 = vsubq_f32(vld1q_f32(pa.add(i + 4)), load_bf16x4(pb.add(i + 4)));
                s0 = vfmaq_f32(s0, d0, d0);
                s1 = vfmaq_f32(s1, d1, d1);
                i += 8;
            }
            while i + 4 <= n {
                let d = vsubq_f32(vld1q_f32(pa.add(i)), load_bf16x4(pb.add(i)));
                s0 = vfmaq_f32(s0, d, d);
                i += 4;
            }

            let sum = vaddvq_f32(vaddq_f32(s0, s1));
            sum + scalar::l2_distance_squared_f32_bf16(&a[i..], &b[i..])
        }
    }

    #[target_feature(enable = "neon")]
    pub unsafe fn scale_f32(inout: &mut [f32], factor: f32) {
        let n = inout.len();
        let p = inout.as_mut_ptr();
        unsafe {
            let f = vdupq_n_f32(factor);
            let mut i = 0;
            while i + 4 <= n {
                vst1q_f32(p.add(i), vmulq_f32(vld1q_f32(p.add(i)), f));
                i += 4;
            }
            for x in &mut inout[i..] {
                *x *= factor;
            }
        }
    }
}

#[cfg(target_arch = "aarch64")]
pub use neon::*;
