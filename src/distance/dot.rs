//! Negated dot product distance with SIMD optimization
//!
//! The dot product is negated so that "smaller is closer" holds for both
//! supported metrics and the search code never branches on the metric.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Compute the negated dot product of two vectors.
///
/// # Panics
/// Panics if vectors have different dimensions.
#[inline]
pub fn dot_distance(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && a.len() >= 8 {
            return unsafe { dot_distance_avx2(a, b) };
        }
    }

    dot_distance_scalar(a, b)
}

/// Negated dot product from one origin vector to four candidates at once.
///
/// # Panics
/// Panics if any candidate dimension differs from the origin.
#[inline]
pub fn dot_distance_batch4(
    origin: &[f32],
    c1: &[f32],
    c2: &[f32],
    c3: &[f32],
    c4: &[f32],
    result: &mut [f32; 4],
) {
    assert_eq!(origin.len(), c1.len(), "Vector dimensions must match");
    assert_eq!(origin.len(), c2.len(), "Vector dimensions must match");
    assert_eq!(origin.len(), c3.len(), "Vector dimensions must match");
    assert_eq!(origin.len(), c4.len(), "Vector dimensions must match");

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && origin.len() >= 8 {
            return unsafe { dot_distance_batch4_avx2(origin, c1, c2, c3, c4, result) };
        }
    }

    result[0] = dot_distance_scalar(origin, c1);
    result[1] = dot_distance_scalar(origin, c2);
    result[2] = dot_distance_scalar(origin, c3);
    result[3] = dot_distance_scalar(origin, c4);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn dot_distance_avx2(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len();
    let chunks = n / 8;
    let remainder = n % 8;

    let mut sum_vec = _mm256_setzero_ps();

    for i in 0..chunks {
        let offset = i * 8;
        let a_vec = _mm256_loadu_ps(a.as_ptr().add(offset));
        let b_vec = _mm256_loadu_ps(b.as_ptr().add(offset));
        sum_vec = _mm256_add_ps(sum_vec, _mm256_mul_ps(a_vec, b_vec));
    }

    let mut sum = horizontal_sum_avx2(sum_vec);

    for i in (n - remainder)..n {
        sum += a[i] * b[i];
    }

    -sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn dot_distance_batch4_avx2(
    origin: &[f32],
    c1: &[f32],
    c2: &[f32],
    c3: &[f32],
    c4: &[f32],
    result: &mut [f32; 4],
) {
    let n = origin.len();
    let chunks = n / 8;
    let remainder = n % 8;

    let mut sum1 = _mm256_setzero_ps();
    let mut sum2 = _mm256_setzero_ps();
    let mut sum3 = _mm256_setzero_ps();
    let mut sum4 = _mm256_setzero_ps();

    for i in 0..chunks {
        let offset = i * 8;
        let origin_vec = _mm256_loadu_ps(origin.as_ptr().add(offset));

        sum1 = _mm256_add_ps(
            sum1,
            _mm256_mul_ps(origin_vec, _mm256_loadu_ps(c1.as_ptr().add(offset))),
        );
        sum2 = _mm256_add_ps(
            sum2,
            _mm256_mul_ps(origin_vec, _mm256_loadu_ps(c2.as_ptr().add(offset))),
        );
        sum3 = _mm256_add_ps(
            sum3,
            _mm256_mul_ps(origin_vec, _mm256_loadu_ps(c3.as_ptr().add(offset))),
        );
        sum4 = _mm256_add_ps(
            sum4,
            _mm256_mul_ps(origin_vec, _mm256_loadu_ps(c4.as_ptr().add(offset))),
        );
    }

    let mut acc = [
        horizontal_sum_avx2(sum1),
        horizontal_sum_avx2(sum2),
        horizontal_sum_avx2(sum3),
        horizontal_sum_avx2(sum4),
    ];

    for i in (n - remainder)..n {
        let origin_item = origin[i];
        acc[0] += origin_item * c1[i];
        acc[1] += origin_item * c2[i];
        acc[2] += origin_item * c3[i];
        acc[3] += origin_item * c4[i];
    }

    result[0] = -acc[0];
    result[1] = -acc[1];
    result[2] = -acc[2];
    result[3] = -acc[3];
}

fn dot_distance_scalar(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for i in 0..a.len() {
        sum += a[i] * b[i];
    }
    -sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn horizontal_sum_avx2(v: __m256) -> f32 {
    let high = _mm256_extractf128_ps(v, 1);
    let low = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(high, low);

    let shuf = _mm_movehdup_ps(sum128);
    let sum64 = _mm_add_ps(sum128, shuf);
    let shuf2 = _mm_movehl_ps(shuf, sum64);
    let sum32 = _mm_add_ss(sum64, shuf2);

    _mm_cvtss_f32(sum32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_distance_is_negated() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];
        // 4 + 10 + 18 = 32
        assert!((dot_distance(&a, &b) + 32.0).abs() < 0.001);
    }

    #[test]
    fn test_closer_vector_has_smaller_distance() {
        let query = vec![1.0, 0.0];
        let aligned = vec![1.0, 0.0];
        let orthogonal = vec![0.0, 1.0];
        assert!(dot_distance(&query, &aligned) < dot_distance(&query, &orthogonal));
    }

    #[test]
    fn test_dot_distance_simd_width() {
        for n in [1usize, 7, 8, 9, 31, 64, 129] {
            let a: Vec<f32> = (0..n).map(|i| (i as f32 * 0.3).sin()).collect();
            let b: Vec<f32> = (0..n).map(|i| (i as f32 * 0.7).cos()).collect();

            let fast = dot_distance(&a, &b);
            let slow = dot_distance_scalar(&a, &b);
            assert!(
                (fast - slow).abs() <= 1e-3 * slow.abs().max(1.0),
                "n = {}: {} vs {}",
                n,
                fast,
                slow
            );
        }
    }

    #[test]
    fn test_dot_distance_batch4_matches_single() {
        let n = 40;
        let origin: Vec<f32> = (0..n).map(|i| i as f32 * 0.1).collect();
        let rows: Vec<Vec<f32>> = (0..4)
            .map(|r| (0..n).map(|i| ((i * (r + 2)) as f32).sin()).collect())
            .collect();

        let mut batch = [0.0f32; 4];
        dot_distance_batch4(&origin, &rows[0], &rows[1], &rows[2], &rows[3], &mut batch);

        for (i, row) in rows.iter().enumerate() {
            let single = dot_distance(&origin, row);
            assert!(
                (batch[i] - single).abs() <= 1e-3 * single.abs().max(1.0),
                "lane {}: {} vs {}",
                i,
                batch[i],
                single
            );
        }
    }
}
