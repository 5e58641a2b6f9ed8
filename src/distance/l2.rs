//! Squared Euclidean distance with SIMD optimization
//!
//! Distances are left squared: the square root is monotonic, so rankings are
//! unaffected and the hot path avoids it.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Compute squared Euclidean distance between two vectors.
///
/// # Panics
/// Panics if vectors have different dimensions.
#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && a.len() >= 8 {
            return unsafe { l2_distance_avx2(a, b) };
        }
    }

    l2_distance_scalar(a, b)
}

/// Squared Euclidean distance from one origin vector to four candidates at
/// once. The four accumulators let the CPU overlap the loads of all four
/// candidate rows, which matters when the rows come straight from page cache.
///
/// # Panics
/// Panics if any candidate dimension differs from the origin.
#[inline]
pub fn l2_distance_batch4(
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
            return unsafe { l2_distance_batch4_avx2(origin, c1, c2, c3, c4, result) };
        }
    }

    result[0] = l2_distance_scalar(origin, c1);
    result[1] = l2_distance_scalar(origin, c2);
    result[2] = l2_distance_scalar(origin, c3);
    result[3] = l2_distance_scalar(origin, c4);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn l2_distance_avx2(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len();
    let chunks = n / 8;
    let remainder = n % 8;

    let mut sum_vec = _mm256_setzero_ps();

    for i in 0..chunks {
        let offset = i * 8;
        let a_vec = _mm256_loadu_ps(a.as_ptr().add(offset));
        let b_vec = _mm256_loadu_ps(b.as_ptr().add(offset));

        let diff = _mm256_sub_ps(a_vec, b_vec);
        sum_vec = _mm256_add_ps(sum_vec, _mm256_mul_ps(diff, diff));
    }

    let mut sum = horizontal_sum_avx2(sum_vec);

    for i in (n - remainder)..n {
        let diff = a[i] - b[i];
        sum += diff * diff;
    }

    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn l2_distance_batch4_avx2(
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

        let diff1 = _mm256_sub_ps(origin_vec, _mm256_loadu_ps(c1.as_ptr().add(offset)));
        sum1 = _mm256_add_ps(sum1, _mm256_mul_ps(diff1, diff1));

        let diff2 = _mm256_sub_ps(origin_vec, _mm256_loadu_ps(c2.as_ptr().add(offset)));
        sum2 = _mm256_add_ps(sum2, _mm256_mul_ps(diff2, diff2));

        let diff3 = _mm256_sub_ps(origin_vec, _mm256_loadu_ps(c3.as_ptr().add(offset)));
        sum3 = _mm256_add_ps(sum3, _mm256_mul_ps(diff3, diff3));

        let diff4 = _mm256_sub_ps(origin_vec, _mm256_loadu_ps(c4.as_ptr().add(offset)));
        sum4 = _mm256_add_ps(sum4, _mm256_mul_ps(diff4, diff4));
    }

    result[0] = horizontal_sum_avx2(sum1);
    result[1] = horizontal_sum_avx2(sum2);
    result[2] = horizontal_sum_avx2(sum3);
    result[3] = horizontal_sum_avx2(sum4);

    for i in (n - remainder)..n {
        let origin_item = origin[i];
        let diff1 = origin_item - c1[i];
        result[0] += diff1 * diff1;
        let diff2 = origin_item - c2[i];
        result[1] += diff2 * diff2;
        let diff3 = origin_item - c3[i];
        result[2] += diff3 * diff3;
        let diff4 = origin_item - c4[i];
        result[3] += diff4 * diff4;
    }
}

fn l2_distance_scalar(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for i in 0..a.len() {
        let diff = a[i] - b[i];
        sum += diff * diff;
    }
    sum
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
    fn test_l2_distance() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        assert!((l2_distance(&a, &b) - 25.0).abs() < 0.001);
    }

    #[test]
    fn test_l2_distance_same_vector() {
        let a = vec![1.0, 2.0, 3.0];
        assert!(l2_distance(&a, &a) < 0.001);
    }

    #[test]
    #[should_panic(expected = "Vector dimensions must match")]
    fn test_l2_distance_dimension_mismatch() {
        l2_distance(&[1.0, 2.0], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_l2_distance_simd_width() {
        // Sizes around the 8-lane boundary exercise both the vector body and
        // the scalar tail.
        for n in [1usize, 7, 8, 9, 15, 16, 33, 128] {
            let a: Vec<f32> = (0..n).map(|i| i as f32 * 0.5).collect();
            let b: Vec<f32> = (0..n).map(|i| (n - i) as f32 * 0.25).collect();

            let fast = l2_distance(&a, &b);
            let slow = l2_distance_scalar(&a, &b);
            assert!(
                (fast - slow).abs() <= 1e-3 * slow.max(1.0),
                "n = {}: {} vs {}",
                n,
                fast,
                slow
            );
        }
    }

    #[test]
    fn test_l2_distance_batch4_matches_single() {
        let n = 67;
        let origin: Vec<f32> = (0..n).map(|i| (i as f32).sin()).collect();
        let rows: Vec<Vec<f32>> = (0..4)
            .map(|r| (0..n).map(|i| ((i + r * 13) as f32).cos()).collect())
            .collect();

        let mut batch = [0.0f32; 4];
        l2_distance_batch4(&origin, &rows[0], &rows[1], &rows[2], &rows[3], &mut batch);

        for (i, row) in rows.iter().enumerate() {
            let single = l2_distance(&origin, row);
            assert!(
                (batch[i] - single).abs() <= 1e-3 * single.max(1.0),
                "lane {}: {} vs {}",
                i,
                batch[i],
                single
            );
        }
    }
}
