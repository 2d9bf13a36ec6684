//! SIMD-friendly helpers for the similarity hot path.

/// Numerical kernels over `f32` slices.
pub mod numeric {
    use wide::f32x8;

    const LANES: usize = 8;

    #[inline]
    fn lane(slice: &[f32]) -> f32x8 {
        f32x8::new(slice.try_into().unwrap_or([0.0; LANES]))
    }

    /// Dot product of two slices of equal length.
    ///
    /// Processes eight values at a time and finishes the tail with scalar
    /// arithmetic.
    #[inline]
    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        let len = a.len().min(b.len());
        let simd_len = len - (len % LANES);

        let mut acc = f32x8::ZERO;
        for i in (0..simd_len).step_by(LANES) {
            acc += lane(&a[i..i + LANES]) * lane(&b[i..i + LANES]);
        }

        let mut result = acc.reduce_add();
        for i in simd_len..len {
            result += a[i] * b[i];
        }
        result
    }

    /// Euclidean norm.
    #[inline]
    pub fn norm(v: &[f32]) -> f32 {
        dot(v, v).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::numeric::*;

    #[test]
    fn test_dot_matches_scalar() {
        let a: Vec<f32> = (0..19).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..19).map(|i| 1.0 - i as f32 * 0.1).collect();
        let expected: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((dot(&a, &b) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_short_and_empty_inputs() {
        assert_eq!(dot(&[], &[]), 0.0);
        assert_eq!(dot(&[2.0, 3.0], &[4.0, 5.0]), 23.0);
        assert!((norm(&[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }
}
