//! Cosine similarity over normalised vectors.

use crate::util::simd::numeric;

/// Scale `v` to unit length. The zero vector is returned unchanged.
///
/// Inputs must be finite. When the squared sum overflows or underflows `f32`
/// the vector is first rescaled by its largest component.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = numeric::norm(v);
    if norm != 0.0 && norm.is_finite() {
        return v.iter().map(|x| x / norm).collect();
    }

    let max = v.iter().fold(0.0f32, |m, x| m.max(x.abs()));
    if max == 0.0 || !max.is_finite() {
        return v.to_vec();
    }
    let scaled: Vec<f32> = v.iter().map(|x| x / max).collect();
    let norm = numeric::norm(&scaled);
    scaled.iter().map(|x| x / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let v = normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_normalize_extreme_magnitudes() {
        for v in [normalize(&[f32::MAX, 0.0]), normalize(&[1e-30, 0.0])] {
            assert!((v[0] - 1.0).abs() < 1e-6);
            assert_eq!(v[1], 0.0);
        }
    }
}
