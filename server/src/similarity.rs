//! Cosine similarity over 32-bit float vectors.

use crate::error::{Error, Result};

/// Cosine similarity in [-1, 1]. Vectors must have equal length; a
/// zero-magnitude vector short-circuits to `0.0`.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::InvalidArgument(format!(
            "vector length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let mut dot = 0f32;
    let mut norm_a = 0f32;
    let mut norm_b = 0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        assert_eq!(cosine(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]).unwrap(), 1.0);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert_eq!(cosine(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn opposite_vectors_score_minus_one() {
        assert_eq!(cosine(&[1.0, 0.0, 0.0], &[-1.0, 0.0, 0.0]).unwrap(), -1.0);
    }

    #[test]
    fn forty_five_degrees() {
        let sim = cosine(&[1.0, 1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap();
        assert!((sim - 0.707_106_7).abs() < 1e-4, "got {sim}");
    }

    #[test]
    fn zero_magnitude_short_circuits() {
        assert_eq!(cosine(&[0.0, 0.0], &[3.0, 4.0]).unwrap(), 0.0);
    }

    #[test]
    fn length_mismatch_is_invalid_argument() {
        assert!(matches!(
            cosine(&[1.0], &[1.0, 2.0]),
            Err(Error::InvalidArgument(_))
        ));
    }
}
