//! Vector math for similarity scoring
//!
//! Shared by the store's candidate scan and the ranker.

/// Dot product of two equal-length vectors (= cosine similarity for
/// L2-normalized embeddings). Uses SIMD acceleration when available.
///
/// Returns `None` on length mismatch or a non-finite result so callers
/// can handle corrupt records without panicking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    use simsimd::SpatialSimilarity;
    let score = f32::dot(a, b).unwrap_or_else(|| {
        // Fallback for unsupported architectures - accumulate in f64 for precision
        a.iter()
            .zip(b)
            .map(|(&x, &y)| (x as f64) * (y as f64))
            .sum::<f64>()
    }) as f32;
    score.is_finite().then_some(score)
}

/// Full cosine similarity with norm computation, for vectors that are
/// not guaranteed normalized (e.g. stub providers in tests).
pub fn full_cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        norm_a += x as f64 * x as f64;
        norm_b += y as f64 * y as f64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    let result = (dot / denom) as f32;
    if result.is_finite() {
        result
    } else {
        0.0
    }
}

/// Clamp a similarity into the score range used by the ranker.
///
/// Cosine lands in [-1, 1]; negative similarity carries no ranking
/// signal here and maps to 0.
pub fn clamp_score(cosine: f32) -> f32 {
    cosine.clamp(0.0, 1.0)
}

/// L2-normalize a vector in place. No-op for the zero vector.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = (*x as f64 / norm) as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_unit_vectors() {
        let mut a = vec![3.0, 4.0, 0.0, 0.0];
        normalize(&mut a);
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-5, "expected ~1.0, got {sim}");
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_length_mismatch() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).is_none());
        assert!(cosine_similarity(&[], &[]).is_none());
    }

    #[test]
    fn test_full_cosine_unnormalized() {
        let a = vec![2.0, 0.0];
        let b = vec![7.0, 0.0];
        assert!((full_cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_full_cosine_zero_vector() {
        assert_eq!(full_cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_clamp_score_negative() {
        assert_eq!(clamp_score(-0.4), 0.0);
        assert_eq!(clamp_score(0.4), 0.4);
        assert_eq!(clamp_score(1.5), 1.0);
    }

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
