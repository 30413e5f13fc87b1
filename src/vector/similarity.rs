use crate::error::{PipelineError, Result};
use crate::models::Similarity;

/// Vectors with a smaller magnitude than this carry no direction.
pub const MIN_MAGNITUDE: f32 = 0.001;

/// Calculate cosine similarity directly between two vectors
///
/// # Arguments
/// * `vec1` - First vector
/// * `vec2` - Second vector
///
/// # Returns
/// * `Result<f32>` - The cosine in `[-1, 1]`, or an error when the dimensions
///   differ or either vector has (near) zero magnitude
pub fn calculate_direct_similarity(vec1: &[f32], vec2: &[f32]) -> Result<f32> {
    if vec1.len() != vec2.len() {
        return Err(PipelineError::Configuration(format!(
            "Vector dimensions don't match: {} vs {}",
            vec1.len(),
            vec2.len()
        )));
    }

    let mag1 = magnitude(vec1);
    let mag2 = magnitude(vec2);

    if mag1 < MIN_MAGNITUDE || mag2 < MIN_MAGNITUDE {
        return Err(PipelineError::Configuration(
            "Zero magnitude vector detected".to_string(),
        ));
    }

    let dot_product: f32 = vec1.iter().zip(vec2.iter()).map(|(a, b)| a * b).sum();
    Ok((dot_product / (mag1 * mag2)).clamp(-1.0, 1.0))
}

/// Cosine similarity mapped onto the crate-wide `[0, 1]` scale.
pub fn similarity(vec1: &[f32], vec2: &[f32]) -> Result<Similarity> {
    calculate_direct_similarity(vec1, vec2).map(Similarity::from_cosine)
}

pub fn magnitude(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_and_opposite_vectors() {
        let a = [0.3, 0.4, 0.5];
        let b = [-0.3, -0.4, -0.5];
        assert!((calculate_direct_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
        assert!((calculate_direct_similarity(&a, &b).unwrap() + 1.0).abs() < 1e-6);
        assert!((similarity(&a, &a).unwrap().value() - 1.0).abs() < 1e-6);
        assert!(similarity(&a, &b).unwrap().value() < 1e-6);
    }

    #[test]
    fn test_orthogonal_vectors_score_half() {
        let score = similarity(&[1.0, 0.0], &[0.0, 2.0]).unwrap();
        assert!((score.value() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_mismatched_or_zero_vectors() {
        assert!(calculate_direct_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).is_err());
        assert!(calculate_direct_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_err());
    }
}
