//! Batch embedding (spec §4.2 "Embedder contract", §6 "Embedder").
//!
//! Grounded on `codegraph_vector::providers::EmbeddingProvider` /
//! `codegraph_vector::local_provider`: a trait with a batch entry point
//! plus a dependency-free deterministic reference implementation that
//! stands in for "the embedding model", which §1 explicitly treats as an
//! external collaborator accessed through a narrow interface.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use kg_core::error::{CoreError, Result};
use kg_core::traits::Embedder;

/// A dependency-free, deterministic embedder: each input is split into
/// overlapping character shingles, each shingle is hashed into one of `D`
/// buckets, and the bucket counts are L2-normalized. Two inputs that share
/// more shingles land closer together under cosine similarity, which is
/// enough for the deterministic behavior the pipeline's tests rely on
/// (spec §4.2 "Vectors are unit-normalized (L2) so cosine similarity
/// equals dot product").
///
/// Production deployments swap this for a real model server behind the
/// same [`Embedder`] trait, exactly as `codegraph-ai`'s `LLMProvider` trait
/// is swapped between concrete backends.
pub struct LocalHashEmbedder {
    dimension: usize,
    shingle_len: usize,
}

impl LocalHashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            shingle_len: 3,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0f32; self.dimension];
        let normalized = text.to_lowercase();
        let chars: Vec<char> = normalized.chars().collect();

        if chars.is_empty() {
            return buckets;
        }

        let shingle_len = self.shingle_len.min(chars.len());
        for window in chars.windows(shingle_len) {
            let shingle: String = window.iter().collect();
            let bucket = hash_to_bucket(&shingle, self.dimension);
            buckets[bucket] += 1.0;
        }

        l2_normalize(&mut buckets);
        buckets
    }
}

#[async_trait]
impl Embedder for LocalHashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Batch calls either return one vector per input in order, or
        // fail entirely (spec §4.2 "never partial").
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            if text.len() > 1_000_000 {
                return Err(CoreError::EmbeddingBackendError(
                    "input exceeds maximum supported length".to_string(),
                ));
            }
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn hash_to_bucket(s: &str, dimension: usize) -> usize {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    let mut acc: u64 = 0;
    for byte in &digest[..8] {
        acc = (acc << 8) | (*byte as u64);
    }
    (acc % dimension as u64) as usize
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two equal-length vectors. Grounded on
/// `codegraph_vector::search`'s `cosine_similarity` helper. Since this
/// embedder's vectors are already unit-normalized, this equals the dot
/// product (spec §4.2), but the full formula is kept so it also works for
/// any [`Embedder`] whose vectors are not pre-normalized.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_unit_vectors() {
        let embedder = LocalHashEmbedder::new(32);
        let vectors = embedder
            .embed_batch(&["Alice works at Acme.".to_string()])
            .await
            .unwrap();
        let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[tokio::test]
    async fn batch_returns_one_vector_per_input_in_order() {
        let embedder = LocalHashEmbedder::new(16);
        let inputs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let vectors = embedder.embed_batch(&inputs).await.unwrap();
        assert_eq!(vectors.len(), inputs.len());
    }

    #[tokio::test]
    async fn is_deterministic_given_same_input() {
        let embedder = LocalHashEmbedder::new(16);
        let a = embedder.embed_batch(&["same text".to_string()]).await.unwrap();
        let b = embedder.embed_batch(&["same text".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![0.6f32, 0.8f32];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_handles_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }
}
