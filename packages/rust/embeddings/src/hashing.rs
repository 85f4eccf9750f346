//! Deterministic feature-hashing embedder.
//!
//! Each token is hashed with SHA-256 into one signed bucket; the summed
//! vector is L2-normalized. Texts sharing vocabulary land close in cosine
//! space, which is all the graph stages need when no model server is around.

use sha2::{Digest, Sha256};

use coursegraph_shared::{CourseGraphError, Result};

use crate::EmbeddingProvider;

/// Offline embedder with a fixed output dimension.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model: String,
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(model: impl Into<String>, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(CourseGraphError::config(
                "hashing embedder needs at least one dimension",
            ));
        }
        Ok(Self {
            model: model.into(),
            dimensions,
        })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text.split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
