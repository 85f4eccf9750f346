//! Embedding providers for cleaned course text.
//!
//! The model is opaque to the pipeline: anything implementing
//! [`EmbeddingProvider`] maps a batch of texts to fixed-dimension vectors.
//! Two providers ship here:
//! - [`HashingEmbedder`]: deterministic, offline feature hashing
//! - [`HttpEmbedder`]: OpenAI-compatible `/embeddings` endpoint

mod hashing;
mod http;

use ndarray::Array2;
use tracing::{info, instrument};

use coursegraph_shared::{
    CourseGraphError, EmbeddingConfig, EmbeddingProviderKind, Result,
    resolve_embedding_endpoint,
};

pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;

/// Maps cleaned texts to dense vectors.
pub trait EmbeddingProvider {
    /// Model identifier, recorded in the run manifest.
    fn model_id(&self) -> &str;

    /// Embed every text, preserving order. Must return one vector per input.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the provider selected in the config.
pub fn build_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider {
        EmbeddingProviderKind::Hashing => Ok(Box::new(HashingEmbedder::new(
            config.model.clone(),
            config.dimensions,
        )?)),
        EmbeddingProviderKind::Http => {
            let (endpoint, api_key) = resolve_embedding_endpoint(config)?;
            Ok(Box::new(HttpEmbedder::new(
                endpoint,
                api_key,
                config.model.clone(),
                Some(config.dimensions),
                config.batch_size,
            )?))
        }
    }
}

/// Embed all texts and pack the result into an `N x D` matrix.
#[instrument(skip_all, fields(model = provider.model_id(), texts = texts.len()))]
pub fn embed_all(provider: &dyn EmbeddingProvider, texts: &[String]) -> Result<Array2<f32>> {
    if texts.is_empty() {
        return Err(CourseGraphError::empty_input("no texts to embed"));
    }

    let vectors = provider.embed(texts)?;
    if vectors.len() != texts.len() {
        return Err(CourseGraphError::dimension_mismatch(
            "embedding rows",
            texts.len(),
            vectors.len(),
        ));
    }

    let matrix = embedding_matrix(vectors)?;
    info!(rows = matrix.nrows(), dims = matrix.ncols(), "embeddings ready");
    Ok(matrix)
}

/// Pack row vectors into a matrix, rejecting ragged or empty input.
pub fn embedding_matrix(vectors: Vec<Vec<f32>>) -> Result<Array2<f32>> {
    let rows = vectors.len();
    let dims = vectors
        .first()
        .map(Vec::len)
        .ok_or_else(|| CourseGraphError::empty_input("embedding matrix has no rows"))?;

    if dims == 0 {
        return Err(CourseGraphError::empty_input("embedding vectors have no dimensions"));
    }

    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(CourseGraphError::dimension_mismatch(
            "embedding vector",
            dims,
            bad.len(),
        ));
    }

    let flat: Vec<f32> = vectors.into_iter().flatten().collect();
    Array2::from_shape_vec((rows, dims), flat)
        .map_err(|e| CourseGraphError::validation(format!("embedding matrix shape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_from_rows() {
        let m = embedding_matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(m.dim(), (3, 2));
        assert_eq!(m[[2, 1]], 6.0);
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = embedding_matrix(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(
            err,
            CourseGraphError::DimensionMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn empty_matrix_rejected() {
        assert!(matches!(
            embedding_matrix(vec![]),
            Err(CourseGraphError::EmptyInput { .. })
        ));
    }

    #[test]
    fn embed_all_with_hashing_provider() {
        let config = EmbeddingConfig {
            dimensions: 16,
            ..EmbeddingConfig::default()
        };
        let provider = build_provider(&config).unwrap();
        let texts = vec!["graph theory".to_string(), "linear algebra".to_string()];
        let m = embed_all(provider.as_ref(), &texts).unwrap();
        assert_eq!(m.dim(), (2, 16));
        assert_eq!(provider.model_id(), "all-MiniLM-L6-v2");
    }

    #[test]
    fn embed_all_rejects_no_texts() {
        let provider = HashingEmbedder::new("m", 8).unwrap();
        assert!(embed_all(&provider, &[]).is_err());
    }
}
