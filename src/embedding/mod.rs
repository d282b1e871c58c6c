//! Text-to-vector embedding.
//!
//! Provides the [`EmbeddingProvider`] trait and an HTTP implementation that
//! calls a remote embedding service. The provider is created via
//! [`create_provider`] from configuration.

pub mod http;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for embedding text into vectors.
///
/// All vectors from one provider share a single dimension, which must match
/// the dimension the memory store was configured with.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Create an embedding provider from config.
///
/// Returns an error if no endpoint is configured.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    anyhow::ensure!(
        !config.url.is_empty(),
        "no embedding endpoint configured. Set [embedding] url or EMBEDDING_API_URL"
    );
    let provider = http::HttpEmbeddingProvider::new(config)?;
    Ok(Box::new(provider))
}
