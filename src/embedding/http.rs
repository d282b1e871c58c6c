//! HTTP embedding provider.
//!
//! POSTs `{"texts": [text]}` with a bearer token and reads the first vector
//! of `{"embeddings": [[...]]}`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    texts: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest { texts: [text] })
            .send()
            .await
            .with_context(|| format!("embedding request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("embedding service returned HTTP {status}: {body}");
        }

        let bytes = response
            .bytes()
            .await
            .context("error reading embedding response")?;
        first_embedding(&bytes)
    }
}

fn first_embedding(body: &[u8]) -> Result<Vec<f32>> {
    let parsed: EmbedResponse =
        serde_json::from_slice(body).context("failed to decode embedding response")?;
    match parsed.embeddings.into_iter().next() {
        Some(vector) if !vector.is_empty() => Ok(vector),
        _ => bail!("no embeddings returned"),
    }
}
