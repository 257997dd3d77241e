use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

/// Width of every embedding stored in a mail index.
pub const EMBEDDING_DIMENSIONS: usize = 1536;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-ada-002";

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;

    /// Names the vector space. Vectors from embedders with different
    /// identities are not comparable.
    fn identity(&self) -> String {
        format!("custom/{}", self.dimensions())
    }
}

/// Newlines are replaced by spaces before text is submitted for embedding.
pub fn prepare_input(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: &str) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dims: EMBEDDING_DIMENSIONS,
        })
    }

    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    #[instrument(skip_all, fields(text_len = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = prepare_input(text);
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: &input,
            })
            .send()
            .await
            .context("embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("embedding provider returned HTTP {}: {}", status, body));
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.is_empty() {
            return Err(anyhow!("embedding provider returned empty result"));
        }
        let embedding = parsed.data.remove(0).embedding;
        if embedding.len() != self.dims {
            return Err(anyhow!(
                "embedding provider returned {} dimensions, expected {}",
                embedding.len(),
                self.dims
            ));
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn identity(&self) -> String {
        format!("openai/{}/{}", self.model, self.dims)
    }
}

/// Deterministic bag-of-words embedder. Needs no network; used offline and in tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    pub dims: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dims: EMBEDDING_DIMENSIONS,
        }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vec = vec![0.0f32; self.dims];
        for token in prepare_input(text).split_whitespace() {
            let token = token.to_lowercase();
            let mut hash = 5381u64;
            for b in token.as_bytes() {
                hash = ((hash << 5).wrapping_add(hash)) ^ u64::from(*b);
            }
            let idx = (hash as usize) % self.dims;
            vec[idx] += 1.0;
        }
        normalize(&mut vec);
        Ok(vec)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn identity(&self) -> String {
        format!("hash/{}", self.dims)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    OpenAi,
    Hash,
}

/// How to build the account embedder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::OpenAi,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

pub fn embedder_from_config(config: &EmbedderConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend {
        EmbeddingBackend::Hash => Ok(Arc::new(HashEmbedder::default())),
        EmbeddingBackend::OpenAi => {
            let api_key = std::env::var(&config.api_key_env)
                .with_context(|| format!("{} is not set", config.api_key_env))?;
            if api_key.trim().is_empty() {
                return Err(anyhow!("{} is empty", config.api_key_env));
            }
            let embedder = OpenAiEmbedder::new(api_key, config.model.clone(), &config.base_url)?;
            Ok(Arc::new(embedder))
        }
    }
}

/// Like [`embedder_from_config`], falling back to [`HashEmbedder`] when the
/// configured backend cannot be built.
pub fn embedder_from_config_or_hash(config: &EmbedderConfig) -> Arc<dyn Embedder> {
    match embedder_from_config(config) {
        Ok(embedder) => embedder,
        Err(err) => {
            warn!("remote embeddings unavailable, using hash embedder: {}", err);
            Arc::new(HashEmbedder::default())
        }
    }
}

pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for i in 0..len {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_input_replaces_newlines() {
        assert_eq!(prepare_input("line one\nline two\r\nend"), "line one line two  end");
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("Quarterly invoice\nattached").await.unwrap();
        let b = embedder.embed("quarterly INVOICE attached").await.unwrap();
        assert_eq!(a.len(), EMBEDDING_DIMENSIONS);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_config_defaults_and_hash_backend() {
        let config = EmbedderConfig::default();
        assert_eq!(config.backend, EmbeddingBackend::OpenAi);
        assert_eq!(config.model, DEFAULT_OPENAI_MODEL);

        let hash = EmbedderConfig {
            backend: EmbeddingBackend::Hash,
            ..EmbedderConfig::default()
        };
        let embedder = embedder_from_config(&hash).unwrap();
        assert_eq!(embedder.dimensions(), EMBEDDING_DIMENSIONS);
        assert_eq!(embedder.identity(), "hash/1536");
    }

    #[test]
    fn test_identity_names_backend_and_model() {
        let openai = OpenAiEmbedder::new("key", "text-embedding-3-small", DEFAULT_OPENAI_BASE_URL).unwrap();
        assert_eq!(openai.identity(), "openai/text-embedding-3-small/1536");
        assert_ne!(openai.identity(), HashEmbedder::default().identity());
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        let config = EmbedderConfig {
            api_key_env: "SIFT_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..EmbedderConfig::default()
        };
        assert!(embedder_from_config(&config).is_err());
        assert_eq!(embedder_from_config_or_hash(&config).identity(), "hash/1536");
    }
}
