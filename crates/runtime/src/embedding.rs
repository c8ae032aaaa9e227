//! Embedding service providers for bullet vectors
//!
//! Supports Ollama (local) and OpenAI (cloud) embedding providers with
//! automatic provider detection from environment variables. When no
//! provider is configured, a deterministic token-hash embedder is used so
//! deduplication still works offline.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Errors from embedding backends.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Request(String),

    #[error("Embedding response malformed: {0}")]
    Malformed(String),
}

/// Embedding provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Ollama,
    OpenAi,
}

/// Configuration for an embedding service provider
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub timeout_seconds: u64,
}

impl EmbeddingConfig {
    /// Resolve embedding configuration from environment variables.
    ///
    /// Returns `None` if no provider can be determined, which signals the
    /// caller to fall back to the deterministic hash embedder.
    ///
    /// Resolution order:
    /// 1. API key: `EMBEDDING_API_KEY` → `OPENAI_API_KEY` → None
    /// 2. Provider: `EMBEDDING_PROVIDER` explicit, or auto-detect from URL/key
    /// 3. Per-provider defaults for model, URL, and dimension
    /// 4. Overrides: `EMBEDDING_MODEL`, `EMBEDDING_API_BASE_URL`, `VECTOR_DIMENSION`
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("EMBEDDING_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty());

        let base_url = std::env::var("EMBEDDING_API_BASE_URL")
            .ok()
            .filter(|u| !u.is_empty());

        let explicit_provider = std::env::var("EMBEDDING_PROVIDER")
            .ok()
            .filter(|p| !p.is_empty());

        let provider = if let Some(ref p) = explicit_provider {
            match p.to_lowercase().as_str() {
                "ollama" => EmbeddingProvider::Ollama,
                "openai" => EmbeddingProvider::OpenAi,
                _ => return None,
            }
        } else if let Some(ref url) = base_url {
            if url.contains("localhost") || url.contains("127.0.0.1") {
                EmbeddingProvider::Ollama
            } else if api_key.is_some() {
                EmbeddingProvider::OpenAi
            } else {
                return None;
            }
        } else if api_key.is_some() {
            EmbeddingProvider::OpenAi
        } else {
            return None;
        };

        let (default_model, default_url, default_dim) = match provider {
            EmbeddingProvider::Ollama => (
                "nomic-embed-text".to_string(),
                "http://localhost:11434".to_string(),
                768,
            ),
            EmbeddingProvider::OpenAi => (
                "text-embedding-3-small".to_string(),
                "https://api.openai.com/v1".to_string(),
                1536,
            ),
        };

        let model = std::env::var("EMBEDDING_MODEL")
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or(default_model);

        let dimension = std::env::var("VECTOR_DIMENSION")
            .ok()
            .and_then(|d| d.parse::<usize>().ok())
            .unwrap_or(default_dim);

        Some(Self {
            provider,
            model,
            base_url: base_url.unwrap_or(default_url),
            api_key,
            dimension,
            timeout_seconds: 30,
        })
    }
}

/// Trait for generating fixed-dimension vectors from bullet text.
///
/// Results must be stable within a run so the dedup sweep is reproducible.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut results = self.embed_batch(vec![text]).await?;
        results
            .pop()
            .ok_or_else(|| EmbeddingError::Malformed("empty batch result".into()))
    }

    /// Embed a batch of texts, preserving input order.
    async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Fixed output dimension.
    fn dimension(&self) -> usize;
}

/// Cosine similarity between two vectors. Returns 0.0 when either vector
/// is zero or the dimensions disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Ollama embedding service using the native `/api/embed` endpoint
pub struct OllamaEmbeddingService {
    client: reqwest::Client,
    model: String,
    base_url: String,
    dimension: usize,
}

impl OllamaEmbeddingService {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| EmbeddingError::Request(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl EmbeddingService for OllamaEmbeddingService {
    async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(format!("Ollama request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Request(format!(
                "Ollama returned {status}: {body_text}"
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(format!("Failed to parse response: {e}")))?;

        let embeddings = json
            .get("embeddings")
            .and_then(|v| v.as_array())
            .ok_or_else(|| EmbeddingError::Malformed("missing 'embeddings' field".into()))?;

        embeddings
            .iter()
            .map(|emb| {
                emb.as_array()
                    .ok_or_else(|| EmbeddingError::Malformed("invalid embedding array".into()))?
                    .iter()
                    .map(|v| {
                        v.as_f64()
                            .map(|f| f as f32)
                            .ok_or_else(|| EmbeddingError::Malformed("invalid float".into()))
                    })
                    .collect::<Result<Vec<f32>, _>>()
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// OpenAI-compatible embedding service
pub struct OpenAiEmbeddingService {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    dimension: usize,
}

impl OpenAiEmbeddingService {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                EmbeddingError::Request("OpenAI embedding service requires an API key".into())
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| EmbeddingError::Request(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddingService {
    async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(format!("OpenAI request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Request(format!(
                "OpenAI returned {status}: {body_text}"
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(format!("Failed to parse response: {e}")))?;

        let data = json
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| EmbeddingError::Malformed("missing 'data' field".into()))?;

        // Sort by index to ensure correct ordering
        let mut indexed: Vec<(usize, Vec<f32>)> = data
            .iter()
            .map(|item| {
                let index = item.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                let embedding = item
                    .get("embedding")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| EmbeddingError::Malformed("missing 'embedding' field".into()))?
                    .iter()
                    .map(|v| {
                        v.as_f64()
                            .map(|f| f as f32)
                            .ok_or_else(|| EmbeddingError::Malformed("invalid float".into()))
                    })
                    .collect::<Result<Vec<f32>, _>>()?;
                Ok((index, embedding))
            })
            .collect::<Result<Vec<_>, EmbeddingError>>()?;

        indexed.sort_by_key(|(i, _)| *i);

        Ok(indexed.into_iter().map(|(_, emb)| emb).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic token-hash embedding service.
///
/// Hashes each whitespace token into a bucket and L2-normalizes the counts.
/// Texts sharing most tokens land close in cosine space, which is enough
/// for the dedup sweep to behave sensibly without a real model. Stable
/// within a process, not across processes.
pub struct HashEmbeddingService {
    dimension: usize,
}

impl HashEmbeddingService {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            embedding[bucket] += 1.0;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingService for HashEmbeddingService {
    async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.into_iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedding service from a resolved config.
pub fn create_embedding_service(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingService>, EmbeddingError> {
    match config.provider {
        EmbeddingProvider::Ollama => {
            tracing::info!(
                model = %config.model,
                url = %config.base_url,
                dimension = config.dimension,
                "Using Ollama embedding service"
            );
            Ok(Arc::new(OllamaEmbeddingService::new(config)?))
        }
        EmbeddingProvider::OpenAi => {
            tracing::info!(
                model = %config.model,
                url = %config.base_url,
                dimension = config.dimension,
                "Using OpenAI embedding service"
            );
            Ok(Arc::new(OpenAiEmbeddingService::new(config)?))
        }
    }
}

/// Create an embedding service from environment variables, falling back to
/// the deterministic hash embedder when no provider is configured.
pub fn create_embedding_service_from_env(
    fallback_dimension: usize,
) -> Result<Arc<dyn EmbeddingService>, EmbeddingError> {
    match EmbeddingConfig::from_env() {
        Some(config) => create_embedding_service(&config),
        None => {
            tracing::debug!(
                dimension = fallback_dimension,
                "No embedding provider configured, using hash embedding service"
            );
            Ok(Arc::new(HashEmbeddingService::new(fallback_dimension)))
        }
    }
}
