//! Embedding providers for the memory engine.
//!
//! Two interchangeable variants behind one trait, selected once at
//! process start by [`create_embedding_provider`]:
//!
//! - [`OpenAiEmbedding`]: model-backed, via the embeddings HTTP API.
//! - [`HashEmbedding`]: deterministic hashed bag-of-words fallback
//!   with no network dependency.
//!
//! Both expose the same dimension D; callers never need to know which
//! is active. Every produced vector carries the [`EncoderKind`] tag of
//! the variant that actually generated it.

use crate::error::{MemoryError, Result};
use crate::types::EncoderKind;
use crate::vector::l2_normalize;
use async_trait::async_trait;
use mentor_common::EmbeddingConfig;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};

/// A vector together with the encoder variant that produced it.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub encoder: EncoderKind,
}

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (e.g. "openai", "hash")
    fn name(&self) -> &str;

    /// The variant this provider is configured as. Individual results
    /// may still be tagged [`EncoderKind::Fallback`] when a single
    /// model call fails.
    fn kind(&self) -> EncoderKind;

    /// Output dimension D. Identical across variants.
    fn dimension(&self) -> usize;

    /// Encode one text into a vector of length D.
    async fn encode(&self, text: &str) -> Result<Embedding>;

    /// Encode multiple texts.
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.encode(text).await?);
        }
        Ok(out)
    }
}

// ============================================================================
// Hash fallback
// ============================================================================

/// Deterministic, model-free encoder.
///
/// Lower-cases and tokenizes the text, hashes each token into one of D
/// buckets, accumulates a term-frequency histogram, and L2-normalizes.
/// Identical input always yields a bit-identical vector.
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Synchronous encode, shared with the model provider's per-call
    /// fallback path.
    pub fn encode_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let mut token_count = 0u32;

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            // DefaultHasher::new() uses fixed keys, so bucket
            // assignment is stable across processes.
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
            token_count += 1;
        }

        if token_count > 0 {
            let n = token_count as f32;
            vector.iter_mut().for_each(|x| *x /= n);
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    fn name(&self) -> &str {
        "hash"
    }

    fn kind(&self) -> EncoderKind {
        EncoderKind::Fallback
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn encode(&self, text: &str) -> Result<Embedding> {
        Ok(Embedding {
            vector: self.encode_sync(text),
            encoder: EncoderKind::Fallback,
        })
    }
}

// ============================================================================
// Model-backed provider
// ============================================================================

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Native output dimension for known embedding models.
fn native_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Model-backed embedding provider.
///
/// A single failed call degrades to the hash fallback for that call
/// only; the result is tagged [`EncoderKind::Fallback`] so rankings
/// never mix it with model vectors.
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    fallback: HashEmbedding,
}

impl OpenAiEmbedding {
    /// Create a model-backed provider.
    ///
    /// Fails with [`MemoryError::Misconfiguration`] when the model is
    /// unknown or the declared dimension does not match its native
    /// output size. Truncating or padding vectors would silently
    /// corrupt similarity scores, so this is fatal.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Result<Self> {
        let model = model.into();
        let native = native_dimension(&model).ok_or_else(|| {
            MemoryError::Misconfiguration(format!("unknown embedding model '{model}'"))
        })?;
        if native != dimension {
            return Err(MemoryError::Misconfiguration(format!(
                "model '{model}' produces {native}-dim vectors but config declares {dimension}"
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model,
            dimension,
            fallback: HashEmbedding::new(dimension),
        })
    }

    /// Call the embeddings API, failing on any transport or shape
    /// problem. Used both by `encode` (which then falls back) and by
    /// the startup probe (which downgrades permanently).
    pub async fn try_encode_model(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };

        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| MemoryError::Encode(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MemoryError::Encode(format!(
                "embeddings API returned {}",
                response.status()
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::Encode(e.to_string()))?;

        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::Encode("empty embedding result".into()))?;

        if vector.len() != self.dimension {
            return Err(MemoryError::Encode(format!(
                "model returned {}-dim vector, expected {}",
                vector.len(),
                self.dimension
            )));
        }

        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    fn name(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> EncoderKind {
        EncoderKind::Model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn encode(&self, text: &str) -> Result<Embedding> {
        match self.try_encode_model(text).await {
            Ok(vector) => {
                debug!(model = %self.model, "encoded text with model");
                Ok(Embedding {
                    vector,
                    encoder: EncoderKind::Model,
                })
            }
            Err(e) => {
                warn!(model = %self.model, error = %e, "model encode failed, using hash fallback for this call");
                Ok(Embedding {
                    vector: self.fallback.encode_sync(text),
                    encoder: EncoderKind::Fallback,
                })
            }
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Create the embedding provider selected by configuration.
///
/// Called once at process start. When the model-backed provider cannot
/// be brought up (missing key, failed probe), the factory permanently
/// downgrades to the hash fallback for the process lifetime and logs
/// the downgrade once; per-request retries would re-trigger the same
/// failure and add latency. Misconfiguration (dimension mismatch) is
/// fatal instead.
pub async fn create_embedding_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    if config.dimension == 0 {
        return Err(MemoryError::Misconfiguration(
            "embedding dimension must be non-zero".into(),
        ));
    }

    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedding::new(config.dimension))),
        "openai" => {
            let Some(api_key) = config.api_key.clone() else {
                warn!(
                    dimension = config.dimension,
                    "no API key configured, downgrading to hash fallback encoder for process lifetime"
                );
                return Ok(Arc::new(HashEmbedding::new(config.dimension)));
            };

            let provider = OpenAiEmbedding::new(api_key, &config.model, config.dimension)?;

            // Startup probe: verify the model path works before
            // committing to it for the process lifetime.
            match provider.try_encode_model("startup probe").await {
                Ok(_) => {
                    debug!(model = %config.model, "embedding model available");
                    Ok(Arc::new(provider))
                }
                Err(e) => {
                    warn!(
                        model = %config.model,
                        error = %e,
                        "embedding model unavailable, downgrading to hash fallback encoder for process lifetime"
                    );
                    Ok(Arc::new(HashEmbedding::new(config.dimension)))
                }
            }
        }
        other => Err(MemoryError::Misconfiguration(format!(
            "unknown embedding provider '{other}'"
        ))),
    }
}
