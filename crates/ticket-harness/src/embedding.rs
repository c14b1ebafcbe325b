//! Embedding providers.
//!
//! [`ConfiguredEmbedder`] wraps the provider selected in `[embedding]` and
//! implements the core [`Embedder`] trait for query embedding, plus
//! [`ConfiguredEmbedder::embed_batch`] for ingestion.
//!
//! | `provider` | Backend |
//! |------------|---------|
//! | `disabled` | none; [`create_embedder`] returns `None` |
//! | `openai` | `POST https://api.openai.com/v1/embeddings` (`OPENAI_API_KEY`) |
//! | `ollama` | `POST {url}/api/embed` (default `http://localhost:11434`) |
//! | `local` | fastembed, in process (`local-embeddings` feature) |
//!
//! HTTP providers retry HTTP 429, 5xx and network errors with exponential
//! backoff (1s, 2s, 4s, ... capped at 32s). Other 4xx responses fail at
//! once.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use ticket_harness_core::embedding::Embedder;

use crate::config::EmbeddingConfig;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
#[cfg(feature = "local-embeddings")]
const LOCAL_DEFAULT_MODEL: &str = "all-minilm-l6-v2";

enum Backend {
    OpenAi { api_key: String },
    Ollama { url: String },
    #[cfg(feature = "local-embeddings")]
    Local { model: fastembed::EmbeddingModel },
}

/// The embedding provider named in configuration.
pub struct ConfiguredEmbedder {
    backend: Backend,
    client: reqwest::Client,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

/// Build the configured embedder, or `None` when embeddings are disabled.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<ConfiguredEmbedder>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let (backend, model, dims) = match config.provider.as_str() {
        "disabled" => return Ok(None),
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
            (
                Backend::OpenAi { api_key },
                required_model(config)?,
                required_dims(config)?,
            )
        }
        "ollama" => {
            let url = config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());
            (
                Backend::Ollama {
                    url: url.trim_end_matches('/').to_string(),
                },
                required_model(config)?,
                required_dims(config)?,
            )
        }
        #[cfg(feature = "local-embeddings")]
        "local" => {
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| LOCAL_DEFAULT_MODEL.to_string());
            let dims = config.dims.unwrap_or_else(|| local_model_dims(&model));
            (
                Backend::Local {
                    model: fastembed_model(&model)?,
                },
                model,
                dims,
            )
        }
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    };

    Ok(Some(ConfiguredEmbedder {
        backend,
        client,
        model,
        dims,
        batch_size: config.batch_size.max(1),
        max_retries: config.max_retries,
    }))
}

fn required_model(config: &EmbeddingConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {} provider", config.provider))
}

fn required_dims(config: &EmbeddingConfig) -> Result<usize> {
    config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for {} provider", config.provider))
}

impl ConfiguredEmbedder {
    /// Embed texts in `batch_size` groups, preserving input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embed_group(batch).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "{} returned {} embeddings for {} inputs",
                    self.model,
                    vectors.len(),
                    batch.len()
                );
            }
            check_dims(&self.model, self.dims, &vectors)?;
            out.extend(vectors);
        }
        Ok(out)
    }

    async fn embed_group(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            Backend::OpenAi { api_key } => {
                let body = serde_json::json!({ "model": self.model, "input": texts });
                let json = self
                    .post_with_retry("OpenAI", OPENAI_EMBEDDINGS_URL, Some(api_key.as_str()), &body)
                    .await?;
                parse_openai_response(&json)
            }
            Backend::Ollama { url } => {
                let body = serde_json::json!({ "model": self.model, "input": texts });
                let json = self
                    .post_with_retry("Ollama", &format!("{}/api/embed", url), None, &body)
                    .await
                    .with_context(|| format!("Ollama request failed (is Ollama running at {}?)", url))?;
                parse_ollama_response(&json)
            }
            #[cfg(feature = "local-embeddings")]
            Backend::Local { model } => {
                let model = model.clone();
                let texts = texts.to_vec();
                let batch_size = self.batch_size;
                // Model files are cached on disk after the first download.
                tokio::task::spawn_blocking(move || {
                    let mut engine = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(false),
                    )
                    .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                    engine
                        .embed(texts, Some(batch_size))
                        .map_err(|e| anyhow!("Local embedding failed: {}", e))
                })
                .await?
            }
        }
    }

    async fn post_with_retry(
        &self,
        label: &str,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, delay_secs = delay.as_secs(), "retrying {} embedding request", label);
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url).json(body);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await?);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, "{} embedding request failed, will retry", label);
                        last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                        continue;
                    }
                    bail!("{} API error {}: {}", label, status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow!("{} connection error: {}", label, e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", label)))
    }
}

#[async_trait]
impl Embedder for ConfiguredEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self
            .embed_group(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))?;
        check_dims(&self.model, self.dims, std::slice::from_ref(&vector))?;
        Ok(vector)
    }
}

/// Every vector must match the configured `embedding.dims`.
fn check_dims(model: &str, dims: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "{} returned {} dimensions, expected {} (check embedding.dims)",
            model,
            v.len(),
            dims
        );
    }
    Ok(())
}

fn parse_number_array(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid {} response: embedding is not an array", what))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("Invalid {} response: non-numeric component", what))
        })
        .collect()
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_number_array(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| parse_number_array(e, "Ollama"))
        .collect()
}

#[cfg(feature = "local-embeddings")]
fn local_model_dims(name: &str) -> usize {
    match name {
        "bge-base-en-v1.5" | "nomic-embed-text-v1.5" | "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported: all-minilm-l6-v2, \
             bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_provider_builds_nothing() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert!(embedder.is_none());
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let config = EmbeddingConfig {
            provider: "word2vec".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[test]
    fn ollama_requires_dims() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            ..EmbeddingConfig::default()
        };
        let err = create_embedder(&config).err().unwrap();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn vectors_must_match_configured_dims() {
        assert!(check_dims("m", 2, &[vec![1.0, 0.0], vec![0.0, 1.0]]).is_ok());

        let err = check_dims("m", 3, &[vec![0.0, 0.0, 1.0], vec![1.0, 0.0]]).unwrap_err();
        assert!(err.to_string().contains("returned 2 dimensions, expected 3"));
    }

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn ollama_response_rejects_non_numeric_components() {
        let json = serde_json::json!({ "embeddings": [[0.5, "x"]] });
        assert!(parse_ollama_response(&json).is_err());

        let ok = serde_json::json!({ "embeddings": [[0.5, 0.25]] });
        assert_eq!(parse_ollama_response(&ok).unwrap(), vec![vec![0.5, 0.25]]);
    }
}
