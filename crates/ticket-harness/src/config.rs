//! TOML configuration.
//!
//! Every command receives a `&Config` loaded once at startup; there is no
//! global configuration state. Secrets (API keys) are never read from the
//! file, only from the environment.
//!
//! ```toml
//! [db]
//! path = "./data/tickets.sqlite"
//!
//! [retrieval]
//! lexical_top_k = 20
//! rrf_k = 60.0
//! final_limit = 10
//! max_chunks = 3
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//! dims = 384
//!
//! [generation]
//! provider = "huggingface"
//! model = "mistralai/Mistral-7B-Instruct-v0.2"
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ticket_harness_core::search::{EmbeddingFailurePolicy, SearchParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_lexical_top_k")]
    pub lexical_top_k: usize,
    #[serde(default)]
    pub dense_limit: Option<usize>,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    /// Rank lexically when the query cannot be embedded instead of failing.
    #[serde(default)]
    pub lexical_fallback: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_top_k: default_lexical_top_k(),
            dense_limit: None,
            rrf_k: default_rrf_k(),
            final_limit: default_final_limit(),
            max_chunks: default_max_chunks(),
            lexical_fallback: false,
        }
    }
}

impl RetrievalConfig {
    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            lexical_top_k: self.lexical_top_k,
            dense_limit: self.dense_limit,
            rrf_k: self.rrf_k,
            final_limit: self.final_limit,
            max_chunks: self.max_chunks,
            on_embedding_failure: if self.lexical_fallback {
                EmbeddingFailurePolicy::LexicalOnly
            } else {
                EmbeddingFailurePolicy::Fail
            },
        }
    }
}

fn default_lexical_top_k() -> usize {
    20
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_final_limit() -> usize {
    10
}
fn default_max_chunks() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_max_new_tokens() -> u32 {
    300
}
fn default_temperature() -> f32 {
    0.3
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;

    let r = &config.retrieval;
    if r.lexical_top_k == 0 {
        bail!("retrieval.lexical_top_k must be >= 1");
    }
    if r.final_limit == 0 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if !r.rrf_k.is_finite() || r.rrf_k < 0.0 {
        bail!("retrieval.rrf_k must be a finite number >= 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if matches!(config.embedding.dims, None | Some(0)) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.generation.provider.as_str() {
        "disabled" => {}
        "huggingface" | "ollama" => {
            if config.generation.model.is_none() {
                bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, huggingface, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"./t.sqlite\"\n").unwrap();
        assert_eq!(cfg.retrieval.lexical_top_k, 20);
        assert_eq!(cfg.retrieval.max_chunks, 3);
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.generation.is_enabled());
        assert_eq!(cfg.generation.max_new_tokens, 300);
        assert_eq!(cfg.server.bind, "127.0.0.1:7341");

        let params = cfg.retrieval.search_params();
        assert_eq!(params.rrf_k, 60.0);
        assert_eq!(params.on_embedding_failure, EmbeddingFailurePolicy::Fail);
    }

    #[test]
    fn lexical_fallback_maps_to_policy() {
        let cfg = parse_config(
            "[db]\npath = \"t.sqlite\"\n[retrieval]\nlexical_fallback = true\n",
        )
        .unwrap();
        assert_eq!(
            cfg.retrieval.search_params().on_embedding_failure,
            EmbeddingFailurePolicy::LexicalOnly
        );
    }

    #[test]
    fn rejects_zero_final_limit() {
        let err = parse_config("[db]\npath = \"t.sqlite\"\n[retrieval]\nfinal_limit = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("final_limit"));
    }

    #[test]
    fn rejects_negative_rrf_k() {
        assert!(parse_config("[db]\npath = \"t.sqlite\"\n[retrieval]\nrrf_k = -1.0\n").is_err());
    }

    #[test]
    fn openai_requires_model_and_dims() {
        let err = parse_config("[db]\npath = \"t.sqlite\"\n[embedding]\nprovider = \"openai\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn unknown_generation_provider_is_rejected() {
        let err = parse_config("[db]\npath = \"t.sqlite\"\n[generation]\nprovider = \"gpt\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }
}
