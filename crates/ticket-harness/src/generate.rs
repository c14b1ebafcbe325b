//! Answer generation over assembled context.
//!
//! Builds the instruction prompt around a context block and sends it to
//! the configured text-generation provider:
//!
//! | Provider | Endpoint |
//! |----------|----------|
//! | `huggingface` | `https://api-inference.huggingface.co/models/{model}` (needs `HF_API_KEY`) |
//! | `ollama` | `{url}/api/generate`, non-streaming |
//! | `disabled` | no generator is built |

use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::GenerationConfig;

/// Shown to users when the generation provider cannot produce an answer.
pub const UNAVAILABLE_MESSAGE: &str =
    "AI service temporarily unavailable.\n\nPlease try again after some time.";

const HUGGINGFACE_BASE_URL: &str = "https://api-inference.huggingface.co/models";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),
    #[error("generation model is not configured")]
    MissingModel,
    #[error("unknown generation provider '{0}'")]
    UnknownProvider(String),
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("generation provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected generation response: {0}")]
    MalformedResponse(String),
}

/// The instruction prompt wrapped around retrieved context.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        r#"
You are a helpful AI assistant.
Answer clearly and simply.

Rules:
- Use simple, clear words
- Short paragraphs
- Do NOT mention Jira, tickets, IDs, sections, or documents
- Use the context only as background
- If information is unclear, answer generally

Context:
{context}

Question:
{question}

Answer:
"#
    )
    .trim()
    .to_string()
}

enum Backend {
    HuggingFace { url: String, api_key: String },
    Ollama { url: String },
}

pub struct Generator {
    backend: Backend,
    client: reqwest::Client,
    model: String,
    max_new_tokens: u32,
    temperature: f32,
}

/// Build the configured generator, or `None` when generation is disabled.
pub fn create_generator(config: &GenerationConfig) -> Result<Option<Generator>, GenerationError> {
    let model = match config.provider.as_str() {
        "disabled" => return Ok(None),
        "huggingface" | "ollama" => config.model.clone().ok_or(GenerationError::MissingModel)?,
        other => return Err(GenerationError::UnknownProvider(other.to_string())),
    };

    let backend = if config.provider == "huggingface" {
        let api_key =
            std::env::var("HF_API_KEY").map_err(|_| GenerationError::MissingApiKey("HF_API_KEY"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| HUGGINGFACE_BASE_URL.to_string());
        Backend::HuggingFace {
            url: format!("{}/{}", base.trim_end_matches('/'), model),
            api_key,
        }
    } else {
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());
        Backend::Ollama {
            url: format!("{}/api/generate", base.trim_end_matches('/')),
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    Ok(Some(Generator {
        backend,
        client,
        model,
        max_new_tokens: config.max_new_tokens,
        temperature: config.temperature,
    }))
}

impl Generator {
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Answer `question` using `context` as background.
    #[instrument(skip(self, context), fields(model = %self.model))]
    pub async fn answer(&self, context: &str, question: &str) -> Result<String, GenerationError> {
        let prompt = build_prompt(context, question);
        debug!(prompt_chars = prompt.len(), "sending generation request");

        let request = match &self.backend {
            Backend::HuggingFace { url, api_key } => {
                self.client.post(url).bearer_auth(api_key).json(&json!({
                    "inputs": prompt,
                    "parameters": {
                        "max_new_tokens": self.max_new_tokens,
                        "temperature": self.temperature,
                        "return_full_text": false,
                    }
                }))
            }
            Backend::Ollama { url } => self.client.post(url).json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "num_predict": self.max_new_tokens,
                    "temperature": self.temperature,
                }
            })),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response.json().await?;
        let text = match self.backend {
            Backend::HuggingFace { .. } => huggingface_text(&json),
            Backend::Ollama { .. } => ollama_text(&json),
        };
        text.map(|text| text.trim().to_string())
            .ok_or_else(|| GenerationError::MalformedResponse(truncate(&json.to_string(), 200)))
    }
}

/// `[{"generated_text": "..."}]`, or a bare object from some deployments.
fn huggingface_text(json: &serde_json::Value) -> Option<String> {
    let item = json.get(0).unwrap_or(json);
    item.get("generated_text")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn ollama_text(json: &serde_json::Value) -> Option<String> {
    json.get("response")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_context_and_question() {
        let prompt = build_prompt("Restart the VPN service.", "How do I fix VPN drops?");
        assert!(prompt.starts_with("You are a helpful AI assistant."));
        assert!(prompt.contains("Context:\nRestart the VPN service.\n\nQuestion:\nHow do I fix VPN drops?"));
        assert!(prompt.ends_with("Answer:"));
        assert!(prompt.contains("- Do NOT mention Jira, tickets, IDs, sections, or documents"));
    }

    #[test]
    fn disabled_provider_builds_nothing() {
        let cfg = GenerationConfig::default();
        assert!(create_generator(&cfg).unwrap().is_none());
    }

    #[test]
    fn ollama_without_model_is_rejected() {
        let cfg = GenerationConfig {
            provider: "ollama".into(),
            ..GenerationConfig::default()
        };
        assert!(matches!(
            create_generator(&cfg),
            Err(GenerationError::MissingModel)
        ));
    }

    #[test]
    fn response_shapes_are_parsed() {
        let hf = json!([{ "generated_text": " Restart it. " }]);
        assert_eq!(huggingface_text(&hf).as_deref(), Some(" Restart it. "));
        assert_eq!(huggingface_text(&json!({"error": "loading"})), None);

        let ollama = json!({ "model": "llama3", "response": "Clear the cache.", "done": true });
        assert_eq!(ollama_text(&ollama).as_deref(), Some("Clear the cache."));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("ok", 5), "ok");
    }
}
