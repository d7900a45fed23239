//! Language-model client abstraction.
//!
//! The pipeline only needs one operation from a model: turn a prompt into
//! text. [`LanguageModel`] captures that; [`OllamaModel`] and
//! [`OpenAiModel`] are the HTTP-backed implementations selected by
//! `[llm].provider`.
//!
//! Calls are non-streaming. Transient HTTP failures (429, 5xx, network)
//! are retried with the same exponential backoff the embedding providers
//! use; the overall per-call deadline is enforced by the pipeline.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{AssistantError, AssistantResult, Stage};

/// Sampling options for a single generate call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: u32,
}

impl GenerateOptions {
    /// Deterministic decoding capped at `max_tokens`.
    pub fn greedy(max_tokens: u32) -> Self {
        Self {
            temperature: 0.0,
            top_p: None,
            max_tokens,
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate a completion for `prompt`. The returned text is untrimmed.
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;
}

/// A shared model handle that enforces a deadline on every call and tags
/// failures with the pipeline stage that issued them.
#[derive(Clone)]
pub struct BoundedModel {
    inner: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl BoundedModel {
    pub fn new(inner: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    pub async fn generate(
        &self,
        stage: Stage,
        prompt: &str,
        options: &GenerateOptions,
    ) -> AssistantResult<String> {
        match tokio::time::timeout(self.timeout, self.inner.generate(prompt, options)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(source)) => Err(AssistantError::Model { stage, source }),
            Err(_) => Err(AssistantError::Timeout {
                stage,
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

// ============ Ollama ============

/// Calls `POST {url}/api/generate` on a local Ollama instance.
pub struct OllamaModel {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let mut sampling = serde_json::json!({
            "temperature": options.temperature,
            "num_predict": options.max_tokens,
        });
        if let Some(top_p) = options.top_p {
            sampling["top_p"] = serde_json::json!(top_p);
        }
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": sampling,
        });

        let url = format!("{}/api/generate", self.url.trim_end_matches('/'));
        let json = post_json_with_retry(&self.client, &url, None, &body, self.max_retries, "Ollama")
            .await?;
        parse_ollama_generate(&json)
    }
}

fn parse_ollama_generate(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
}

// ============ OpenAI-compatible ============

/// Calls `POST {url}/v1/chat/completions` with the prompt as a single user
/// message. Requires `OPENAI_API_KEY`.
pub struct OpenAiModel {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        if let Some(top_p) = options.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        let url = format!("{}/v1/chat/completions", self.url.trim_end_matches('/'));
        let json = post_json_with_retry(
            &self.client,
            &url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_chat_completion(&json)
    }
}

fn parse_chat_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

/// POST a JSON body, retrying 429/5xx and network errors with exponential
/// backoff (1s, 2s, 4s, ... capped at 32s), and return the parsed response.
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }
                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!(
                    "{} connection error (is it running at {}?): {}",
                    label,
                    url,
                    e
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", label)))
}

/// Create the configured [`LanguageModel`].
pub fn create_model(config: &LlmConfig) -> Result<Box<dyn LanguageModel>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaModel::new(config)?)),
        "openai" => Ok(Box::new(OpenAiModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_generate() {
        let json = serde_json::json!({ "model": "m", "response": " Hello ", "done": true });
        assert_eq!(parse_ollama_generate(&json).unwrap(), " Hello ");
        assert!(parse_ollama_generate(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_chat_completion() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "factual" } }]
        });
        assert_eq!(parse_chat_completion(&json).unwrap(), "factual");
        assert!(parse_chat_completion(&serde_json::json!({ "choices": [] })).is_err());
    }

    struct Stalled;

    #[async_trait]
    impl LanguageModel for Stalled {
        fn model_name(&self) -> &str {
            "stalled"
        }
        async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_bounded_model_times_out() {
        let model = BoundedModel::new(Arc::new(Stalled), Duration::from_millis(20));
        let err = model
            .generate(Stage::Synthesize, "p", &GenerateOptions::greedy(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AssistantError::Timeout {
                stage: Stage::Synthesize,
                ..
            }
        ));
    }

    #[test]
    fn test_create_model_ollama() {
        let model = create_model(&LlmConfig::default()).unwrap();
        assert_eq!(model.model_name(), "qwen2.5:7b");
    }
}
