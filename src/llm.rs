//! Chat model abstraction and OpenAI-compatible HTTP client.
//!
//! The [`ChatModel`] trait is the seam used by query expansion and
//! answer synthesis; tests substitute deterministic stubs for it.
//! [`ApiChatModel`] talks to any OpenAI-compatible `chat/completions`
//! endpoint (OpenAI itself, or the HuggingFace router for hosted
//! open-weight models) with a bounded output length, a low fixed
//! sampling temperature, explicit stop sequences, a per-request
//! timeout, and retry with exponential backoff on 429/5xx.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;

/// One message in a chat completion request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A language model endpoint: prompt messages in, generated text out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Create the chat model for the configuration.
pub fn create_chat_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledChatModel)),
        "openai" | "hf" => Ok(Box::new(ApiChatModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Disabled model ============

/// Placeholder model used when `llm.provider = "disabled"`. Every call
/// errors; the query expander degrades to the unexpanded query and the
/// synthesizer surfaces the failure.
pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("Language model is disabled")
    }
}

// ============ OpenAI-compatible HTTP model ============

/// Chat model backed by an OpenAI-compatible `chat/completions` API.
pub struct ApiChatModel {
    model: String,
    base_url: String,
    api_key_env: &'static str,
    max_tokens: u32,
    temperature: f64,
    stop: Vec<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl ApiChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for provider '{}'", config.provider))?;

        let (default_base, api_key_env) = match config.provider.as_str() {
            "openai" => ("https://api.openai.com/v1", "OPENAI_API_KEY"),
            "hf" => ("https://router.huggingface.co/v1", "HF_TOKEN"),
            other => bail!("Unknown llm provider: {}", other),
        };
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base.to_string());

        if std::env::var(api_key_env).is_err() {
            bail!("{} environment variable not set", api_key_env);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            base_url,
            api_key_env,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop: config.stop.clone(),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for ApiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let api_key = std::env::var(self.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} not set", self.api_key_env))?;

        let payload: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": payload,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        if !self.stop.is_empty() {
            body["stop"] = serde_json::json!(self.stop);
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_completion(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Chat API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Chat API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
    }
}

/// Extract the first choice's message content as plain text.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))
}
