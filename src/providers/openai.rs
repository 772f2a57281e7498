//! OpenAI provider adapter.
//!
//! Speaks the OpenAI chat-completions and embeddings wire format. Also
//! serves OpenAI-compatible servers via the `base_url` override.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;

use crate::config::ProviderConfig;
use crate::providers::catalog::ModelConfig;
use crate::providers::types::{ProviderCompletion, ProviderEmbeddings, RequestOptions, Usage};
use crate::providers::{LlmProvider, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

// ---------------------------------------------------------------------------
// Wire types for deserialization
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct OaiResponse {
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<OaiChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiChoice {
    #[serde(default)]
    message: Option<OaiMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, serde::Deserialize)]
struct OaiEmbeddingResponse {
    #[serde(default)]
    data: Vec<OaiEmbeddingData>,
    #[serde(default)]
    usage: Option<OaiEmbeddingUsage>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiEmbeddingUsage {
    #[serde(default)]
    prompt_tokens: u32,
}

// ---------------------------------------------------------------------------
// OpenAiProvider
// ---------------------------------------------------------------------------

pub struct OpenAiProvider {
    config: ProviderConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ProviderError::Http)?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingApiKey("openai".into()))
    }

    /// Translate a send-level error, distinguishing timeouts so they
    /// classify as retryable service unavailability.
    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                provider: "openai".into(),
                secs: self.config.timeout_secs,
            }
        } else {
            ProviderError::Http(e)
        }
    }

    fn build_completion_body(options: &RequestOptions, config: &ModelConfig) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = options
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.to_string(),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": config.model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(config.default_temperature),
            "max_tokens": options
                .max_tokens
                .unwrap_or(config.default_max_tokens)
                .min(config.max_output_tokens),
        });

        if let Some(top_p) = options.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(fp) = options.frequency_penalty {
            body["frequency_penalty"] = serde_json::json!(fp);
        }
        if let Some(pp) = options.presence_penalty {
            body["presence_penalty"] = serde_json::json!(pp);
        }
        if let Some(ref stop) = options.stop {
            body["stop"] = serde_json::to_value(stop.as_vec()).unwrap_or_default();
        }
        if let Some(ref user) = options.user {
            body["user"] = serde_json::json!(user);
        }

        body
    }
}

impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn complete(
        &self,
        options: &RequestOptions,
        config: &ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderCompletion, ProviderError>> + Send + '_>> {
        let body = Self::build_completion_body(options, config);
        Box::pin(async move {
            let key = self.api_key()?;
            let url = format!("{}/v1/chat/completions", self.base_url());

            let resp = self
                .client
                .post(&url)
                .bearer_auth(key)
                .json(&body)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;

            let status = resp.status();
            if !status.is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let oai: OaiResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            let choice = oai
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::Parse("response contained no choices".into()))?;

            let usage = oai
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
                .unwrap_or_default();

            Ok(ProviderCompletion {
                id: oai.id,
                model: oai.model,
                content: choice.message.and_then(|m| m.content).unwrap_or_default(),
                finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".into()),
                usage,
            })
        })
    }

    fn embed(
        &self,
        texts: &[String],
        config: &ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderEmbeddings, ProviderError>> + Send + '_>> {
        let body = serde_json::json!({
            "model": config.model,
            "input": texts,
        });
        Box::pin(async move {
            let key = self.api_key()?;
            let url = format!("{}/v1/embeddings", self.base_url());

            let resp = self
                .client
                .post(&url)
                .bearer_auth(key)
                .json(&body)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;

            let status = resp.status();
            if !status.is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: OaiEmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            let prompt_tokens = parsed.usage.map(|u| u.prompt_tokens).unwrap_or_default();

            Ok(ProviderEmbeddings {
                embeddings: parsed.data.into_iter().map(|d| d.embedding).collect(),
                usage: Usage::new(prompt_tokens, 0),
            })
        })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            let key = match self.api_key() {
                Ok(k) => k,
                Err(_) => return false,
            };
            let url = format!("{}/v1/models", self.base_url());
            match self.client.get(&url).bearer_auth(key).send().await {
                Ok(resp) => resp.status().is_success(),
                Err(_) => false,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
