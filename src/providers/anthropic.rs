//! Anthropic provider adapter.
//!
//! Speaks the Anthropic messages API. System messages are lifted into the
//! top-level `system` field; stop reasons are normalized to the gateway's
//! finish-reason vocabulary. Anthropic has no embeddings surface.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;

use crate::config::ProviderConfig;
use crate::providers::catalog::ModelConfig;
use crate::providers::types::{
    ProviderCompletion, ProviderEmbeddings, RequestOptions, Role, Usage,
};
use crate::providers::{LlmProvider, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Wire types for deserialization
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct MessagesResponse {
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, serde::Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

// ---------------------------------------------------------------------------
// AnthropicProvider
// ---------------------------------------------------------------------------

pub struct AnthropicProvider {
    config: ProviderConfig,
    client: Client,
}

impl AnthropicProvider {
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
            .ok_or_else(|| ProviderError::MissingApiKey("anthropic".into()))
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                provider: "anthropic".into(),
                secs: self.config.timeout_secs,
            }
        } else {
            ProviderError::Http(e)
        }
    }

    /// Build the messages-API body. System messages become the `system`
    /// field; the rest map user/assistant verbatim.
    fn build_request_body(options: &RequestOptions, config: &ModelConfig) -> serde_json::Value {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut messages: Vec<serde_json::Value> = Vec::new();

        for msg in &options.messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                Role::User | Role::Assistant => messages.push(serde_json::json!({
                    "role": msg.role.to_string(),
                    "content": msg.content,
                })),
            }
        }

        let mut body = serde_json::json!({
            "model": config.model,
            "messages": messages,
            "max_tokens": options
                .max_tokens
                .unwrap_or(config.default_max_tokens)
                .min(config.max_output_tokens),
            "temperature": options.temperature.unwrap_or(config.default_temperature),
        });

        if !system_parts.is_empty() {
            body["system"] = serde_json::json!(system_parts.join("\n\n"));
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(ref stop) = options.stop {
            body["stop_sequences"] = serde_json::to_value(stop.as_vec()).unwrap_or_default();
        }
        if let Some(ref user) = options.user {
            body["metadata"] = serde_json::json!({ "user_id": user });
        }

        body
    }

    /// Normalize Anthropic stop reasons to the gateway vocabulary.
    fn normalize_stop_reason(reason: Option<&str>) -> String {
        match reason {
            Some("end_turn") | None => "stop".to_string(),
            Some("max_tokens") => "length".to_string(),
            Some("stop_sequence") => "stop".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn complete(
        &self,
        options: &RequestOptions,
        config: &ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderCompletion, ProviderError>> + Send + '_>> {
        let body = Self::build_request_body(options, config);
        Box::pin(async move {
            let key = self.api_key()?;
            let url = format!("{}/v1/messages", self.base_url());

            let resp = self
                .client
                .post(&url)
                .header("x-api-key", key)
                .header("anthropic-version", API_VERSION)
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

            let parsed: MessagesResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            let content: String = parsed
                .content
                .iter()
                .filter_map(|b| b.text.as_deref())
                .collect::<Vec<_>>()
                .join("");

            let usage = parsed
                .usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens))
                .unwrap_or_default();

            Ok(ProviderCompletion {
                id: parsed.id,
                model: parsed.model,
                content,
                finish_reason: Self::normalize_stop_reason(parsed.stop_reason.as_deref()),
                usage,
            })
        })
    }

    fn embed(
        &self,
        _texts: &[String],
        _config: &ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderEmbeddings, ProviderError>> + Send + '_>> {
        Box::pin(async move {
            Err(ProviderError::Unsupported {
                provider: "anthropic".into(),
                operation: "embeddings".into(),
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
            match self
                .client
                .get(&url)
                .header("x-api-key", key)
                .header("anthropic-version", API_VERSION)
                .send()
                .await
            {
                Ok(resp) => resp.status().is_success(),
                Err(_) => false,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::Message;

    fn model_config() -> ModelConfig {
        ModelConfig {
            model: "claude-3-5-sonnet-20241022".into(),
            provider: "anthropic".into(),
            context_window: 200_000,
            max_output_tokens: 8192,
            cost_per_1k_input_tokens: 0.003,
            cost_per_1k_output_tokens: 0.015,
            default_temperature: 0.7,
            default_max_tokens: 1024,
        }
    }

    fn options() -> RequestOptions {
        RequestOptions {
            model: "claude-3-5-sonnet-20241022".into(),
            messages: vec![
                Message::new(Role::System, "Be terse."),
                Message::new(Role::User, "Hello"),
                Message::new(Role::Assistant, "Hi."),
                Message::new(Role::User, "How are you?"),
            ],
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            stream: false,
            user: None,
        }
    }

    #[test]
    fn test_system_messages_are_lifted() {
        let body = AnthropicProvider::build_request_body(&options(), &model_config());
        assert_eq!(body["system"], "Be terse.");
        // The system message is not in the messages array.
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_max_tokens_always_present() {
        // The messages API requires max_tokens; the model default fills it.
        let body = AnthropicProvider::build_request_body(&options(), &model_config());
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn test_stop_reason_normalization() {
        assert_eq!(AnthropicProvider::normalize_stop_reason(Some("end_turn")), "stop");
        assert_eq!(AnthropicProvider::normalize_stop_reason(Some("max_tokens")), "length");
        assert_eq!(
            AnthropicProvider::normalize_stop_reason(Some("stop_sequence")),
            "stop"
        );
        assert_eq!(AnthropicProvider::normalize_stop_reason(None), "stop");
        assert_eq!(AnthropicProvider::normalize_stop_reason(Some("tool_use")), "tool_use");
    }

    #[test]
    fn test_response_parsing_joins_blocks() {
        let raw = r#"{
            "id": "msg_01",
            "model": "claude-3-5-sonnet-20241022",
            "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": " world"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 4}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect();
        assert_eq!(text, "Hello world");
        assert_eq!(parsed.usage.unwrap().input_tokens, 12);
    }

    #[tokio::test]
    async fn test_embeddings_unsupported() {
        let provider = AnthropicProvider::new(ProviderConfig::default()).unwrap();
        let err = provider
            .embed(&["text".to_string()], &model_config())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported { .. }));
    }
}
