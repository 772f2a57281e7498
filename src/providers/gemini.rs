//! Gemini provider adapter.
//!
//! Speaks the Generative Language API (`generateContent` /
//! `batchEmbedContents`). Gemini addresses models in the URL path and
//! authenticates with a query-string key rather than a bearer header.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use uuid::Uuid;

use crate::config::ProviderConfig;
use crate::providers::catalog::ModelConfig;
use crate::providers::types::{
    ProviderCompletion, ProviderEmbeddings, RequestOptions, Role, Usage,
};
use crate::providers::{LlmProvider, ProviderError};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

// ---------------------------------------------------------------------------
// Wire types for deserialization
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    response_id: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, serde::Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, serde::Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

// ---------------------------------------------------------------------------
// GeminiProvider
// ---------------------------------------------------------------------------

pub struct GeminiProvider {
    config: ProviderConfig,
    client: Client,
}

impl GeminiProvider {
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
            .ok_or_else(|| ProviderError::MissingApiKey("gemini".into()))
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                provider: "gemini".into(),
                secs: self.config.timeout_secs,
            }
        } else {
            ProviderError::Http(e)
        }
    }

    /// Build the generateContent body. System messages become
    /// `systemInstruction`; assistant turns map to the "model" role.
    fn build_request_body(options: &RequestOptions, config: &ModelConfig) -> serde_json::Value {
        let mut system_parts: Vec<serde_json::Value> = Vec::new();
        let mut contents: Vec<serde_json::Value> = Vec::new();

        for msg in &options.messages {
            match msg.role {
                Role::System => system_parts.push(serde_json::json!({ "text": msg.content })),
                Role::User => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{ "text": msg.content }],
                })),
                Role::Assistant => contents.push(serde_json::json!({
                    "role": "model",
                    "parts": [{ "text": msg.content }],
                })),
            }
        }

        let mut generation_config = serde_json::json!({
            "temperature": options.temperature.unwrap_or(config.default_temperature),
            "maxOutputTokens": options
                .max_tokens
                .unwrap_or(config.default_max_tokens)
                .min(config.max_output_tokens),
        });
        if let Some(top_p) = options.top_p {
            generation_config["topP"] = serde_json::json!(top_p);
        }
        if let Some(ref stop) = options.stop {
            generation_config["stopSequences"] =
                serde_json::to_value(stop.as_vec()).unwrap_or_default();
        }

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if !system_parts.is_empty() {
            body["systemInstruction"] = serde_json::json!({ "parts": system_parts });
        }

        body
    }

    /// Normalize Gemini finish reasons to the gateway vocabulary.
    fn normalize_finish_reason(reason: Option<&str>) -> String {
        match reason {
            Some("STOP") | None => "stop".to_string(),
            Some("MAX_TOKENS") => "length".to_string(),
            Some(other) => other.to_ascii_lowercase(),
        }
    }
}

impl LlmProvider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    fn complete(
        &self,
        options: &RequestOptions,
        config: &ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderCompletion, ProviderError>> + Send + '_>> {
        let body = Self::build_request_body(options, config);
        let model = config.model.clone();
        Box::pin(async move {
            let key = self.api_key()?;
            let url = format!(
                "{}/v1beta/models/{}:generateContent?key={}",
                self.base_url(),
                model,
                key
            );

            let resp = self
                .client
                .post(&url)
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

            let parsed: GenerateResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            let candidate = parsed
                .candidates
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::Parse("response contained no candidates".into()))?;

            let content: String = candidate
                .content
                .map(|c| {
                    c.parts
                        .iter()
                        .filter_map(|p| p.text.as_deref())
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default();

            let usage = parsed
                .usage_metadata
                .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count))
                .unwrap_or_default();

            Ok(ProviderCompletion {
                id: parsed
                    .response_id
                    .unwrap_or_else(|| format!("gemini-{}", Uuid::new_v4())),
                model,
                content,
                finish_reason: Self::normalize_finish_reason(candidate.finish_reason.as_deref()),
                usage,
            })
        })
    }

    fn embed(
        &self,
        texts: &[String],
        config: &ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderEmbeddings, ProviderError>> + Send + '_>> {
        let model = config.model.clone();
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "model": format!("models/{model}"),
                    "content": { "parts": [{ "text": t }] },
                })
            })
            .collect();
        // The batch endpoint returns no usage metadata; estimate from input
        // length so cost accounting stays populated.
        let estimated_tokens: u32 = texts
            .iter()
            .map(|t| (t.chars().count() as u32).div_ceil(4))
            .sum();
        Box::pin(async move {
            let key = self.api_key()?;
            let url = format!(
                "{}/v1beta/models/{}:batchEmbedContents?key={}",
                self.base_url(),
                model,
                key
            );

            let resp = self
                .client
                .post(&url)
                .json(&serde_json::json!({ "requests": requests }))
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

            let parsed: BatchEmbedResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            Ok(ProviderEmbeddings {
                embeddings: parsed.embeddings.into_iter().map(|e| e.values).collect(),
                usage: Usage::new(estimated_tokens, 0),
            })
        })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            let key = match self.api_key() {
                Ok(k) => k,
                Err(_) => return false,
            };
            let url = format!("{}/v1beta/models?key={}", self.base_url(), key);
            match self.client.get(&url).send().await {
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
            model: "gemini-1.5-flash".into(),
            provider: "gemini".into(),
            context_window: 1_000_000,
            max_output_tokens: 8192,
            cost_per_1k_input_tokens: 0.000075,
            cost_per_1k_output_tokens: 0.0003,
            default_temperature: 0.7,
            default_max_tokens: 1024,
        }
    }

    fn options() -> RequestOptions {
        RequestOptions {
            model: "gemini-1.5-flash".into(),
            messages: vec![
                Message::new(Role::System, "Be terse."),
                Message::new(Role::User, "Hello"),
                Message::new(Role::Assistant, "Hi."),
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
    fn test_roles_map_to_gemini_vocabulary() {
        let body = GeminiProvider::build_request_body(&options(), &model_config());
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert!(body["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("terse"));
    }

    #[test]
    fn test_generation_config_defaults() {
        let body = GeminiProvider::build_request_body(&options(), &model_config());
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_finish_reason_normalization() {
        assert_eq!(GeminiProvider::normalize_finish_reason(Some("STOP")), "stop");
        assert_eq!(
            GeminiProvider::normalize_finish_reason(Some("MAX_TOKENS")),
            "length"
        );
        assert_eq!(GeminiProvider::normalize_finish_reason(None), "stop");
        assert_eq!(
            GeminiProvider::normalize_finish_reason(Some("SAFETY")),
            "safety"
        );
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "Hello "}, {"text": "world"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 2}
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(parsed.usage_metadata.as_ref().unwrap().prompt_token_count, 7);
        assert!(parsed.response_id.is_none());
    }

    #[test]
    fn test_batch_embed_parsing() {
        let raw = r#"{"embeddings": [{"values": [0.1, 0.2]}, {"values": [0.3, 0.4]}]}"#;
        let parsed: BatchEmbedResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[0].values.len(), 2);
    }
}
