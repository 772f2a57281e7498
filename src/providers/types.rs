use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A completion request as supplied by calling application code.
///
/// Value type; never mutated after creation. Sampling fields are optional
/// overrides layered on top of the model's configured defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestOptions {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub stop: Option<StopSequence>,
    #[serde(default)]
    pub stream: bool,
    /// Opaque end-user identifier, forwarded to providers that accept one.
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequence {
    Single(String),
    Multiple(Vec<String>),
}

impl StopSequence {
    /// Normalize to a list regardless of the wire shape.
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![s.clone()],
            Self::Multiple(v) => v.clone(),
        }
    }
}

/// A single role-tagged message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// Token usage reported by a provider for one completed call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Cost of one request in fractional USD, derived from [`Usage`] and the
/// model's per-1k-token pricing. Pure data; produced by the cost calculator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

/// Request metadata filled in by the orchestrator (the router does not know
/// the request's start time or cache disposition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub provider: String,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub cached: bool,
}

/// The unit returned to callers, cached, and audited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Upstream-assigned response identifier.
    pub id: String,
    /// Resolved model name.
    pub model: String,
    pub content: String,
    pub finish_reason: String,
    pub usage: Usage,
    pub cost: CostBreakdown,
    pub metadata: ResponseMetadata,
}

/// What a provider adapter returns from a completion call. Latency and
/// cache-hit metadata are layered on by the orchestrator.
#[derive(Debug, Clone)]
pub struct ProviderCompletion {
    pub id: String,
    pub model: String,
    pub content: String,
    pub finish_reason: String,
    pub usage: Usage,
}

/// An embeddings request.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsRequest {
    pub input: EmbeddingInput,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Multiple(Vec<String>),
}

impl EmbeddingInput {
    /// Borrow the input texts as a flat list.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            Self::Single(s) => vec![s.as_str()],
            Self::Multiple(v) => v.iter().map(String::as_str).collect(),
        }
    }

    /// Total character count across all inputs.
    pub fn char_count(&self) -> usize {
        self.texts().iter().map(|t| t.chars().count()).sum()
    }
}

/// What a provider adapter returns from an embeddings call.
#[derive(Debug, Clone)]
pub struct ProviderEmbeddings {
    pub embeddings: Vec<Vec<f32>>,
    pub usage: Usage,
}

/// Embeddings result returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingsResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub usage: Usage,
    pub cost: CostBreakdown,
    pub metadata: ResponseMetadata,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
