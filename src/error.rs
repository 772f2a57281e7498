//! Gateway error taxonomy and provider-failure classification.
//!
//! Every failure surfaced to callers is a [`GatewayError`] carrying a closed
//! [`ErrorCode`] and a `retryable` flag. Retryability is decided here and
//! nowhere else; callers must branch on the flag, not on message text.

use serde::Serialize;

use crate::providers::ProviderError;

/// Closed set of gateway error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Caller asked for a model that is not in the catalog.
    ModelNotConfigured,
    /// A fixed-window rate limit denied admission, or the upstream returned 429.
    RateLimitExceeded,
    /// Daily or monthly spend has reached its hard cap.
    BudgetExceeded,
    /// Upstream rejected our credentials.
    InvalidApiKey,
    /// Upstream is unreachable, timing out, or failing server-side.
    ServiceUnavailable,
    /// Anything that does not fit the taxonomy; logged for investigation.
    UnknownError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ModelNotConfigured => "MODEL_NOT_CONFIGURED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::UnknownError => "UNKNOWN_ERROR",
        };
        write!(f, "{s}")
    }
}

/// The only error shape the gateway returns to callers.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    /// The provider responsible for the failure, when one was involved.
    pub provider: Option<String>,
    /// Whether the same request may succeed if reissued later.
    pub retryable: bool,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            retryable,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn model_not_configured(model: &str) -> Self {
        Self::new(
            ErrorCode::ModelNotConfigured,
            format!("Model not configured: {model}"),
            false,
        )
    }

    /// Rate-limit denial. Per-minute windows are retryable; per-day windows
    /// are not (retrying within the same day would violate the cap again).
    pub fn rate_limited(message: impl Into<String>, retryable: bool) -> Self {
        Self::new(ErrorCode::RateLimitExceeded, message, retryable)
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BudgetExceeded, message, false)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownError, message, false)
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        tracing::error!(error = %err, "Database error");
        Self::internal(format!("storage error: {err}"))
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Normalize a heterogeneous provider failure into the closed taxonomy.
///
/// Mapping:
///   HTTP 429            -> RATE_LIMIT_EXCEEDED, retryable
///   HTTP 401            -> INVALID_API_KEY, not retryable
///   HTTP >= 500         -> SERVICE_UNAVAILABLE, retryable
///   timeouts / connect  -> SERVICE_UNAVAILABLE, retryable
///   anything else       -> UNKNOWN_ERROR, not retryable
pub fn classify(err: ProviderError, provider: &str) -> GatewayError {
    let gateway_err = match &err {
        ProviderError::Api { status, message } => classify_status(*status, message),
        ProviderError::Http(e) => {
            if e.is_timeout() || e.is_connect() {
                GatewayError::new(ErrorCode::ServiceUnavailable, e.to_string(), true)
            } else if let Some(status) = e.status() {
                classify_status(status.as_u16(), &e.to_string())
            } else {
                GatewayError::new(ErrorCode::UnknownError, e.to_string(), false)
            }
        }
        ProviderError::Timeout { .. } => {
            GatewayError::new(ErrorCode::ServiceUnavailable, err.to_string(), true)
        }
        ProviderError::MissingApiKey(_) => {
            GatewayError::new(ErrorCode::InvalidApiKey, err.to_string(), false)
        }
        ProviderError::Unsupported { .. }
        | ProviderError::NoProvider(_)
        | ProviderError::Parse(_) => {
            GatewayError::new(ErrorCode::UnknownError, err.to_string(), false)
        }
    };

    if gateway_err.code == ErrorCode::UnknownError {
        tracing::error!(provider = %provider, error = %gateway_err.message, "Unclassified provider error");
    }

    gateway_err.with_provider(provider)
}

fn classify_status(status: u16, message: &str) -> GatewayError {
    match status {
        429 => GatewayError::new(
            ErrorCode::RateLimitExceeded,
            format!("Provider rate limit: {message}"),
            true,
        ),
        401 => GatewayError::new(
            ErrorCode::InvalidApiKey,
            format!("Provider rejected credentials: {message}"),
            false,
        ),
        s if s >= 500 => GatewayError::new(
            ErrorCode::ServiceUnavailable,
            format!("Provider error ({s}): {message}"),
            true,
        ),
        s => GatewayError::new(
            ErrorCode::UnknownError,
            format!("Provider error ({s}): {message}"),
            false,
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
