use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::providers::types::RequestOptions;

// ---------------------------------------------------------------------------
// Skip conditions
// ---------------------------------------------------------------------------

/// Returns `true` if this request should bypass the cache entirely.
///
/// Streaming responses are not deterministically replayable, so they are
/// never cached.
pub fn should_skip(options: &RequestOptions, config: &CacheConfig) -> bool {
    if options.stream {
        return true;
    }

    if config.skip_models.iter().any(|m| m == &options.model) {
        return true;
    }

    false
}

// ---------------------------------------------------------------------------
// Cache key (SHA-256 of canonical request fields)
// ---------------------------------------------------------------------------

/// Compute a deterministic SHA-256 hex digest from the cache-relevant fields
/// of a request: model, messages, temperature, and max_tokens. Sampling
/// fields outside this set do not participate, matching what makes two
/// completions interchangeable.
pub fn cache_key(options: &RequestOptions) -> String {
    let mut hasher = Sha256::new();

    // Version prefix to allow for future hashing logic updates
    hasher.update(b"v1:");

    hasher.update(options.model.as_bytes());
    hasher.update(b"|");

    for msg in &options.messages {
        hasher.update(msg.role.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(msg.content.trim().as_bytes());
        hasher.update(b";");
    }
    hasher.update(b"|");

    // Temperature rounded to 2 decimal places
    if let Some(temp) = options.temperature {
        let rounded = (temp * 100.0).round() / 100.0;
        hasher.update(format!("{rounded:.2}").as_bytes());
    }
    hasher.update(b"|");

    if let Some(max) = options.max_tokens {
        hasher.update(max.to_string().as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
