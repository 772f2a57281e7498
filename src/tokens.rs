//! Token counting.
//!
//! Attempts an exact tokenizer for models with a known encoding and falls
//! back to a character-based estimate for everything else. This path must
//! never fail: it feeds rate-limit admission and the public `count_tokens`
//! operation, both of which tolerate an estimate but not an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tiktoken_rs::CoreBPE;

/// Tokenizers are expensive to construct; cache one per model name.
fn bpe_cache() -> &'static Mutex<HashMap<String, Option<Arc<CoreBPE>>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Option<Arc<CoreBPE>>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Count tokens in `text` for `model`. Exact when the model maps to a known
/// BPE encoding, otherwise `ceil(chars / 4)`. Never fails.
pub fn count_tokens(text: &str, model: &str) -> u32 {
    match exact_count(text, model) {
        Some(count) => count,
        None => estimate_tokens(text),
    }
}

/// Character-based token estimate: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

fn exact_count(text: &str, model: &str) -> Option<u32> {
    let bpe = cached_bpe(model)?;
    let count = bpe.encode_with_special_tokens(text).len();
    Some(u32::try_from(count).unwrap_or(u32::MAX))
}

fn cached_bpe(model: &str) -> Option<Arc<CoreBPE>> {
    let mut cache = bpe_cache().lock().expect("tokenizer cache mutex poisoned");
    cache
        .entry(model.to_string())
        .or_insert_with(|| {
            tiktoken_rs::get_bpe_from_model(model)
                .map(Arc::new)
                .map_err(|e| {
                    tracing::debug!(model = %model, error = %e, "No exact tokenizer, will estimate");
                    e
                })
                .ok()
        })
        .clone()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_is_zero() {
        assert_eq!(count_tokens("", "gpt-4"), 0);
        assert_eq!(count_tokens("", "unknown-model"), 0);
    }

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn test_estimate_counts_chars_not_bytes() {
        // Four non-ASCII characters, twelve bytes.
        assert_eq!(estimate_tokens("日本語字"), 1);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let text = "hello world, this is a test";
        assert_eq!(
            count_tokens(text, "totally-unknown-model"),
            estimate_tokens(text)
        );
    }

    #[test]
    fn test_exact_path_for_gpt4() {
        // gpt-4 resolves to a real encoding; the exact count for plain ASCII
        // prose differs from a naive char/4 estimate often enough that we
        // just assert it is positive and sane.
        let count = count_tokens("The quick brown fox jumps over the lazy dog.", "gpt-4");
        assert!(count > 0);
        assert!(count < 45);
    }

    #[test]
    fn test_never_panics_on_weird_input() {
        for text in ["", " ", "\u{0}", "🦀🦀🦀", "\n\n\n", "a\u{202e}b"] {
            let _ = count_tokens(text, "gpt-4");
            let _ = count_tokens(text, "no-such-model");
        }
    }

    #[test]
    fn test_cache_is_stable_across_calls() {
        let first = count_tokens("hello world", "gpt-4");
        let second = count_tokens("hello world", "gpt-4");
        assert_eq!(first, second);
    }
}
