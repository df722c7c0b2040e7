//! Structured-output repair.
//!
//! Models asked for JSON often wrap it in prose or markdown fences. Local
//! strategies are tried in order:
//!
//! 1. parse the whole text
//! 2. parse the first fenced code block (optionally language-tagged)
//! 3. parse the slice from the first `{` to the last `}`
//!
//! If all fail, [`repair_json`] spends at most [`MAX_CORRECTION_ROUNDS`]
//! round-trips asking a model to re-emit the text as bare JSON, then runs the
//! same strategies on the answer.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use triage_resilience::LlmError;

/// Correction round-trips allowed per repair.
pub const MAX_CORRECTION_ROUNDS: u32 = 1;

/// Default timeout for a correction round-trip.
pub const DEFAULT_CORRECTION_TIMEOUT: Duration = Duration::from_secs(15);

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid fenced block regex")
});

/// Something that can answer a prompt. Implemented by the router.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, LlmError>;
}

/// Run the local strategies; no model round-trip.
pub fn extract_json(raw: &str) -> Result<Value, LlmError> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(block) = FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str(block.as_str().trim()) {
            debug!("extracted JSON from fenced block");
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                debug!("extracted JSON from brace slice");
                return Ok(value);
            }
        }
    }

    Err(LlmError::parse(raw))
}

/// Prompt asking a model to re-emit `invalid` as bare JSON.
pub fn correction_prompt(invalid: &str) -> String {
    format!(
        "The following output was NOT valid JSON.\n\n\
         Return ONLY valid JSON.\n\
         No explanation.\n\
         No markdown.\n\n\
         INVALID OUTPUT:\n{invalid}"
    )
}

/// Local strategies, then at most [`MAX_CORRECTION_ROUNDS`] correction calls.
///
/// Any failure of the correction call itself (including every provider being
/// exhausted) is reported as a parse error on the original text.
pub async fn repair_json<C>(completer: &C, raw: &str, timeout: Duration) -> Result<Value, LlmError>
where
    C: Completion + ?Sized,
{
    let mut candidate = raw.to_string();
    let mut rounds = 0;

    loop {
        if let Ok(value) = extract_json(&candidate) {
            if rounds > 0 {
                info!(rounds, "JSON recovered after correction");
            }
            return Ok(value);
        }
        if rounds >= MAX_CORRECTION_ROUNDS {
            warn!(rounds, "JSON repair exhausted");
            return Err(LlmError::parse(raw));
        }

        rounds += 1;
        info!(round = rounds, "requesting JSON correction");
        candidate = match completer.complete(&correction_prompt(&candidate), timeout).await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "correction call failed");
                return Err(LlmError::parse(raw));
            }
        };
    }
}
