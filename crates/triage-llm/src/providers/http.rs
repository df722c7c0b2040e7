//! Shared request plumbing for the HTTP-API providers.
//!
//! Every backend is "POST a JSON body, read a JSON envelope". This module
//! owns the mapping from HTTP and transport outcomes onto [`LlmError`] so
//! each provider only describes its request shape and response path.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use triage_resilience::LlmError;

/// One client shared by every HTTP provider; timeouts are set per request.
pub fn shared_client() -> reqwest::Client {
    reqwest::Client::new()
}

/// Send `body` and return the decoded JSON envelope.
pub(crate) async fn post_json(
    provider: &str,
    request: RequestBuilder,
    body: &Value,
    timeout: Duration,
) -> Result<Value, LlmError> {
    let response = request
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(|e| transport_error(provider, e, timeout))?;

    let response = check_status(provider, response).await?;

    let text = response
        .text()
        .await
        .map_err(|e| transport_error(provider, e, timeout))?;
    serde_json::from_str(&text)
        .map_err(|e| LlmError::response(provider, format!("response body is not JSON: {e}")))
}

async fn check_status(provider: &str, response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(LlmError::rate_limit(provider, retry_after));
    }

    let body = response.text().await.unwrap_or_default();
    Err(LlmError::response(provider, status_message(status, &body)))
}

/// Prefer the provider's own `error.message`, then the raw body.
fn status_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .map(str::to_string)
        })
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });

    match detail {
        Some(detail) => format!("HTTP {}: {detail}", status.as_u16()),
        None => format!("HTTP {}", status.as_u16()),
    }
}

fn transport_error(provider: &str, err: reqwest::Error, timeout: Duration) -> LlmError {
    if err.is_timeout() {
        LlmError::timeout(provider, timeout)
    } else {
        // The URL may carry a credential in its query string.
        LlmError::transport(provider, err.without_url().to_string())
    }
}

/// Extract the string at `pointer`, or fail with a malformed-envelope error.
pub(crate) fn text_at(provider: &str, envelope: &Value, pointer: &str) -> Result<String, LlmError> {
    envelope
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            LlmError::response(provider, format!("malformed response: missing {pointer}"))
        })
}
