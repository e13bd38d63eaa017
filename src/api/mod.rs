//! Wire payloads and parsing helpers shared by provider implementations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST {base}/chat/completions`.
///
/// `messages` entries are pre-shaped JSON objects because content is either a
/// plain string or a content-part array depending on the message's parts.
#[derive(Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub temperature: Option<f32>,
    pub top_p: f32,
    pub stream: bool,
}

#[derive(Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatResponseChoice>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    #[serde(default)]
    pub index: u32,
    pub message: Option<ChatResponseMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Normalize a base URL by removing trailing slashes, then append an
/// endpoint path without producing double slashes.
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// Pull a human-readable summary out of a structured error body.
///
/// Handles the common shapes: `{"error": {"message": ...}}`,
/// `{"error": "..."}` and a top-level `{"message": ...}`.
pub fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| value.get("message").and_then(|v| v.as_str().map(str::to_owned)));

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Best-effort error message for a failed API call: the extracted structured
/// summary when the body is JSON, otherwise the trimmed body itself.
pub fn error_message_from_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty error response".to_string();
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&value) {
            if !summary.is_empty() {
                return summary;
            }
        }
    }
    trimmed.to_string()
}
