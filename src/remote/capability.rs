//! The `RemoteCapability` seam and the response-normalization contract shared by
//! every provider.
//!
//! A provider answers either with a JSON envelope carrying one of a few known
//! result fields (or an `error` field), or with the raw result as the body.
//! [`parse_structured`] decides which one it is without relying on a parse error
//! as the branch signal.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::RetryPolicy;
use crate::errors::RemoteError;
use crate::session::MediaRef;

/// What a valid result of a capability looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Text,
    ImageUrl,
    VideoUrl,
}

impl ResultKind {
    /// Whether `result` is usable as this kind of result
    pub fn accepts(&self, result: &str) -> bool {
        match self {
            ResultKind::Text => !result.trim().is_empty(),
            ResultKind::ImageUrl => is_valid_image_url(result),
            ResultKind::VideoUrl => is_valid_video_url(result),
        }
    }
}

/// Arguments of one remote call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityRequest {
    /// Free-text instruction or query
    pub instruction: String,
    /// Reference media, in the order the user sent them
    pub media: Vec<MediaRef>,
    /// Target language for translating capabilities
    pub language: Option<String>,
}

impl CapabilityRequest {
    pub fn text(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Default::default()
        }
    }

    pub fn with_media(instruction: impl Into<String>, media: Vec<MediaRef>) -> Self {
        Self {
            instruction: instruction.into(),
            media,
            language: None,
        }
    }

    pub fn translate(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            instruction: text.into(),
            media: Vec::new(),
            language: Some(language.into()),
        }
    }
}

/// One external HTTP endpoint
///
/// `call` performs a single attempt and returns an already normalized and
/// validated result; retries, timeouts and fallback belong to the invoker.
#[async_trait]
pub trait RemoteCapability: Send + Sync {
    fn name(&self) -> &str;

    fn result_kind(&self) -> ResultKind;

    fn policy(&self) -> &RetryPolicy;

    async fn call(&self, request: &CapabilityRequest) -> Result<String, RemoteError>;
}

/// Result-bearing fields, tried in order
pub const URL_RESULT_FIELDS: &[&str] = &["image", "url", "result", "enhanced_image", "response"];
pub const TEXT_RESULT_FIELDS: &[&str] = &["response", "result", "text", "answer"];

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif"];
const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".avi", ".mov", ".webm"];
const TELEGRAM_FILE_PATH: &str = "api.telegram.org/file/bot";

/// Parse a body as a JSON object, `None` for anything else
pub fn parse_structured(body: &str) -> Option<Value> {
    let trimmed = body.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(Value::is_object)
}

/// First non-empty string among `fields`
pub fn extract_field(value: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| {
        value
            .get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// The provider's structured `error` field, if present
pub fn structured_error(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// `http(s)` URL served by Telegram's file endpoint or ending in an image extension
pub fn is_valid_image_url(url: &str) -> bool {
    let url = url.trim();
    if !is_http_url(url) {
        return false;
    }
    let lower = url.to_lowercase();
    lower.contains(TELEGRAM_FILE_PATH) || IMAGE_EXTENSIONS.iter().any(|ext| lower.contains(ext))
}

pub fn is_valid_video_url(url: &str) -> bool {
    let url = url.trim();
    if !is_http_url(url) {
        return false;
    }
    let lower = url.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.contains(ext))
}

/// Whether a body says the backend itself is unavailable
pub fn reports_down(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("server is down") || lower.split(|c: char| !c.is_alphanumeric()).any(|w| w == "down")
}

/// Normalize a successful HTTP body into a URL result
pub fn normalize_url_body(body: &str, kind: ResultKind) -> Result<String, RemoteError> {
    let valid = |candidate: &str| match kind {
        ResultKind::VideoUrl => is_valid_video_url(candidate),
        _ => is_valid_image_url(candidate),
    };

    let candidate = match parse_structured(body) {
        Some(value) => {
            if let Some(error) = structured_error(&value) {
                return Err(RemoteError::ProviderDown(error));
            }
            extract_field(&value, URL_RESULT_FIELDS).unwrap_or_default()
        }
        None => body.trim().to_string(),
    };

    if valid(&candidate) {
        return Ok(candidate);
    }
    if reports_down(body) {
        return Err(RemoteError::ProviderDown(truncate(body, 200)));
    }
    Err(RemoteError::InvalidPayload(truncate(body, 200)))
}

/// Hex SHA-256 of a string
pub fn fingerprint(value: &str) -> String {
    hex::encode(Sha256::digest(value.trim().as_bytes()))
}

/// The output is the input in disguise
pub fn is_echo(input: &str, output: &str) -> bool {
    let input = input.trim();
    !input.is_empty() && (fingerprint(input) == fingerprint(output) || output.contains(input))
}

/// Truncate on a character boundary
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
