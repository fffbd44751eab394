//! Translation capabilities (MyMemory, Google `gtx`).
//!
//! Both take the text in `instruction` and the target language in `language`
//! (English when absent).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::RetryPolicy;
use crate::errors::RemoteError;
use crate::remote::capability::{truncate, CapabilityRequest, RemoteCapability, ResultKind};

pub const MYMEMORY_URL: &str = "https://api.mymemory.translated.net/get";
pub const GOOGLE_TRANSLATE_URL: &str = "https://translate.googleapis.com/translate_a/single";

/// MyMemory accepts at most this many characters per query
const MYMEMORY_MAX_CHARS: usize = 500;

fn target_language(request: &CapabilityRequest) -> &str {
    request.language.as_deref().unwrap_or("en")
}

/// Arabic script present
pub fn contains_arabic(text: &str) -> bool {
    text.chars().any(|c| ('\u{0600}'..='\u{06FF}').contains(&c))
}

pub struct MyMemoryTranslator {
    url: String,
    policy: RetryPolicy,
    client: Client,
}

impl MyMemoryTranslator {
    pub fn new(url: impl Into<String>, policy: RetryPolicy, client: Client) -> Self {
        Self {
            url: url.into(),
            policy,
            client,
        }
    }
}

#[async_trait]
impl RemoteCapability for MyMemoryTranslator {
    fn name(&self) -> &str {
        "mymemory"
    }

    fn result_kind(&self) -> ResultKind {
        ResultKind::Text
    }

    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn call(&self, request: &CapabilityRequest) -> Result<String, RemoteError> {
        let source = if contains_arabic(&request.instruction) { "ar" } else { "auto" };
        let langpair = format!("{source}|{}", target_language(request));
        let query = truncate(&request.instruction, MYMEMORY_MAX_CHARS);

        let response = self
            .client
            .get(&self.url)
            .query(&[("q", query.as_str()), ("langpair", langpair.as_str())])
            .timeout(self.policy.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::HttpStatus(response.status().as_u16()));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidPayload(e.to_string()))?;
        if value.get("responseStatus").and_then(Value::as_i64) != Some(200) {
            return Err(RemoteError::InvalidPayload(truncate(&value.to_string(), 200)));
        }

        value
            .pointer("/responseData/translatedText")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| RemoteError::InvalidPayload("empty translation".into()))
    }
}

pub struct GoogleTranslator {
    url: String,
    policy: RetryPolicy,
    client: Client,
}

impl GoogleTranslator {
    pub fn new(url: impl Into<String>, policy: RetryPolicy, client: Client) -> Self {
        Self {
            url: url.into(),
            policy,
            client,
        }
    }
}

/// Join the translated segments of a `translate_a/single` answer
pub fn parse_google_segments(value: &Value) -> Option<String> {
    let segments = value.get(0)?.as_array()?;
    let joined: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();
    let joined = joined.trim().to_string();
    (!joined.is_empty()).then_some(joined)
}

#[async_trait]
impl RemoteCapability for GoogleTranslator {
    fn name(&self) -> &str {
        "google_translate"
    }

    fn result_kind(&self) -> ResultKind {
        ResultKind::Text
    }

    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn call(&self, request: &CapabilityRequest) -> Result<String, RemoteError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target_language(request)),
                ("dt", "t"),
                ("q", request.instruction.as_str()),
            ])
            .timeout(self.policy.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::HttpStatus(response.status().as_u16()));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidPayload(e.to_string()))?;
        parse_google_segments(&value)
            .ok_or_else(|| RemoteError::InvalidPayload(truncate(&value.to_string(), 200)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_google_segments_are_joined() {
        let value = serde_json::json!([[["Hello ", "مرحبا ", null], ["world", "عالم", null]], null, "ar"]);
        assert_eq!(parse_google_segments(&value).unwrap(), "Hello world");
        assert!(parse_google_segments(&serde_json::json!([])).is_none());
    }

    #[test]
    fn test_arabic_detection() {
        assert!(contains_arabic("قطة زرقاء"));
        assert!(!contains_arabic("blue cat"));
    }

    #[tokio::test]
    async fn test_mymemory_uses_arabic_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("langpair", "ar|en"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "responseStatus": 200,
                "responseData": { "translatedText": "a blue cat" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let translator = MyMemoryTranslator::new(server.uri(), RetryPolicy::new(1, 0, 5), Client::new());
        let result = translator
            .call(&CapabilityRequest::translate("قطة زرقاء", "en"))
            .await
            .unwrap();
        assert_eq!(result, "a blue cat");
    }

    #[tokio::test]
    async fn test_mymemory_rejects_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "responseStatus": 403,
                "responseData": { "translatedText": "INVALID LANGUAGE PAIR" }
            })))
            .mount(&server)
            .await;

        let translator = MyMemoryTranslator::new(server.uri(), RetryPolicy::new(1, 0, 5), Client::new());
        assert!(matches!(
            translator.call(&CapabilityRequest::translate("x", "xx")).await,
            Err(RemoteError::InvalidPayload(_))
        ));
    }
}
