//! Text-result handling: response cleanup, validity rule, conversation context and
//! search-result formatting.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::errors::RemoteError;
use crate::remote::capability::{parse_structured, structured_error, truncate};
use crate::store::ConversationTurn;

lazy_static! {
    static ref DATE_ENVELOPE: Regex = Regex::new(r#"\{\s*"date":\s*"[^"]*",?\s*"#).unwrap();
    static ref RESPONSE_ENVELOPE: Regex = Regex::new(r#"\{\s*"response":\s*"([^"]*)",?\s*"#).unwrap();
    static ref DEV_FIELD: Regex = Regex::new(r#""dev":\s*"[^"]*",?\s*"#).unwrap();
    static ref PROMO_TRAILER: Regex = Regex::new(r#""Don't forget to support[^"]*",?\s*"#).unwrap();
    static ref LEADING_WRAPPER: Regex = Regex::new(r#"^[\{\[]\s*"?"#).unwrap();
    static ref TRAILING_WRAPPER: Regex = Regex::new(r#""?\s*[\}\]]$"#).unwrap();
    static ref DESCRIPTION_NOISE: Regex =
        Regex::new(r"[^\w\s\u{0600}-\u{06FF}\u{0750}-\u{077F}\u{08A0}-\u{08FF}.,!?()\-]").unwrap();
}

/// Results shorter than this are treated as empty
const MIN_TEXT_RESULT_CHARS: usize = 10;
/// An "error" this close to the start marks a provider failure dressed as text
const ERROR_PREFIX_CHARS: usize = 50;
/// Plain bodies longer than this are answers, not outage notices
const DOWN_NOTICE_MAX_CHARS: usize = 80;

/// Strip provider envelopes and promotional leftovers, then unescape
pub fn clean_response(body: &str) -> String {
    let mut text = body.trim().to_string();

    if let Some(Value::Object(mut map)) = parse_structured(&text) {
        map.remove("date");
        map.remove("dev");
        if let Some(response) = map.get("response").and_then(Value::as_str) {
            text = response.to_string();
        } else if map.contains_key("results") {
            if let Some(formatted) = format_search_results(&Value::Object(map.clone())) {
                return formatted;
            }
        } else if let Some(value) = map
            .values()
            .filter_map(Value::as_str)
            .find(|v| v.trim().chars().count() > MIN_TEXT_RESULT_CHARS)
        {
            text = value.to_string();
        }
    }

    let text = DATE_ENVELOPE.replace_all(&text, "");
    let text = RESPONSE_ENVELOPE.replace_all(&text, "$1");
    let text = DEV_FIELD.replace_all(&text, "");
    let text = PROMO_TRAILER.replace_all(&text, "");
    let text = if LEADING_WRAPPER.is_match(&text) {
        let inner = LEADING_WRAPPER.replace(&text, "");
        TRAILING_WRAPPER.replace(&inner, "").into_owned()
    } else {
        text.into_owned()
    };

    text.replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\"", "\"")
        .trim()
        .trim_matches(',')
        .trim()
        .to_string()
}

/// Long enough and not an error message in disguise
pub fn is_valid_text(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MIN_TEXT_RESULT_CHARS {
        return false;
    }
    !truncate(trimmed, ERROR_PREFIX_CHARS)
        .to_lowercase()
        .contains("error")
}

/// Normalize a successful text-capability body
pub fn normalize_text_body(body: &str) -> Result<String, RemoteError> {
    match parse_structured(body) {
        Some(value) => {
            if let Some(error) = structured_error(&value) {
                return Err(RemoteError::ProviderDown(error));
            }
        }
        // Only a bare status line counts; answers may discuss outages
        None if body.trim().chars().count() <= DOWN_NOTICE_MAX_CHARS
            && body.to_lowercase().contains("server is down") =>
        {
            return Err(RemoteError::ProviderDown(truncate(body, 200)));
        }
        None => {}
    }

    let cleaned = clean_response(body);
    if is_valid_text(&cleaned) {
        Ok(cleaned)
    } else {
        Err(RemoteError::InvalidPayload(truncate(body, 200)))
    }
}

/// Normalize a body whose shape the caller parses itself
pub fn normalize_raw_body(body: &str) -> Result<String, RemoteError> {
    if let Some(error) = parse_structured(body).as_ref().and_then(structured_error) {
        return Err(RemoteError::ProviderDown(error));
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(RemoteError::InvalidPayload("empty body".into()));
    }
    Ok(trimmed.to_string())
}

/// Normalize an OCR body: the extracted text sits in `response`
pub fn normalize_ocr_body(body: &str) -> Result<String, RemoteError> {
    let value = parse_structured(body)
        .ok_or_else(|| RemoteError::InvalidPayload(truncate(body, 200)))?;
    if let Some(error) = structured_error(&value) {
        return Err(RemoteError::ProviderDown(error));
    }

    let extracted = value
        .get("response")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    let lower = extracted.to_lowercase();
    if extracted.is_empty()
        || lower.contains("something went wrong")
        || lower.contains("please try again")
        || lower.contains("sure! please specify")
    {
        return Err(RemoteError::InvalidPayload(truncate(extracted, 200)));
    }

    Ok(extracted.replace("\\n", "\n"))
}

/// Normalize a search body into a formatted result list
pub fn normalize_search_body(body: &str) -> Result<String, RemoteError> {
    let value = parse_structured(body)
        .ok_or_else(|| RemoteError::InvalidPayload(truncate(body, 200)))?;
    if let Some(error) = structured_error(&value) {
        return Err(RemoteError::ProviderDown(error));
    }
    format_search_results(&value).ok_or_else(|| RemoteError::InvalidPayload(truncate(body, 200)))
}

/// Render `results.google` (top 5) and `results.wikipedia` (top 2)
pub fn format_search_results(value: &Value) -> Option<String> {
    let results = value.get("results")?;
    let mut out = String::new();

    if let Some(web) = results.get("google").and_then(Value::as_array) {
        for (i, hit) in web.iter().take(5).enumerate() {
            let title = hit.get("title").and_then(Value::as_str).unwrap_or("-");
            out.push_str(&format!("**{}. {}**\n", i + 1, title));

            let description = hit
                .get("description")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if description.chars().count() > 10 {
                let clean = DESCRIPTION_NOISE.replace_all(description, "");
                let short = if clean.chars().count() > 120 {
                    format!("{}...", truncate(&clean, 120))
                } else {
                    clean.to_string()
                };
                out.push_str(&format!("📝 {short}\n"));
            }
            if let Some(url) = hit.get("url").and_then(Value::as_str).filter(|u| !u.is_empty()) {
                out.push_str(&format!("🔗 {url}\n"));
            }
            out.push('\n');
        }
    }

    if let Some(wiki) = results.get("wikipedia").and_then(Value::as_array) {
        let wiki: Vec<_> = wiki.iter().take(2).collect();
        if !wiki.is_empty() {
            out.push_str("📚 Wikipedia\n\n");
        }
        for (i, hit) in wiki.into_iter().enumerate() {
            let title = hit.get("title").and_then(Value::as_str).unwrap_or("-");
            out.push_str(&format!("**{}. {}**\n", i + 1, title));
            if let Some(url) = hit.get("url").and_then(Value::as_str).filter(|u| !u.is_empty()) {
                out.push_str(&format!("🔗 {url}\n"));
            }
            out.push('\n');
        }
    }

    let out = out.trim_end().to_string();
    (!out.is_empty()).then_some(out)
}

/// Fold the most recent turns into the outbound prompt
pub fn prompt_with_history(question: &str, history: &[ConversationTurn], max_turns: usize) -> String {
    if history.is_empty() || max_turns == 0 {
        return question.to_string();
    }
    let skip = history.len().saturating_sub(max_turns);
    let context = history
        .iter()
        .skip(skip)
        .map(|turn| format!("User: {}\nAssistant: {}", turn.message, turn.response))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Previous conversation:\n{context}\n\nCurrent question: {question}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_clean_response_unwraps_envelope() {
        let body = r#"{"date": "2024-01-01", "response": "Line one\\nLine two", "dev": "someone"}"#;
        assert_eq!(clean_response(body), "Line one\nLine two");
    }

    #[test]
    fn test_clean_response_strips_promo_and_unescapes() {
        let body = r#"The answer is 42\t(approx) "Don't forget to support the channel""#;
        let cleaned = clean_response(body);
        assert!(cleaned.contains("The answer is 42\t(approx)"));
        assert!(!cleaned.contains("support"));
    }

    #[test]
    fn test_text_validity() {
        assert!(is_valid_text("A long enough answer"));
        assert!(!is_valid_text("short"));
        assert!(!is_valid_text("Error: upstream model unavailable"));
        let late_error = format!("{} error mentioned later", "x".repeat(60));
        assert!(is_valid_text(&late_error));
    }

    #[test]
    fn test_normalize_text_body_reports_structured_error() {
        assert!(matches!(
            normalize_text_body(r#"{"error": "rate limited"}"#),
            Err(RemoteError::ProviderDown(_))
        ));
        assert!(matches!(
            normalize_text_body("ok"),
            Err(RemoteError::InvalidPayload(_))
        ));
        assert!(matches!(
            normalize_text_body("Server is down, try again later"),
            Err(RemoteError::ProviderDown(_))
        ));
    }

    #[test]
    fn test_answer_about_outages_is_not_a_down_report() {
        let body = r#"{"response": "When the server is down, clients receive connection errors and should retry with backoff."}"#;
        assert_eq!(
            normalize_text_body(body).unwrap(),
            "When the server is down, clients receive connection errors and should retry with backoff."
        );

        let plain = format!(
            "A load balancer notices when the server is down and routes traffic elsewhere. {}",
            "Health checks run every few seconds."
        );
        assert_eq!(normalize_text_body(&plain).unwrap(), plain);
    }

    #[test]
    fn test_ocr_body() {
        assert_eq!(
            normalize_ocr_body(r#"{"response": "x = 2\\ny = 3"}"#).unwrap(),
            "x = 2\ny = 3"
        );
        assert!(normalize_ocr_body(r#"{"response": ""}"#).is_err());
        assert!(normalize_ocr_body(r#"{"response": "Something went wrong"}"#).is_err());
        assert!(normalize_ocr_body("plain text").is_err());
    }

    #[test]
    fn test_search_formatting_limits_hits() {
        let hits: Vec<_> = (1..=7)
            .map(|i| serde_json::json!({"title": format!("T{i}"), "url": format!("https://e/{i}")}))
            .collect();
        let body = serde_json::json!({
            "results": {
                "google": hits,
                "wikipedia": [{"title": "W1", "url": "https://w/1"}, {"title": "W2"}, {"title": "W3"}]
            }
        });
        let formatted = format_search_results(&body).unwrap();
        assert!(formatted.contains("**5. T5**"));
        assert!(!formatted.contains("T6"));
        assert!(formatted.contains("W2"));
        assert!(!formatted.contains("W3"));
    }

    #[test]
    fn test_prompt_with_history_keeps_last_turns() {
        let turn = |m: &str| ConversationTurn {
            user_id: 1,
            chat_id: 1,
            message: m.to_string(),
            response: format!("re {m}"),
            timestamp: Utc::now(),
        };
        let history = vec![turn("a"), turn("b"), turn("c")];

        let prompt = prompt_with_history("q", &history, 2);
        assert!(!prompt.contains("User: a"));
        assert!(prompt.contains("User: b\nAssistant: re b"));
        assert!(prompt.ends_with("Current question: q"));

        assert_eq!(prompt_with_history("q", &[], 5), "q");
    }
}
