//! Profanity classification through the text capability.
//!
//! The classifier is a heuristic: any transport failure or unparseable verdict is
//! read as "not profane" so moderation never blocks messaging.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::remote::capability::{parse_structured, CapabilityRequest};
use crate::remote::invoker::ResilientInvoker;

lazy_static! {
    static ref VERDICT_OBJECT: Regex = Regex::new(r"\{[^}]+\}").unwrap();
}

/// Classifier outcome for one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfanityVerdict {
    pub is_profane: bool,
    pub category: String,
    pub severity: String,
    pub detected_words: Vec<String>,
}

impl ProfanityVerdict {
    pub fn clean() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    is_profane: Value,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    detected_words: Vec<String>,
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "نعم"),
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

pub fn classifier_prompt(text: &str) -> String {
    format!(
        "You are a moderation classifier for a student community chat. Decide whether the \
message below contains swearing, insults, threats, sexual content or hate speech.\n\n\
Message: \"{text}\"\n\n\
Answer only with JSON of this shape:\n\
{{\"is_profane\": true/false, \"category\": \"...\", \"severity\": \"low/medium/high\", \"detected_words\": [\"...\"]}}"
    )
}

/// Extract the first JSON object of a classifier answer
pub fn parse_verdict(raw: &str) -> Option<ProfanityVerdict> {
    let inner = parse_structured(raw)
        .and_then(|v| v.get("response").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| raw.to_string())
        .replace("\\\"", "\"");

    let object = VERDICT_OBJECT.find(&inner)?;
    let verdict: RawVerdict = serde_json::from_str(object.as_str()).ok()?;
    Some(ProfanityVerdict {
        is_profane: truthy(&verdict.is_profane),
        category: verdict.category.unwrap_or_default(),
        severity: verdict.severity.unwrap_or_default(),
        detected_words: verdict.detected_words,
    })
}

/// Classify `text`, failing open
pub async fn classify(classifier: &ResilientInvoker, text: &str) -> ProfanityVerdict {
    let raw = match classifier.invoke(&CapabilityRequest::text(classifier_prompt(text))).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Profanity classifier unavailable, allowing message");
            return ProfanityVerdict::clean();
        }
    };

    match parse_verdict(&raw) {
        Some(verdict) => verdict,
        None => {
            debug!("Unparseable classifier verdict, allowing message");
            ProfanityVerdict::clean()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_verdict() {
        let raw = r#"Sure: {"is_profane": true, "category": "insult", "severity": "high", "detected_words": ["x"]} done"#;
        let verdict = parse_verdict(raw).unwrap();
        assert!(verdict.is_profane);
        assert_eq!(verdict.category, "insult");
        assert_eq!(verdict.detected_words, vec!["x".to_string()]);
    }

    #[test]
    fn test_parse_enveloped_verdict() {
        let raw = r#"{"response": "{\"is_profane\": \"false\", \"category\": \"\"}"}"#;
        let verdict = parse_verdict(raw).unwrap();
        assert!(!verdict.is_profane);
    }

    #[test]
    fn test_garbage_is_none() {
        assert!(parse_verdict("I cannot classify this").is_none());
        assert!(parse_verdict("{broken json}").is_none());
    }
}
