//! # Error Types Module
//!
//! This module defines the error types used by the remote-call layer and the
//! user-facing validation failures. Remote errors stay internal; users only ever
//! see localized messages derived from them.

use std::time::Duration;

/// Failure of a single attempt against one remote capability
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The attempt did not finish within the capability timeout
    Timeout(Duration),
    /// Connection, TLS or body read failure
    Transport(String),
    /// Non-success HTTP status
    HttpStatus(u16),
    /// The provider reported itself as unavailable (structured `error` or "down" body)
    ProviderDown(String),
    /// The body could not be turned into a usable result
    InvalidPayload(String),
    /// The provider echoed the input back unchanged
    Degenerate,
    /// The capability is skipped while its breaker is open
    CircuitOpen,
}

impl RemoteError {
    /// Whether another attempt against the same capability is worthwhile
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::ProviderDown(_) | RemoteError::CircuitOpen)
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Timeout(after) => write!(f, "Timeout error: no response after {after:?}"),
            RemoteError::Transport(msg) => write!(f, "Transport error: {msg}"),
            RemoteError::HttpStatus(code) => write!(f, "HTTP error: status {code}"),
            RemoteError::ProviderDown(msg) => write!(f, "Provider down: {msg}"),
            RemoteError::InvalidPayload(msg) => write!(f, "Invalid payload: {msg}"),
            RemoteError::Degenerate => write!(f, "Degenerate result: input echoed back"),
            RemoteError::CircuitOpen => write!(f, "Circuit open: capability temporarily skipped"),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            RemoteError::HttpStatus(status.as_u16())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

/// Every capability of a chain was exhausted without a validated result
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeFailure {
    /// Last error observed per capability, in chain order
    pub attempts: Vec<(String, RemoteError)>,
}

impl std::fmt::Display for InvokeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "All capabilities failed")?;
        for (name, err) in &self.attempts {
            write!(f, "; {name}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for InvokeFailure {}

/// Input problems reported to the user immediately, without any remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    EmptyPrompt,
    EmptyOcrResult,
    UnsupportedDocument,
    UnreadableDocument,
    DocumentTooLarge,
    InvalidEquation,
    InvalidUserId,
    NotAdmin,
}

impl ValidationFailure {
    /// Localization key of the user-facing message
    pub fn message_key(&self) -> &'static str {
        match self {
            ValidationFailure::EmptyPrompt => "error-empty-prompt",
            ValidationFailure::EmptyOcrResult => "error-no-text-found",
            ValidationFailure::UnsupportedDocument => "error-unsupported-document",
            ValidationFailure::UnreadableDocument => "error-unreadable-document",
            ValidationFailure::DocumentTooLarge => "error-document-too-large",
            ValidationFailure::InvalidEquation => "error-invalid-equation",
            ValidationFailure::InvalidUserId => "admin-invalid-id",
            ValidationFailure::NotAdmin => "admin-only",
        }
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.message_key())
    }
}

impl std::error::Error for ValidationFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(RemoteError::HttpStatus(502).is_retryable());
        assert!(RemoteError::Degenerate.is_retryable());
        assert!(!RemoteError::ProviderDown("server is down".into()).is_retryable());
        assert!(!RemoteError::CircuitOpen.is_retryable());
    }

    #[test]
    fn test_error_message_formatting() {
        assert_eq!(
            RemoteError::HttpStatus(503).to_string(),
            "HTTP error: status 503"
        );
        let failure = InvokeFailure {
            attempts: vec![("quality".into(), RemoteError::Degenerate)],
        };
        assert!(failure.to_string().contains("quality: Degenerate result"));
    }

    #[test]
    fn test_validation_keys_are_distinct() {
        let all = [
            ValidationFailure::EmptyPrompt,
            ValidationFailure::EmptyOcrResult,
            ValidationFailure::UnsupportedDocument,
            ValidationFailure::DocumentTooLarge,
            ValidationFailure::InvalidEquation,
            ValidationFailure::InvalidUserId,
            ValidationFailure::NotAdmin,
        ];
        let mut keys: Vec<_> = all.iter().map(|v| v.message_key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), all.len());
    }
}
