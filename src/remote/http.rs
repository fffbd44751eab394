//! `reqwest`-backed capabilities: one struct covers every provider endpoint that
//! takes an instruction plus optional reference links.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::errors::RemoteError;
use crate::remote::capability::{
    normalize_url_body, truncate, CapabilityRequest, RemoteCapability, ResultKind,
};
use crate::remote::text::{
    normalize_ocr_body, normalize_raw_body, normalize_search_body, normalize_text_body,
};

/// How reference media are attached to a request
#[derive(Debug, Clone)]
pub struct MediaField {
    pub name: &'static str,
    /// Links beyond this are dropped
    pub max: usize,
}

/// Request encoding of an endpoint
#[derive(Debug, Clone)]
pub enum RequestShape {
    /// `application/x-www-form-urlencoded` POST
    Form {
        text_field: &'static str,
        media: Option<MediaField>,
    },
    /// JSON POST
    Json { text_field: &'static str },
    /// GET with the first media reference as a query parameter
    QueryLink { field: &'static str },
}

/// How a successful body turns into a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    /// Trimmed body, unless the provider reported an error
    Raw,
    Search,
    Ocr,
    Url(ResultKind),
}

impl ResponseFormat {
    fn result_kind(&self) -> ResultKind {
        match self {
            ResponseFormat::Url(kind) => *kind,
            _ => ResultKind::Text,
        }
    }

    fn normalize(&self, body: &str) -> Result<String, RemoteError> {
        match self {
            ResponseFormat::Text => normalize_text_body(body),
            ResponseFormat::Raw => normalize_raw_body(body),
            ResponseFormat::Search => normalize_search_body(body),
            ResponseFormat::Ocr => normalize_ocr_body(body),
            ResponseFormat::Url(kind) => normalize_url_body(body, *kind),
        }
    }
}

/// One provider endpoint
pub struct HttpCapability {
    name: String,
    url: String,
    shape: RequestShape,
    format: ResponseFormat,
    policy: RetryPolicy,
    /// Replaces the caller's instruction (fixed enhancement prompts)
    fixed_instruction: Option<String>,
    /// Used when the caller's instruction is blank
    default_instruction: Option<String>,
    client: Client,
}

impl HttpCapability {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        shape: RequestShape,
        format: ResponseFormat,
        policy: RetryPolicy,
        client: Client,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            shape,
            format,
            policy,
            fixed_instruction: None,
            default_instruction: None,
            client,
        }
    }

    pub fn with_fixed_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.fixed_instruction = Some(instruction.into());
        self
    }

    pub fn with_default_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.default_instruction = Some(instruction.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn instruction<'a>(&'a self, request: &'a CapabilityRequest) -> &'a str {
        if let Some(fixed) = &self.fixed_instruction {
            return fixed;
        }
        match &self.default_instruction {
            Some(default) if request.instruction.trim().is_empty() => default,
            _ => &request.instruction,
        }
    }

    async fn send(&self, request: &CapabilityRequest) -> Result<reqwest::Response, reqwest::Error> {
        let instruction = self.instruction(request);
        let builder = match &self.shape {
            RequestShape::Form { text_field, media } => {
                let mut form = HashMap::new();
                form.insert(*text_field, instruction.to_string());
                if let Some(media_field) = media {
                    if !request.media.is_empty() {
                        let links: Vec<&str> = request
                            .media
                            .iter()
                            .take(media_field.max)
                            .map(String::as_str)
                            .collect();
                        form.insert(media_field.name, links.join(","));
                    }
                }
                self.client.post(&self.url).form(&form)
            }
            RequestShape::Json { text_field } => {
                let mut body = serde_json::Map::new();
                body.insert(text_field.to_string(), instruction.into());
                self.client.post(&self.url).json(&body)
            }
            RequestShape::QueryLink { field } => {
                let link = request.media.first().map(String::as_str).unwrap_or_default();
                self.client.get(&self.url).query(&[(*field, link)])
            }
        };

        builder.timeout(self.policy.timeout).send().await
    }
}

#[async_trait]
impl RemoteCapability for HttpCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn result_kind(&self) -> ResultKind {
        self.format.result_kind()
    }

    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn call(&self, request: &CapabilityRequest) -> Result<String, RemoteError> {
        let response = self.send(request).await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.policy.timeout)
            } else {
                RemoteError::from(e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;
        debug!(capability = %self.name, %status, body = %truncate(&body, 200), "Provider response");

        if !status.is_success() {
            warn!(capability = %self.name, status = status.as_u16(), "Provider returned error status");
            return Err(RemoteError::HttpStatus(status.as_u16()));
        }

        self.format.normalize(&body)
    }
}
