//! Book lookup capabilities (Google Books, Open Library).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::RetryPolicy;
use crate::errors::RemoteError;
use crate::remote::capability::{truncate, CapabilityRequest, RemoteCapability, ResultKind};

pub const GOOGLE_BOOKS_URL: &str = "https://www.googleapis.com/books/v1/volumes";
pub const OPEN_LIBRARY_URL: &str = "https://openlibrary.org/search.json";

const MAX_BOOKS: usize = 5;

fn joined_strings(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "?".to_string())
}

/// Render a Google Books `volumes` answer
pub fn format_google_books(value: &Value) -> Option<String> {
    let items = value.get("items")?.as_array()?;
    let entries: Vec<String> = items
        .iter()
        .take(MAX_BOOKS)
        .enumerate()
        .map(|(i, item)| {
            let info = item.get("volumeInfo").cloned().unwrap_or(Value::Null);
            let title = info.get("title").and_then(Value::as_str).unwrap_or("-");
            let authors = joined_strings(info.get("authors"));
            let mut entry = format!("**{}. {}**\n👤 {}", i + 1, title, authors);
            if let Some(description) = info.get("description").and_then(Value::as_str) {
                entry.push_str(&format!("\n📄 {}...", truncate(description, 150)));
            }
            entry
        })
        .collect();
    (!entries.is_empty()).then(|| entries.join("\n\n"))
}

/// Render an Open Library `search.json` answer
pub fn format_open_library(value: &Value) -> Option<String> {
    let docs = value.get("docs")?.as_array()?;
    let entries: Vec<String> = docs
        .iter()
        .take(MAX_BOOKS)
        .enumerate()
        .map(|(i, doc)| {
            let title = doc.get("title").and_then(Value::as_str).unwrap_or("-");
            let authors = joined_strings(doc.get("author_name"));
            let year = doc
                .get("first_publish_year")
                .and_then(Value::as_i64)
                .map(|y| y.to_string())
                .unwrap_or_else(|| "?".to_string());
            format!("**{}. {}**\n👤 {}\n📅 {}", i + 1, title, authors, year)
        })
        .collect();
    (!entries.is_empty()).then(|| entries.join("\n\n"))
}

#[derive(Debug, Clone, Copy)]
enum Catalogue {
    GoogleBooks,
    OpenLibrary,
}

/// Book search against one public catalogue
pub struct BookSearch {
    catalogue: Catalogue,
    url: String,
    policy: RetryPolicy,
    client: Client,
}

impl BookSearch {
    pub fn google_books(url: impl Into<String>, policy: RetryPolicy, client: Client) -> Self {
        Self {
            catalogue: Catalogue::GoogleBooks,
            url: url.into(),
            policy,
            client,
        }
    }

    pub fn open_library(url: impl Into<String>, policy: RetryPolicy, client: Client) -> Self {
        Self {
            catalogue: Catalogue::OpenLibrary,
            url: url.into(),
            policy,
            client,
        }
    }
}

#[async_trait]
impl RemoteCapability for BookSearch {
    fn name(&self) -> &str {
        match self.catalogue {
            Catalogue::GoogleBooks => "google_books",
            Catalogue::OpenLibrary => "open_library",
        }
    }

    fn result_kind(&self) -> ResultKind {
        ResultKind::Text
    }

    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn call(&self, request: &CapabilityRequest) -> Result<String, RemoteError> {
        let limit = MAX_BOOKS.to_string();
        let query: Vec<(&str, &str)> = match self.catalogue {
            Catalogue::GoogleBooks => vec![
                ("q", request.instruction.as_str()),
                ("maxResults", limit.as_str()),
                ("langRestrict", "ar,en"),
            ],
            Catalogue::OpenLibrary => vec![("q", request.instruction.as_str()), ("limit", limit.as_str())],
        };

        let response = self
            .client
            .get(&self.url)
            .query(&query)
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
        let formatted = match self.catalogue {
            Catalogue::GoogleBooks => format_google_books(&value),
            Catalogue::OpenLibrary => format_open_library(&value),
        };
        formatted.ok_or_else(|| RemoteError::InvalidPayload("no books found".into()))
    }
}
