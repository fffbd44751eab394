//! # Document Text Extraction
//!
//! Pulls plain text out of uploaded documents. Uploads are accepted by name or
//! MIME type, but the downloaded bytes decide how they are read, so a misnamed
//! file is still parsed by its real format.

use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

const TEXT_EXTENSIONS: [&str; 3] = [".txt", ".md", ".csv"];
const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const WORD_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Pdf,
    Docx,
}

impl DocumentFormat {
    /// Format an upload claims through its file name or MIME type
    pub fn from_upload(file_name: Option<&str>, mime_type: Option<&str>) -> Option<Self> {
        let name = file_name.map(str::to_lowercase).unwrap_or_default();
        let mime = mime_type.unwrap_or_default();

        if name.ends_with(".pdf") || mime == "application/pdf" {
            Some(DocumentFormat::Pdf)
        } else if name.ends_with(".docx") || mime == DOCX_MIME {
            Some(DocumentFormat::Docx)
        } else if mime.starts_with("text/") || TEXT_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            Some(DocumentFormat::Text)
        } else {
            None
        }
    }

    /// Format of downloaded content, from its leading signature
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"%PDF-") {
            DocumentFormat::Pdf
        } else if bytes.starts_with(b"PK\x03\x04") {
            DocumentFormat::Docx
        } else {
            DocumentFormat::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentError {
    NotUtf8,
    Pdf(String),
    Docx(String),
}

impl std::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentError::NotUtf8 => write!(f, "Document error: text is not valid UTF-8"),
            DocumentError::Pdf(msg) => write!(f, "PDF error: {msg}"),
            DocumentError::Docx(msg) => write!(f, "DOCX error: {msg}"),
        }
    }
}

impl std::error::Error for DocumentError {}

/// Extract the trimmed text of a downloaded document
///
/// PDF parsing is CPU-bound; call this from a blocking task.
pub fn extract_text(bytes: &[u8]) -> Result<String, DocumentError> {
    let format = DocumentFormat::sniff(bytes);
    debug!(?format, bytes = bytes.len(), "Extracting document text");

    let text = match format {
        DocumentFormat::Text => String::from_utf8(bytes.to_vec()).map_err(|_| DocumentError::NotUtf8)?,
        DocumentFormat::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| DocumentError::Pdf(e.to_string()))?,
        DocumentFormat::Docx => docx_text(bytes)?,
    };
    Ok(text.trim().to_string())
}

/// Paragraph text of `word/document.xml`, one paragraph per line
fn docx_text(bytes: &[u8]) -> Result<String, DocumentError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DocumentError::Docx(format!("Failed to read archive: {e}")))?;

    let mut xml = String::new();
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| DocumentError::Docx(format!("Missing document body: {e}")))?;
    entry
        .read_to_string(&mut xml)
        .map_err(|e| DocumentError::Docx(format!("Failed to read document body: {e}")))?;

    let doc = roxmltree::Document::parse(&xml)
        .map_err(|e| DocumentError::Docx(format!("Failed to parse XML: {e}")))?;

    let paragraphs: Vec<String> = doc
        .descendants()
        .filter(|node| node.has_tag_name((WORD_NS, "p")))
        .map(|paragraph| {
            let mut line = String::new();
            for node in paragraph.descendants() {
                if node.has_tag_name((WORD_NS, "t")) {
                    line.push_str(node.text().unwrap_or_default());
                } else if node.has_tag_name((WORD_NS, "tab")) {
                    line.push('\t');
                } else if node.has_tag_name((WORD_NS, "br")) {
                    line.push('\n');
                }
            }
            line
        })
        .collect();
    Ok(paragraphs.join("\n"))
}
