//! Search documents derived from synced messages.

use chrono::{DateTime, Utc};
use htmd::HtmlToMarkdown;
use serde::{Deserialize, Serialize};
use sift_remote::EmailMessage;

/// One indexed message. Fields mirror the index schema: title, body,
/// rawBody, from, to, sentAt, embeddings, threadId.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
    /// Provider message id. Re-inserting the same id replaces the document.
    pub id: String,
    pub title: String,
    pub body: String,
    pub raw_body: String,
    pub from: String,
    pub to: Vec<String>,
    pub sent_at: DateTime<Utc>,
    pub embeddings: Vec<f32>,
    pub thread_id: String,
}

impl SearchDocument {
    /// Project a message into a document without its embedding.
    pub fn from_message(message: &EmailMessage) -> Self {
        let raw_body = message.body_snippet.clone().unwrap_or_default();
        let body = match message.body.as_deref() {
            Some(html) if !html.trim().is_empty() => html_to_text(html),
            _ => raw_body.clone(),
        };
        Self {
            id: message.id.clone(),
            title: message.subject.clone(),
            body,
            raw_body,
            from: message.from.display(),
            to: message.recipients().map(|a| a.display()).collect(),
            sent_at: message.sent_at,
            embeddings: Vec::new(),
            thread_id: message.thread_id.clone(),
        }
    }

    pub fn with_embeddings(mut self, embeddings: Vec<f32>) -> Self {
        self.embeddings = embeddings;
        self
    }

    /// Text submitted to the embedding provider for this document.
    pub fn embedding_text(&self) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nBody: {}\nSentAt: {}",
            self.from,
            self.to.join(", "),
            self.title,
            self.body,
            self.sent_at.to_rfc3339()
        )
    }

    /// Text fed to the lexical index.
    pub(crate) fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(
            self.title.len() + self.body.len() + self.raw_body.len() + self.from.len() + 64,
        );
        for part in [&self.title, &self.body, &self.raw_body, &self.from] {
            text.push_str(part);
            text.push('\n');
        }
        for recipient in &self.to {
            text.push_str(recipient);
            text.push('\n');
        }
        text
    }
}

/// Convert an HTML body to markdown, dropping scripts, styles and images.
pub fn html_to_text(html: &str) -> String {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "img", "head"])
        .build();
    match converter.convert(html) {
        Ok(markdown) => markdown.trim().to_string(),
        Err(_) => html.to_string(),
    }
}
