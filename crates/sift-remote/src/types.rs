//! Wire types for the provider's sync and message API.
//!
//! Field names follow the provider's camelCase JSON. Everything the provider
//! may omit is defaulted so that a sparse record still decodes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response to `POST /email/sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStartResponse {
    pub ready: bool,
    #[serde(default)]
    pub sync_updated_token: String,
    #[serde(default)]
    pub sync_deleted_token: String,
}

/// One page of `GET /email/sync/updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUpdatedResponse {
    #[serde(default)]
    pub records: Vec<EmailMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_delta_token: Option<String>,
}

impl SyncUpdatedResponse {
    /// The delta token carried by this page, ignoring empty strings.
    pub fn delta_token(&self) -> Option<&str> {
        self.next_delta_token.as_deref().filter(|t| !t.is_empty())
    }

    /// The page token for the next request, ignoring empty strings.
    pub fn page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Which cursor a `get_updated_emails` call resumes from.
///
/// The provider accepts exactly one of the two per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaRequest {
    Delta(String),
    Page(String),
}

impl DeltaRequest {
    pub fn query_pair(&self) -> (&'static str, &str) {
        match self {
            DeltaRequest::Delta(token) => ("deltaToken", token.as_str()),
            DeltaRequest::Page(token) => ("pageToken", token.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl EmailAddress {
    pub fn new(name: Option<&str>, address: &str) -> Self {
        Self {
            name: name.map(str::to_string),
            address: address.to_string(),
            raw: None,
        }
    }

    /// `Name <address>` when a display name is known, else the bare address.
    pub fn display(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.address),
            _ => self.address.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SysLabel {
    Junk,
    Trash,
    Sent,
    Inbox,
    Unread,
    Flagged,
    Important,
    Draft,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SysClassification {
    Personal,
    Social,
    Promotions,
    Updates,
    Forums,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    #[default]
    Normal,
    Private,
    Personal,
    Confidential,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAttachment {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub inline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailHeader {
    pub name: String,
    pub value: String,
}

/// A message as delivered by the provider. Never mutated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_time: Option<DateTime<Utc>>,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub internet_message_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sys_labels: Vec<SysLabel>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sys_classifications: Vec<SysClassification>,
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_message_method: Option<String>,
    pub from: EmailAddress,
    #[serde(default)]
    pub to: Vec<EmailAddress>,
    #[serde(default)]
    pub cc: Vec<EmailAddress>,
    #[serde(default)]
    pub bcc: Vec<EmailAddress>,
    #[serde(default)]
    pub reply_to: Vec<EmailAddress>,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_snippet: Option<String>,
    #[serde(default)]
    pub attachments: Vec<EmailAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_index: Option<String>,
    #[serde(default)]
    pub internet_headers: Vec<EmailHeader>,
    #[serde(default)]
    pub native_properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub omitted: Vec<String>,
}

impl EmailMessage {
    /// Every recipient address (to, cc, bcc) in header order.
    pub fn recipients(&self) -> impl Iterator<Item = &EmailAddress> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    pub fn has_label(&self, label: SysLabel) -> bool {
        self.sys_labels.contains(&label)
    }
}

/// Body of `POST /email/messages`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub from: EmailAddress,
    pub subject: String,
    pub body: String,
    pub to: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reply_to: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// A webhook registration held by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: i64,
    pub resource: String,
    pub notification_url: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub fail_since: Option<String>,
    #[serde(default)]
    pub fail_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionList {
    #[serde(default)]
    pub records: Vec<Subscription>,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "records": [{
            "id": "m1",
            "threadId": "t1",
            "sentAt": "2024-05-01T10:00:00Z",
            "subject": "Quarterly invoice",
            "sysLabels": ["inbox", "unread", "archived"],
            "sysClassifications": ["updates"],
            "from": {"name": "Alice", "address": "alice@example.com"},
            "to": [{"address": "bob@example.com"}],
            "cc": [{"name": "Carol", "address": "carol@example.com"}],
            "bodySnippet": "Please find attached",
            "attachments": [{"id": "a1", "name": "invoice.pdf", "mimeType": "application/pdf", "size": 1024, "inline": false}]
        }],
        "nextPageToken": "p2"
    }"#;

    #[test]
    fn test_decode_sparse_page() {
        let page: SyncUpdatedResponse = serde_json::from_str(PAGE).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.page_token(), Some("p2"));
        assert_eq!(page.delta_token(), None);

        let msg = &page.records[0];
        assert_eq!(msg.thread_id, "t1");
        assert!(msg.has_label(SysLabel::Unread));
        assert!(msg.has_label(SysLabel::Other));
        assert_eq!(msg.sensitivity, Sensitivity::Normal);
        assert_eq!(msg.attachments[0].mime_type, "application/pdf");

        let recipients: Vec<&str> = msg.recipients().map(|a| a.address.as_str()).collect();
        assert_eq!(recipients, vec!["bob@example.com", "carol@example.com"]);
    }

    #[test]
    fn test_empty_tokens_are_ignored() {
        let page = SyncUpdatedResponse {
            records: Vec::new(),
            next_page_token: Some(String::new()),
            next_delta_token: Some(String::new()),
        };
        assert_eq!(page.page_token(), None);
        assert_eq!(page.delta_token(), None);
    }

    #[test]
    fn test_address_display() {
        assert_eq!(
            EmailAddress::new(Some("Alice"), "alice@example.com").display(),
            "Alice <alice@example.com>"
        );
        assert_eq!(
            EmailAddress::new(Some("  "), "bob@example.com").display(),
            "bob@example.com"
        );
        assert_eq!(EmailAddress::new(None, "bob@example.com").display(), "bob@example.com");
    }

    #[test]
    fn test_delta_request_query_pair() {
        assert_eq!(
            DeltaRequest::Delta("T1".to_string()).query_pair(),
            ("deltaToken", "T1")
        );
        assert_eq!(
            DeltaRequest::Page("p2".to_string()).query_pair(),
            ("pageToken", "p2")
        );
    }
}
