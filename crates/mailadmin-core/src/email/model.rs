//! Email model types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier of a mail account, assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A mailbox address with an optional display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Address (`user@example.com`).
    pub address: String,
}

impl EmailAddress {
    /// Create an address without a display name.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "{name} <{}>", self.address),
            _ => f.write_str(&self.address),
        }
    }
}

/// Attachment metadata. The payload itself is downloaded on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Attachment identifier within the email.
    pub id: String,
    /// File name.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Download URL, when the backend provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// An inline image referenced from the HTML body by content ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    /// MIME content type.
    pub content_type: String,
    /// Base64-encoded image data.
    pub data: String,
}

/// A full email record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    /// Unique identifier (primary key in the cache).
    pub id: String,
    /// Account the email was received on.
    pub account_id: AccountId,
    /// RFC 5322 `Message-ID`.
    #[serde(default)]
    pub message_id: String,
    /// Sender.
    pub from: EmailAddress,
    /// Recipients.
    #[serde(default)]
    pub to: Vec<EmailAddress>,
    /// Carbon-copy recipients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<EmailAddress>>,
    /// Blind carbon-copy recipients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<EmailAddress>>,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Plain text body.
    #[serde(default)]
    pub body: String,
    /// HTML body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,
    /// Date as sent by the backend.
    #[serde(default)]
    pub date: String,
    /// Whether the email has been read.
    #[serde(default)]
    pub is_read: bool,
    /// Whether the email is starred.
    #[serde(default)]
    pub is_starred: bool,
    /// Whether the email has attachments.
    #[serde(default)]
    pub has_attachments: bool,
    /// Attachment metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    /// Inline images keyed by content ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_images: Option<HashMap<String, InlineImage>>,
    /// Folder the email lives in.
    #[serde(default)]
    pub folder: String,
    /// Labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

/// Pagination summary of one listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    /// Requested page size.
    pub page_size: u32,
    /// Total number of items across all pages.
    pub total: u64,
    /// Total number of pages.
    pub total_pages: u32,
}

impl Pagination {
    /// Whether more pages follow this one.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.page < self.total_pages
    }
}

/// A page of items returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    /// Items on this page, in server order.
    pub items: Vec<T>,
    /// Total number of items across all pages.
    pub total: u64,
    /// 1-based page number.
    pub page: u32,
    /// Requested page size.
    pub page_size: u32,
    /// Total number of pages.
    pub total_pages: u32,
}

impl<T> Paginated<T> {
    /// Pagination summary without the items.
    #[must_use]
    pub const fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            page_size: self.page_size,
            total: self.total,
            total_pages: self.total_pages,
        }
    }
}

/// Partial update of the mutable status fields of an email.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusPatch {
    /// New read state, if changing.
    pub is_read: Option<bool>,
    /// New starred state, if changing.
    pub is_starred: Option<bool>,
}

impl StatusPatch {
    /// Patch that only sets the read flag.
    #[must_use]
    pub const fn read(is_read: bool) -> Self {
        Self {
            is_read: Some(is_read),
            is_starred: None,
        }
    }

    /// Patch that only sets the starred flag.
    #[must_use]
    pub const fn starred(is_starred: bool) -> Self {
        Self {
            is_read: None,
            is_starred: Some(is_starred),
        }
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.is_read.is_none() && self.is_starred.is_none()
    }

    /// Apply the patch to an email in place.
    pub fn apply(&self, email: &mut Email) {
        if let Some(is_read) = self.is_read {
            email.is_read = is_read;
        }
        if let Some(is_starred) = self.is_starred {
            email.is_starred = is_starred;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_email_deserializes_camel_case() {
        let json = r#"{
            "id": "e1",
            "accountId": "acct-1",
            "messageId": "<m1@example.com>",
            "from": {"name": "Alice", "address": "alice@example.com"},
            "to": [{"address": "bob@example.com"}],
            "subject": "Hello",
            "body": "Hi Bob",
            "bodyHtml": "<p>Hi Bob</p>",
            "date": "2026-01-29T21:57:11",
            "isRead": false,
            "isStarred": true,
            "hasAttachments": true,
            "attachments": [{"id": "a1", "filename": "report.pdf", "contentType": "application/pdf", "size": 1024}],
            "inlineImages": {"logo": {"content_type": "image/png", "data": "iVBORw0KGgo="}},
            "folder": "INBOX"
        }"#;

        let email: Email = serde_json::from_str(json).unwrap();
        assert_eq!(email.account_id, AccountId::new("acct-1"));
        assert_eq!(email.from.to_string(), "Alice <alice@example.com>");
        assert!(email.is_starred);
        assert_eq!(email.attachments.as_ref().unwrap()[0].content_type, "application/pdf");
        assert_eq!(email.inline_images.as_ref().unwrap()["logo"].content_type, "image/png");
        assert!(email.labels.is_none());
    }

    #[test]
    fn test_status_patch_apply() {
        let json = r#"{"id": "e1", "accountId": "a", "from": {"address": "x@example.com"}}"#;
        let mut email: Email = serde_json::from_str(json).unwrap();

        StatusPatch::read(true).apply(&mut email);
        assert!(email.is_read);
        assert!(!email.is_starred);

        StatusPatch::starred(true).apply(&mut email);
        assert!(email.is_read);
        assert!(email.is_starred);

        assert!(StatusPatch::default().is_empty());
    }

    #[test]
    fn test_paginated_summary() {
        let page = Paginated::<Email> {
            items: Vec::new(),
            total: 57,
            page: 1,
            page_size: 20,
            total_pages: 3,
        };
        let pagination = page.pagination();
        assert_eq!(pagination.total, 57);
        assert!(pagination.has_more());
    }
}
