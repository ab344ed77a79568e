//! Remote API trait.

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;
use crate::email::{AccountId, Email, Paginated};

/// Parameters of a listing request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Restrict to one account; `None` lists every account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
    /// Restrict to one folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub page_size: u32,
    /// Free-text search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

/// Operations offered by the backend email API.
///
/// Mutations return only after the backend has confirmed them.
#[async_trait]
pub trait EmailApi: Send + Sync {
    /// Fetch one page of emails.
    async fn list_emails(&self, query: &ListQuery) -> Result<Paginated<Email>>;

    /// Fetch a single email.
    async fn get_email(&self, id: &str) -> Result<Email>;

    /// Set the read flag of one email.
    async fn mark_read(&self, id: &str, is_read: bool) -> Result<()>;

    /// Set the read flag of several emails.
    async fn mark_emails_read(&self, ids: &[String], is_read: bool) -> Result<()>;

    /// Set the starred flag of one email.
    async fn mark_starred(&self, id: &str, is_starred: bool) -> Result<()>;

    /// Delete one email.
    async fn delete_email(&self, id: &str) -> Result<()>;

    /// Delete several emails.
    async fn delete_emails(&self, ids: &[String]) -> Result<()>;

    /// Ask the backend to pull new mail; returns the number of new messages.
    async fn refresh(&self, account_id: Option<&AccountId>) -> Result<u64>;
}
