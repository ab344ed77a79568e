//! Cache data models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::email::{AccountId, Email, Pagination};

/// Storage key of the aggregated "all accounts" scope.
const ALL_ACCOUNTS_KEY: &str = "all";
/// Prefix of per-account storage keys.
const ACCOUNT_KEY_PREFIX: &str = "account:";

/// Partition key for cached pages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Scope {
    /// Listing of a single account.
    Account(AccountId),
    /// Aggregated listing across all accounts.
    AllAccounts,
}

impl Scope {
    /// Scope of a single account.
    #[must_use]
    pub fn account(id: impl Into<String>) -> Self {
        Self::Account(AccountId::new(id))
    }

    /// Key under which this scope is stored.
    ///
    /// Account keys are prefixed so that no account ID can alias the
    /// aggregate scope.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Account(id) => format!("{ACCOUNT_KEY_PREFIX}{id}"),
            Self::AllAccounts => ALL_ACCOUNTS_KEY.to_string(),
        }
    }

    /// Parse a key produced by [`Scope::storage_key`].
    #[must_use]
    pub fn from_storage_key(key: &str) -> Option<Self> {
        if key == ALL_ACCOUNTS_KEY {
            return Some(Self::AllAccounts);
        }
        key.strip_prefix(ACCOUNT_KEY_PREFIX)
            .map(|id| Self::Account(AccountId::new(id)))
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Account(id) => write!(f, "account {id}"),
            Self::AllAccounts => f.write_str("all accounts"),
        }
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.storage_key()
    }
}

impl TryFrom<String> for Scope {
    type Error = String;

    fn try_from(key: String) -> Result<Self, Self::Error> {
        Self::from_storage_key(&key).ok_or_else(|| format!("invalid scope key: {key}"))
    }
}

/// Expiry thresholds of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long page metadata stays fresh.
    pub list_ttl: Duration,
    /// How long an email record stays fresh.
    pub detail_ttl: Duration,
}

impl CacheConfig {
    /// Default lifetime of a cached page.
    pub const DEFAULT_LIST_TTL_MINUTES: i64 = 30;
    /// Default lifetime of a cached email.
    pub const DEFAULT_DETAIL_TTL_HOURS: i64 = 2;
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            list_ttl: Duration::minutes(Self::DEFAULT_LIST_TTL_MINUTES),
            detail_ttl: Duration::hours(Self::DEFAULT_DETAIL_TTL_HOURS),
        }
    }
}

/// Whether an entry written at `cached_at` is still fresh at `now`.
pub(crate) fn is_fresh(cached_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - cached_at < ttl
}

/// An email record as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEmail {
    /// The email itself.
    pub email: Email,
    /// Scope the copy was fetched under (latest writer wins).
    pub owner_scope: Scope,
    /// When the record was last written.
    pub cached_at: DateTime<Utc>,
}

/// Membership and pagination of one cached page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    /// Scope the page belongs to.
    pub scope: Scope,
    /// Pagination summary as returned by the server.
    pub pagination: Pagination,
    /// Member email IDs in server order.
    pub email_ids: Vec<String>,
    /// When the metadata was written.
    pub cached_at: DateTime<Utc>,
    /// When the fetch that produced this page was started.
    pub fetched_at: DateTime<Utc>,
}

/// A page resolved from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    /// Member emails still present in the cache, in page order.
    pub emails: Vec<Email>,
    /// Pagination summary recorded with the page.
    pub pagination: Pagination,
}

/// Result of a guarded page write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The page and its emails were written.
    Written,
    /// A page fetched more recently is already stored; nothing was written.
    Superseded,
}

/// Number of entries removed by an eviction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionCounts {
    /// Email records removed.
    pub emails: u64,
    /// Page metadata entries removed.
    pub pages: u64,
}

impl EvictionCounts {
    /// Total entries removed.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.emails + self.pages
    }
}
