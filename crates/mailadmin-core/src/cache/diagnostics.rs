//! Introspection of the cache contents for tooling and tests.

use std::collections::BTreeMap;

use serde::Serialize;

use super::model::{CachedEmail, PageMetadata};
use super::store::{CacheStore, EMAIL_COLUMNS, PAGE_COLUMNS, email_from_row, page_from_row};
use crate::Result;

/// Every row currently held by the cache, expired or not.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheSnapshot {
    /// Email records.
    pub emails: Vec<CachedEmail>,
    /// Page metadata entries.
    pub pages: Vec<PageMetadata>,
}

/// Summary counters of the cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of email records.
    pub total_emails: usize,
    /// Number of page metadata entries.
    pub total_pages: usize,
    /// Email records per owner scope, keyed by scope storage key.
    pub emails_per_scope: BTreeMap<String, usize>,
    /// Size of the JSON-serialized snapshot, in bytes.
    pub approx_bytes: usize,
}

impl CacheStats {
    /// Approximate size as `"12.34 KB"` or `"1.23 MB"`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn human_size(&self) -> String {
        const KB: f64 = 1024.0;
        let bytes = self.approx_bytes as f64;
        if bytes > KB * KB {
            format!("{:.2} MB", bytes / KB / KB)
        } else {
            format!("{:.2} KB", bytes / KB)
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "emails: {}", self.total_emails)?;
        writeln!(f, "pages:  {}", self.total_pages)?;
        writeln!(f, "size:   {}", self.human_size())?;
        for (scope, count) in &self.emails_per_scope {
            writeln!(f, "  {scope}: {count}")?;
        }
        Ok(())
    }
}

impl CacheStore {
    /// Raw cached record for `id`, ignoring expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the query fails.
    pub async fn try_peek(&self, id: &str) -> Result<Option<CachedEmail>> {
        let pool = self.pool()?;
        let row = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM cached_emails WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        row.as_ref().map(email_from_row).transpose()
    }

    /// Every cached row, read in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or a query fails.
    pub async fn try_snapshot(&self) -> Result<CacheSnapshot> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await?;

        let email_rows = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM cached_emails ORDER BY cached_at DESC, id"
        ))
        .fetch_all(&mut *tx)
        .await?;
        let page_rows = sqlx::query(&format!(
            "SELECT {PAGE_COLUMNS} FROM page_metadata ORDER BY scope, page"
        ))
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(CacheSnapshot {
            emails: email_rows
                .iter()
                .map(email_from_row)
                .collect::<Result<_>>()?,
            pages: page_rows.iter().map(page_from_row).collect::<Result<_>>()?,
        })
    }

    /// Every cached row; empty when the store is unavailable.
    pub async fn snapshot(&self) -> CacheSnapshot {
        self.try_snapshot().await.unwrap_or_else(|e| {
            tracing::warn!("Cache snapshot failed: {e}");
            CacheSnapshot::default()
        })
    }

    /// Summary counters of the cache contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable, a query fails, or the
    /// snapshot cannot be serialized.
    pub async fn try_stats(&self) -> Result<CacheStats> {
        let snapshot = self.try_snapshot().await?;

        let mut emails_per_scope = BTreeMap::new();
        for record in &snapshot.emails {
            *emails_per_scope
                .entry(record.owner_scope.storage_key())
                .or_insert(0) += 1;
        }

        Ok(CacheStats {
            total_emails: snapshot.emails.len(),
            total_pages: snapshot.pages.len(),
            emails_per_scope,
            approx_bytes: serde_json::to_vec(&snapshot)?.len(),
        })
    }

    /// Summary counters; zeroed when the store is unavailable.
    pub async fn stats(&self) -> CacheStats {
        self.try_stats().await.unwrap_or_else(|e| {
            tracing::warn!("Cache stats failed: {e}");
            CacheStats::default()
        })
    }
}
