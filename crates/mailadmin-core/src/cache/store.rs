//! `SQLite`-backed cache store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::model::{
    CacheConfig, CachedEmail, CachedPage, EvictionCounts, PageMetadata, Scope, WriteOutcome,
    is_fresh,
};
use crate::email::{Email, Pagination, StatusPatch};
use crate::{Error, Result};

/// Columns selected for an email record.
pub(super) const EMAIL_COLUMNS: &str = "id, owner_scope, payload, is_read, is_starred, cached_at";
/// Columns selected for a page metadata row.
pub(super) const PAGE_COLUMNS: &str =
    "scope, page, page_size, total, total_pages, email_ids, cached_at, fetched_at";

/// How long a writer waits for the database write lock before failing.
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Local persistent cache of email pages and email details.
///
/// Every operation exists in two forms: a `try_` method returning the typed
/// failure, and a plain method that logs the failure and degrades to a cache
/// miss or no-op. Callers on the mail path use the plain methods so the cache
/// can never fail a remote operation.
#[derive(Debug)]
pub struct CacheStore {
    pub(super) pool: Option<SqlitePool>,
    pub(super) config: CacheConfig,
    pub(super) clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Open (or create) a cache database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created or the
    /// schema cannot be initialized.
    pub async fn open(database_path: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        let path = database_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        debug!("Opened cache database at {}", path.display());
        Self::from_pool(pool, config).await
    }

    /// Open the cache, or fall back to a store that treats every lookup as a
    /// miss when the engine cannot be opened.
    pub async fn open_or_unavailable(database_path: impl AsRef<Path>, config: CacheConfig) -> Self {
        let path = database_path.as_ref();
        match Self::open(path, config).await {
            Ok(store) => store,
            Err(e) => {
                warn!(
                    "Cache unavailable for this session ({}): {e}",
                    path.display()
                );
                Self::unavailable(config)
            }
        }
    }

    /// Create an isolated in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory(config: CacheConfig) -> Result<Self> {
        // A single connection that never recycles, otherwise the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::from_pool(pool, config).await
    }

    /// A store whose engine could not be opened.
    #[must_use]
    pub fn unavailable(config: CacheConfig) -> Self {
        Self {
            pool: None,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Default database location under the user's data directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mailadmin")
            .join("cache.db")
    }

    /// Expiry configuration.
    #[must_use]
    pub const fn config(&self) -> CacheConfig {
        self.config
    }

    /// Current time according to the store's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether the underlying engine is open.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.pool.as_ref().is_some_and(|pool| !pool.is_closed())
    }

    /// Close the database. Every later operation degrades to a miss/no-op.
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
            info!("Cache store closed");
        }
    }

    async fn from_pool(pool: SqlitePool, config: CacheConfig) -> Result<Self> {
        let store = Self {
            pool: Some(pool),
            config,
            clock: Arc::new(SystemClock),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        let pool = self.pool()?;

        // Email records, shared by every scope
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS cached_emails (
                id TEXT PRIMARY KEY,
                owner_scope TEXT NOT NULL,
                payload TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL
            )
            ",
        )
        .execute(pool)
        .await?;

        // Page membership and pagination, one row per (scope, page)
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS page_metadata (
                scope TEXT NOT NULL,
                page INTEGER NOT NULL,
                page_size INTEGER NOT NULL,
                total INTEGER NOT NULL,
                total_pages INTEGER NOT NULL,
                email_ids TEXT NOT NULL,
                cached_at INTEGER NOT NULL,
                fetched_at INTEGER NOT NULL,
                PRIMARY KEY (scope, page)
            )
            ",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_cached_emails_scope
            ON cached_emails(owner_scope)
            ",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_cached_emails_cached_at
            ON cached_emails(cached_at)
            ",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Begin a transaction that holds the write lock from its first statement.
    ///
    /// A deferred transaction that reads before writing cannot wait for the
    /// lock when another connection is writing; it fails with `SQLITE_BUSY`
    /// instead. Taking the lock up front lets the busy timeout apply.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool()?.begin_with("BEGIN IMMEDIATE").await?)
    }

    pub(super) fn pool(&self) -> Result<&SqlitePool> {
        match &self.pool {
            Some(pool) if !pool.is_closed() => Ok(pool),
            Some(_) => Err(Error::Unavailable("store closed".to_string())),
            None => Err(Error::Unavailable("store not opened".to_string())),
        }
    }

    // -- pages ---------------------------------------------------------------

    /// Cache one fetched page and its emails.
    pub async fn cache_page(&self, scope: &Scope, emails: &[Email], pagination: Pagination) {
        let result = self.try_cache_page(scope, emails, pagination).await;
        settle("cache page", result.map(|_| ()));
    }

    /// Cache one fetched page and its emails.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the transaction fails.
    pub async fn try_cache_page(
        &self,
        scope: &Scope,
        emails: &[Email],
        pagination: Pagination,
    ) -> Result<WriteOutcome> {
        let now = self.clock.now();
        self.try_cache_page_fetched_at(scope, emails, pagination, now)
            .await
    }

    /// Cache a page produced by a fetch started at `fetched_at`, unless a page
    /// from a more recent fetch is already stored under the same key.
    pub async fn cache_page_fetched_at(
        &self,
        scope: &Scope,
        emails: &[Email],
        pagination: Pagination,
        fetched_at: DateTime<Utc>,
    ) {
        let result = self
            .try_cache_page_fetched_at(scope, emails, pagination, fetched_at)
            .await;
        settle("cache page", result.map(|_| ()));
    }

    /// Guarded page write; see [`CacheStore::cache_page_fetched_at`].
    ///
    /// Emails and metadata are written in one transaction, so readers see
    /// either the previous page or the new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the transaction fails.
    pub async fn try_cache_page_fetched_at(
        &self,
        scope: &Scope,
        emails: &[Email],
        pagination: Pagination,
        fetched_at: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        let key = scope.storage_key();
        let email_ids: Vec<&str> = emails.iter().map(|e| e.id.as_str()).collect();
        let email_ids_json = serde_json::to_string(&email_ids)?;

        let mut tx = self.begin_write().await?;
        let now = self.clock.now();

        let stored_fetch: Option<i64> = sqlx::query_scalar(
            r"SELECT fetched_at FROM page_metadata WHERE scope = ? AND page = ?",
        )
        .bind(&key)
        .bind(pagination.page)
        .fetch_optional(&mut *tx)
        .await?;

        if stored_fetch.is_some_and(|stored| stored > fetched_at.timestamp_millis()) {
            tx.rollback().await?;
            debug!(
                "Skipped stale page write ({scope}, page {}): newer fetch already cached",
                pagination.page
            );
            return Ok(WriteOutcome::Superseded);
        }

        for email in emails {
            upsert_email(&mut *tx, &key, email, now).await?;
        }

        sqlx::query(
            r"
            INSERT INTO page_metadata
                (scope, page, page_size, total, total_pages, email_ids, cached_at, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(scope, page) DO UPDATE SET
                page_size = excluded.page_size,
                total = excluded.total,
                total_pages = excluded.total_pages,
                email_ids = excluded.email_ids,
                cached_at = excluded.cached_at,
                fetched_at = excluded.fetched_at
            ",
        )
        .bind(&key)
        .bind(pagination.page)
        .bind(pagination.page_size)
        .bind(i64::try_from(pagination.total).unwrap_or(i64::MAX))
        .bind(pagination.total_pages)
        .bind(email_ids_json)
        .bind(now.timestamp_millis())
        .bind(fetched_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "Cached {} emails ({scope}, page {})",
            emails.len(),
            pagination.page
        );
        Ok(WriteOutcome::Written)
    }

    /// Get a cached page if its metadata is still fresh.
    pub async fn get_page(&self, scope: &Scope, page: u32) -> Option<CachedPage> {
        settle("get page", self.try_get_page(scope, page).await)
    }

    /// Get a cached page if its metadata is still fresh.
    ///
    /// Members whose record is missing or expired are left out; the rest keep
    /// the recorded page order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or a query fails.
    pub async fn try_get_page(&self, scope: &Scope, page: u32) -> Result<Option<CachedPage>> {
        let pool = self.pool()?;
        let now = self.clock.now();

        let mut tx = pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {PAGE_COLUMNS} FROM page_metadata WHERE scope = ? AND page = ?"
        ))
        .bind(scope.storage_key())
        .bind(page)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let metadata = page_from_row(&row)?;

        if !is_fresh(metadata.cached_at, now, self.config.list_ttl) {
            debug!("Cached page expired ({scope}, page {page})");
            return Ok(None);
        }

        let records = fetch_emails_by_id(&mut *tx, &metadata.email_ids).await?;
        tx.commit().await?;

        let emails: Vec<Email> = metadata
            .email_ids
            .iter()
            .filter_map(|id| records.get(id))
            .filter(|record| is_fresh(record.cached_at, now, self.config.detail_ttl))
            .map(|record| record.email.clone())
            .collect();

        debug!(
            "Loaded {} of {} cached emails ({scope}, page {page})",
            emails.len(),
            metadata.email_ids.len()
        );

        Ok(Some(CachedPage {
            emails,
            pagination: metadata.pagination,
        }))
    }

    // -- details -------------------------------------------------------------

    /// Cache a single email.
    pub async fn cache_detail(&self, scope: &Scope, email: &Email) {
        settle("cache detail", self.try_cache_detail(scope, email).await);
    }

    /// Cache a single email.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the query fails.
    pub async fn try_cache_detail(&self, scope: &Scope, email: &Email) -> Result<()> {
        let pool = self.pool()?;
        let mut conn = pool.acquire().await?;
        upsert_email(&mut *conn, &scope.storage_key(), email, self.clock.now()).await
    }

    /// Get a cached email if it is still fresh.
    pub async fn get_detail(&self, id: &str) -> Option<Email> {
        settle("get detail", self.try_get_detail(id).await)
    }

    /// Get a cached email if it is still fresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the query fails.
    pub async fn try_get_detail(&self, id: &str) -> Result<Option<Email>> {
        let now = self.clock.now();
        let record = self.try_peek(id).await?;

        Ok(record
            .filter(|record| is_fresh(record.cached_at, now, self.config.detail_ttl))
            .map(|record| record.email))
    }

    /// Patch the read/starred flags of a cached email, if present.
    pub async fn patch_status(&self, id: &str, patch: StatusPatch) {
        settle("patch status", self.try_patch_status(id, patch).await);
    }

    /// Patch the read/starred flags of a cached email, if present.
    ///
    /// Returns whether a record was updated. Never creates a record and never
    /// touches the write timestamp or owner scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the query fails.
    pub async fn try_patch_status(&self, id: &str, patch: StatusPatch) -> Result<bool> {
        let pool = self.pool()?;
        if patch.is_empty() {
            return Ok(false);
        }

        let result = sqlx::query(
            r"
            UPDATE cached_emails
            SET is_read = COALESCE(?, is_read),
                is_starred = COALESCE(?, is_starred)
            WHERE id = ?
            ",
        )
        .bind(patch.is_read)
        .bind(patch.is_starred)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // -- eviction ------------------------------------------------------------

    /// Remove one cached email. Page metadata is left alone.
    pub async fn delete_one(&self, id: &str) {
        settle("delete email", self.try_delete_one(id).await);
    }

    /// Remove one cached email and return how many records were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the query fails.
    pub async fn try_delete_one(&self, id: &str) -> Result<u64> {
        let pool = self.pool()?;
        let result = sqlx::query(r"DELETE FROM cached_emails WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Remove several cached emails. Page metadata is left alone.
    pub async fn delete_many(&self, ids: &[String]) {
        settle("delete emails", self.try_delete_many(ids).await);
    }

    /// Remove several cached emails in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the transaction fails.
    pub async fn try_delete_many(&self, ids: &[String]) -> Result<u64> {
        self.pool()?;
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.begin_write().await?;
        let mut removed = 0;
        for id in ids {
            removed += sqlx::query(r"DELETE FROM cached_emails WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        Ok(removed)
    }

    /// Remove every email owned by `scope` and every page cached under it.
    pub async fn clear_scope(&self, scope: &Scope) {
        settle("clear scope", self.try_clear_scope(scope).await);
    }

    /// Remove every email owned by `scope` and every page cached under it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the transaction fails.
    pub async fn try_clear_scope(&self, scope: &Scope) -> Result<EvictionCounts> {
        let key = scope.storage_key();

        let mut tx = self.begin_write().await?;
        let emails = sqlx::query(r"DELETE FROM cached_emails WHERE owner_scope = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let pages = sqlx::query(r"DELETE FROM page_metadata WHERE scope = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        info!("Cleared cache for {scope} ({emails} emails, {pages} pages)");
        Ok(EvictionCounts { emails, pages })
    }

    /// Empty the whole cache.
    pub async fn clear_all(&self) {
        settle("clear all", self.try_clear_all().await);
    }

    /// Empty the whole cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the transaction fails.
    pub async fn try_clear_all(&self) -> Result<EvictionCounts> {
        let mut tx = self.begin_write().await?;
        let emails = sqlx::query(r"DELETE FROM cached_emails")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let pages = sqlx::query(r"DELETE FROM page_metadata")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        info!("Cleared all email cache ({emails} emails, {pages} pages)");
        Ok(EvictionCounts { emails, pages })
    }

    /// Remove every entry that is no longer fresh.
    pub async fn sweep_expired(&self) -> EvictionCounts {
        settle("sweep expired", self.try_sweep_expired().await)
    }

    /// Remove every entry that is no longer fresh.
    ///
    /// Each table is swept by a single age-filtered statement; no transaction
    /// spans both, so concurrent readers and writers are never blocked for
    /// longer than one statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or a query fails.
    pub async fn try_sweep_expired(&self) -> Result<EvictionCounts> {
        let pool = self.pool()?;
        let now = self.clock.now();
        let email_cutoff = (now - self.config.detail_ttl).timestamp_millis();
        let page_cutoff = (now - self.config.list_ttl).timestamp_millis();

        let emails = sqlx::query(r"DELETE FROM cached_emails WHERE cached_at <= ?")
            .bind(email_cutoff)
            .execute(pool)
            .await?
            .rows_affected();
        let pages = sqlx::query(r"DELETE FROM page_metadata WHERE cached_at <= ?")
            .bind(page_cutoff)
            .execute(pool)
            .await?
            .rows_affected();

        let counts = EvictionCounts { emails, pages };
        if counts.total() > 0 {
            info!("Swept {emails} expired emails and {pages} expired pages");
        }
        Ok(counts)
    }

    /// Run [`CacheStore::sweep_expired`] every `every` until the store closes.
    #[must_use]
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if !store.is_available() {
                    debug!("Cache sweeper stopping: store closed");
                    break;
                }
                store.sweep_expired().await;
            }
        })
    }
}

/// Collapse a cache failure into a miss/no-op after logging it.
fn settle<T: Default>(operation: &str, result: Result<T>) -> T {
    result.unwrap_or_else(|e| {
        warn!("Cache {operation} failed: {e}");
        T::default()
    })
}

async fn upsert_email(
    conn: &mut SqliteConnection,
    scope_key: &str,
    email: &Email,
    cached_at: DateTime<Utc>,
) -> Result<()> {
    let payload = serde_json::to_string(email)?;

    sqlx::query(
        r"
        INSERT INTO cached_emails (id, owner_scope, payload, is_read, is_starred, cached_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            owner_scope = excluded.owner_scope,
            payload = excluded.payload,
            is_read = excluded.is_read,
            is_starred = excluded.is_starred,
            cached_at = excluded.cached_at
        ",
    )
    .bind(&email.id)
    .bind(scope_key)
    .bind(payload)
    .bind(email.is_read)
    .bind(email.is_starred)
    .bind(cached_at.timestamp_millis())
    .execute(conn)
    .await?;

    Ok(())
}

async fn fetch_emails_by_id(
    conn: &mut SqliteConnection,
    ids: &[String],
) -> Result<HashMap<String, CachedEmail>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {EMAIL_COLUMNS} FROM cached_emails WHERE id IN ("));
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.as_str());
    }
    separated.push_unseparated(")");

    let rows = builder.build().fetch_all(conn).await?;

    rows.iter()
        .map(|row| email_from_row(row).map(|record| (record.email.id.clone(), record)))
        .collect()
}

pub(super) fn email_from_row(row: &SqliteRow) -> Result<CachedEmail> {
    let payload: String = row.try_get("payload")?;
    let mut email: Email = serde_json::from_str(&payload)?;
    // Flags live in their own columns so they can be patched in place.
    email.is_read = row.try_get("is_read")?;
    email.is_starred = row.try_get("is_starred")?;

    let owner_key: String = row.try_get("owner_scope")?;
    let owner_scope = Scope::from_storage_key(&owner_key)
        .ok_or_else(|| Error::Corrupt(format!("unknown scope key: {owner_key}")))?;

    Ok(CachedEmail {
        email,
        owner_scope,
        cached_at: timestamp(row.try_get("cached_at")?)?,
    })
}

pub(super) fn page_from_row(row: &SqliteRow) -> Result<PageMetadata> {
    let scope_key: String = row.try_get("scope")?;
    let scope = Scope::from_storage_key(&scope_key)
        .ok_or_else(|| Error::Corrupt(format!("unknown scope key: {scope_key}")))?;
    let email_ids_json: String = row.try_get("email_ids")?;

    Ok(PageMetadata {
        scope,
        pagination: Pagination {
            page: row.try_get("page")?,
            page_size: row.try_get("page_size")?,
            total: u64::try_from(row.try_get::<i64, _>("total")?).unwrap_or_default(),
            total_pages: row.try_get("total_pages")?,
        },
        email_ids: serde_json::from_str(&email_ids_json)?,
        cached_at: timestamp(row.try_get("cached_at")?)?,
        fetched_at: timestamp(row.try_get("fetched_at")?)?,
    })
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Corrupt(format!("timestamp out of range: {millis}")))
}
