//! Email state layer: cache-aware listing, detail loading and mutations.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::Result;
use crate::cache::{CacheStore, Scope, WriteOutcome};
use crate::email::{AccountId, Email, Pagination, StatusPatch};
use crate::remote::{EmailApi, ListQuery};
use crate::settings::SettingsHandle;

/// Where a page was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    /// Served from the local cache; a background refresh was started.
    Cache,
    /// Fetched from the backend.
    Remote,
}

/// A page of emails as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageView {
    /// Emails in display order.
    pub emails: Vec<Email>,
    /// Pagination summary.
    pub pagination: Pagination,
    /// Where the page came from.
    pub source: PageSource,
}

/// How a background refresh ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The refreshed page replaced the cached one.
    Updated {
        /// Number of emails on the refreshed page.
        emails: usize,
    },
    /// A more recent fetch had already been cached.
    Superseded,
    /// The refresh was fetched but could not be written to the cache.
    CacheFailed(String),
    /// The backend call failed.
    RemoteFailed(String),
}

/// Receives background refresh outcomes.
///
/// Purely for observability: nothing depends on a refresh being observed.
pub trait RefreshObserver: Send + Sync {
    /// Called once per background refresh.
    fn refresh_finished(&self, scope: &Scope, page: u32, outcome: &RefreshOutcome);
}

/// Cache-aware front of the email API.
///
/// Cheap to clone; clones share the API client, cache and settings.
#[derive(Clone)]
pub struct EmailService {
    api: Arc<dyn EmailApi>,
    cache: Arc<CacheStore>,
    settings: SettingsHandle,
    observer: Option<Arc<dyn RefreshObserver>>,
}

impl std::fmt::Debug for EmailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailService")
            .field("cache", &self.cache)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl EmailService {
    /// Create a service over the given API, cache and settings.
    #[must_use]
    pub fn new(api: Arc<dyn EmailApi>, cache: Arc<CacheStore>, settings: SettingsHandle) -> Self {
        Self {
            api,
            cache,
            settings,
            observer: None,
        }
    }

    /// Report background refresh outcomes to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RefreshObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The underlying cache store.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Load one page of emails.
    ///
    /// With the cache enabled and a fresh page cached, the cached page is
    /// returned at once and a detached refresh updates the cache behind it.
    /// Searches always go to the backend and are never cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the page had to be fetched and the backend call failed.
    pub async fn list_page(
        &self,
        scope: &Scope,
        page: u32,
        page_size: u32,
        search: Option<&str>,
    ) -> Result<PageView> {
        let query = list_query(scope, page, page_size, search);
        let use_cache = query.search.is_none() && self.settings.cache_enabled().await;

        if use_cache {
            if let Some(cached) = self.cache.get_page(scope, page).await {
                debug!("Serving {scope} page {page} from cache");
                self.spawn_refresh(scope.clone(), query);
                return Ok(PageView {
                    emails: cached.emails,
                    pagination: cached.pagination,
                    source: PageSource::Cache,
                });
            }
        }

        let fetched_at = self.cache.now();
        let result = self.api.list_emails(&query).await?;
        let pagination = result.pagination();

        if use_cache {
            self.cache
                .cache_page_fetched_at(scope, &result.items, pagination, fetched_at)
                .await;
        }

        Ok(PageView {
            emails: result.items,
            pagination,
            source: PageSource::Remote,
        })
    }

    /// Load one email for display, marking it read if it was unread.
    ///
    /// # Errors
    ///
    /// Returns an error if the email was not cached and the backend call
    /// failed, or if marking it read failed.
    pub async fn open_email(&self, scope: &Scope, id: &str) -> Result<Email> {
        let mut email = self.get_email(scope, id).await?;
        if !email.is_read {
            let patch = StatusPatch::read(true);
            self.mark_read(id, true).await?;
            patch.apply(&mut email);
        }
        Ok(email)
    }

    /// Load one email, from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns an error if the email was not cached and the backend call failed.
    pub async fn get_email(&self, scope: &Scope, id: &str) -> Result<Email> {
        let use_cache = self.settings.cache_enabled().await;

        if use_cache {
            if let Some(email) = self.cache.get_detail(id).await {
                debug!("Serving email {id} from cache");
                return Ok(email);
            }
        }

        let email = self.api.get_email(id).await?;
        if use_cache {
            self.cache.cache_detail(scope, &email).await;
        }
        Ok(email)
    }

    /// Set the read flag of one email.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call failed; the cache is untouched then.
    pub async fn mark_read(&self, id: &str, is_read: bool) -> Result<()> {
        self.api.mark_read(id, is_read).await?;
        self.cache.patch_status(id, StatusPatch::read(is_read)).await;
        Ok(())
    }

    /// Set the starred flag of one email.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call failed; the cache is untouched then.
    pub async fn mark_starred(&self, id: &str, is_starred: bool) -> Result<()> {
        self.api.mark_starred(id, is_starred).await?;
        self.cache
            .patch_status(id, StatusPatch::starred(is_starred))
            .await;
        Ok(())
    }

    /// Set the read flag of several emails.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call failed; the cache is untouched then.
    pub async fn batch_mark_read(&self, ids: &[String], is_read: bool) -> Result<()> {
        self.api.mark_emails_read(ids, is_read).await?;
        for id in ids {
            self.cache.patch_status(id, StatusPatch::read(is_read)).await;
        }
        Ok(())
    }

    /// Delete one email.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call failed; the cache is untouched then.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.api.delete_email(id).await?;
        self.cache.delete_one(id).await;
        Ok(())
    }

    /// Delete several emails.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call failed; the cache is untouched then.
    pub async fn batch_delete(&self, ids: &[String]) -> Result<()> {
        self.api.delete_emails(ids).await?;
        self.cache.delete_many(ids).await;
        Ok(())
    }

    /// Ask the backend to pull new mail for one account (or all of them).
    ///
    /// When new mail arrived, cached pages of the affected scope and of the
    /// aggregated scope are dropped so the next listing refetches.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call failed.
    pub async fn refresh_account(&self, account_id: Option<&AccountId>) -> Result<u64> {
        let new_count = self.api.refresh(account_id).await?;

        if new_count > 0 {
            if let Some(id) = account_id {
                self.cache.clear_scope(&Scope::Account(id.clone())).await;
            }
            self.cache.clear_scope(&Scope::AllAccounts).await;
        }

        debug!("Refresh found {new_count} new emails");
        Ok(new_count)
    }

    /// Refetch a page in the background and overwrite the cache with it.
    ///
    /// Fire-and-forget: the task has no return channel and always runs to
    /// completion or failure.
    fn spawn_refresh(&self, scope: Scope, query: ListQuery) {
        let service = self.clone();
        tokio::spawn(async move {
            let page = query.page;
            let outcome = service.refresh_page(&scope, &query).await;
            match &outcome {
                RefreshOutcome::Updated { emails } => {
                    debug!("Background refresh updated {scope} page {page} ({emails} emails)");
                }
                RefreshOutcome::Superseded => {
                    debug!("Background refresh of {scope} page {page} was superseded");
                }
                RefreshOutcome::CacheFailed(e) | RefreshOutcome::RemoteFailed(e) => {
                    warn!("Background refresh of {scope} page {page} failed: {e}");
                }
            }
            if let Some(observer) = &service.observer {
                observer.refresh_finished(&scope, page, &outcome);
            }
        });
    }

    async fn refresh_page(&self, scope: &Scope, query: &ListQuery) -> RefreshOutcome {
        let fetched_at = self.cache.now();
        let result = match self.api.list_emails(query).await {
            Ok(result) => result,
            Err(e) => return RefreshOutcome::RemoteFailed(e.to_string()),
        };

        match self
            .cache
            .try_cache_page_fetched_at(scope, &result.items, result.pagination(), fetched_at)
            .await
        {
            Ok(WriteOutcome::Written) => RefreshOutcome::Updated {
                emails: result.items.len(),
            },
            Ok(WriteOutcome::Superseded) => RefreshOutcome::Superseded,
            Err(e) => RefreshOutcome::CacheFailed(e.to_string()),
        }
    }
}

fn list_query(scope: &Scope, page: u32, page_size: u32, search: Option<&str>) -> ListQuery {
    ListQuery {
        account_id: match scope {
            Scope::Account(id) => Some(id.clone()),
            Scope::AllAccounts => None,
        },
        folder: None,
        page,
        page_size,
        search: search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::Error;
    use crate::cache::CacheConfig;
    use crate::email::{EmailAddress, Paginated};
    use crate::settings::AppSettings;

    fn email(id: &str, account: &str) -> Email {
        Email {
            id: id.to_string(),
            account_id: AccountId::new(account),
            message_id: format!("<{id}@example.com>"),
            from: EmailAddress::new("sender@example.com"),
            to: vec![EmailAddress::new("me@example.com")],
            cc: None,
            bcc: None,
            subject: format!("Subject {id}"),
            body: "Body".to_string(),
            body_html: None,
            date: "2026-01-29T21:57:11".to_string(),
            is_read: false,
            is_starred: false,
            has_attachments: false,
            attachments: None,
            inline_images: None,
            folder: "INBOX".to_string(),
            labels: None,
        }
    }

    /// In-memory backend that records every call.
    #[derive(Default)]
    struct FakeApi {
        emails: Mutex<Vec<Email>>,
        calls: Mutex<Vec<String>>,
        fail: AtomicBool,
        new_count: AtomicU64,
    }

    impl FakeApi {
        fn with_emails(emails: Vec<Email>) -> Self {
            Self {
                emails: Mutex::new(emails),
                ..Self::default()
            }
        }

        fn record(&self, call: String) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.fail.load(Ordering::SeqCst) {
                Err(Error::Api("backend down".to_string()))
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }

        fn update(&self, id: &str, apply: impl Fn(&mut Email)) {
            for email in self.emails.lock().unwrap().iter_mut() {
                if email.id == id {
                    apply(email);
                }
            }
        }
    }

    #[async_trait]
    impl EmailApi for FakeApi {
        async fn list_emails(&self, query: &ListQuery) -> Result<Paginated<Email>> {
            self.record(format!("list {}", query.page))?;
            let all: Vec<Email> = self
                .emails
                .lock()
                .unwrap()
                .iter()
                .filter(|e| query.account_id.as_ref().is_none_or(|id| &e.account_id == id))
                .filter(|e| {
                    query
                        .search
                        .as_ref()
                        .is_none_or(|s| e.subject.contains(s.as_str()))
                })
                .cloned()
                .collect();

            let size = query.page_size as usize;
            let start = (query.page as usize - 1) * size;
            let total = all.len();
            Ok(Paginated {
                items: all.into_iter().skip(start).take(size).collect(),
                total: total as u64,
                page: query.page,
                page_size: query.page_size,
                total_pages: u32::try_from(total.div_ceil(size)).unwrap(),
            })
        }

        async fn get_email(&self, id: &str) -> Result<Email> {
            self.record(format!("get {id}"))?;
            self.emails
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| Error::Api("not found".to_string()))
        }

        async fn mark_read(&self, id: &str, is_read: bool) -> Result<()> {
            self.record(format!("read {id}"))?;
            self.update(id, |e| e.is_read = is_read);
            Ok(())
        }

        async fn mark_emails_read(&self, ids: &[String], is_read: bool) -> Result<()> {
            self.record(format!("batch-read {}", ids.len()))?;
            for id in ids {
                self.update(id, |e| e.is_read = is_read);
            }
            Ok(())
        }

        async fn mark_starred(&self, id: &str, is_starred: bool) -> Result<()> {
            self.record(format!("star {id}"))?;
            self.update(id, |e| e.is_starred = is_starred);
            Ok(())
        }

        async fn delete_email(&self, id: &str) -> Result<()> {
            self.record(format!("delete {id}"))?;
            self.emails.lock().unwrap().retain(|e| e.id != id);
            Ok(())
        }

        async fn delete_emails(&self, ids: &[String]) -> Result<()> {
            self.record(format!("batch-delete {}", ids.len()))?;
            self.emails.lock().unwrap().retain(|e| !ids.contains(&e.id));
            Ok(())
        }

        async fn refresh(&self, _account_id: Option<&AccountId>) -> Result<u64> {
            self.record("refresh".to_string())?;
            Ok(self.new_count.load(Ordering::SeqCst))
        }
    }

    struct ChannelObserver(mpsc::UnboundedSender<(Scope, u32, RefreshOutcome)>);

    impl RefreshObserver for ChannelObserver {
        fn refresh_finished(&self, scope: &Scope, page: u32, outcome: &RefreshOutcome) {
            let _ = self.0.send((scope.clone(), page, outcome.clone()));
        }
    }

    fn inbox(account: &str, count: usize) -> Vec<Email> {
        (0..count)
            .map(|i| email(&format!("{account}-{i}"), account))
            .collect()
    }

    async fn service(api: Arc<FakeApi>) -> EmailService {
        let cache = CacheStore::in_memory(CacheConfig::default()).await.unwrap();
        EmailService::new(
            api,
            Arc::new(cache),
            SettingsHandle::new(AppSettings::default()),
        )
    }

    #[tokio::test]
    async fn test_miss_fetches_then_hit_serves_cache() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 25)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = service(api.clone())
            .await
            .with_observer(Arc::new(ChannelObserver(tx)));
        let scope = Scope::account("acct-1");

        let first = service.list_page(&scope, 1, 20, None).await.unwrap();
        assert_eq!(first.source, PageSource::Remote);
        assert_eq!(first.emails.len(), 20);
        assert_eq!(first.pagination.total_pages, 2);

        let second = service.list_page(&scope, 1, 20, None).await.unwrap();
        assert_eq!(second.source, PageSource::Cache);
        assert_eq!(second.emails, first.emails);
        assert_eq!(second.pagination, first.pagination);

        let (refreshed_scope, page, outcome) = rx.recv().await.unwrap();
        assert_eq!(refreshed_scope, scope);
        assert_eq!(page, 1);
        assert_eq!(outcome, RefreshOutcome::Updated { emails: 20 });
        assert_eq!(api.count("list"), 2);
    }

    #[tokio::test]
    async fn test_background_refresh_overwrites_cache() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 3)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = service(api.clone())
            .await
            .with_observer(Arc::new(ChannelObserver(tx)));
        let scope = Scope::account("acct-1");

        service.list_page(&scope, 1, 20, None).await.unwrap();
        api.update("acct-1-0", |e| e.subject = "Changed upstream".to_string());

        let stale = service.list_page(&scope, 1, 20, None).await.unwrap();
        assert_eq!(stale.emails[0].subject, "Subject acct-1-0");
        rx.recv().await.unwrap();

        let cached = service.cache().get_page(&scope, 1).await.unwrap();
        assert_eq!(cached.emails[0].subject, "Changed upstream");
    }

    #[tokio::test]
    async fn test_failed_background_refresh_is_not_surfaced() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 3)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = service(api.clone())
            .await
            .with_observer(Arc::new(ChannelObserver(tx)));
        let scope = Scope::account("acct-1");

        service.list_page(&scope, 1, 20, None).await.unwrap();
        api.fail.store(true, Ordering::SeqCst);

        let view = service.list_page(&scope, 1, 20, None).await.unwrap();
        assert_eq!(view.source, PageSource::Cache);
        assert_eq!(view.emails.len(), 3);

        let (_, _, outcome) = rx.recv().await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::RemoteFailed(_)));
    }

    #[tokio::test]
    async fn test_remote_failure_on_miss_propagates() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 3)));
        api.fail.store(true, Ordering::SeqCst);
        let service = service(api).await;

        let result = service.list_page(&Scope::AllAccounts, 1, 20, None).await;
        assert!(matches!(result, Err(Error::Api(_))));
    }

    #[tokio::test]
    async fn test_disabled_cache_is_bypassed() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 3)));
        let service = service(api.clone()).await;
        service.settings.set_cache_enabled(false).await;
        let scope = Scope::account("acct-1");

        service.list_page(&scope, 1, 20, None).await.unwrap();
        let view = service.list_page(&scope, 1, 20, None).await.unwrap();
        service.get_email(&scope, "acct-1-0").await.unwrap();

        assert_eq!(view.source, PageSource::Remote);
        assert_eq!(api.count("list"), 2);
        assert_eq!(service.cache().stats().await.total_emails, 0);
    }

    #[tokio::test]
    async fn test_search_is_never_cached() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 3)));
        let service = service(api.clone()).await;

        let view = service
            .list_page(&Scope::AllAccounts, 1, 20, Some("acct-1-2"))
            .await
            .unwrap();
        assert_eq!(view.emails.len(), 1);
        assert!(
            service
                .cache()
                .get_page(&Scope::AllAccounts, 1)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_unavailable_cache_falls_through_to_remote() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 3)));
        let service = EmailService::new(
            api.clone(),
            Arc::new(CacheStore::unavailable(CacheConfig::default())),
            SettingsHandle::default(),
        );
        let scope = Scope::account("acct-1");

        for _ in 0..2 {
            let view = service.list_page(&scope, 1, 20, None).await.unwrap();
            assert_eq!(view.source, PageSource::Remote);
        }
        service.mark_starred("acct-1-0", true).await.unwrap();
        assert_eq!(api.count("list"), 2);
    }

    #[tokio::test]
    async fn test_get_email_uses_cached_detail() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 2)));
        let service = service(api.clone()).await;
        let scope = Scope::account("acct-1");

        service.get_email(&scope, "acct-1-1").await.unwrap();
        service.get_email(&scope, "acct-1-1").await.unwrap();
        assert_eq!(api.count("get"), 1);
    }

    #[tokio::test]
    async fn test_open_email_marks_read_remotely_and_locally() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 2)));
        let service = service(api.clone()).await;
        let scope = Scope::account("acct-1");

        let opened = service.open_email(&scope, "acct-1-0").await.unwrap();
        assert!(opened.is_read);
        assert_eq!(api.calls(), ["get acct-1-0", "read acct-1-0"]);
        assert!(service.cache().get_detail("acct-1-0").await.unwrap().is_read);

        // Already read: no second mutation.
        service.open_email(&scope, "acct-1-0").await.unwrap();
        assert_eq!(api.count("read"), 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_cache_untouched() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 2)));
        let service = service(api.clone()).await;
        let scope = Scope::account("acct-1");
        service.list_page(&scope, 1, 20, None).await.unwrap();

        api.fail.store(true, Ordering::SeqCst);
        assert!(service.mark_starred("acct-1-0", true).await.is_err());
        assert!(service.delete("acct-1-1").await.is_err());

        let cached = service.cache().get_page(&scope, 1).await.unwrap();
        assert_eq!(cached.emails.len(), 2);
        assert!(!cached.emails[0].is_starred);
    }

    #[tokio::test]
    async fn test_mutations_patch_cache_after_remote() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 4)));
        let service = service(api.clone()).await;
        let scope = Scope::account("acct-1");
        service.list_page(&scope, 1, 20, None).await.unwrap();

        service.mark_starred("acct-1-0", true).await.unwrap();
        service
            .batch_mark_read(&["acct-1-0".to_string(), "acct-1-1".to_string()], true)
            .await
            .unwrap();
        service.delete("acct-1-2").await.unwrap();
        service.batch_delete(&["acct-1-3".to_string()]).await.unwrap();

        let cached = service.cache().get_page(&scope, 1).await.unwrap();
        let summary: Vec<(&str, bool, bool)> = cached
            .emails
            .iter()
            .map(|e| (e.id.as_str(), e.is_read, e.is_starred))
            .collect();
        assert_eq!(
            summary,
            [("acct-1-0", true, true), ("acct-1-1", true, false)]
        );
    }

    #[tokio::test]
    async fn test_refresh_with_new_mail_drops_cached_pages() {
        let api = Arc::new(FakeApi::with_emails(inbox("acct-1", 2)));
        let service = service(api.clone()).await;
        let account = AccountId::new("acct-1");
        let scope = Scope::Account(account.clone());
        service.list_page(&scope, 1, 20, None).await.unwrap();
        service
            .list_page(&Scope::AllAccounts, 1, 20, None)
            .await
            .unwrap();

        assert_eq!(service.refresh_account(Some(&account)).await.unwrap(), 0);
        assert!(service.cache().get_page(&scope, 1).await.is_some());

        api.new_count.store(3, Ordering::SeqCst);
        assert_eq!(service.refresh_account(Some(&account)).await.unwrap(), 3);
        assert!(service.cache().get_page(&scope, 1).await.is_none());
        assert!(
            service
                .cache()
                .get_page(&Scope::AllAccounts, 1)
                .await
                .is_none()
        );
    }

    #[test]
    fn test_list_query_from_scope() {
        let query = list_query(&Scope::account("a1"), 2, 20, Some("  "));
        assert_eq!(query.account_id, Some(AccountId::new("a1")));
        assert_eq!(query.search, None);

        let query = list_query(&Scope::AllAccounts, 1, 20, Some(" invoice "));
        assert_eq!(query.account_id, None);
        assert_eq!(query.search.as_deref(), Some("invoice"));
    }
}
