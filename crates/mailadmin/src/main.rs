//! `mailadmin` - inspection tool for the `MailAdmin` offline email cache.
//!
//! Opens the cache database used by the application and prints or prunes its
//! contents. `list` and `refresh` go through the backend configured in the
//! settings file, populating the cache the same way the application does.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailadmin_core::{
    AccountId, AppSettings, CacheStore, EmailService, HttpEmailApi, PageSource, RefreshObserver,
    RefreshOutcome, Scope, SettingsHandle,
};

/// How long `list` waits for the background refresh of a cached page.
const REFRESH_WAIT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "mailadmin",
    about = "Inspect and prune the MailAdmin offline email cache"
)]
struct Args {
    /// Cache database file (defaults to the application's data directory).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Settings file providing the backend URL, page size and cache lifetimes.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Bearer token for backend requests.
    #[arg(long)]
    token: Option<String>,

    /// Bypass the cache for `list`.
    #[arg(long)]
    no_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print counters and approximate size.
    Stats,
    /// Print every cached row as JSON.
    Dump,
    /// Remove expired emails and pages.
    Sweep,
    /// Remove everything.
    Clear,
    /// Remove one scope: `all` for the aggregated inbox, otherwise an account ID.
    ClearScope {
        /// Scope to clear.
        scope: String,
    },
    /// List one page of emails, from the cache when fresh.
    List {
        /// `all` for the aggregated inbox, otherwise an account ID.
        #[arg(default_value = "all")]
        scope: String,
        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Search text; searches are never cached.
        #[arg(long)]
        search: Option<String>,
    },
    /// Ask the backend to pull new mail, dropping affected cached pages.
    Refresh {
        /// Account to refresh; all accounts when omitted.
        account: Option<String>,
    },
}

/// Forwards background refresh outcomes to the waiting command.
struct ChannelObserver(mpsc::UnboundedSender<RefreshOutcome>);

impl RefreshObserver for ChannelObserver {
    fn refresh_finished(&self, _scope: &Scope, _page: u32, outcome: &RefreshOutcome) {
        let _ = self.0.send(outcome.clone());
    }
}

fn parse_scope(raw: &str) -> Scope {
    if raw == "all" {
        Scope::AllAccounts
    } else {
        Scope::account(raw)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailadmin=info,mailadmin_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let settings_path = args.settings.unwrap_or_else(AppSettings::default_path);
    let settings = AppSettings::load(&settings_path)
        .await
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;
    let config = settings.cache_config()?;

    let db_path = args.db.unwrap_or_else(CacheStore::default_path);
    let store = CacheStore::open(&db_path, config)
        .await
        .with_context(|| format!("failed to open cache at {}", db_path.display()))?;
    info!("Using cache at {}", db_path.display());
    let store = Arc::new(store);

    match args.command {
        Command::Stats => {
            let stats = store.try_stats().await?;
            print!("{stats}");
        }
        Command::Dump => {
            let snapshot = store.try_snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Sweep => {
            let counts = store.try_sweep_expired().await?;
            println!(
                "removed {} expired emails and {} expired pages",
                counts.emails, counts.pages
            );
        }
        Command::Clear => {
            let counts = store.try_clear_all().await?;
            println!("removed {} emails and {} pages", counts.emails, counts.pages);
        }
        Command::ClearScope { scope } => {
            let scope = parse_scope(&scope);
            let counts = store.try_clear_scope(&scope).await?;
            println!(
                "removed {} emails and {} pages from {scope}",
                counts.emails, counts.pages
            );
        }
        Command::List {
            scope,
            page,
            search,
        } => {
            let page_size = settings.page_size;
            let handle = SettingsHandle::new(settings.clone());
            if args.no_cache {
                handle.set_cache_enabled(false).await;
            }
            let (tx, mut rx) = mpsc::unbounded_channel();
            let service = build_service(&settings, args.token, Arc::clone(&store), handle)?
                .with_observer(Arc::new(ChannelObserver(tx)));

            let scope = parse_scope(&scope);
            let view = service
                .list_page(&scope, page, page_size, search.as_deref())
                .await?;

            for email in &view.emails {
                let marker = if email.is_read { ' ' } else { '*' };
                println!("{marker} {}  {}  {}", email.date, email.from, email.subject);
            }
            let pagination = view.pagination;
            println!(
                "page {} of {} ({} emails{}) from {}",
                pagination.page,
                pagination.total_pages,
                pagination.total,
                if pagination.has_more() { ", more available" } else { "" },
                match view.source {
                    PageSource::Cache => "cache",
                    PageSource::Remote => "backend",
                }
            );

            if view.source == PageSource::Cache {
                match tokio::time::timeout(REFRESH_WAIT, rx.recv()).await {
                    Ok(Some(outcome)) => info!("Background refresh finished: {outcome:?}"),
                    Ok(None) | Err(_) => warn!("Background refresh did not finish"),
                }
            }
        }
        Command::Refresh { account } => {
            let handle = SettingsHandle::new(settings.clone());
            let service = build_service(&settings, args.token, Arc::clone(&store), handle)?;
            let account = account.map(AccountId::new);
            let new_count = service.refresh_account(account.as_ref()).await?;
            println!("{new_count} new emails");
        }
    }

    store.close().await;
    Ok(())
}

fn build_service(
    settings: &AppSettings,
    token: Option<String>,
    store: Arc<CacheStore>,
    handle: SettingsHandle,
) -> anyhow::Result<EmailService> {
    let mut api = HttpEmailApi::new(settings.api_base_url.clone())
        .with_context(|| format!("failed to build client for {}", settings.api_base_url))?;
    if let Some(token) = token {
        api = api.with_token(token);
    }
    Ok(EmailService::new(Arc::new(api), store, handle))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scope() {
        assert_eq!(parse_scope("all"), Scope::AllAccounts);
        assert_eq!(parse_scope("acct-7"), Scope::account("acct-7"));
    }

    #[test]
    fn test_args_parse_clear_scope() {
        let args = Args::parse_from(["mailadmin", "--db", "/tmp/cache.db", "clear-scope", "all"]);
        assert_eq!(args.db, Some(PathBuf::from("/tmp/cache.db")));
        assert!(matches!(args.command, Command::ClearScope { scope } if scope == "all"));
    }

    #[test]
    fn test_args_parse_list_defaults() {
        let args = Args::parse_from(["mailadmin", "--no-cache", "list"]);
        assert!(args.no_cache);
        match args.command {
            Command::List {
                scope,
                page,
                search,
            } => {
                assert_eq!(scope, "all");
                assert_eq!(page, 1);
                assert!(search.is_none());
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_build_service_from_settings() {
        let settings = AppSettings::default();
        let store = Arc::new(CacheStore::unavailable(settings.cache_config().unwrap()));
        let service = build_service(
            &settings,
            Some("secret".to_string()),
            store,
            SettingsHandle::new(settings.clone()),
        );
        assert!(service.is_ok());
    }
}
