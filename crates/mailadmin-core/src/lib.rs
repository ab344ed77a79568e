//! # mailadmin-core
//!
//! Client-side core for the `MailAdmin` email administration application.
//!
//! This crate provides:
//! - Email domain models shared with the backend REST API
//! - **Offline Cache** - scope-partitioned, expiring cache of email pages and details
//! - Remote API client for the backend email endpoints
//! - Email service implementing stale-while-revalidate reads and consistent mutations
//! - Persisted application settings

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod email;
mod error;
pub mod remote;
pub mod service;
pub mod settings;

pub use cache::{
    CacheConfig, CacheSnapshot, CacheStats, CacheStore, CachedEmail, CachedPage, Clock,
    EvictionCounts, ManualClock, PageMetadata, Scope, SystemClock, WriteOutcome,
};
pub use email::{
    AccountId, Attachment, Email, EmailAddress, InlineImage, Paginated, Pagination, StatusPatch,
};
pub use error::{Error, Result};
pub use remote::{EmailApi, HttpEmailApi, ListQuery};
pub use service::{EmailService, PageSource, PageView, RefreshObserver, RefreshOutcome};
pub use settings::{AppSettings, SettingsHandle};
