//! Offline email cache.
//!
//! Shadows the server-paginated email listing in a local `SQLite` database so
//! pages and email details can be served immediately (and offline) while the
//! remote API is consulted in the background.
//!
//! Two tables back the cache: one pool of email records keyed by email ID and
//! shared by every scope, and one table of page metadata keyed by
//! `(scope, page)` holding the ordered member IDs of each fetched page. Both
//! expire independently.

mod clock;
mod diagnostics;
mod model;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use diagnostics::{CacheSnapshot, CacheStats};
pub use model::{
    CacheConfig, CachedEmail, CachedPage, EvictionCounts, PageMetadata, Scope, WriteOutcome,
};
pub use store::CacheStore;
