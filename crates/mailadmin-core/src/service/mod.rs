//! Services built on top of the cache and the remote API.
//!
//! This module provides the state layer the application's views talk to.

pub mod email;

pub use email::{EmailService, PageSource, PageView, RefreshObserver, RefreshOutcome};
