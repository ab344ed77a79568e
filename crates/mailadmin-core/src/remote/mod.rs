//! Remote email API consumed by the service layer.
//!
//! [`EmailApi`] is the seam between the cache-aware service and the backend;
//! [`HttpEmailApi`] talks to the backend REST endpoints.

mod api;
mod http;

pub use api::{EmailApi, ListQuery};
pub use http::{ApiResponse, HttpEmailApi};
