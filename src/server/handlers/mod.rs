//! HTTP request handlers for the web server.

mod api;
mod extract;

// Re-export handlers for use by the router
pub use api::{health, root};
pub use extract::{extract, status_for, ApiError, ExtractParams};
