//! HTTP adapters.

pub mod api;

pub use api::{ApiState, QueryApiConfig, QueryApiServer};
