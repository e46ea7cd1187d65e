//! Adapters: concrete implementations of the domain ports and the
//! outward-facing surfaces.

pub mod drivers;
pub mod fs;
pub mod http;
pub mod sqlite;
