//! hivemind - multi-agent orchestration hub.
//!
//! Accepts natural-language tasks and executes them by spawning agent
//! worker processes under a bounded-concurrency fleet scheduler, each
//! optionally isolated in its own git worktree, while streaming every
//! lifecycle event through a typed bus into a durable SQLite store, an
//! HTTP query API, and a websocket feed.

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
pub mod system;

pub use system::System;
