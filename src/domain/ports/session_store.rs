//! Session store port - external persistence of workspace sessions.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Session;

/// Mapping from workspace name to conversation history. The core reads
/// a context snapshot and writes appended turns; durability is the
/// store's concern.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, workspace: &str) -> DomainResult<Option<Session>>;

    /// Persist the session, archiving the previous state.
    async fn save(&self, session: &Session) -> DomainResult<()>;

    async fn list_workspaces(&self) -> DomainResult<Vec<String>>;
}
