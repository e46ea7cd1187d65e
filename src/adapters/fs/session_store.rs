//! JSON-file session store.
//!
//! Sessions live at `<root>/<workspace>/session.json`; every save also
//! writes a timestamped archive under `<root>/<workspace>/history/`.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use tracing::debug;

use crate::domain::errors::DomainResult;
use crate::domain::models::Session;
use crate::domain::ports::SessionStore;

pub struct JsonSessionStore {
    root: PathBuf,
}

impl JsonSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_file(&self, workspace: &str) -> PathBuf {
        self.root.join(workspace).join("session.json")
    }
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn load(&self, workspace: &str) -> DomainResult<Option<Session>> {
        let path = self.session_file(workspace);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        let session = serde_json::from_str(&raw)?;
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> DomainResult<()> {
        let dir = self.root.join(&session.workspace);
        let history = dir.join("history");
        tokio::fs::create_dir_all(&history).await?;

        let raw = serde_json::to_string_pretty(session)?;
        tokio::fs::write(self.session_file(&session.workspace), &raw).await?;

        let archive = history.join(format!("{}.json", Utc::now().format("%Y-%m-%d_%H-%M")));
        tokio::fs::write(&archive, &raw).await?;

        debug!(workspace = %session.workspace, "saved session");
        Ok(())
    }

    async fn list_workspaces(&self) -> DomainResult<Vec<String>> {
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }
        let mut workspaces = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                workspaces.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        workspaces.sort();
        Ok(workspaces)
    }
}
