//! Durable storage for archived sessions.
//!
//! Persistence is best-effort: a failing backend degrades the widget to
//! in-memory history, it never interrupts the conversation. Callers log
//! save/load failures and move on.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::chat::ChatSession;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("In-memory store lock poisoned")]
    LockPoisoned,
}

/// Durable key-value storage for session snapshots. The host supplies
/// one; `save` replaces the full archive each time.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn save(&self, sessions: &[ChatSession]) -> Result<(), PersistenceError>;
    async fn load(&self) -> Result<Vec<ChatSession>, PersistenceError>;
}

/// In-memory backend; the default when the host registers nothing, and
/// the backend used by tests.
pub struct MemoryBackend {
    sessions: std::sync::RwLock<Vec<ChatSession>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            sessions: std::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn save(&self, sessions: &[ChatSession]) -> Result<(), PersistenceError> {
        let mut store = self
            .sessions
            .write()
            .map_err(|_| PersistenceError::LockPoisoned)?;
        *store = sessions.to_vec();
        Ok(())
    }

    async fn load(&self) -> Result<Vec<ChatSession>, PersistenceError> {
        let store = self
            .sessions
            .read()
            .map_err(|_| PersistenceError::LockPoisoned)?;
        Ok(store.clone())
    }
}

/// File-backed backend storing the archive as one JSON document.
///
/// Writes go to a temp file first and are renamed into place, so a crash
/// mid-save leaves the previous archive intact.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[async_trait]
impl PersistenceBackend for JsonFileBackend {
    async fn save(&self, sessions: &[ChatSession]) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(sessions)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = sessions.len(), "saved sessions");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<ChatSession>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };
        let mut sessions: Vec<ChatSession> = serde_json::from_slice(&bytes)?;
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        debug!(path = %self.path.display(), count = sessions.len(), "loaded sessions");
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatMessage, SessionId};

    fn session(title: &str, updated_at: i64) -> ChatSession {
        ChatSession {
            id: SessionId::new(),
            title: title.to_string(),
            preview: String::new(),
            messages: vec![ChatMessage::user("hello")],
            created_at: 0,
            updated_at,
        }
    }

    #[tokio::test]
    async fn memory_backend_round_trips() {
        let backend = MemoryBackend::new();
        let sessions = vec![session("a", 1), session("b", 2)];

        backend.save(&sessions).await.unwrap();
        assert_eq!(backend.load().await.unwrap(), sessions);
    }

    #[tokio::test]
    async fn file_backend_round_trips_and_sorts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("sessions.json"));

        let older = session("older", 10);
        let newer = session("newer", 20);
        backend.save(&[older.clone(), newer.clone()]).await.unwrap();

        let loaded = backend.load().await.unwrap();
        assert_eq!(loaded, vec![newer, older]);
    }

    #[tokio::test]
    async fn file_backend_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("nope.json"));
        assert!(backend.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_backend_save_replaces_previous_archive() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("sessions.json"));

        backend.save(&[session("first", 1)]).await.unwrap();
        let replacement = vec![session("second", 2)];
        backend.save(&replacement).await.unwrap();

        assert_eq!(backend.load().await.unwrap(), replacement);
    }
}
