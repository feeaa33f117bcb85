//! In-memory storage backend
//!
//! Keeps sessions in a map behind a lock. Nothing survives the process; used
//! by tests and as a scratch backend.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::error::{Result, VaultError};

use super::search::scan_sessions;
use super::types::{SearchResult, Session, SessionInfo};
use super::StorageBackend;

/// Storage backend holding sessions in process memory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    fn sorted(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.read().values().cloned().collect();
        sessions.sort_by(|a, b| b.updated.cmp(&a.updated));
        sessions
    }
}

impl StorageBackend for MemoryStorage {
    fn kind(&self) -> &str {
        "memory"
    }

    fn save_session(&self, session: &mut Session) -> Result<()> {
        session.updated = Utc::now();
        self.write().insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn load_session(&self, id: &str) -> Result<Session> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("session {}", id)).into())
    }

    fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        Ok(self.sorted().iter().map(Session::info).collect())
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        match self.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(VaultError::NotFound(format!("session {}", id)).into()),
        }
    }

    fn search_sessions(&self, query: &str) -> Result<Vec<SearchResult>> {
        Ok(scan_sessions(&self.sorted(), query))
    }
}
