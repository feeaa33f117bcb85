//! Shared "active session" holder
//!
//! The command loop replaces or mutates the active session while the
//! recovery snapshotter reads it on every tick. Both go through this handle,
//! so a reader always observes a whole `Session`, never a half-updated one.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::Session;

/// Cloneable handle to the currently active session, if any
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that starts with `session` active
    pub fn with_session(session: Session) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(session))),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `session` the active session, returning the previous one
    pub fn set(&self, session: Session) -> Option<Session> {
        self.write().replace(session)
    }

    /// Drop the active session, returning it
    pub fn clear(&self) -> Option<Session> {
        self.write().take()
    }

    /// A copy of the active session
    pub fn snapshot(&self) -> Option<Session> {
        self.read().clone()
    }

    /// Id of the active session
    pub fn session_id(&self) -> Option<String> {
        self.read().as_ref().map(|s| s.id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.read().is_some()
    }

    /// Mutate the active session in place under the write lock
    ///
    /// Returns `None` without calling `f` when no session is active.
    pub fn update<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        self.write().as_mut().map(f)
    }
}
