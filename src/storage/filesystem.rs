//! Filesystem storage backend
//!
//! Each session is one pretty-printed JSON document named `<session-id>.json`
//! in a base directory. Documents are written to a temporary sibling, synced
//! and renamed into place, so a crash mid-write never leaves a truncated
//! session behind.

use std::fs;
use std::io::{BufWriter, ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Result, VaultError};

use super::search::scan_sessions;
use super::types::{SearchResult, Session, SessionInfo};
use super::StorageBackend;

const SESSION_EXTENSION: &str = "json";

/// Write `bytes` to `<path>.tmp`, flush and fsync it
///
/// Returns the temporary path; [`commit_temp`] moves it into place.
pub(crate) fn write_temp(path: &Path, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written = fs::File::create(&tmp).and_then(|file| {
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(tmp)
}

/// Rename a synced temporary file over `path`
///
/// On Unix the parent directory is synced as well so the rename itself is
/// durable.
pub(crate) fn commit_temp(tmp: &Path, path: &Path) -> std::io::Result<()> {
    if let Err(e) = fs::rename(tmp, path) {
        let _ = fs::remove_file(tmp);
        return Err(e);
    }

    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
    }

    Ok(())
}

/// Write `bytes` to `path` atomically via a synced temporary sibling
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = write_temp(path, bytes)?;
    commit_temp(&tmp, path)
}

/// Storage backend keeping one JSON file per session
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    base_dir: PathBuf,
}

impl FileSystemStorage {
    /// Open (and create if needed) a session directory
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Io` if the directory cannot be created
    ///
    /// # Examples
    ///
    /// ```
    /// use sessionvault::storage::FileSystemStorage;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = FileSystemStorage::new(dir.path().join("sessions")).unwrap();
    /// assert!(storage.base_dir().exists());
    /// ```
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)
            .map_err(VaultError::from)
            .with_context(|| {
                format!("Failed to create session directory: {}", base_dir.display())
            })?;
        info!(base_dir = %base_dir.display(), "Opened filesystem session storage");
        Ok(Self { base_dir })
    }

    /// Directory holding the session documents
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the document for `id`
    pub fn session_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.{}", id, SESSION_EXTENSION))
    }

    fn checked_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty()
            || id == "."
            || id == ".."
            || id.contains(['/', '\\'])
            || id.contains('\0')
        {
            return Err(VaultError::Validation(format!("invalid session id: {:?}", id)).into());
        }
        Ok(self.session_path(id))
    }

    fn read_session(path: &Path) -> Result<Session> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == IoErrorKind::NotFound {
                anyhow::Error::from(VaultError::NotFound(format!("session file {}", path.display())))
            } else {
                anyhow::Error::from(VaultError::Io(e))
                    .context(format!("Failed to read {}", path.display()))
            }
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            VaultError::Corruption(format!("{}: {}", path.display(), e)).into()
        })
    }

    fn load_all(&self) -> Result<Vec<Session>> {
        let entries = fs::read_dir(&self.base_dir)
            .map_err(VaultError::from)
            .with_context(|| format!("Failed to list {}", self.base_dir.display()))?;

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().map(|e| e == SESSION_EXTENSION).unwrap_or(false) {
                match Self::read_session(&path) {
                    Ok(session) => sessions.push(session),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable session"),
                }
            }
        }

        sessions.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(sessions)
    }
}

impl StorageBackend for FileSystemStorage {
    fn kind(&self) -> &str {
        "filesystem"
    }

    fn save_session(&self, session: &mut Session) -> Result<()> {
        let path = self.checked_path(&session.id)?;
        let previous = session.updated;
        session.updated = Utc::now();

        let content = match serde_json::to_vec_pretty(session) {
            Ok(content) => content,
            Err(e) => {
                session.updated = previous;
                return Err(VaultError::from(e).into());
            }
        };
        if let Err(e) = write_atomic(&path, &content) {
            session.updated = previous;
            return Err(anyhow::Error::from(VaultError::Io(e))
                .context(format!("Failed to write session {}", session.id)));
        }

        debug!(session_id = %session.id, "Session saved");
        Ok(())
    }

    fn load_session(&self, id: &str) -> Result<Session> {
        let path = self.checked_path(id)?;
        Self::read_session(&path).with_context(|| format!("Failed to load session {}", id))
    }

    fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        Ok(self.load_all()?.iter().map(Session::info).collect())
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        let path = self.checked_path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(session_id = %id, "Session deleted");
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                Err(VaultError::NotFound(format!("session {}", id)).into())
            }
            Err(e) => Err(anyhow::Error::from(VaultError::Io(e))
                .context(format!("Failed to delete session {}", id))),
        }
    }

    fn session_exists(&self, id: &str) -> Result<bool> {
        Ok(self.checked_path(id)?.exists())
    }

    fn search_sessions(&self, query: &str) -> Result<Vec<SearchResult>> {
        Ok(scan_sessions(&self.load_all()?, query))
    }
}
