//! Crash recovery
//!
//! [`AutoRecoveryManager`] periodically snapshots the active session from a
//! [`SessionContext`] into a recovery file kept apart from normal storage.
//! Before each write the previous snapshots are rotated into numbered
//! backups (`<file>.1` newest ... `<file>.N` oldest). After a crash,
//! [`AutoRecoveryManager::check_recovery`] finds the latest usable snapshot
//! and [`AutoRecoveryManager::recover_session`] restores it, preferring the
//! copy in primary storage when one exists.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RecoveryConfig;
use crate::context::SessionContext;
use crate::error::{ErrorKind, Result, VaultError};
use crate::storage::filesystem::{commit_temp, write_temp};
use crate::storage::{Conversation, Session, StorageManager};

/// Snapshot of the active session written to the recovery file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    pub session_id: String,
    #[serde(default)]
    pub session_name: Option<String>,
    pub conversation_data: Conversation,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub storage_backend: String,
}

impl RecoveryState {
    fn capture(session: &Session, storage_backend: &str) -> Self {
        Self {
            session_id: session.id.clone(),
            session_name: session.name.clone(),
            conversation_data: session.conversation.clone(),
            timestamp: Utc::now(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            storage_backend: storage_backend.to_string(),
        }
    }

    /// Whether this snapshot is older than `max_age`
    pub fn is_expired(&self, max_age: Duration) -> bool {
        match Utc::now().signed_duration_since(self.timestamp).to_std() {
            Ok(age) => age > max_age,
            // Timestamp in the future.
            Err(_) => false,
        }
    }
}

struct Inner {
    config: RecoveryConfig,
    path: PathBuf,
    storage: StorageManager,
    context: SessionContext,
    // Serializes the ticker and out-of-band saves.
    write_lock: Mutex<()>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background snapshotter and crash-state restorer
pub struct AutoRecoveryManager {
    inner: Arc<Inner>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for AutoRecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoRecoveryManager")
            .field("path", &self.inner.path)
            .field("enabled", &self.inner.config.enabled)
            .field("running", &self.is_running())
            .finish()
    }
}

fn backup_path(path: &Path, n: i32) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

impl Inner {
    fn save_snapshot(&self) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let Some(session) = self.context.snapshot() else {
            debug!("No active session; skipping recovery snapshot");
            return Ok(false);
        };

        let state = RecoveryState::capture(&session, self.storage.backend_kind());
        let bytes = serde_json::to_vec_pretty(&state).map_err(VaultError::from)?;

        // The new snapshot must be durable before the current file is rotated.
        let tmp = write_temp(&self.path, &bytes)
            .map_err(VaultError::from)
            .with_context(|| format!("Failed to write recovery file {}", self.path.display()))?;
        self.rotate_backups();
        commit_temp(&tmp, &self.path)
            .map_err(VaultError::from)
            .with_context(|| format!("Failed to replace recovery file {}", self.path.display()))?;

        debug!(session_id = %state.session_id, path = %self.path.display(), "Recovery snapshot saved");
        Ok(true)
    }

    /// Shift `.1..N-1` up by one, drop `.N`, move the current file to `.1`
    fn rotate_backups(&self) {
        let count = self.config.backup_count;
        if count <= 0 || !self.path.exists() {
            return;
        }

        let oldest = backup_path(&self.path, count);
        if let Err(e) = fs::remove_file(&oldest) {
            if e.kind() != IoErrorKind::NotFound {
                warn!(path = %oldest.display(), error = %e, "Failed to remove oldest recovery backup");
            }
        }

        for n in (1..count).rev() {
            let from = backup_path(&self.path, n);
            if !from.exists() {
                continue;
            }
            let to = backup_path(&self.path, n + 1);
            if let Err(e) = fs::rename(&from, &to) {
                warn!(from = %from.display(), to = %to.display(), error = %e, "Failed to rotate recovery backup");
            }
        }

        let first = backup_path(&self.path, 1);
        if let Err(e) = fs::rename(&self.path, &first) {
            warn!(path = %self.path.display(), error = %e, "Failed to rotate recovery file");
        }
    }

    fn read_state(path: &Path) -> Result<Option<RecoveryState>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::from(VaultError::Io(e))
                    .context(format!("Failed to read recovery file {}", path.display())))
            }
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| VaultError::Corruption(format!("{}: {}", path.display(), e)).into())
    }
}

impl AutoRecoveryManager {
    /// Create a manager writing to `config.recovery_path()`
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Io` if the recovery directory cannot be created
    pub fn new(
        config: RecoveryConfig,
        storage: StorageManager,
        context: SessionContext,
    ) -> Result<Self> {
        let path = config.recovery_path();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(VaultError::from)
                .with_context(|| format!("Failed to create recovery directory {}", dir.display()))?;
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                path,
                storage,
                context,
                write_lock: Mutex::new(()),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Path of the primary recovery file
    pub fn recovery_path(&self) -> &Path {
        &self.inner.path
    }

    /// Arm the periodic snapshot task
    ///
    /// Does nothing when recovery is disabled or the task already runs.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if !self.inner.config.enabled {
            info!("Auto-recovery disabled");
            return;
        }

        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("Auto-recovery already running");
            return;
        }

        let period = Duration::from_millis(self.inner.config.interval_ms.max(1));
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,

                    _ = ticker.tick() => {
                        let inner = Arc::clone(&inner);
                        match tokio::task::spawn_blocking(move || inner.save_snapshot()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => warn!(error = %e, "Recovery snapshot failed"),
                            Err(e) => warn!(error = %e, "Recovery snapshot task panicked"),
                        }
                    }
                }
            }
        });

        *worker = Some(Worker { cancel, handle });
        info!(interval_ms = self.inner.config.interval_ms, path = %self.inner.path.display(), "Auto-recovery started");
    }

    /// Stop the snapshot task and wait for it to exit
    ///
    /// When this returns no snapshot write is in flight.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(worker) = worker else {
            return;
        };
        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            warn!(error = %e, "Auto-recovery task ended abnormally");
        }
        info!("Auto-recovery stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Snapshot the active session now
    ///
    /// Returns `false` when recovery is disabled or no session is active.
    pub fn force_recovery_save(&self) -> Result<bool> {
        self.inner.save_snapshot()
    }

    /// Latest usable snapshot, if any
    ///
    /// If the primary file is missing or unparseable, the newest parseable
    /// backup is used instead. An expired snapshot yields `None`.
    pub fn check_recovery(&self) -> Result<Option<RecoveryState>> {
        let max_age = Duration::from_secs(self.inner.config.max_age_seconds);

        let state = match Inner::read_state(&self.inner.path) {
            Ok(Some(state)) => Some(state),
            Ok(None) => self.newest_valid_backup(),
            Err(e) if VaultError::kind_of(&e) == Some(ErrorKind::Corruption) => {
                warn!(path = %self.inner.path.display(), error = %e, "Recovery file corrupt; trying backups");
                self.newest_valid_backup()
            }
            Err(e) => return Err(e),
        };

        match state {
            Some(state) if state.is_expired(max_age) => {
                info!(session_id = %state.session_id, timestamp = %state.timestamp, "Recovery snapshot too old; ignoring");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn newest_valid_backup(&self) -> Option<RecoveryState> {
        (1..=self.inner.config.backup_count.max(0)).find_map(|n| {
            let path = backup_path(&self.inner.path, n);
            match Inner::read_state(&path) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable recovery backup");
                    None
                }
            }
        })
    }

    /// Restore the session described by `state`
    ///
    /// Primary storage wins when it still has the session. Otherwise the
    /// snapshot is rebuilt into a session and saved to primary storage.
    pub fn recover_session(&self, state: &RecoveryState) -> Result<Session> {
        let storage = &self.inner.storage;
        match storage.load_session(&state.session_id) {
            Ok(session) => {
                info!(session_id = %session.id, "Recovered session from storage");
                return Ok(session);
            }
            Err(e) if VaultError::kind_of(&e) == Some(ErrorKind::NotFound) => {}
            Err(e) => return Err(e),
        }

        let mut session = storage.new_session(state.session_name.as_deref());
        session.id = state.session_id.clone();
        session.conversation = state.conversation_data.clone();
        storage
            .save_session(&mut session)
            .with_context(|| format!("Failed to persist recovered session {}", session.id))?;

        info!(
            session_id = %session.id,
            messages = session.conversation.messages.len(),
            "Recovered session from snapshot"
        );
        Ok(session)
    }

    /// Remove the recovery file and its numbered backups
    pub fn clear_recovery(&self) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let backups = (1..=inner.config.backup_count.max(0)).map(|n| backup_path(&inner.path, n));
        for path in std::iter::once(inner.path.clone()).chain(backups) {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Recovery file cleared"),
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => {
                    return Err(anyhow::Error::from(VaultError::Io(e))
                        .context(format!("Failed to remove recovery file {}", path.display())))
                }
            }
        }
        Ok(())
    }
}

impl Drop for AutoRecoveryManager {
    fn drop(&mut self) {
        let worker = self.worker.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(worker) = worker.take() {
            worker.cancel.cancel();
        }
    }
}
