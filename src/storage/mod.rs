//! Session persistence
//!
//! [`StorageBackend`] is the contract every backend implements. Branching,
//! merging and export are provided once, as default methods built on the
//! five primitive operations, so backends only differ in how they store a
//! single session document. [`BackendRegistry`] maps configuration keys to
//! backend constructors and [`StorageManager`] is the facade the rest of the
//! application talks to.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::{ErrorKind, Result, VaultError};

pub mod branch;
pub mod export;
pub mod filesystem;
pub mod memory;
pub mod merge;
pub mod search;
pub mod sqlite;
pub mod types;

pub use export::ExportFormat;
pub use filesystem::FileSystemStorage;
pub use memory::MemoryStorage;
pub use merge::{MergeOptions, MergeResult, MergeType};
pub use sqlite::SqliteStorage;
pub use types::{
    Attachment, BranchTree, Conversation, MatchType, Message, Role, SearchMatch, SearchResult,
    Session, SessionInfo,
};

/// Persistence contract shared by every backend
///
/// Implementations must make `save_session` all-or-nothing for one session
/// and must keep `list_sessions` working when individual records are
/// unreadable (skip and log).
pub trait StorageBackend: Send + Sync {
    /// Registry key of this backend (`"filesystem"`, `"sqlite"`, ...)
    fn kind(&self) -> &str;

    /// Create or replace `session`, refreshing its `updated` timestamp
    fn save_session(&self, session: &mut Session) -> Result<()>;

    /// Load a session; `NotFound` if absent
    fn load_session(&self, id: &str) -> Result<Session>;

    /// Summaries of all sessions, most recently updated first
    fn list_sessions(&self) -> Result<Vec<SessionInfo>>;

    /// Delete a session; `NotFound` if absent
    fn delete_session(&self, id: &str) -> Result<()>;

    /// Search all sessions, grouped one result per session
    fn search_sessions(&self, query: &str) -> Result<Vec<SearchResult>>;

    /// A fresh, unsaved session with a generated id
    fn new_session(&self, name: Option<&str>) -> Session {
        Session::new(name)
    }

    fn session_exists(&self, id: &str) -> Result<bool> {
        match self.load_session(id) {
            Ok(_) => Ok(true),
            Err(e) if VaultError::kind_of(&e) == Some(ErrorKind::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether search currently uses a ranked full-text index
    fn has_indexed_search(&self) -> bool {
        false
    }

    /// Serialize a stored session to `sink`
    fn export_session(&self, id: &str, format: ExportFormat, sink: &mut dyn Write) -> Result<()> {
        let session = self.load_session(id)?;
        export::write_session(&session, format, sink)
            .with_context(|| format!("Failed to export session {} as {}", id, format))
    }

    /// See [`branch::create_branch`]
    fn create_branch(
        &self,
        parent: &mut Session,
        new_id: &str,
        name: &str,
        at_index: usize,
    ) -> Result<Session> {
        branch::create_branch(self, parent, new_id, name, at_index)
    }

    /// See [`branch::get_children`]
    fn get_children(&self, id: &str) -> Result<Vec<Session>> {
        branch::get_children(self, id)
    }

    /// See [`branch::get_branch_tree`]
    fn get_branch_tree(&self, root_id: &str) -> Result<BranchTree> {
        branch::get_branch_tree(self, root_id)
    }

    /// See [`merge::merge_sessions`]
    fn merge_sessions(
        &self,
        target_id: &str,
        source_id: &str,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        merge::merge_sessions(self, target_id, source_id, options)
    }

    /// See [`branch::repair_branch_links`]
    fn repair_branch_links(&self) -> Result<usize> {
        branch::repair_branch_links(self)
    }
}

/// Generic key-value options handed to a backend constructor
pub type BackendOptions = HashMap<String, String>;

type BackendConstructor =
    Box<dyn Fn(&BackendOptions) -> Result<Arc<dyn StorageBackend>> + Send + Sync>;

/// Maps backend keys to constructors
pub struct BackendRegistry {
    constructors: HashMap<String, BackendConstructor>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends())
            .finish()
    }
}

fn required_path(options: &BackendOptions, key: &str, backend: &str) -> Result<PathBuf> {
    options
        .get(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| {
            VaultError::Config(format!("{} backend requires the '{}' option", backend, key)).into()
        })
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry with the built-in `filesystem`, `sqlite` and `memory` backends
    ///
    /// # Examples
    ///
    /// ```
    /// use sessionvault::storage::BackendRegistry;
    ///
    /// let registry = BackendRegistry::with_defaults();
    /// assert_eq!(registry.backends(), vec!["filesystem", "memory", "sqlite"]);
    /// ```
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("filesystem", |options| {
            let base_dir = required_path(options, "base_dir", "filesystem")?;
            Ok(Arc::new(FileSystemStorage::new(base_dir)?) as Arc<dyn StorageBackend>)
        });
        registry.register("sqlite", |options| {
            let path = required_path(options, "path", "sqlite")?;
            let user_id = options
                .get("user_id")
                .map(String::as_str)
                .unwrap_or(sqlite::DEFAULT_USER_ID);
            Ok(Arc::new(SqliteStorage::open(path, user_id)?) as Arc<dyn StorageBackend>)
        });
        registry.register("memory", |_| {
            Ok(Arc::new(MemoryStorage::new()) as Arc<dyn StorageBackend>)
        });
        registry
    }

    /// Register (or replace) the constructor for `key`
    pub fn register<F>(&mut self, key: &str, constructor: F)
    where
        F: Fn(&BackendOptions) -> Result<Arc<dyn StorageBackend>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(key.to_string(), Box::new(constructor));
    }

    /// Registered keys, sorted
    pub fn backends(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Construct the backend registered under `key`
    ///
    /// # Errors
    ///
    /// `Unavailable` if nothing is registered under `key`, otherwise any
    /// error from the constructor
    pub fn create(&self, key: &str, options: &BackendOptions) -> Result<Arc<dyn StorageBackend>> {
        let constructor = self.constructors.get(key).ok_or_else(|| {
            VaultError::Unavailable(format!(
                "storage backend '{}' (available: {})",
                key,
                self.backends().join(", ")
            ))
        })?;
        constructor(options).with_context(|| format!("Failed to open {} storage", key))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Create a backend from the built-in registry
///
/// # Arguments
///
/// * `kind` - Backend key (`"filesystem"`, `"sqlite"` or `"memory"`)
/// * `options` - Backend options (`base_dir`, `path`, `user_id`)
///
/// # Errors
///
/// Returns `VaultError::Unavailable` for an unknown key
pub fn create_backend(kind: &str, options: &BackendOptions) -> Result<Arc<dyn StorageBackend>> {
    BackendRegistry::with_defaults().create(kind, options)
}

/// Application-facing storage facade
///
/// Cheap to clone; all clones share one backend.
#[derive(Clone)]
pub struct StorageManager {
    backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageManager")
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl StorageManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Open the backend named in `config`
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let backend = create_backend(&config.backend, &config.options)?;
        info!(backend = %backend.kind(), "Storage ready");
        Ok(Self::new(backend))
    }

    /// Key of the underlying backend
    pub fn backend_kind(&self) -> &str {
        self.backend.kind()
    }

    /// The underlying backend
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn new_session(&self, name: Option<&str>) -> Session {
        self.backend.new_session(name)
    }

    pub fn save_session(&self, session: &mut Session) -> Result<()> {
        self.backend
            .save_session(session)
            .with_context(|| format!("Failed to save session {}", session.id))
    }

    pub fn load_session(&self, id: &str) -> Result<Session> {
        debug!(session_id = %id, "Loading session");
        self.backend.load_session(id)
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        self.backend.list_sessions().context("Failed to list sessions")
    }

    pub fn delete_session(&self, id: &str) -> Result<()> {
        self.backend
            .delete_session(id)
            .with_context(|| format!("Failed to delete session {}", id))
    }

    pub fn session_exists(&self, id: &str) -> Result<bool> {
        self.backend.session_exists(id)
    }

    pub fn search_sessions(&self, query: &str) -> Result<Vec<SearchResult>> {
        let results = self
            .backend
            .search_sessions(query)
            .with_context(|| format!("Failed to search sessions for {:?}", query))?;
        debug!(query = %query, sessions = results.len(), "Search complete");
        Ok(results)
    }

    /// Export a session in the named format (`json`, `markdown`/`md`)
    ///
    /// An unsupported format fails with `Validation` before the session is
    /// read.
    pub fn export_session(&self, id: &str, format: &str, sink: &mut dyn Write) -> Result<()> {
        let format: ExportFormat = format.parse()?;
        self.backend.export_session(id, format, sink)
    }

    pub fn create_branch(
        &self,
        parent: &mut Session,
        new_id: &str,
        name: &str,
        at_index: usize,
    ) -> Result<Session> {
        self.backend.create_branch(parent, new_id, name, at_index)
    }

    pub fn get_children(&self, id: &str) -> Result<Vec<Session>> {
        self.backend
            .get_children(id)
            .with_context(|| format!("Failed to load children of {}", id))
    }

    pub fn get_branch_tree(&self, root_id: &str) -> Result<BranchTree> {
        self.backend
            .get_branch_tree(root_id)
            .with_context(|| format!("Failed to build branch tree for {}", root_id))
    }

    pub fn merge_sessions(
        &self,
        target_id: &str,
        source_id: &str,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        self.backend.merge_sessions(target_id, source_id, options)
    }

    pub fn repair_branch_links(&self) -> Result<usize> {
        self.backend
            .repair_branch_links()
            .context("Failed to repair branch links")
    }
}
