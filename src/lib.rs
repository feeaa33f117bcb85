//! SessionVault - persistent conversation session store
//!
//! This library persists chat "sessions" and provides the operations built
//! on top of them: branching, merging, search, export and crash recovery.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `storage`: the `StorageBackend` contract, filesystem/SQLite/in-memory
//!   backends, the backend registry and the `StorageManager` facade
//! - `context`: the shared "active session" holder
//! - `recovery`: periodic snapshotting and crash-state restore
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface definition and handlers
//!
//! # Example
//!
//! ```no_run
//! use sessionvault::storage::{Message, StorageManager};
//! use sessionvault::Config;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let storage = StorageManager::from_config(&config.storage)?;
//!     let mut session = storage.new_session(Some("notes"));
//!     session.add_message(Message::user("hello"));
//!     storage.save_session(&mut session)?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod recovery;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use context::SessionContext;
pub use error::{ErrorKind, Result, VaultError};
pub use recovery::{AutoRecoveryManager, RecoveryState};
pub use storage::{Session, StorageBackend, StorageManager};

#[cfg(test)]
pub mod test_utils;
