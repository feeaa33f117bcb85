//! Error types for SessionVault
//!
//! This module defines the error taxonomy shared by every storage backend,
//! the branch and merge engines, and the recovery manager, using `thiserror`
//! for ergonomic error handling.

use thiserror::Error;

/// Main error type for SessionVault operations
///
/// Operations return [`Result`], an `anyhow::Result`, so that context
/// (operation name, session id, path) can be layered on top. Callers that
/// need to branch on the kind of failure use
/// `err.downcast_ref::<VaultError>()` or [`VaultError::kind_of`].
#[derive(Error, Debug)]
pub enum VaultError {
    /// A session, backend type, or merge endpoint does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input was rejected before any state was touched
    #[error("Validation error: {0}")]
    Validation(String),

    /// Directory or file create/read/write failures
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted document could not be parsed
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// The requested backend is not registered or not compiled in
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database engine errors (SQLite operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Coarse classification of a [`VaultError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`VaultError::NotFound`]
    NotFound,
    /// See [`VaultError::Validation`]
    Validation,
    /// See [`VaultError::Io`]
    Io,
    /// See [`VaultError::Corruption`]
    Corruption,
    /// See [`VaultError::Unavailable`]
    Unavailable,
    /// Configuration, engine and serialization failures
    Other,
}

impl VaultError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::NotFound(_) => ErrorKind::NotFound,
            VaultError::Validation(_) => ErrorKind::Validation,
            VaultError::Io(_) => ErrorKind::Io,
            VaultError::Corruption(_) => ErrorKind::Corruption,
            VaultError::Unavailable(_) => ErrorKind::Unavailable,
            VaultError::Config(_)
            | VaultError::Storage(_)
            | VaultError::Serialization(_)
            | VaultError::Yaml(_) => ErrorKind::Other,
        }
    }

    /// Find the [`VaultError`] in an `anyhow` chain and classify it
    ///
    /// Context layers added with `anyhow::Context` are walked, so a
    /// `NotFound` wrapped in "Failed to load session abc" still reports
    /// [`ErrorKind::NotFound`]. Returns `None` when no `VaultError` is present.
    ///
    /// # Examples
    ///
    /// ```
    /// use anyhow::Context;
    /// use sessionvault::error::{ErrorKind, VaultError};
    ///
    /// let err: anyhow::Result<()> = Err(VaultError::NotFound("abc".into()).into());
    /// let err = err.context("Failed to load session abc").unwrap_err();
    /// assert_eq!(VaultError::kind_of(&err), Some(ErrorKind::NotFound));
    /// ```
    pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<VaultError>())
            .map(VaultError::kind)
    }
}

/// Result type alias for SessionVault operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
