//! Test utilities for SessionVault
//!
//! Temporary directories, pre-populated sessions, error-kind assertions and
//! a filesystem-backed test configuration.

use crate::config::Config;
use crate::error::{ErrorKind, Result, VaultError};
use crate::storage::{Message, Session, StorageBackend};
use tempfile::TempDir;

/// Create a temporary directory for testing
///
/// # Returns
///
/// Returns a TempDir that will be cleaned up when dropped
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Save a session holding one user message per entry of `texts`
///
/// # Panics
///
/// Panics if the backend rejects the save
pub fn saved_session(backend: &dyn StorageBackend, name: &str, texts: &[&str]) -> Session {
    let mut session = backend.new_session(Some(name));
    for text in texts {
        session.add_message(Message::user(*text));
    }
    backend
        .save_session(&mut session)
        .expect("Failed to save test session");
    session
}

/// Assert that a result failed with the given error kind
///
/// # Panics
///
/// Panics if the result is Ok or carries a different kind
pub fn assert_kind<T: std::fmt::Debug>(result: Result<T>, expected: ErrorKind) {
    match result {
        Ok(value) => panic!("Expected {:?} error but got Ok({:?})", expected, value),
        Err(e) => assert_eq!(
            VaultError::kind_of(&e),
            Some(expected),
            "Error '{:#}' is not {:?}",
            e,
            expected
        ),
    }
}

/// Configuration storing everything under `dir`
///
/// Recovery runs every 50ms so timing tests stay short.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.options.insert(
        "base_dir".to_string(),
        dir.path().join("sessions").display().to_string(),
    );
    config.recovery.interval_ms = 50;
    config.recovery.recovery_file = Some(dir.path().join("recovery").join("state.json"));
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_saved_session_is_persisted() {
        let backend = MemoryStorage::new();
        let session = saved_session(&backend, "fixture", &["a", "b"]);
        assert_eq!(backend.load_session(&session.id).unwrap().messages().len(), 2);
    }

    #[test]
    fn test_assert_kind_matches() {
        let backend = MemoryStorage::new();
        assert_kind(backend.load_session("missing"), ErrorKind::NotFound);
    }

    #[test]
    #[should_panic(expected = "but got Ok")]
    fn test_assert_kind_ok_panics() {
        assert_kind(Ok(()), ErrorKind::NotFound);
    }

    #[test]
    fn test_test_config_is_valid() {
        let dir = temp_dir();
        let config = test_config(&dir);
        assert!(config.validate().is_ok());
        assert!(config.storage.options["base_dir"].ends_with("sessions"));
    }
}
