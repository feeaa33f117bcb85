use std::fs;
use std::sync::Arc;

use assert_cmd::Command;
use tempfile::TempDir;

use sessionvault::storage::{
    FileSystemStorage, MemoryStorage, Message, Session, SqliteStorage, StorageBackend,
};

/// One instance of every built-in backend, each with its own temp directory
#[allow(dead_code)]
pub fn all_backends() -> Vec<(Arc<dyn StorageBackend>, TempDir)> {
    let fs_dir = TempDir::new().expect("failed to create tempdir");
    let fs: Arc<dyn StorageBackend> = Arc::new(
        FileSystemStorage::new(fs_dir.path().join("sessions"))
            .expect("failed to create filesystem storage"),
    );

    let sql_dir = TempDir::new().expect("failed to create tempdir");
    let sql: Arc<dyn StorageBackend> = Arc::new(
        SqliteStorage::new_with_path(sql_dir.path().join("sessions.db"))
            .expect("failed to create sqlite storage with path"),
    );

    let mem_dir = TempDir::new().expect("failed to create tempdir");
    let mem: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());

    vec![(fs, fs_dir), (sql, sql_dir), (mem, mem_dir)]
}

/// Build and save a session with alternating user/assistant messages
#[allow(dead_code)]
pub fn seeded_session(backend: &dyn StorageBackend, name: &str, texts: &[&str]) -> Session {
    let mut session = backend.new_session(Some(name));
    for (i, text) in texts.iter().enumerate() {
        let message = if i % 2 == 0 {
            Message::user(*text)
        } else {
            Message::assistant(*text)
        };
        session.add_message(message);
    }
    backend
        .save_session(&mut session)
        .expect("failed to save seeded session");
    session
}

#[allow(dead_code)]
pub fn contents(session: &Session) -> Vec<String> {
    session
        .messages()
        .iter()
        .map(|m| m.content.clone())
        .collect()
}

/// The binary, isolated from the caller's environment and pointed at `dir`
///
/// Sessions go to `<dir>/sessions` and the recovery file to
/// `<dir>/recovery/state.json`.
#[allow(dead_code, deprecated)]
pub fn vault_cmd(dir: &TempDir) -> Command {
    let config_path = dir.path().join("config.yaml");
    if !config_path.exists() {
        let yaml = format!(
            "storage:\n  options:\n    base_dir: '{}'\nrecovery:\n  recovery_file: '{}'\n",
            dir.path().join("sessions").display(),
            dir.path().join("recovery").join("state.json").display()
        );
        fs::write(&config_path, yaml).expect("failed to write config file");
    }

    let mut cmd = Command::cargo_bin("sessionvault").expect("binary should build");
    for var in [
        "SESSIONVAULT_BACKEND",
        "SESSIONVAULT_DATA_DIR",
        "SESSIONVAULT_DB_PATH",
        "SESSIONVAULT_USER_ID",
        "SESSIONVAULT_RECOVERY_ENABLED",
        "SESSIONVAULT_RECOVERY_INTERVAL_MS",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("NO_COLOR", "1").arg("--config").arg(&config_path);
    cmd
}

/// Filesystem storage reading the same directory as [`vault_cmd`]
#[allow(dead_code)]
pub fn cli_storage(dir: &TempDir) -> FileSystemStorage {
    FileSystemStorage::new(dir.path().join("sessions")).expect("failed to open cli storage")
}
