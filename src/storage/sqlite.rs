//! SQLite storage backend
//!
//! Sessions live in two tables partitioned by `user_id`: one row per session
//! and one row per message, ordered by an explicit `sequence` column. When the
//! engine supports FTS5 a trigram external-content index over
//! `messages.content` is kept in sync by triggers and used for ranked,
//! highlighted substring search.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, VaultError};

use super::search::{extract_snippet, find_case_insensitive, scan_session, MAX_MESSAGE_MATCHES};
use super::types::{
    Attachment, Conversation, MatchType, Message, Role, SearchMatch, SearchResult, Session,
    SessionInfo, ValueMap,
};
use super::StorageBackend;

/// User partition used when none is configured
pub const DEFAULT_USER_ID: &str = "default";

/// Highlight markers placed around indexed search hits
const HIGHLIGHT_OPEN: &str = "**";
const HIGHLIGHT_CLOSE: &str = "**";

/// Trigram index queries need at least this many characters
const MIN_INDEXED_QUERY_CHARS: usize = 3;

/// Conversation settings stored in `sessions.conversation`; messages have
/// their own table.
#[derive(Serialize)]
struct ConversationColumn<'a> {
    id: &'a str,
    system_prompt: &'a str,
    model: &'a str,
    provider: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct StoredConversation {
    id: String,
    #[serde(default)]
    system_prompt: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    provider: String,
    #[serde(default)]
    temperature: f32,
    #[serde(default)]
    max_tokens: u32,
}

/// Storage backend for sessions in a SQLite database
pub struct SqliteStorage {
    db_path: PathBuf,
    user_id: String,
}

fn storage_err(context: &str, e: rusqlite::Error) -> anyhow::Error {
    VaultError::Storage(format!("{}: {}", context, e)).into()
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| VaultError::Corruption(format!("bad {} timestamp {:?}: {}", column, raw, e)).into())
}

fn parse_json<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| VaultError::Corruption(format!("bad {} column: {}", column, e)).into())
}

/// Raw `sessions` row, decoded into a [`Session`] outside the rusqlite callback
#[derive(Clone)]
struct SessionRow {
    id: String,
    name: Option<String>,
    created: String,
    updated: String,
    metadata: String,
    conversation: String,
    config: String,
    tags: String,
    parent_id: Option<String>,
    child_ids: String,
    branch_name: Option<String>,
    branch_point: i64,
}

const SESSION_COLUMNS: &str = "id, name, created, updated, metadata, conversation, config, tags, \
     parent_id, child_ids, branch_name, branch_point";

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            created: row.get(2)?,
            updated: row.get(3)?,
            metadata: row.get(4)?,
            conversation: row.get(5)?,
            config: row.get(6)?,
            tags: row.get(7)?,
            parent_id: row.get(8)?,
            child_ids: row.get(9)?,
            branch_name: row.get(10)?,
            branch_point: row.get(11)?,
        })
    }

    fn into_session(self, messages: Vec<Message>) -> Result<Session> {
        let conversation: StoredConversation = parse_json("conversation", &self.conversation)?;
        Ok(Session {
            created: parse_time("created", &self.created)?,
            updated: parse_time("updated", &self.updated)?,
            metadata: parse_json("metadata", &self.metadata)?,
            config: parse_json("config", &self.config)?,
            tags: parse_json("tags", &self.tags)?,
            child_ids: parse_json("child_ids", &self.child_ids)?,
            conversation: Conversation {
                id: conversation.id,
                messages,
                system_prompt: conversation.system_prompt,
                model: conversation.model,
                provider: conversation.provider,
                temperature: conversation.temperature,
                max_tokens: conversation.max_tokens,
            },
            id: self.id,
            name: self.name,
            parent_id: self.parent_id,
            branch_name: self.branch_name,
            branch_point: usize::try_from(self.branch_point).unwrap_or(0),
        })
    }
}

/// Raw `messages` row
struct MessageRow {
    message_id: String,
    role: String,
    content: String,
    attachments: String,
    metadata: String,
    timestamp: String,
}

impl MessageRow {
    fn into_message(self) -> Result<Message> {
        let attachments: Vec<Attachment> = parse_json("attachments", &self.attachments)?;
        let metadata: ValueMap = parse_json("message metadata", &self.metadata)?;
        Ok(Message {
            id: self.message_id,
            role: self.role.parse::<Role>()?,
            content: self.content,
            timestamp: parse_time("message", &self.timestamp)?,
            attachments,
            metadata,
        })
    }
}

impl SqliteStorage {
    /// Open a database at `db_path` for the default user
    ///
    /// # Examples
    ///
    /// ```
    /// use sessionvault::storage::SqliteStorage;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = SqliteStorage::new_with_path(dir.path().join("sessions.db")).unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        Self::open(db_path, DEFAULT_USER_ID)
    }

    /// Open a database at `db_path`, scoping every query to `user_id`
    ///
    /// The parent directory is created if needed and the schema is
    /// initialized. The full-text index is created opportunistically; an
    /// engine without FTS5 simply falls back to pattern matching.
    pub fn open<P: Into<PathBuf>>(db_path: P, user_id: &str) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(VaultError::from)
                    .with_context(|| {
                        format!("Failed to create parent directory for {}", db_path.display())
                    })?;
            }
        }

        let user_id = if user_id.is_empty() {
            DEFAULT_USER_ID
        } else {
            user_id
        };
        let storage = Self {
            db_path,
            user_id: user_id.to_string(),
        };
        storage.init()?;
        info!(db_path = %storage.db_path.display(), user_id = %storage.user_id, "Opened SQLite session storage");
        Ok(storage)
    }

    /// Path of the database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// User partition this instance reads and writes
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| storage_err("Failed to open database", e))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| storage_err("Failed to enable foreign keys", e))?;
        Ok(conn)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT,
                created TEXT NOT NULL,
                updated TEXT NOT NULL,
                metadata JSON NOT NULL,
                conversation JSON NOT NULL,
                config JSON NOT NULL,
                tags JSON NOT NULL,
                parent_id TEXT,
                child_ids JSON NOT NULL,
                branch_name TEXT,
                branch_point INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_updated
                ON sessions(user_id, updated);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                attachments JSON NOT NULL,
                metadata JSON NOT NULL,
                timestamp TEXT NOT NULL,
                sequence INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session_sequence
                ON messages(session_id, sequence);",
        )
        .map_err(|e| storage_err("Failed to create tables", e))?;

        if let Err(e) = Self::create_fts(&conn) {
            debug!(error = %e, "Full-text index unavailable; search will use pattern matching");
        }

        Ok(())
    }

    fn create_fts(conn: &Connection) -> rusqlite::Result<()> {
        let existing: Option<String> = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type='table' AND name='messages_fts'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let rebuild = match existing {
            Some(sql) if sql.contains("trigram") => false,
            Some(_) => {
                info!("Replacing token index with trigram index");
                conn.execute_batch(
                    "DROP TRIGGER IF EXISTS messages_fts_insert;
                    DROP TRIGGER IF EXISTS messages_fts_delete;
                    DROP TRIGGER IF EXISTS messages_fts_update;
                    DROP TABLE messages_fts;",
                )?;
                true
            }
            None => false,
        };

        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
                content,
                content='messages',
                content_rowid='id',
                tokenize='trigram'
            );

            CREATE TRIGGER IF NOT EXISTS messages_fts_insert
            AFTER INSERT ON messages BEGIN
                INSERT INTO messages_fts(rowid, content) VALUES (NEW.id, NEW.content);
            END;

            CREATE TRIGGER IF NOT EXISTS messages_fts_delete
            AFTER DELETE ON messages BEGIN
                INSERT INTO messages_fts(messages_fts, rowid, content)
                VALUES ('delete', OLD.id, OLD.content);
            END;

            CREATE TRIGGER IF NOT EXISTS messages_fts_update
            AFTER UPDATE ON messages BEGIN
                INSERT INTO messages_fts(messages_fts, rowid, content)
                VALUES ('delete', OLD.id, OLD.content);
                INSERT INTO messages_fts(rowid, content) VALUES (NEW.id, NEW.content);
            END;",
        )?;

        if rebuild {
            conn.execute("INSERT INTO messages_fts(messages_fts) VALUES ('rebuild')", [])?;
        }
        Ok(())
    }

    /// Whether the FTS5 index exists right now
    fn fts_available(conn: &Connection) -> bool {
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='messages_fts'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(false)
    }

    fn load_messages(&self, conn: &Connection, session_id: &str) -> Result<Vec<Message>> {
        let mut stmt = conn
            .prepare(
                "SELECT message_id, role, content, attachments, metadata, timestamp
                FROM messages
                WHERE session_id = ? AND user_id = ?
                ORDER BY sequence ASC",
            )
            .map_err(|e| storage_err("Failed to prepare statement", e))?;

        let rows = stmt
            .query_map(params![session_id, self.user_id], |row| {
                Ok(MessageRow {
                    message_id: row.get(0)?,
                    role: row.get(1)?,
                    content: row.get(2)?,
                    attachments: row.get(3)?,
                    metadata: row.get(4)?,
                    timestamp: row.get(5)?,
                })
            })
            .map_err(|e| storage_err("Failed to query messages", e))?;

        let mut messages = Vec::new();
        for row in rows {
            let row = row.map_err(|e| storage_err("Failed to read message row", e))?;
            messages.push(row.into_message()?);
        }
        Ok(messages)
    }

    fn load_with(&self, conn: &Connection, id: &str) -> Result<Session> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions WHERE id = ? AND user_id = ?",
                    SESSION_COLUMNS
                ),
                params![id, self.user_id],
                SessionRow::from_row,
            )
            .optional()
            .map_err(|e| storage_err("Failed to query session", e))?
            .ok_or_else(|| VaultError::NotFound(format!("session {}", id)))?;

        let messages = self.load_messages(conn, id)?;
        row.into_session(messages)
    }

    fn session_rows(&self, conn: &Connection) -> Result<Vec<SessionRow>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM sessions WHERE user_id = ? ORDER BY updated DESC",
                SESSION_COLUMNS
            ))
            .map_err(|e| storage_err("Failed to prepare statement", e))?;
        let rows = stmt
            .query_map(params![self.user_id], SessionRow::from_row)
            .map_err(|e| storage_err("Failed to query sessions", e))?;

        let mut out = Vec::new();
        for row in rows {
            match row {
                Ok(row) => out.push(row),
                Err(e) => warn!(error = %e, "Skipping unreadable session row"),
            }
        }
        Ok(out)
    }

    /// Message hits from the trigram index, best rank first
    fn indexed_message_hits(&self, conn: &Connection, query: &str) -> Result<Vec<(String, SearchMatch)>> {
        let mut stmt = conn
            .prepare(
                "SELECT m.session_id, m.role, m.sequence, m.content,
                        highlight(messages_fts, 0, ?2, ?3) AS marked,
                        bm25(messages_fts) AS score
                FROM messages_fts
                JOIN messages m ON m.id = messages_fts.rowid
                WHERE messages_fts MATCH ?1 AND m.user_id = ?4
                ORDER BY score, m.sequence",
            )
            .map_err(|e| storage_err("Failed to prepare indexed search", e))?;

        let rows = stmt
            .query_map(
                params![escape_fts5_query(query), HIGHLIGHT_OPEN, HIGHLIGHT_CLOSE, self.user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .map_err(|e| storage_err("Failed to run indexed search", e))?;

        let mut hits = HitCollector::default();
        for row in rows {
            let (session_id, role, sequence, content, marked) =
                row.map_err(|e| storage_err("Failed to read search row", e))?;
            if hits.is_full(&session_id) {
                continue;
            }
            let Some((start, _)) = find_case_insensitive(&content, query) else {
                continue;
            };
            let marked_at = marked
                .find(HIGHLIGHT_OPEN)
                .map(|b| marked[..b].chars().count())
                .unwrap_or(0);
            let index = usize::try_from(sequence).unwrap_or(0);
            hits.push(
                session_id,
                SearchMatch {
                    match_type: MatchType::Message,
                    role: role.parse::<Role>().ok(),
                    content: highlight_window(&marked, marked_at),
                    context: format!("message {}", index + 1),
                    position: start,
                    message_index: Some(index),
                },
            );
        }
        Ok(hits.into_hits())
    }

    /// Message hits from `LIKE` pattern matching, most recent session first
    fn pattern_message_hits(&self, conn: &Connection, query: &str) -> Result<Vec<(String, SearchMatch)>> {
        let pattern = format!("%{}%", escape_like(query));
        let mut stmt = conn
            .prepare(
                "SELECT m.session_id, m.role, m.sequence, m.content
                FROM messages m
                JOIN sessions s ON s.id = m.session_id
                WHERE m.user_id = ?1 AND m.content LIKE ?2 ESCAPE '\\'
                ORDER BY s.updated DESC, m.session_id, m.sequence ASC",
            )
            .map_err(|e| storage_err("Failed to prepare pattern search", e))?;

        let rows = stmt
            .query_map(params![self.user_id, pattern], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| storage_err("Failed to run pattern search", e))?;

        let mut hits = HitCollector::default();
        for row in rows {
            let (session_id, role, sequence, content) =
                row.map_err(|e| storage_err("Failed to read search row", e))?;
            if hits.is_full(&session_id) {
                continue;
            }
            // LIKE folds ASCII only; confirm the hit with a full case fold.
            let Some((start, end)) = find_case_insensitive(&content, query) else {
                continue;
            };
            let index = usize::try_from(sequence).unwrap_or(0);
            hits.push(
                session_id,
                SearchMatch {
                    match_type: MatchType::Message,
                    role: role.parse::<Role>().ok(),
                    content: extract_snippet(&content, start, end),
                    context: format!("message {}", index + 1),
                    position: start,
                    message_index: Some(index),
                },
            );
        }
        Ok(hits.into_hits())
    }
}

/// Message hits in arrival order, capped per session
#[derive(Default)]
struct HitCollector {
    hits: Vec<(String, SearchMatch)>,
    per_session: HashMap<String, usize>,
}

impl HitCollector {
    fn is_full(&self, session_id: &str) -> bool {
        self.per_session
            .get(session_id)
            .is_some_and(|n| *n >= MAX_MESSAGE_MATCHES)
    }

    fn push(&mut self, session_id: String, hit: SearchMatch) {
        *self.per_session.entry(session_id.clone()).or_insert(0) += 1;
        self.hits.push((session_id, hit));
    }

    fn into_hits(self) -> Vec<(String, SearchMatch)> {
        self.hits
    }
}

/// Quote the whole query as one FTS5 string
///
/// With the trigram tokenizer a quoted string matches as a contiguous
/// substring.
fn escape_fts5_query(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

fn escape_like(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Trim a highlighted document to a window around its first highlight
fn highlight_window(marked: &str, position: usize) -> String {
    let first_close = marked
        .find(HIGHLIGHT_OPEN)
        .and_then(|b| {
            let after = b + HIGHLIGHT_OPEN.len();
            marked[after..].find(HIGHLIGHT_CLOSE).map(|e| after + e + HIGHLIGHT_CLOSE.len())
        })
        .map(|b| marked[..b].chars().count())
        .unwrap_or(position);
    extract_snippet(marked, position, first_close)
}

fn group_hits(results: &mut Vec<SearchResult>, hits: Vec<(String, SearchMatch)>, rows: &[SessionRow]) {
    for (session_id, hit) in hits {
        if let Some(existing) = results.iter_mut().find(|r| r.session_id == session_id) {
            existing.matches.push(hit);
            continue;
        }
        let Some(row) = rows.iter().find(|r| r.id == session_id) else {
            continue;
        };
        let updated = DateTime::parse_from_rfc3339(&row.updated)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        results.push(SearchResult {
            session_id,
            session_name: row.name.clone(),
            updated,
            matches: vec![hit],
        });
    }
}

impl StorageBackend for SqliteStorage {
    fn kind(&self) -> &str {
        "sqlite"
    }

    /// Upsert the session row and replace its messages in one transaction
    fn save_session(&self, session: &mut Session) -> Result<()> {
        let mut conn = self.connect()?;
        let updated = Utc::now();

        let conversation = &session.conversation;
        let conversation_json = serde_json::to_string(&ConversationColumn {
            id: &conversation.id,
            system_prompt: &conversation.system_prompt,
            model: &conversation.model,
            provider: &conversation.provider,
            temperature: conversation.temperature,
            max_tokens: conversation.max_tokens,
        })
        .map_err(VaultError::from)?;
        let metadata_json = serde_json::to_string(&session.metadata).map_err(VaultError::from)?;
        let config_json = serde_json::to_string(&session.config).map_err(VaultError::from)?;
        let tags_json = serde_json::to_string(&session.tags).map_err(VaultError::from)?;
        let children_json = serde_json::to_string(&session.child_ids).map_err(VaultError::from)?;

        let tx = conn
            .transaction()
            .map_err(|e| storage_err("Failed to start transaction", e))?;

        // Another user's row with the same id must not be overwritten.
        let owner: Option<String> = tx
            .query_row(
                "SELECT user_id FROM sessions WHERE id = ?",
                params![session.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| storage_err("Failed to check session owner", e))?;
        if owner.as_deref().is_some_and(|o| o != self.user_id) {
            return Err(VaultError::Validation(format!(
                "session {} belongs to another user",
                session.id
            ))
            .into());
        }

        tx.execute(
            "INSERT INTO sessions (id, user_id, name, created, updated, metadata, conversation,
                                   config, tags, parent_id, child_ids, branch_name, branch_point)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                updated = excluded.updated,
                metadata = excluded.metadata,
                conversation = excluded.conversation,
                config = excluded.config,
                tags = excluded.tags,
                parent_id = excluded.parent_id,
                child_ids = excluded.child_ids,
                branch_name = excluded.branch_name,
                branch_point = excluded.branch_point",
            params![
                session.id,
                self.user_id,
                session.name,
                format_time(&session.created),
                format_time(&updated),
                metadata_json,
                conversation_json,
                config_json,
                tags_json,
                session.parent_id,
                children_json,
                session.branch_name,
                session.branch_point as i64,
            ],
        )
        .map_err(|e| storage_err("Failed to upsert session", e))?;

        tx.execute(
            "DELETE FROM messages WHERE session_id = ? AND user_id = ?",
            params![session.id, self.user_id],
        )
        .map_err(|e| storage_err("Failed to clear messages", e))?;

        {
            let mut insert = tx
                .prepare(
                    "INSERT INTO messages (session_id, user_id, message_id, role, content,
                                           attachments, metadata, timestamp, sequence)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| storage_err("Failed to prepare message insert", e))?;

            for (sequence, message) in session.conversation.messages.iter().enumerate() {
                let attachments =
                    serde_json::to_string(&message.attachments).map_err(VaultError::from)?;
                let metadata = serde_json::to_string(&message.metadata).map_err(VaultError::from)?;
                insert
                    .execute(params![
                        session.id,
                        self.user_id,
                        message.id,
                        message.role.as_str(),
                        message.content,
                        attachments,
                        metadata,
                        format_time(&message.timestamp),
                        sequence as i64,
                    ])
                    .map_err(|e| storage_err("Failed to insert message", e))?;
            }
        }

        tx.commit()
            .map_err(|e| storage_err("Failed to commit transaction", e))?;

        session.updated = updated;
        debug!(session_id = %session.id, messages = session.conversation.messages.len(), "Session saved");
        Ok(())
    }

    fn load_session(&self, id: &str) -> Result<Session> {
        let conn = self.connect()?;
        self.load_with(&conn, id)
            .with_context(|| format!("Failed to load session {}", id))
    }

    fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let conn = self.connect()?;
        let mut counts = conn
            .prepare("SELECT COUNT(*) FROM messages WHERE session_id = ? AND user_id = ?")
            .map_err(|e| storage_err("Failed to prepare statement", e))?;

        let mut sessions = Vec::new();
        for row in self.session_rows(&conn)? {
            let id = row.id.clone();
            let message_count: i64 = counts
                .query_row(params![id, self.user_id], |r| r.get(0))
                .map_err(|e| storage_err("Failed to count messages", e))?;
            match row.into_session(Vec::new()) {
                Ok(session) => {
                    let mut info = session.info();
                    info.message_count = usize::try_from(message_count).unwrap_or(0);
                    sessions.push(info);
                }
                Err(e) => warn!(session_id = %id, error = %e, "Skipping unreadable session"),
            }
        }
        Ok(sessions)
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        let conn = self.connect()?;
        let deleted = conn
            .execute(
                "DELETE FROM sessions WHERE id = ? AND user_id = ?",
                params![id, self.user_id],
            )
            .map_err(|e| storage_err("Failed to delete session", e))?;
        if deleted == 0 {
            return Err(VaultError::NotFound(format!("session {}", id)).into());
        }
        info!(session_id = %id, "Session deleted");
        Ok(())
    }

    fn session_exists(&self, id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ? AND user_id = ?",
                params![id, self.user_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| storage_err("Failed to query session", e))?;
        Ok(found.is_some())
    }

    fn has_indexed_search(&self) -> bool {
        self.connect()
            .map(|conn| Self::fts_available(&conn))
            .unwrap_or(false)
    }

    /// Search names, tags and system prompts by substring, and messages via
    /// the FTS5 index when present or `LIKE` otherwise
    fn search_sessions(&self, query: &str) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.connect()?;
        let rows = self.session_rows(&conn)?;
        let indexed = Self::fts_available(&conn);

        let indexed = indexed && query.chars().count() >= MIN_INDEXED_QUERY_CHARS;
        let message_hits = if indexed {
            match self.indexed_message_hits(&conn, query) {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, "Indexed search failed; falling back to pattern matching");
                    self.pattern_message_hits(&conn, query)?
                }
            }
        } else {
            self.pattern_message_hits(&conn, query)?
        };
        debug!(query = %query, indexed, hits = message_hits.len(), "Searched messages");

        let mut results = Vec::new();
        group_hits(&mut results, message_hits, &rows);

        // Session-level fields are matched by substring in recency order.
        for row in &rows {
            let session = match row.clone().into_session(Vec::new()) {
                Ok(session) => session,
                Err(e) => {
                    warn!(session_id = %row.id, error = %e, "Skipping unreadable session");
                    continue;
                }
            };
            let Some(found) = scan_session(&session, query) else {
                continue;
            };
            match results.iter_mut().find(|r| r.session_id == session.id) {
                Some(existing) => {
                    let (prompt, rest): (Vec<_>, Vec<_>) = found
                        .matches
                        .into_iter()
                        .partition(|m| m.match_type == MatchType::SystemPrompt);
                    let mut matches = prompt;
                    matches.append(&mut existing.matches);
                    matches.extend(rest);
                    existing.matches = matches;
                }
                None => results.push(found),
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::thread::sleep;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Helper: create a temporary storage instance backed by a temp directory.
    ///
    /// Returns both the `SqliteStorage` and the `TempDir` so the caller keeps
    /// ownership of the directory (preventing it from being removed).
    fn create_test_storage() -> (SqliteStorage, tempfile::TempDir) {
        let dir = tempdir().expect("failed to create tempdir");
        let db_path = dir.path().join("sessions.db");
        let storage = SqliteStorage::new_with_path(db_path).expect("failed to create storage");
        (storage, dir)
    }

    fn drop_fts(storage: &SqliteStorage) {
        let conn = Connection::open(storage.db_path()).expect("open connection");
        conn.execute_batch(
            "DROP TRIGGER IF EXISTS messages_fts_insert;
             DROP TRIGGER IF EXISTS messages_fts_delete;
             DROP TRIGGER IF EXISTS messages_fts_update;
             DROP TABLE IF EXISTS messages_fts;",
        )
        .expect("drop fts");
    }

    #[test]
    fn test_init_creates_tables() {
        let (storage, _dir) = create_test_storage();
        let conn = Connection::open(storage.db_path()).expect("open connection");
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('sessions', 'messages')",
                [],
                |r| r.get(0),
            )
            .expect("query row");
        assert_eq!(count, 2);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (storage, _dir) = create_test_storage();
        let mut session = storage.new_session(Some("sql"));
        session.conversation.system_prompt = "be terse".to_string();
        session.tags.insert("db".to_string());
        session
            .config
            .insert("theme".to_string(), serde_json::json!("dark"));
        session.add_message(Message::user("one"));
        session.add_message(Message::assistant("two"));
        session.add_message(Message::system("three"));

        storage.save_session(&mut session).expect("save failed");
        let loaded = storage.load_session(&session.id).expect("load failed");

        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.name, session.name);
        assert_eq!(loaded.tags, session.tags);
        assert_eq!(loaded.config, session.config);
        assert_eq!(loaded.conversation.system_prompt, "be terse");
        let contents: Vec<&str> = loaded.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert_eq!(loaded.messages()[1].role, Role::Assistant);
    }

    #[test]
    fn test_resave_replaces_message_set() {
        let (storage, _dir) = create_test_storage();
        let mut session = storage.new_session(None);
        session.add_message(Message::user("a"));
        session.add_message(Message::user("b"));
        storage.save_session(&mut session).unwrap();

        session.conversation.messages.remove(0);
        session.add_message(Message::user("c"));
        storage.save_session(&mut session).unwrap();

        let loaded = storage.load_session(&session.id).unwrap();
        let contents: Vec<&str> = loaded.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);

        let conn = Connection::open(storage.db_path()).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_save_preserves_created_on_update() {
        let (storage, _dir) = create_test_storage();
        let mut session = storage.new_session(None);
        storage.save_session(&mut session).unwrap();
        let created = storage.load_session(&session.id).unwrap().created;
        let first = session.updated;

        sleep(Duration::from_millis(10));
        storage.save_session(&mut session).unwrap();
        let loaded = storage.load_session(&session.id).unwrap();
        assert_eq!(loaded.created, created);
        assert!(loaded.updated > first);
    }

    #[test]
    fn test_list_sessions_ordered_by_updated_and_counts_messages() {
        let (storage, _dir) = create_test_storage();
        let mut a = storage.new_session(Some("A"));
        a.add_message(Message::user("a"));
        storage.save_session(&mut a).unwrap();

        sleep(Duration::from_millis(10));
        let mut b = storage.new_session(Some("B"));
        b.add_message(Message::user("b1"));
        b.add_message(Message::user("b2"));
        storage.save_session(&mut b).unwrap();

        let sessions = storage.list_sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, b.id);
        assert_eq!(sessions[0].message_count, 2);
        assert_eq!(sessions[1].id, a.id);
    }

    #[test]
    fn test_list_skips_corrupt_rows() {
        let (storage, _dir) = create_test_storage();
        let mut good = storage.new_session(Some("good"));
        storage.save_session(&mut good).unwrap();
        let mut bad = storage.new_session(Some("bad"));
        storage.save_session(&mut bad).unwrap();

        let conn = Connection::open(storage.db_path()).unwrap();
        conn.execute(
            "UPDATE sessions SET tags = 'not json' WHERE id = ?",
            params![bad.id],
        )
        .unwrap();

        let sessions = storage.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, good.id);

        let err = storage.load_session(&bad.id).unwrap_err();
        assert_eq!(VaultError::kind_of(&err), Some(ErrorKind::Corruption));
    }

    #[test]
    fn test_delete_cascades_messages_and_reports_missing() {
        let (storage, _dir) = create_test_storage();
        let mut s = storage.new_session(None);
        s.add_message(Message::user("x"));
        storage.save_session(&mut s).unwrap();

        storage.delete_session(&s.id).unwrap();
        let conn = Connection::open(storage.db_path()).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 0);

        let err = storage.delete_session(&s.id).unwrap_err();
        assert_eq!(VaultError::kind_of(&err), Some(ErrorKind::NotFound));
        let err = storage.load_session(&s.id).unwrap_err();
        assert_eq!(VaultError::kind_of(&err), Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_users_are_isolated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let alice = SqliteStorage::open(&path, "alice").unwrap();
        let bob = SqliteStorage::open(&path, "bob").unwrap();

        let mut s = alice.new_session(Some("private"));
        s.add_message(Message::user("secret plans"));
        alice.save_session(&mut s).unwrap();

        assert!(bob.list_sessions().unwrap().is_empty());
        assert!(bob.search_sessions("secret").unwrap().is_empty());
        let err = bob.load_session(&s.id).unwrap_err();
        assert_eq!(VaultError::kind_of(&err), Some(ErrorKind::NotFound));
        let err = bob.save_session(&mut s.clone()).unwrap_err();
        assert_eq!(VaultError::kind_of(&err), Some(ErrorKind::Validation));
    }

    #[test]
    fn test_indexed_search_highlights_message_hits() {
        let (storage, _dir) = create_test_storage();
        if !storage.has_indexed_search() {
            return;
        }
        let mut s = storage.new_session(Some("notes"));
        s.add_message(Message::user("the borrow checker is strict"));
        s.add_message(Message::assistant("unrelated reply"));
        storage.save_session(&mut s).unwrap();

        let results = storage.search_sessions("borrow").unwrap();
        assert_eq!(results.len(), 1);
        let hit = &results[0].matches[0];
        assert_eq!(hit.match_type, MatchType::Message);
        assert_eq!(hit.message_index, Some(0));
        assert!(hit.content.contains("**borrow**"), "{}", hit.content);
    }

    #[test]
    fn test_fallback_search_when_index_missing() {
        let (storage, _dir) = create_test_storage();
        drop_fts(&storage);
        assert!(!storage.has_indexed_search());

        let mut older = storage.new_session(Some("older"));
        older.add_message(Message::user("Needle in the first haystack"));
        storage.save_session(&mut older).unwrap();
        sleep(Duration::from_millis(10));
        let mut newer = storage.new_session(Some("newer"));
        newer.add_message(Message::user("another NEEDLE here"));
        storage.save_session(&mut newer).unwrap();
        let mut other = storage.new_session(Some("other"));
        other.add_message(Message::user("nothing to see"));
        storage.save_session(&mut other).unwrap();

        let results = storage.search_sessions("needle").unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);
        assert!(!results[0].matches[0].content.contains("**"));
    }

    #[test]
    fn test_search_matches_name_tags_and_prompt() {
        let (storage, _dir) = create_test_storage();
        let mut s = storage.new_session(Some("Kubernetes notes"));
        s.tags.insert("k8s-kubernetes".to_string());
        s.conversation.system_prompt = "You are a Kubernetes expert".to_string();
        storage.save_session(&mut s).unwrap();

        let results = storage.search_sessions("kubernetes").unwrap();
        assert_eq!(results.len(), 1);
        let types: Vec<MatchType> = results[0].matches.iter().map(|m| m.match_type).collect();
        assert_eq!(
            types,
            vec![MatchType::SystemPrompt, MatchType::Name, MatchType::Tag]
        );
    }

    #[test]
    fn test_like_wildcards_are_escaped() {
        let (storage, _dir) = create_test_storage();
        drop_fts(&storage);
        let mut s = storage.new_session(None);
        s.add_message(Message::user("plain text"));
        storage.save_session(&mut s).unwrap();
        assert!(storage.search_sessions("%").unwrap().is_empty());
        assert!(storage.search_sessions("_").unwrap().is_empty());
    }

    #[test]
    fn test_escape_fts5_query_quotes_whole_query() {
        assert_eq!(escape_fts5_query("foo bar"), "\"foo bar\"");
        assert_eq!(escape_fts5_query("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_indexed_search_matches_inside_words() {
        let (storage, _dir) = create_test_storage();
        assert!(storage.has_indexed_search());
        let mut s = storage.new_session(Some("notes"));
        s.add_message(Message::user("the borrow checker is strict"));
        storage.save_session(&mut s).unwrap();

        let results = storage.search_sessions("orrow").unwrap();
        assert_eq!(results.len(), 1);
        let hit = &results[0].matches[0];
        assert_eq!(hit.position, 5);
        assert!(hit.content.contains("b**orrow**"), "{}", hit.content);

        let results = storage.search_sessions("ow c").unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_short_queries_use_pattern_matching() {
        let (storage, _dir) = create_test_storage();
        let mut s = storage.new_session(None);
        s.add_message(Message::user("go to the gym"));
        storage.save_session(&mut s).unwrap();

        let results = storage.search_sessions("ym").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].matches[0].content, "go to the gym");
    }

    #[test]
    fn test_token_index_is_replaced_by_trigram_index() {
        let (storage, _dir) = create_test_storage();
        let mut s = storage.new_session(None);
        s.add_message(Message::user("the borrow checker"));
        storage.save_session(&mut s).unwrap();

        drop_fts(&storage);
        let conn = Connection::open(storage.db_path()).unwrap();
        conn.execute_batch(
            "CREATE VIRTUAL TABLE messages_fts USING fts5(
                content, content='messages', content_rowid='id'
            );
            INSERT INTO messages_fts(messages_fts) VALUES ('rebuild');",
        )
        .unwrap();
        drop(conn);

        let reopened = SqliteStorage::new_with_path(storage.db_path()).unwrap();
        assert_eq!(reopened.search_sessions("orrow").unwrap().len(), 1);
    }

    #[test]
    fn test_busy_session_does_not_crowd_out_others() {
        let (storage, _dir) = create_test_storage();
        let mut quiet = storage.new_session(Some("quiet"));
        quiet.add_message(Message::user("needle once"));
        storage.save_session(&mut quiet).unwrap();
        sleep(Duration::from_millis(10));

        let mut busy = storage.new_session(Some("busy"));
        for i in 0..(MAX_MESSAGE_MATCHES + 100) {
            busy.add_message(Message::user(format!("needle {}", i)));
        }
        storage.save_session(&mut busy).unwrap();

        for indexed in [true, false] {
            if !indexed {
                drop_fts(&storage);
            }
            let results = storage.search_sessions("needle").unwrap();
            let ids: Vec<&str> = results.iter().map(|r| r.session_id.as_str()).collect();
            assert!(ids.contains(&quiet.id.as_str()), "indexed = {}", indexed);
            let busy_hits = results.iter().find(|r| r.session_id == busy.id).unwrap();
            assert_eq!(busy_hits.matches.len(), MAX_MESSAGE_MATCHES);
        }
    }
}
