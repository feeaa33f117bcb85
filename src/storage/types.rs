//! Session data model
//!
//! Pure value types shared by every storage backend. [`Session`] is the
//! persisted aggregate; [`SessionInfo`], [`SearchResult`] and [`BranchTree`]
//! are read projections that are built on demand and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::VaultError;

/// Free-form key/value map used for session config and metadata
pub type ValueMap = HashMap<String, serde_json::Value>;

/// Generate a new globally unique session or message identifier
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human input
    User,
    /// Model output
    Assistant,
    /// Instructions injected by the client
    System,
}

impl Role {
    /// Lowercase wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(VaultError::Corruption(format!("unknown role: {}", other))),
        }
    }
}

/// File or blob attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Display name (usually the file name)
    pub name: String,
    /// MIME type as detected by the client
    pub mime_type: String,
    /// Source path on disk, if the attachment came from a file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
    /// Inline content (text attachments or base64 payloads)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: String,
    /// Author role
    pub role: Role,
    /// Message text
    pub content: String,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
    /// Attached files
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Free-form metadata (token counts, provider ids, ...)
    #[serde(default)]
    pub metadata: ValueMap,
}

impl Message {
    /// Create a message with a fresh id and the current timestamp
    ///
    /// # Examples
    ///
    /// ```
    /// use sessionvault::storage::{Message, Role};
    ///
    /// let msg = Message::new(Role::User, "Hello");
    /// assert_eq!(msg.role, Role::User);
    /// assert_eq!(msg.content, "Hello");
    /// ```
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            attachments: Vec::new(),
            metadata: ValueMap::new(),
        }
    }

    /// Creates a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Attach a file to this message
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Message history plus the model settings it was produced with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier
    pub id: String,
    /// Ordered message history
    #[serde(default)]
    pub messages: Vec<Message>,
    /// System prompt sent ahead of the history
    #[serde(default)]
    pub system_prompt: String,
    /// Model name
    #[serde(default)]
    pub model: String,
    /// Provider name
    #[serde(default)]
    pub provider: String,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,
    /// Completion token limit
    #[serde(default)]
    pub max_tokens: u32,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new() -> Self {
        Self {
            id: new_id(),
            messages: Vec::new(),
            system_prompt: String::new(),
            model: String::new(),
            provider: String::new(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }

    /// Copy of the conversation settings with a different message list
    pub(crate) fn with_messages(&self, messages: Vec<Message>) -> Self {
        Self {
            id: new_id(),
            messages,
            system_prompt: self.system_prompt.clone(),
            model: self.model.clone(),
            provider: self.provider.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Persisted conversation aggregate with optional branch metadata
///
/// # Examples
///
/// ```
/// use sessionvault::storage::{Message, Session};
///
/// let mut session = Session::new(Some("Design review"));
/// session.add_message(Message::user("Hi"));
/// assert!(!session.is_branch());
/// assert_eq!(session.info().message_count, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique, immutable session identifier
    pub id: String,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Owned conversation
    pub conversation: Conversation,
    /// Client configuration captured with the session
    #[serde(default)]
    pub config: ValueMap,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Last save time
    pub updated: DateTime<Utc>,
    /// User-assigned tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: ValueMap,
    /// Session this one was forked from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Branches forked from this session, in creation order
    #[serde(default)]
    pub child_ids: Vec<String>,
    /// Name given to this branch at fork time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    /// Parent message count copied at fork time
    #[serde(default)]
    pub branch_point: usize,
}

impl Session {
    /// Create a fresh, unsaved session with a generated id
    pub fn new(name: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
            conversation: Conversation::new(),
            config: ValueMap::new(),
            created: now,
            updated: now,
            tags: BTreeSet::new(),
            metadata: ValueMap::new(),
            parent_id: None,
            child_ids: Vec::new(),
            branch_name: None,
            branch_point: 0,
        }
    }

    /// Whether this session was forked from another
    pub fn is_branch(&self) -> bool {
        self.parent_id.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Ordered message history
    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    /// Append a message to the conversation
    pub fn add_message(&mut self, message: Message) {
        self.conversation.messages.push(message);
    }

    /// Name for display, falling back to the short id
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => short_id(&self.id).to_string(),
        }
    }

    /// Listing projection of this session
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            created: self.created,
            updated: self.updated,
            message_count: self.conversation.messages.len(),
            tags: self.tags.clone(),
            parent_id: self.parent_id.clone(),
            branch_name: self.branch_name.clone(),
        }
    }
}

/// First eight characters of an id, used in listings and default names
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Read-only listing projection of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier
    pub id: String,
    /// Display name
    pub name: Option<String>,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Last save time
    pub updated: DateTime<Utc>,
    /// Number of messages in the conversation
    pub message_count: usize,
    /// Tags
    pub tags: BTreeSet<String>,
    /// Parent session, if this is a branch
    pub parent_id: Option<String>,
    /// Branch name, if this is a branch
    pub branch_name: Option<String>,
}

/// Which field of a session a search hit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Message content
    Message,
    /// Conversation system prompt
    SystemPrompt,
    /// Session name
    Name,
    /// One of the session tags
    Tag,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchType::Message => "message",
            MatchType::SystemPrompt => "system_prompt",
            MatchType::Name => "name",
            MatchType::Tag => "tag",
        };
        f.write_str(s)
    }
}

/// One hit inside a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// Field the hit came from
    pub match_type: MatchType,
    /// Message author, for message hits
    pub role: Option<Role>,
    /// Snippet around the hit (or highlighted span from indexed search)
    pub content: String,
    /// Human-readable location, e.g. `message 3`
    pub context: String,
    /// Character offset of the hit inside the field
    pub position: usize,
    /// Index of the message, for message hits
    pub message_index: Option<usize>,
}

/// All hits for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Session identifier
    pub session_id: String,
    /// Session display name
    pub session_name: Option<String>,
    /// Last save time of the session
    pub updated: DateTime<Utc>,
    /// Hits in field order (or rank order for indexed search)
    pub matches: Vec<SearchMatch>,
}

/// Recursive parent/child projection rooted at one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchTree {
    /// The session at this node
    pub session: SessionInfo,
    /// Child branches in creation order
    pub children: Vec<BranchTree>,
}

impl BranchTree {
    /// Total number of sessions in this tree, including the root
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(BranchTree::len).sum::<usize>()
    }

    /// A tree always contains at least its root
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Depth-first search for a node by session id
    pub fn find(&self, id: &str) -> Option<&BranchTree> {
        if self.session.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}
