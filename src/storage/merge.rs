//! Merge engine
//!
//! Combines two sessions' message histories under a [`MergeType`] policy,
//! either in place on the target or into a fresh branch of the target.

use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VaultError};

use super::types::{new_id, short_id, Message, Session};
use super::StorageBackend;

/// How source messages are combined with the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeType {
    /// Append every source message after the target's messages
    Continuation,
    /// Append only the source's own tail (after its branch point)
    Rebase,
}

impl FromStr for MergeType {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "continuation" => Ok(MergeType::Continuation),
            "rebase" => Ok(MergeType::Rebase),
            other => Err(VaultError::Validation(format!(
                "unknown merge type: {} (expected continuation or rebase)",
                other
            ))),
        }
    }
}

impl fmt::Display for MergeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeType::Continuation => f.write_str("continuation"),
            MergeType::Rebase => f.write_str("rebase"),
        }
    }
}

/// Options for [`merge_sessions`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// Merge policy
    pub merge_type: MergeType,
    /// Write the result to a new branch of the target instead of the target
    pub create_branch: bool,
    /// Name for the new branch; defaults to `merge-<source short id>`
    pub branch_name: Option<String>,
}

impl MergeOptions {
    /// Merge in place with the given policy
    pub fn new(merge_type: MergeType) -> Self {
        Self {
            merge_type,
            create_branch: false,
            branch_name: None,
        }
    }

    /// Write the merge result to a new branch
    pub fn into_branch(mut self, name: Option<&str>) -> Self {
        self.create_branch = true;
        self.branch_name = name.map(str::to_string);
        self
    }
}

/// Outcome of a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Number of messages appended
    pub merged_count: usize,
    /// Id of the branch created for the result; `None` when merged in place
    pub new_branch_id: Option<String>,
}

/// Messages of `source` that a merge of type `merge_type` appends
fn messages_to_merge(source: &Session, merge_type: MergeType) -> &[Message] {
    let messages = source.messages();
    match merge_type {
        MergeType::Continuation => messages,
        MergeType::Rebase if source.is_branch() => {
            &messages[source.branch_point.min(messages.len())..]
        }
        MergeType::Rebase => messages,
    }
}

/// Merge `source_id` into `target_id`
///
/// Both sessions are loaded before anything is written, so a missing
/// endpoint fails with `NotFound` and leaves both untouched. The source is
/// never modified.
///
/// # Errors
///
/// - `Validation` when target and source are the same session
/// - `NotFound` when either session is missing
pub fn merge_sessions<B: StorageBackend + ?Sized>(
    backend: &B,
    target_id: &str,
    source_id: &str,
    options: &MergeOptions,
) -> Result<MergeResult> {
    if target_id == source_id {
        return Err(VaultError::Validation(format!(
            "cannot merge session {} into itself",
            target_id
        ))
        .into());
    }

    let mut target = backend
        .load_session(target_id)
        .with_context(|| format!("Failed to load merge target {}", target_id))?;
    let source = backend
        .load_session(source_id)
        .with_context(|| format!("Failed to load merge source {}", source_id))?;

    let incoming = messages_to_merge(&source, options.merge_type).to_vec();
    let merged_count = incoming.len();

    if !options.create_branch {
        target.conversation.messages.extend(incoming);
        backend
            .save_session(&mut target)
            .with_context(|| format!("Failed to save merge target {}", target_id))?;
        info!(
            target_id = %target_id,
            source_id = %source_id,
            merge_type = %options.merge_type,
            merged_count,
            "Merged sessions in place"
        );
        return Ok(MergeResult {
            merged_count,
            new_branch_id: None,
        });
    }

    let branch_name = options
        .branch_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("merge-{}", short_id(source_id)));

    let mut messages = target.conversation.messages.clone();
    messages.extend(incoming);

    let mut branch = backend.new_session(target.name.as_deref());
    branch.id = new_id();
    branch.conversation = target.conversation.with_messages(messages);
    branch.config = target.config.clone();
    branch.tags = target.tags.clone();
    branch.parent_id = Some(target.id.clone());
    branch.branch_point = target.conversation.messages.len();
    branch.branch_name = Some(branch_name);
    branch
        .metadata
        .insert("merged_from".to_string(), serde_json::json!(source_id));

    let branch_id = branch.id.clone();
    backend
        .save_session(&mut branch)
        .with_context(|| format!("Failed to save merge branch {}", branch_id))?;

    target.child_ids.push(branch_id.clone());
    if let Err(e) = backend.save_session(&mut target) {
        if let Err(cleanup) = backend.delete_session(&branch_id) {
            warn!(
                branch_id = %branch_id,
                error = %cleanup,
                "Failed to remove merge branch after target save failed"
            );
        }
        return Err(e.context(format!(
            "Failed to register merge branch {} with {}",
            branch_id, target_id
        )));
    }

    info!(
        target_id = %target_id,
        source_id = %source_id,
        branch_id = %branch_id,
        merge_type = %options.merge_type,
        merged_count,
        "Merged sessions into new branch"
    );
    Ok(MergeResult {
        merged_count,
        new_branch_id: Some(branch_id),
    })
}
