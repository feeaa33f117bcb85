//! Branch creation and branch-tree navigation
//!
//! Sessions reference each other by id only. Trees are assembled per query
//! from an id-keyed map, so nothing holds a long-lived in-memory graph.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, Result, VaultError};

use super::types::{new_id, BranchTree, Session};
use super::StorageBackend;

/// Fork `parent` at `at_index` into a new session and persist both
///
/// The branch receives `parent.messages[0..at_index]`, `parent_id`,
/// `branch_point = at_index` and `branch_name = name`; `new_id` is appended
/// to `parent.child_ids`. An empty `new_id` generates a fresh one.
///
/// The branch is written before the parent. If the parent write fails the
/// branch is deleted again (best effort), so the common failure leaves no
/// trace; anything left over is fixed by [`repair_branch_links`].
///
/// # Errors
///
/// - `Validation` if `at_index` exceeds the parent's message count or the
///   id is already taken
/// - any error from the backend's save
pub fn create_branch<B: StorageBackend + ?Sized>(
    backend: &B,
    parent: &mut Session,
    new_id_hint: &str,
    name: &str,
    at_index: usize,
) -> Result<Session> {
    let message_count = parent.conversation.messages.len();
    if at_index > message_count {
        return Err(VaultError::Validation(format!(
            "branch index {} out of range (session {} has {} messages)",
            at_index, parent.id, message_count
        ))
        .into());
    }

    let branch_id = if new_id_hint.is_empty() {
        new_id()
    } else {
        new_id_hint.to_string()
    };
    if branch_id == parent.id || backend.session_exists(&branch_id)? {
        return Err(VaultError::Validation(format!("session {} already exists", branch_id)).into());
    }

    let mut branch = backend.new_session(parent.name.as_deref());
    branch.id = branch_id.clone();
    branch.conversation = parent
        .conversation
        .with_messages(parent.conversation.messages[..at_index].to_vec());
    branch.config = parent.config.clone();
    branch.tags = parent.tags.clone();
    branch.parent_id = Some(parent.id.clone());
    branch.branch_point = at_index;
    branch.branch_name = (!name.is_empty()).then(|| name.to_string());

    backend
        .save_session(&mut branch)
        .with_context(|| format!("Failed to save branch {}", branch_id))?;

    parent.child_ids.push(branch_id.clone());
    if let Err(e) = backend.save_session(parent) {
        parent.child_ids.pop();
        if let Err(cleanup) = backend.delete_session(&branch_id) {
            warn!(
                branch_id = %branch_id,
                parent_id = %parent.id,
                error = %cleanup,
                "Failed to remove branch after parent save failed; run repair to relink it"
            );
        }
        return Err(e.context(format!(
            "Failed to register branch {} with parent {}",
            branch_id, parent.id
        )));
    }

    info!(
        branch_id = %branch_id,
        parent_id = %parent.id,
        at_index,
        "Created branch"
    );
    Ok(branch)
}

/// Load every existing child of `id`, in creation order
///
/// Child ids whose session no longer exists are skipped with a warning.
pub fn get_children<B: StorageBackend + ?Sized>(backend: &B, id: &str) -> Result<Vec<Session>> {
    let parent = backend.load_session(id)?;
    let mut children = Vec::with_capacity(parent.child_ids.len());
    for child_id in &parent.child_ids {
        match backend.load_session(child_id) {
            Ok(child) => children.push(child),
            Err(e) if VaultError::kind_of(&e) == Some(ErrorKind::NotFound) => {
                warn!(parent_id = %id, child_id = %child_id, "Skipping dangling child reference");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(children)
}

/// Build the tree of branches rooted at `root_id`
///
/// Sessions are loaded breadth-first into an id-keyed map, then the tree is
/// assembled from that map. A visited set guards against malformed data
/// that would otherwise loop.
pub fn get_branch_tree<B: StorageBackend + ?Sized>(backend: &B, root_id: &str) -> Result<BranchTree> {
    let root = backend.load_session(root_id)?;
    let mut nodes: HashMap<String, Session> = HashMap::new();
    let mut queue: VecDeque<String> = root.child_ids.iter().cloned().collect();
    let mut seen: HashSet<String> = HashSet::from([root.id.clone()]);
    nodes.insert(root.id.clone(), root);

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            warn!(session_id = %id, "Session reachable twice in branch tree; ignoring repeat");
            continue;
        }
        match backend.load_session(&id) {
            Ok(session) => {
                queue.extend(session.child_ids.iter().cloned());
                nodes.insert(id, session);
            }
            Err(e) if VaultError::kind_of(&e) == Some(ErrorKind::NotFound) => {
                warn!(session_id = %id, "Skipping dangling child reference in branch tree");
            }
            Err(e) => return Err(e),
        }
    }

    debug!(root_id = %root_id, sessions = nodes.len(), "Loaded branch tree");
    let mut placed = HashSet::new();
    Ok(assemble(root_id, &nodes, &mut placed))
}

fn assemble(id: &str, nodes: &HashMap<String, Session>, placed: &mut HashSet<String>) -> BranchTree {
    placed.insert(id.to_string());
    let session = &nodes[id];
    let children = session
        .child_ids
        .iter()
        .filter(|c| nodes.contains_key(c.as_str()) && !placed.contains(c.as_str()))
        .cloned()
        .collect::<Vec<_>>()
        .into_iter()
        .map(|c| assemble(&c, nodes, placed))
        .collect();
    BranchTree {
        session: session.info(),
        children,
    }
}

/// Re-register branches whose parent does not list them
///
/// Scans every session; for each branch whose parent exists but lacks the
/// branch id in `child_ids`, the id is appended and the parent saved.
/// Returns the number of links restored.
pub fn repair_branch_links<B: StorageBackend + ?Sized>(backend: &B) -> Result<usize> {
    let mut sessions: HashMap<String, Session> = HashMap::new();
    for info in backend.list_sessions()? {
        match backend.load_session(&info.id) {
            Ok(s) => {
                sessions.insert(s.id.clone(), s);
            }
            Err(e) => warn!(session_id = %info.id, error = %e, "Skipping unreadable session during repair"),
        }
    }

    let mut missing: Vec<(String, String)> = sessions
        .values()
        .filter_map(|s| {
            let parent_id = s.parent_id.as_deref().filter(|p| !p.is_empty())?;
            let parent = sessions.get(parent_id)?;
            (!parent.child_ids.contains(&s.id)).then(|| (parent_id.to_string(), s.id.clone()))
        })
        .collect();
    // Link siblings in the order they were created.
    missing.sort_by_key(|(_, child)| sessions[child].created);

    let mut repaired = 0;
    for (parent_id, child_id) in missing {
        if let Some(parent) = sessions.get_mut(&parent_id) {
            parent.child_ids.push(child_id.clone());
            backend
                .save_session(parent)
                .with_context(|| format!("Failed to relink branch {} to {}", child_id, parent_id))?;
            info!(parent_id = %parent_id, child_id = %child_id, "Relinked orphaned branch");
            repaired += 1;
        }
    }
    Ok(repaired)
}
