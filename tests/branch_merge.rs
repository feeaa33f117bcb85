//! Branch trees and merges on the persistent backends

use sessionvault::storage::{MergeOptions, MergeType, Message, StorageBackend};
use sessionvault::{ErrorKind, VaultError};

mod common;

fn persistent_backends() -> Vec<(std::sync::Arc<dyn StorageBackend>, tempfile::TempDir)> {
    common::all_backends()
        .into_iter()
        .filter(|(b, _)| b.kind() != "memory")
        .collect()
}

#[test]
fn test_branch_links_survive_reload() {
    for (backend, _dir) in persistent_backends() {
        let mut parent = common::seeded_session(backend.as_ref(), "root", &["q1", "a1", "q2", "a2"]);
        let branch = backend.create_branch(&mut parent, "", "retry", 2).unwrap();

        let stored_parent = backend.load_session(&parent.id).unwrap();
        assert_eq!(stored_parent.child_ids, vec![branch.id.clone()], "{} backend", backend.kind());

        let stored_branch = backend.load_session(&branch.id).unwrap();
        assert_eq!(stored_branch.parent_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(stored_branch.branch_point, 2);
        assert_eq!(stored_branch.branch_name.as_deref(), Some("retry"));
        assert_eq!(common::contents(&stored_branch), vec!["q1", "a1"]);
    }
}

#[test]
fn test_branch_tree_over_three_levels() {
    for (backend, _dir) in persistent_backends() {
        let mut root = common::seeded_session(backend.as_ref(), "root", &["a", "b", "c"]);
        let mut left = backend.create_branch(&mut root, "", "left", 1).unwrap();
        let right = backend.create_branch(&mut root, "", "right", 3).unwrap();
        let leaf = backend.create_branch(&mut left, "", "leaf", 0).unwrap();

        let tree = backend.get_branch_tree(&root.id).unwrap();
        assert_eq!(tree.len(), 4, "{} backend", backend.kind());
        assert_eq!(tree.session.id, root.id);
        let child_ids: Vec<&str> = tree.children.iter().map(|c| c.session.id.as_str()).collect();
        assert_eq!(child_ids, vec![left.id.as_str(), right.id.as_str()]);
        assert_eq!(tree.children[0].children[0].session.id, leaf.id);
        assert!(tree.find(&leaf.id).is_some());

        let children = backend.get_children(&root.id).unwrap();
        assert_eq!(children.len(), 2);
        assert!(backend.get_children(&leaf.id).unwrap().is_empty());
    }
}

#[test]
fn test_branch_out_of_range_leaves_parent_untouched() {
    for (backend, _dir) in persistent_backends() {
        let mut parent = common::seeded_session(backend.as_ref(), "p", &["only"]);
        let err = backend.create_branch(&mut parent, "x", "bad", 5).unwrap_err();
        assert_eq!(VaultError::kind_of(&err), Some(ErrorKind::Validation));
        assert!(backend.load_session(&parent.id).unwrap().child_ids.is_empty());
        assert_eq!(backend.list_sessions().unwrap().len(), 1);
    }
}

#[test]
fn test_continuation_merge_example() {
    for (backend, _dir) in persistent_backends() {
        let target = common::seeded_session(backend.as_ref(), "target", &["Target message"]);
        let source = common::seeded_session(backend.as_ref(), "source", &["Source message"]);

        let result = backend
            .merge_sessions(
                &target.id,
                &source.id,
                &MergeOptions::new(MergeType::Continuation),
            )
            .unwrap();
        assert_eq!(result.merged_count, 1);
        assert!(result.new_branch_id.is_none());

        let merged = backend.load_session(&target.id).unwrap();
        assert_eq!(
            common::contents(&merged),
            vec!["Target message", "Source message"],
            "{} backend",
            backend.kind()
        );
    }
}

#[test]
fn test_rebase_merge_of_branch_back_into_parent() {
    for (backend, _dir) in persistent_backends() {
        let mut parent = common::seeded_session(backend.as_ref(), "main", &["shared q", "shared a"]);
        let mut feature = backend.create_branch(&mut parent, "", "feature", 2).unwrap();
        feature.add_message(Message::user("feature q"));
        feature.add_message(Message::assistant("feature a"));
        backend.save_session(&mut feature).unwrap();

        let options = MergeOptions::new(MergeType::Rebase).into_branch(None);
        let result = backend
            .merge_sessions(&parent.id, &feature.id, &options)
            .unwrap();
        assert_eq!(result.merged_count, 2);

        let merged_id = result.new_branch_id.expect("new branch");
        let merged = backend.load_session(&merged_id).unwrap();
        assert_eq!(
            common::contents(&merged),
            vec!["shared q", "shared a", "feature q", "feature a"]
        );
        assert_eq!(merged.branch_point, 2);
        let expected_name = format!("merge-{}", &feature.id[..8]);
        assert_eq!(merged.branch_name.as_deref(), Some(expected_name.as_str()));

        let stored_parent = backend.load_session(&parent.id).unwrap();
        assert_eq!(common::contents(&stored_parent), vec!["shared q", "shared a"]);
        assert_eq!(stored_parent.child_ids, vec![feature.id.clone(), merged_id]);
    }
}

#[test]
fn test_merge_with_missing_source_changes_nothing() {
    for (backend, _dir) in persistent_backends() {
        let target = common::seeded_session(backend.as_ref(), "t", &["keep"]);
        let before = backend.load_session(&target.id).unwrap();
        let options = MergeOptions::new(MergeType::Continuation).into_branch(Some("x"));
        let err = backend
            .merge_sessions(&target.id, "missing-source", &options)
            .unwrap_err();
        assert_eq!(VaultError::kind_of(&err), Some(ErrorKind::NotFound));
        assert_eq!(backend.load_session(&target.id).unwrap(), before);
        assert_eq!(backend.list_sessions().unwrap().len(), 1);
    }
}

#[test]
fn test_repair_restores_lost_child_links() {
    for (backend, _dir) in persistent_backends() {
        let mut parent = common::seeded_session(backend.as_ref(), "p", &["m"]);
        let first = backend.create_branch(&mut parent, "", "one", 1).unwrap();
        let second = backend.create_branch(&mut parent, "", "two", 0).unwrap();

        let mut stale = backend.load_session(&parent.id).unwrap();
        stale.child_ids.clear();
        backend.save_session(&mut stale).unwrap();

        assert_eq!(backend.repair_branch_links().unwrap(), 2, "{} backend", backend.kind());
        let repaired = backend.load_session(&parent.id).unwrap();
        assert_eq!(repaired.child_ids, vec![first.id, second.id]);
        assert_eq!(backend.get_branch_tree(&parent.id).unwrap().len(), 3);
    }
}
