//! Branch and merge commands

use colored::Colorize;
use prettytable::{format, Table};

use crate::error::Result;
use crate::storage::types::short_id;
use crate::storage::{BranchTree, MergeOptions, MergeType, StorageManager};

/// Fork `parent_id` at `at` (default: after the last message)
pub fn create_branch(
    storage: &StorageManager,
    parent_id: &str,
    at: Option<usize>,
    name: &str,
    new_id: &str,
) -> Result<()> {
    let mut parent = storage.load_session(parent_id)?;
    let at = at.unwrap_or(parent.messages().len());
    let branch = storage.create_branch(&mut parent, new_id, name, at)?;

    println!(
        "{} {} {}",
        "Created branch".green(),
        branch.id,
        format!("(from {} at message {})", short_id(&parent.id), at).dimmed()
    );
    Ok(())
}

/// Print the direct branches of a session
pub fn list_children(storage: &StorageManager, id: &str) -> Result<()> {
    let children = storage.get_children(id)?;

    if children.is_empty() {
        println!("{}", format!("Session {} has no branches.", short_id(id)).yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "ID".bold(),
        "Branch".bold(),
        "Branch Point".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);
    for child in &children {
        table.add_row(prettytable::row![
            child.id.cyan(),
            child.branch_name.as_deref().unwrap_or("-"),
            child.branch_point,
            child.messages().len(),
            child.updated.format("%Y-%m-%d %H:%M").to_string()
        ]);
    }
    table.printstd();
    Ok(())
}

fn node_label(node: &BranchTree) -> String {
    let info = &node.session;
    let name = info
        .branch_name
        .as_deref()
        .or(info.name.as_deref())
        .unwrap_or("-");
    format!(
        "{} {} ({} messages)",
        short_id(&info.id).cyan(),
        name,
        info.message_count
    )
}

fn render_tree(node: &BranchTree, prefix: &str, last: bool, lines: &mut Vec<String>) {
    let (branch, extension) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
    lines.push(format!("{}{}{}", prefix, branch, node_label(node)));
    let child_prefix = format!("{}{}", prefix, extension);
    for (i, child) in node.children.iter().enumerate() {
        render_tree(child, &child_prefix, i + 1 == node.children.len(), lines);
    }
}

/// Render a branch tree as indented lines
pub fn tree_lines(tree: &BranchTree) -> Vec<String> {
    let mut lines = vec![node_label(tree)];
    for (i, child) in tree.children.iter().enumerate() {
        render_tree(child, "", i + 1 == tree.children.len(), &mut lines);
    }
    lines
}

pub fn show_tree(storage: &StorageManager, root_id: &str) -> Result<()> {
    let tree = storage.get_branch_tree(root_id)?;
    for line in tree_lines(&tree) {
        println!("{}", line);
    }
    println!("\n{} session(s) in tree", tree.len());
    Ok(())
}

/// Merge `source` into `target`
pub fn merge(
    storage: &StorageManager,
    target: &str,
    source: &str,
    merge_type: &str,
    new_branch: bool,
    name: Option<String>,
) -> Result<()> {
    let merge_type: MergeType = merge_type.parse()?;
    let mut options = MergeOptions::new(merge_type);
    if new_branch {
        options = options.into_branch(name.as_deref());
    }

    let result = storage.merge_sessions(target, source, &options)?;
    match result.new_branch_id {
        Some(branch_id) => println!(
            "{} {} message(s) into new branch {}",
            "Merged".green(),
            result.merged_count,
            branch_id
        ),
        None => println!(
            "{} {} message(s) into {}",
            "Merged".green(),
            result.merged_count,
            target
        ),
    }
    Ok(())
}

pub fn repair(storage: &StorageManager) -> Result<()> {
    let repaired = storage.repair_branch_links()?;
    if repaired == 0 {
        println!("{}", "All branch links are consistent.".green());
    } else {
        println!("{}", format!("Repaired {} branch link(s).", repaired).yellow());
    }
    Ok(())
}
