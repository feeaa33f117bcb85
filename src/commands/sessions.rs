//! Session lifecycle commands: new, list, show, delete, search, export

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use colored::Colorize;
use prettytable::{format, Table};

use crate::error::{Result, VaultError};
use crate::storage::types::short_id;
use crate::storage::{MatchType, StorageManager};

const TITLE_WIDTH: usize = 40;

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let cut: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Create and save an empty session, printing its id
pub fn create_session(
    storage: &StorageManager,
    name: Option<String>,
    system_prompt: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let mut session = storage.new_session(name.as_deref());
    if let Some(prompt) = system_prompt {
        session.conversation.system_prompt = prompt;
    }
    session.tags.extend(tags.into_iter().filter(|t| !t.is_empty()));
    storage.save_session(&mut session)?;

    println!("{} {}", "Created session".green(), session.id);
    Ok(())
}

/// Print a table of all sessions
pub fn list_sessions(storage: &StorageManager) -> Result<()> {
    let sessions = storage.list_sessions()?;

    if sessions.is_empty() {
        println!("{}", "No sessions found.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Name".bold(),
        "Branch".bold(),
        "Messages".bold(),
        "Tags".bold(),
        "Last Updated".bold()
    ]);

    for session in &sessions {
        let name = truncate(session.name.as_deref().unwrap_or("-"), TITLE_WIDTH);
        let branch = match (&session.parent_id, &session.branch_name) {
            (Some(_), Some(branch)) => branch.clone(),
            (Some(parent), None) => format!("of {}", short_id(parent)),
            (None, _) => "-".to_string(),
        };
        let tags = session.tags.iter().cloned().collect::<Vec<_>>().join(", ");
        let updated = session.updated.format("%Y-%m-%d %H:%M").to_string();

        table.add_row(prettytable::row![
            short_id(&session.id).cyan(),
            name,
            branch,
            session.message_count,
            tags,
            updated
        ]);
    }

    println!("\nSessions ({}):", sessions.len());
    table.printstd();
    println!();
    Ok(())
}

/// Print a session's metadata and messages
pub fn show_session(storage: &StorageManager, id: &str) -> Result<()> {
    let session = storage.load_session(id)?;

    println!("{} {}", "Session".bold(), session.id.cyan());
    println!("  Name:     {}", session.name.as_deref().unwrap_or("-"));
    println!("  Created:  {}", session.created.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated:  {}", session.updated.format("%Y-%m-%d %H:%M:%S"));
    if !session.tags.is_empty() {
        let tags: Vec<&str> = session.tags.iter().map(String::as_str).collect();
        println!("  Tags:     {}", tags.join(", "));
    }
    if let Some(parent) = &session.parent_id {
        println!(
            "  Branch:   {} (of {} at message {})",
            session.branch_name.as_deref().unwrap_or("-"),
            parent,
            session.branch_point
        );
    }
    if !session.child_ids.is_empty() {
        println!("  Branches: {}", session.child_ids.len());
    }
    if !session.conversation.system_prompt.is_empty() {
        println!("\n{}", "System prompt:".bold());
        println!("  {}", session.conversation.system_prompt);
    }

    println!();
    if session.messages().is_empty() {
        println!("{}", "No messages.".yellow());
    }
    for (i, message) in session.messages().iter().enumerate() {
        println!(
            "{} {} {}",
            format!("[{}]", i + 1).dimmed(),
            message.role.to_string().bold(),
            message.timestamp.format("%H:%M:%S").to_string().dimmed()
        );
        println!("{}\n", message.content);
    }
    Ok(())
}

pub fn delete_session(storage: &StorageManager, id: &str) -> Result<()> {
    storage.delete_session(id)?;
    println!("{}", format!("Deleted session {}", id).green());
    Ok(())
}

/// Print search results grouped by session
pub fn search_sessions(storage: &StorageManager, query: &str) -> Result<()> {
    let results = storage.search_sessions(query)?;

    if results.is_empty() {
        println!("{}", format!("No sessions match {:?}.", query).yellow());
        return Ok(());
    }

    println!(
        "\n{} session(s) match {:?}:\n",
        results.len().to_string().bold(),
        query
    );
    for result in &results {
        println!(
            "{} {} ({} match{})",
            short_id(&result.session_id).cyan(),
            result.session_name.as_deref().unwrap_or("-").bold(),
            result.matches.len(),
            if result.matches.len() == 1 { "" } else { "es" }
        );
        for hit in &result.matches {
            let label = match (hit.match_type, hit.role) {
                (MatchType::Message, Some(role)) => format!("{} ({})", hit.context, role),
                _ => hit.context.clone(),
            };
            println!("    {}: {}", label.dimmed(), hit.content);
        }
        println!();
    }
    Ok(())
}

/// Export a session to `output`, or stdout when `None`
pub fn export_session(
    storage: &StorageManager,
    id: &str,
    format: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    match output {
        Some(path) => {
            let mut buffer = Vec::new();
            storage.export_session(id, format, &mut buffer)?;
            std::fs::write(&path, &buffer)
                .map_err(VaultError::from)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{}",
                format!("Exported session {} to {}", id, path.display()).green()
            );
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            storage.export_session(id, format, &mut lock)?;
            lock.flush().map_err(VaultError::from)?;
        }
    }
    Ok(())
}
