//! Session export formats

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::error::{Result, VaultError};

use super::types::Session;

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Full entity dump as pretty-printed JSON
    Json,
    /// Human-readable transcript
    Markdown,
}

impl FromStr for ExportFormat {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            other => Err(VaultError::Validation(format!(
                "unsupported export format: {} (expected json or markdown)",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => f.write_str("json"),
            ExportFormat::Markdown => f.write_str("markdown"),
        }
    }
}

/// Write `session` to `sink` in the given format
pub fn write_session(session: &Session, format: ExportFormat, sink: &mut dyn Write) -> Result<()> {
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut *sink, session).map_err(VaultError::from)?;
            writeln!(sink).map_err(VaultError::from)?;
        }
        ExportFormat::Markdown => write_markdown(session, sink).map_err(VaultError::from)?,
    }
    sink.flush().map_err(VaultError::from)?;
    Ok(())
}

fn write_markdown(session: &Session, out: &mut dyn Write) -> std::io::Result<()> {
    let conversation = &session.conversation;

    writeln!(out, "# {}", session.display_name())?;
    writeln!(out)?;
    writeln!(out, "- **Session ID:** {}", session.id)?;
    writeln!(out, "- **Created:** {}", session.created.to_rfc3339())?;
    writeln!(out, "- **Updated:** {}", session.updated.to_rfc3339())?;
    if !conversation.model.is_empty() {
        writeln!(out, "- **Model:** {}", conversation.model)?;
    }
    if !conversation.provider.is_empty() {
        writeln!(out, "- **Provider:** {}", conversation.provider)?;
    }
    if !session.tags.is_empty() {
        let tags: Vec<&str> = session.tags.iter().map(String::as_str).collect();
        writeln!(out, "- **Tags:** {}", tags.join(", "))?;
    }
    if let Some(parent) = &session.parent_id {
        writeln!(
            out,
            "- **Branch:** {} (from {} at message {})",
            session.branch_name.as_deref().unwrap_or("unnamed"),
            parent,
            session.branch_point
        )?;
    }
    writeln!(out)?;

    if !conversation.system_prompt.is_empty() {
        writeln!(out, "## System Prompt")?;
        writeln!(out)?;
        writeln!(out, "{}", conversation.system_prompt)?;
        writeln!(out)?;
    }

    for (idx, message) in conversation.messages.iter().enumerate() {
        let role = message.role.as_str();
        let mut title = role.to_string();
        if let Some(first) = title.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        writeln!(out, "## {}. {}", idx + 1, title)?;
        writeln!(out)?;
        writeln!(out, "*{}*", message.timestamp.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(out)?;
        writeln!(out, "{}", message.content)?;
        writeln!(out)?;

        if !message.attachments.is_empty() {
            writeln!(out, "**Attachments:**")?;
            writeln!(out)?;
            for attachment in &message.attachments {
                writeln!(
                    out,
                    "- {} ({}, {} bytes)",
                    attachment.name, attachment.mime_type, attachment.size
                )?;
            }
            writeln!(out)?;
        }
    }

    Ok(())
}
