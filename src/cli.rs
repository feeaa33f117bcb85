//! Command-line interface definition for SessionVault
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for session lifecycle, branching, merging, search,
//! export and crash recovery.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// SessionVault - persistent chat session store
///
/// Create, inspect, branch, merge, search and export stored conversation
/// sessions, and recover the active session after a crash.
#[derive(Parser, Debug, Clone)]
#[command(name = "sessionvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Storage backend override (filesystem, sqlite, memory)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Storage location override (directory for filesystem, database file for sqlite)
    #[arg(long)]
    pub storage_path: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for SessionVault
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create a new, empty session
    New {
        /// Session name
        #[arg(short, long)]
        name: Option<String>,

        /// System prompt for the conversation
        #[arg(short, long)]
        system_prompt: Option<String>,

        /// Tags to attach (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },

    /// List stored sessions, most recent first
    List,

    /// Show a session's details and messages
    Show {
        /// Session ID
        id: String,
    },

    /// Delete a session
    Delete {
        /// Session ID
        id: String,
    },

    /// Search sessions by name, tag, system prompt and message content
    Search {
        /// Text to search for
        query: String,
    },

    /// Export a session as JSON or Markdown
    Export {
        /// Session ID
        id: String,

        /// Output format (json, markdown)
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fork a session at a message index
    Branch {
        /// Parent session ID
        parent: String,

        /// Number of leading messages the branch keeps; defaults to all
        #[arg(short, long)]
        at: Option<usize>,

        /// Branch name
        #[arg(short, long, default_value = "")]
        name: String,

        /// Explicit ID for the new branch
        #[arg(long, default_value = "")]
        id: String,
    },

    /// List the direct branches of a session
    Children {
        /// Parent session ID
        id: String,
    },

    /// Print the branch tree rooted at a session
    Tree {
        /// Root session ID
        id: String,
    },

    /// Merge one session's messages into another
    Merge {
        /// Session receiving the messages
        target: String,

        /// Session providing the messages
        source: String,

        /// Merge type (continuation, rebase)
        #[arg(short = 't', long = "type", default_value = "continuation")]
        merge_type: String,

        /// Write the result to a new branch of the target
        #[arg(long)]
        new_branch: bool,

        /// Name of the new branch
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Re-register branches missing from their parent's child list
    Repair,

    /// Inspect or restore the crash-recovery snapshot
    Recover {
        /// Restore the snapshot instead of only reporting it
        #[arg(long)]
        apply: bool,

        /// Remove the recovery file
        #[arg(long, conflicts_with = "apply")]
        clear: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
