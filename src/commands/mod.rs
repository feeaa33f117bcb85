/*!
Command handlers for the CLI

Each handler opens nothing itself: it receives the configured
[`StorageManager`](crate::storage::StorageManager) from the entrypoint and
prints its result to stdout.

- `sessions`: new, list, show, delete, search, export
- `branches`: branch, children, tree, merge, repair
- `recover`: inspect, restore or clear the crash-recovery snapshot
*/

pub mod branches;
pub mod recover;
pub mod sessions;

use crate::cli::Commands;
use crate::config::Config;
use crate::error::Result;
use crate::storage::StorageManager;

/// Dispatch a parsed command
pub fn execute(command: Commands, config: &Config, storage: &StorageManager) -> Result<()> {
    match command {
        Commands::New {
            name,
            system_prompt,
            tags,
        } => sessions::create_session(storage, name, system_prompt, tags),
        Commands::List => sessions::list_sessions(storage),
        Commands::Show { id } => sessions::show_session(storage, &id),
        Commands::Delete { id } => sessions::delete_session(storage, &id),
        Commands::Search { query } => sessions::search_sessions(storage, &query),
        Commands::Export { id, format, output } => {
            sessions::export_session(storage, &id, &format, output)
        }
        Commands::Branch {
            parent,
            at,
            name,
            id,
        } => branches::create_branch(storage, &parent, at, &name, &id),
        Commands::Children { id } => branches::list_children(storage, &id),
        Commands::Tree { id } => branches::show_tree(storage, &id),
        Commands::Merge {
            target,
            source,
            merge_type,
            new_branch,
            name,
        } => branches::merge(storage, &target, &source, &merge_type, new_branch, name),
        Commands::Repair => branches::repair(storage),
        Commands::Recover { apply, clear } => {
            recover::recover(&config.recovery, storage, apply, clear)
        }
    }
}
