//! Crash-recovery command

use colored::Colorize;

use crate::config::RecoveryConfig;
use crate::context::SessionContext;
use crate::error::Result;
use crate::recovery::AutoRecoveryManager;
use crate::storage::types::short_id;
use crate::storage::StorageManager;

/// Report, restore or clear the recovery snapshot
pub fn recover(
    config: &RecoveryConfig,
    storage: &StorageManager,
    apply: bool,
    clear: bool,
) -> Result<()> {
    let manager = AutoRecoveryManager::new(config.clone(), storage.clone(), SessionContext::new())?;

    if clear {
        manager.clear_recovery()?;
        println!("{}", "Recovery file cleared.".green());
        return Ok(());
    }

    let Some(state) = manager.check_recovery()? else {
        println!("{}", "No recovery snapshot found.".yellow());
        return Ok(());
    };

    println!(
        "Recovery snapshot for {} {} from {} ({} messages, {} backend)",
        short_id(&state.session_id).cyan(),
        state.session_name.as_deref().unwrap_or("-"),
        state.timestamp.format("%Y-%m-%d %H:%M:%S"),
        state.conversation_data.messages.len(),
        state.storage_backend
    );

    if apply {
        let session = manager.recover_session(&state)?;
        manager.clear_recovery()?;
        println!("{} {}", "Recovered session".green(), session.id);
    } else {
        println!("Run with {} to restore it.", "--apply".cyan());
    }
    Ok(())
}
