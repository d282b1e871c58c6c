//! CLI `clear` and `forget` commands.

use anyhow::{bail, Result};
use std::io::Write;

use nino_memory::config::MemoryConfig;
use nino_memory::memory::open_store;

/// Drop the rolling context for `owner`. Long-term memories are kept.
pub async fn clear(config: &MemoryConfig, owner: &str) -> Result<()> {
    let store = open_store(config).await?;
    let outcome = store.clear_recent_messages(owner).await;
    store.shutdown();
    outcome?;

    println!("Rolling context cleared for {owner}.");
    Ok(())
}

/// Delete everything stored for `owner` after user confirmation.
pub async fn forget(config: &MemoryConfig, owner: &str, yes: bool) -> Result<()> {
    if !yes {
        println!("WARNING: This will permanently delete ALL memories and rolling context for {owner}.");
        print!("\nType YES to confirm: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if input.trim() != "YES" {
            bail!("forget cancelled");
        }
    }

    let store = open_store(config).await?;
    let outcome = store.delete_user_data(owner).await;
    store.shutdown();
    outcome?;

    println!("All data for {owner} deleted.");
    Ok(())
}
