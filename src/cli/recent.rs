//! CLI `recent` command: show or extend an owner's rolling context.

use anyhow::Result;

use nino_memory::config::MemoryConfig;
use nino_memory::memory::open_store;

pub async fn recent(config: &MemoryConfig, owner: &str, push: Option<&str>) -> Result<()> {
    let store = open_store(config).await?;

    let pushed = match push {
        Some(line) => store.add_recent_message(owner, line).await,
        None => Ok(()),
    };
    let lines = match pushed {
        Ok(()) => store.get_recent_messages(owner).await,
        Err(e) => Err(e),
    };
    store.shutdown();
    let lines = lines?;

    if lines.is_empty() {
        println!("No rolling context for {owner}.");
        return Ok(());
    }
    for line in &lines {
        println!("{line}");
    }
    Ok(())
}
