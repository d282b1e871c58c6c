//! CLI `add` and `search` commands.

use anyhow::Result;

use nino_memory::config::MemoryConfig;
use nino_memory::memory::open_store;

/// Store one long-term memory for `owner`.
pub async fn add(config: &MemoryConfig, owner: &str, text: &str, vector: Option<&str>) -> Result<()> {
    let vector = super::vector_for(config, text, vector).await?;
    let store = open_store(config).await?;

    let outcome = store.add(owner, text, &vector).await;
    store.shutdown();
    match outcome {
        Ok(()) => println!("Stored memory for {owner} ({} dims).", vector.len()),
        Err(e) if e.is_duplicate() => println!("Already stored for {owner}; nothing to do."),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Run a similarity search from the terminal.
pub async fn search(
    config: &MemoryConfig,
    owner: &str,
    query: &str,
    k: usize,
    vector: Option<&str>,
) -> Result<()> {
    let query_vector = super::vector_for(config, query, vector).await?;
    let store = open_store(config).await?;

    let results = store.search(owner, &query_vector, k).await;
    store.shutdown();
    let results = results?;

    if results.is_empty() {
        println!("No memories found.");
        return Ok(());
    }

    println!("Found {} memory(ies) for {owner}\n", results.len());
    for (i, text) in results.iter().enumerate() {
        println!("  {}. {}", i + 1, super::preview(text));
    }
    Ok(())
}
