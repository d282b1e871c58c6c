//! CLI `ping` command: check the configured backend and print a short report.

use anyhow::{Context, Result};

use nino_memory::config::{Backend, MemoryConfig};
use nino_memory::db::Connection;

pub async fn ping(config: &MemoryConfig) -> Result<()> {
    println!("Memory Backend Report");
    println!("=====================");
    println!();

    match config.storage.backend {
        Backend::Local => {
            let dir = config.resolved_local_dir();
            println!("Backend:           local");
            println!("Directory:         {}", dir.display());
            let owners = match std::fs::read_dir(&dir) {
                Ok(entries) => entries.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()).count(),
                Err(_) => {
                    println!("Status:            not created yet");
                    return Ok(());
                }
            };
            println!("Owners:            {owners}");
            println!("Status:            OK");
        }
        Backend::Remote => {
            let conn_config = config.remote.connection_config()?;
            println!("Backend:           remote");
            println!("Endpoint:          {}", conn_config.url);
            println!("Namespace:         {}/{}", conn_config.namespace, conn_config.database);

            let started = std::time::Instant::now();
            let conn = Connection::connect(conn_config)
                .await
                .context("handshake failed")?;
            let probe = conn.ping().await;
            let elapsed = started.elapsed();
            let state = conn.state();
            conn.close();
            probe.context("liveness probe failed")?;

            println!("State:             {state}");
            println!("Round trip:        {} ms", elapsed.as_millis());
            println!("Status:            OK");
        }
    }

    Ok(())
}
