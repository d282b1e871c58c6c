pub mod ping;
pub mod recent;
pub mod reset;
pub mod search;

use anyhow::{Context, Result};

use nino_memory::config::MemoryConfig;
use nino_memory::embedding::create_provider;

/// Parse a comma-separated vector such as `0.1,0.2,0.3`.
pub fn parse_vector(raw: &str) -> Result<Vec<f32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let value = part
                .parse::<f32>()
                .with_context(|| format!("invalid vector component: {part:?}"))?;
            anyhow::ensure!(value.is_finite(), "vector component is not finite: {part:?}");
            Ok(value)
        })
        .collect()
}

/// Use the explicit `--vector` if given, otherwise embed `text` with the
/// configured provider.
pub async fn vector_for(config: &MemoryConfig, text: &str, explicit: Option<&str>) -> Result<Vec<f32>> {
    if let Some(raw) = explicit {
        return parse_vector(raw);
    }
    let provider = create_provider(&config.embedding)
        .context("no --vector given and no embedding provider available")?;
    provider.embed(text).await
}

fn preview(text: &str) -> String {
    if text.chars().count() > 120 {
        let cut: String = text.chars().take(120).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}
