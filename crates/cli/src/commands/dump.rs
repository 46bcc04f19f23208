use anyhow::{Context, Result};
use tracing::info;

use dbmigrate_engine::SchemaDumper;

use super::migrate::{load_config, load_targets};

/// Dump the schema of the first configured database
pub async fn run() -> Result<()> {
    let config = load_config()?;
    let targets = load_targets(&config)?;
    let target = &targets[0];
    if targets.len() > 1 {
        info!(targets = targets.len(), "Several databases configured, dumping the first");
    }

    let path = SchemaDumper::new(&config)
        .dump(target)
        .await
        .with_context(|| format!("schema dump of {} failed", target.display_name()))?;
    println!("Schema of {} written to {}", target.display_name(), path.display());
    Ok(())
}
