//! Index command

use std::path::Path;

use anyhow::Result;

/// Regenerate and sign the repository index from local files only.
pub async fn index(config: &Path) -> Result<()> {
    let config = super::load_config(config)?;
    let written = super::synchronizer(&config)?.regenerate_metadata().await?;
    for key in &written {
        println!("  wrote {key}");
    }
    println!("index written to {}", config.build.repo_dir().display());
    Ok(())
}
