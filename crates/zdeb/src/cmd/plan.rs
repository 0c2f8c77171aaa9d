//! Plan command

use std::path::Path;

use anyhow::Result;

/// Compare upstream with the local working directory without mirroring.
pub async fn plan(config: &Path) -> Result<()> {
    let config = super::load_config(config)?;
    let plan = super::synchronizer(&config)?.plan_only().await?;

    let missing: std::collections::BTreeSet<_> = plan.gap.iter().collect();
    for (release, name) in &plan.required {
        let mark = if missing.contains(release) { '+' } else { ' ' };
        println!("{mark} {name}");
    }
    println!(
        "{} required, {} missing locally",
        plan.required.len(),
        plan.gap.len()
    );
    Ok(())
}
