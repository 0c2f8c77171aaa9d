//! Name command

use std::path::Path;

use anyhow::Result;
use zdeb_schema::{Arch, ArtifactName, PatchTable, Release, Version};

/// Print the artifact file name a release is published under.
pub fn name(version: &str, arch: Arch, config: Option<&Path>, product: &str) -> Result<()> {
    let version = Version::parse(version)?;
    let (product, patches) = match config {
        Some(path) => {
            let config = super::load_config(path)?;
            (config.package.name, config.patches)
        }
        None => (product.to_string(), PatchTable::default()),
    };
    let release = Release::resolve(version, arch, &patches);
    println!("{}", ArtifactName::new(&product, &release));
    Ok(())
}
