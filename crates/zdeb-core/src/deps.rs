//! Declared dependencies, borrowed from a reference package.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;

use crate::tool;

/// Source of a reference package's raw `Depends:` value.
#[async_trait]
pub trait DependencySource: Send + Sync {
    /// Raw `Depends:` field of `package` in the target distribution.
    async fn depends_of(&self, package: &str) -> Result<String>;
}

/// Queries the host's package index with `apt-cache show`.
#[derive(Debug, Clone)]
pub struct AptCache {
    timeout: Duration,
}

impl AptCache {
    /// Create a source that gives up on `apt-cache` after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DependencySource for AptCache {
    async fn depends_of(&self, package: &str) -> Result<String> {
        let mut cmd = Command::new("apt-cache");
        cmd.arg("show").arg(package);
        let out = tool::run(cmd, "apt-cache", None, self.timeout).await?;
        let text = String::from_utf8_lossy(&out);
        depends_field(&text).ok_or_else(|| anyhow!("{package} has no Depends field"))
    }
}

/// A fixed `Depends:` value, for hosts without an apt index.
#[derive(Debug, Clone)]
pub struct StaticDependencies(pub String);

#[async_trait]
impl DependencySource for StaticDependencies {
    async fn depends_of(&self, _package: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// `Depends:` of the first stanza in `apt-cache show` output, with
/// continuation lines folded.
pub fn depends_field(show: &str) -> Option<String> {
    let stanza = show.split("\n\n").next()?;
    let mut lines = stanza.lines().skip_while(|l| !l.starts_with("Depends:"));
    let first = lines.next()?.trim_start_matches("Depends:").trim().to_string();
    let rest = lines
        .take_while(|l| l.starts_with([' ', '\t']))
        .map(str::trim);
    let mut value = first;
    for cont in rest {
        value.push(' ');
        value.push_str(cont);
    }
    Some(value)
}

fn first_package(group: &str) -> &str {
    group
        .split('|')
        .next()
        .and_then(|alt| alt.split_whitespace().next())
        .map_or("", |name| name.split(':').next().unwrap_or(name))
}

/// Final dependency string: the reference list without `exclude`, plus
/// `extra`, de-duplicated and sorted. Alternatives (`a | b`) stay grouped.
pub fn compute_depends(reference: &str, exclude: Option<&str>, extra: Option<&str>) -> String {
    let mut groups: BTreeSet<String> = reference
        .split(',')
        .map(|g| g.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|g| !g.is_empty())
        .filter(|g| exclude.is_none_or(|ex| first_package(g) != ex))
        .collect();
    if let Some(extra) = extra.map(str::trim).filter(|e| !e.is_empty()) {
        groups.insert(extra.to_string());
    }
    groups.into_iter().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW: &str = "\
Package: firefox-esr
Version: 115.9.1esr-1~deb12u1
Depends: libc6 (>= 2.36), libgtk-3-0 (>= 3.13.7),
 lsb-release, libx11-6,
 libasound2 (>= 1.0.16) | libasound2t64
Recommends: libavcodec59
Description: Mozilla Firefox web browser

Package: firefox-esr
Version: 102.0
Depends: libc6
";

    #[test]
    fn reads_first_stanza_with_continuations() {
        let depends = depends_field(SHOW).unwrap();
        assert!(depends.starts_with("libc6 (>= 2.36)"));
        assert!(depends.contains("lsb-release"));
        assert!(depends.ends_with("| libasound2t64"));
        assert!(!depends.contains("libavcodec59"));
    }

    #[test]
    fn missing_field_is_none() {
        assert_eq!(depends_field("Package: foo\nVersion: 1\n"), None);
    }

    #[test]
    fn exclusion_extra_and_sorting() {
        let reference = depends_field(SHOW).unwrap();
        let result = compute_depends(&reference, Some("lsb-release"), Some("libdbus-glib-1-2"));
        assert_eq!(
            result,
            "libasound2 (>= 1.0.16) | libasound2t64, libc6 (>= 2.36), \
             libdbus-glib-1-2, libgtk-3-0 (>= 3.13.7), libx11-6"
        );
    }

    #[test]
    fn duplicates_collapse() {
        let result = compute_depends("libc6, libc6 ,libx11-6", None, Some("libc6"));
        assert_eq!(result, "libc6, libx11-6");
    }

    #[test]
    fn exclusion_matches_package_name_not_prefix() {
        let result = compute_depends("lsb-release-minimal, lsb-release (>= 1)", Some("lsb-release"), None);
        assert_eq!(result, "lsb-release-minimal");
    }
}
