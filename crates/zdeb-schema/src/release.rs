//! Resolved releases, the patch-suffix table and artifact naming.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Arch, PatchSuffix, Version};

/// File extension of every package artifact.
pub const ARTIFACT_EXTENSION: &str = "deb";

/// Lookup table of packaging revisions, keyed by `"{version}-{arch}"` or
/// `"{version}"`.
///
/// The architecture-specific key always wins over the version-only key.
///
/// # Example
///
/// ```
/// use zdeb_schema::{Arch, PatchTable, Version};
///
/// let mut table = PatchTable::default();
/// table.insert("6.0.27-amd64", "p1").unwrap();
///
/// let v = Version::parse("6.0.27").unwrap();
/// assert_eq!(table.lookup(&v, Arch::Amd64).map(|p| p.as_str()), Some("p1"));
/// assert!(table.lookup(&v, Arch::I386).is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchTable(BTreeMap<String, PatchSuffix>);

impl PatchTable {
    /// Add an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if `suffix` is not a valid [`PatchSuffix`].
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        suffix: &str,
    ) -> Result<(), crate::NameError> {
        self.0.insert(key.into(), PatchSuffix::parse(suffix)?);
        Ok(())
    }

    /// Resolve the suffix for a `(version, arch)` pair.
    pub fn lookup(&self, version: &Version, arch: Arch) -> Option<&PatchSuffix> {
        let specific = format!("{version}-{}", arch.deb_label());
        self.0
            .get(&specific)
            .or_else(|| self.0.get(version.as_str()))
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One upstream version targeted for one architecture.
///
/// Immutable once resolved: the patch suffix is looked up at construction
/// time and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Release {
    version: Version,
    arch: Arch,
    patch: Option<PatchSuffix>,
}

impl Release {
    /// Create a release with an explicit (possibly absent) suffix.
    pub fn new(version: Version, arch: Arch, patch: Option<PatchSuffix>) -> Self {
        Self {
            version,
            arch,
            patch,
        }
    }

    /// Create a release, resolving its suffix from `patches`.
    pub fn resolve(version: Version, arch: Arch, patches: &PatchTable) -> Self {
        let patch = patches.lookup(&version, arch).cloned();
        Self::new(version, arch, patch)
    }

    /// Upstream version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Target architecture.
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Packaging revision, if any.
    pub fn patch(&self) -> Option<&PatchSuffix> {
        self.patch.as_ref()
    }

    /// Version string as written into the package control file.
    pub fn deb_version(&self) -> String {
        match &self.patch {
            Some(p) => format!("{}-{p}", self.version),
            None => self.version.to_string(),
        }
    }
}

impl std::fmt::Display for Release {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.deb_version(), self.arch)
    }
}

/// Canonical filename of a package artifact:
/// `{product}_{version}[-{patch}]_{arch}.deb`.
///
/// Derived only from the product and [`Release`] fields, so equal inputs
/// always give equal names. This equality is the sole "already exists" test
/// used against both the local and remote inventories.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactName(String);

impl ArtifactName {
    /// Derive the artifact name for `release`.
    pub fn new(product: &str, release: &Release) -> Self {
        Self(format!(
            "{product}_{}_{}.{ARTIFACT_EXTENSION}",
            release.deb_version(),
            release.arch.deb_label()
        ))
    }

    /// Return the filename as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a store key or filename looks like a package artifact.
    pub fn is_artifact_key(key: &str) -> bool {
        std::path::Path::new(key)
            .extension()
            .is_some_and(|ext| ext == ARTIFACT_EXTENSION)
    }
}

impl std::fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ArtifactName {
    fn borrow(&self) -> &str {
        &self.0
    }
}
