//! CPU architectures and their upstream/Debian spellings.

/// Target CPU architecture of a mirrored release.
///
/// Upstream and Debian disagree on naming: upstream publishes `x86_64` and
/// `i686` bundles, while the repository labels the resulting packages
/// `amd64` and `i386`. Both spellings parse to the same variant.
///
/// # Example
///
/// ```
/// use zdeb_schema::Arch;
///
/// let arch: Arch = "x86_64".parse().unwrap();
/// assert_eq!(arch, Arch::Amd64);
/// assert_eq!(arch.deb_label(), "amd64");
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// 64-bit x86 (`x86_64` upstream, `amd64` in Debian).
    #[serde(alias = "x86_64")]
    Amd64,
    /// 32-bit x86 (`i686` upstream, `i386` in Debian).
    #[serde(alias = "i686")]
    I386,
}

impl Arch {
    /// Every architecture the repository can carry, in publication order.
    pub const ALL: [Arch; 2] = [Arch::Amd64, Arch::I386];

    /// Debian architecture label, used in artifact names and control files.
    pub fn deb_label(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::I386 => "i386",
        }
    }

    /// Architecture name used by the upstream manifest and download URLs.
    pub fn upstream_name(&self) -> &'static str {
        match self {
            Self::Amd64 => "x86_64",
            Self::I386 => "i686",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.deb_label())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "amd64" | "x86_64" | "x86-64" => Ok(Self::Amd64),
            "i386" | "i686" | "x86" => Ok(Self::I386),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}
