//! Run configuration.
//!
//! Read once at startup from a TOML file, overlaid with `ZDEB_*` environment
//! variables, validated, and then passed by reference to every component.
//! Nothing below `main` reads the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use zdeb_schema::{Arch, PatchTable};

use crate::error::SyncError;
use crate::retry::RetryPolicy;

/// Default upstream manifest template. `{arch}` is the upstream architecture name.
pub const DEFAULT_MANIFEST_URL: &str =
    "https://www.zotero.org/download/client/manifests/release/updates-linux-{arch}.json";

/// Default upstream bundle template.
pub const DEFAULT_DOWNLOAD_URL: &str = "https://www.zotero.org/download/client/dl?channel=release&platform=linux-{arch}&version={version}";

/// Upstream files dropped while unpacking: the desktop entry is replaced by
/// ours and the updater files are neutralised.
pub const DEFAULT_EXCLUDED_FILES: &[&str] = &[
    "zotero.desktop",
    "active-update.xml",
    "precomplete",
    "removed-files",
    "updates",
    "updates.xml",
    "update-settings.ini",
    "updater",
    "updater.ini",
];

/// Environment lookup used to overlay the file configuration.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read a variable from the real process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Public repository settings.
    pub repository: RepositoryConfig,
    /// Where published objects live.
    pub store: StoreConfig,
    /// Signing identity and tools.
    pub signing: SigningConfig,
    /// Package metadata and layout.
    pub package: PackageConfig,
    /// Upstream endpoints and target architectures.
    pub upstream: UpstreamConfig,
    /// Packaging revisions per version (and architecture).
    pub patches: PatchTable,
    /// Local build settings.
    pub build: BuildConfig,
    /// Retry policy for upstream HTTP calls.
    pub retry: RetryPolicy,
}

/// Public repository settings.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Base URL the repository is served from, without trailing slash.
    pub site_url: String,
    /// `Origin:` field of the `Release` file.
    pub origin: String,
    /// `Label:` field of the `Release` file.
    pub label: String,
    /// Object key of the exported public key.
    pub key_file: String,
}

/// Backend of the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// S3-compatible bucket.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Endpoint URL (empty for AWS default).
        endpoint: Option<String>,
        /// Region (`auto` for R2-style endpoints).
        region: String,
        /// Access key id, from `ZDEB_STORE_ACCESS_KEY`.
        access_key: Option<String>,
        /// Secret key, from `ZDEB_STORE_SECRET_KEY`.
        secret_key: Option<String>,
    },
    /// A local directory (e.g. a static web root).
    Fs {
        /// Directory that holds the published objects.
        root: PathBuf,
    },
}

/// Signing identity and tool locations.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    /// GPG key id, fingerprint, or user id.
    pub key: String,
    /// Optional `GNUPGHOME`.
    pub gpg_home: Option<PathBuf>,
    /// `gpg` executable.
    pub gpg: String,
    /// `dpkg-sig` executable.
    pub dpkg_sig: String,
    /// Upper bound for one signing tool invocation.
    pub timeout: Duration,
}

/// Package metadata and filesystem layout.
#[derive(Debug, Clone)]
pub struct PackageConfig {
    /// Debian package name and artifact name prefix.
    pub name: String,
    /// `Maintainer:` field.
    pub maintainer: String,
    /// `Section:` field.
    pub section: String,
    /// `Priority:` field.
    pub priority: String,
    /// One-line `Description:`.
    pub description: String,
    /// Optional `Homepage:` field.
    pub homepage: Option<String>,
    /// Install directory relative to `/`.
    pub install_dir: String,
    /// Executable inside `install_dir`, linked from `/usr/local/bin`.
    pub binary: String,
    /// Package whose dependency list is borrowed.
    pub reference_package: String,
    /// Dependency of the reference package that is not carried over.
    pub exclude_dependency: Option<String>,
    /// Dependency always added.
    pub extra_dependency: Option<String>,
    /// Upstream paths (relative to the bundle root) that are not unpacked.
    pub excluded_files: Vec<String>,
}

/// Upstream endpoints.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Manifest URL template with an `{arch}` placeholder.
    pub manifest_url: String,
    /// Bundle URL template with `{arch}` and `{version}` placeholders.
    pub download_url: String,
    /// Architectures to mirror.
    pub architectures: Vec<Arch>,
}

/// Which packager implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackagerKind {
    /// Shell out to `dpkg-deb`.
    DpkgDeb,
    /// Write the archive in-process.
    Native,
}

/// Local build settings.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Working directory holding the local inventory and scratch space.
    pub workdir: PathBuf,
    /// Maximum concurrent builds, fetches, and uploads.
    pub parallel: usize,
    /// Packager implementation.
    pub packager: PackagerKind,
}

impl BuildConfig {
    /// Directory holding the local inventory (the flat repository).
    pub fn repo_dir(&self) -> PathBuf {
        self.workdir.join("repo")
    }

    /// Parent of the per-build scratch directories.
    pub fn scratch_dir(&self) -> PathBuf {
        self.workdir.join("tmp")
    }
}

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    repository: RepositorySection,
    store: StoreSection,
    signing: SigningSection,
    package: PackageSection,
    upstream: UpstreamSection,
    patches: PatchTable,
    build: BuildSection,
    retry: RetryPolicy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RepositorySection {
    site_url: Option<String>,
    origin: Option<String>,
    label: Option<String>,
    key_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StoreSection {
    kind: Option<String>,
    bucket: Option<String>,
    endpoint: Option<String>,
    region: Option<String>,
    root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SigningSection {
    key: Option<String>,
    gpg_home: Option<PathBuf>,
    gpg: Option<String>,
    dpkg_sig: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PackageSection {
    name: Option<String>,
    maintainer: Option<String>,
    section: Option<String>,
    priority: Option<String>,
    description: Option<String>,
    homepage: Option<String>,
    install_dir: Option<String>,
    binary: Option<String>,
    reference_package: Option<String>,
    exclude_dependency: Option<String>,
    extra_dependency: Option<String>,
    excluded_files: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct UpstreamSection {
    manifest_url: Option<String>,
    download_url: Option<String>,
    architectures: Option<Vec<Arch>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BuildSection {
    workdir: Option<PathBuf>,
    parallel: Option<usize>,
    packager: Option<PackagerKind>,
}

fn required(value: Option<String>, key: &str) -> Result<String, SyncError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SyncError::config(key, "missing required value"))
}

fn is_valid_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && name.len() >= 2
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
}

impl Config {
    /// Load and resolve configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConfigInvalid`] if the file cannot be read or
    /// parsed, or if a required key is missing after applying `env`.
    pub fn load(path: &Path, env: EnvLookup<'_>) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::config("config", format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content, env)
    }

    /// Resolve configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConfigInvalid`] on parse errors, missing
    /// required keys, or malformed values.
    pub fn from_toml_str(content: &str, env: EnvLookup<'_>) -> Result<Self, SyncError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| SyncError::config("config", e.message()))?;
        Self::resolve(file, env)
    }

    fn resolve(file: ConfigFile, env: EnvLookup<'_>) -> Result<Self, SyncError> {
        let repository = RepositoryConfig {
            site_url: required(
                env("ZDEB_SITE_URL").or(file.repository.site_url),
                "repository.site_url",
            )?
            .trim_end_matches('/')
            .to_string(),
            origin: file.repository.origin.unwrap_or_else(|| "zdeb".to_string()),
            label: file.repository.label.unwrap_or_else(|| "zdeb".to_string()),
            key_file: file
                .repository
                .key_file
                .unwrap_or_else(|| "deb.gpg.key".to_string()),
        };

        let store = match file.store.kind.as_deref().unwrap_or("s3") {
            "s3" => StoreConfig::S3 {
                bucket: required(env("ZDEB_STORE_BUCKET").or(file.store.bucket), "store.bucket")?,
                endpoint: env("ZDEB_STORE_ENDPOINT").or(file.store.endpoint),
                region: env("ZDEB_STORE_REGION")
                    .or(file.store.region)
                    .unwrap_or_else(|| "auto".to_string()),
                access_key: env("ZDEB_STORE_ACCESS_KEY"),
                secret_key: env("ZDEB_STORE_SECRET_KEY"),
            },
            "fs" => StoreConfig::Fs {
                root: env("ZDEB_STORE_ROOT")
                    .map(PathBuf::from)
                    .or(file.store.root)
                    .ok_or_else(|| SyncError::config("store.root", "missing required value"))?,
            },
            other => {
                return Err(SyncError::config(
                    "store.kind",
                    format!("unknown store kind '{other}' (expected 's3' or 'fs')"),
                ));
            }
        };

        let signing = SigningConfig {
            key: required(env("ZDEB_SIGNING_KEY").or(file.signing.key), "signing.key")?,
            gpg_home: env("GNUPGHOME").map(PathBuf::from).or(file.signing.gpg_home),
            gpg: file.signing.gpg.unwrap_or_else(|| "gpg".to_string()),
            dpkg_sig: file.signing.dpkg_sig.unwrap_or_else(|| "dpkg-sig".to_string()),
            timeout: Duration::from_secs(file.signing.timeout_secs.unwrap_or(120)),
        };

        let p = file.package;
        let name = p.name.unwrap_or_else(|| "zotero".to_string());
        if !is_valid_package_name(&name) {
            return Err(SyncError::config(
                "package.name",
                format!("'{name}' is not a valid Debian package name"),
            ));
        }
        let package = PackageConfig {
            maintainer: required(env("ZDEB_MAINTAINER").or(p.maintainer), "package.maintainer")?,
            section: p.section.unwrap_or_else(|| "science".to_string()),
            priority: p.priority.unwrap_or_else(|| "optional".to_string()),
            description: p.description.unwrap_or_else(|| {
                "Zotero is a free, easy-to-use tool to help you collect, organize, cite, and share research".to_string()
            }),
            homepage: p.homepage.or_else(|| Some("https://www.zotero.org".to_string())),
            install_dir: p
                .install_dir
                .unwrap_or_else(|| format!("usr/lib/{name}"))
                .trim_matches('/')
                .to_string(),
            binary: p.binary.unwrap_or_else(|| name.clone()),
            reference_package: p.reference_package.unwrap_or_else(|| "firefox-esr".to_string()),
            exclude_dependency: p.exclude_dependency.or_else(|| Some("lsb-release".to_string())),
            extra_dependency: p
                .extra_dependency
                .or_else(|| Some("libdbus-glib-1-2".to_string())),
            excluded_files: p.excluded_files.unwrap_or_else(|| {
                DEFAULT_EXCLUDED_FILES.iter().map(ToString::to_string).collect()
            }),
            name,
        };

        let upstream = UpstreamConfig {
            manifest_url: file
                .upstream
                .manifest_url
                .unwrap_or_else(|| DEFAULT_MANIFEST_URL.to_string()),
            download_url: file
                .upstream
                .download_url
                .unwrap_or_else(|| DEFAULT_DOWNLOAD_URL.to_string()),
            architectures: file
                .upstream
                .architectures
                .unwrap_or_else(|| Arch::ALL.to_vec()),
        };
        if !upstream.manifest_url.contains("{arch}") {
            return Err(SyncError::config(
                "upstream.manifest_url",
                "template must contain {arch}",
            ));
        }
        if !upstream.download_url.contains("{version}") {
            return Err(SyncError::config(
                "upstream.download_url",
                "template must contain {version}",
            ));
        }
        if upstream.architectures.is_empty() {
            return Err(SyncError::config("upstream.architectures", "empty list"));
        }

        let build = BuildConfig {
            workdir: env("ZDEB_WORKDIR")
                .map(PathBuf::from)
                .or(file.build.workdir)
                .unwrap_or_else(|| PathBuf::from("work")),
            parallel: file.build.parallel.unwrap_or_else(num_cpus::get).max(1),
            packager: file.build.packager.unwrap_or(PackagerKind::DpkgDeb),
        };

        if file.retry.max_attempts == 0 || file.retry.multiplier < 1.0 {
            return Err(SyncError::config(
                "retry",
                "max_attempts must be >= 1 and multiplier >= 1.0",
            ));
        }

        Ok(Self {
            repository,
            store,
            signing,
            package,
            upstream,
            patches: file.patches,
            build,
            retry: file.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
        [repository]
        site_url = "https://example.org/apt/"

        [store]
        bucket = "apt-archive"

        [signing]
        key = "DEADBEEF"

        [package]
        maintainer = "Jane Doe <jane@example.org>"
    "#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config = Config::from_toml_str(MINIMAL, &no_env).unwrap();
        assert_eq!(config.repository.site_url, "https://example.org/apt");
        assert_eq!(config.package.name, "zotero");
        assert_eq!(config.package.install_dir, "usr/lib/zotero");
        assert_eq!(config.upstream.architectures, vec![Arch::Amd64, Arch::I386]);
        assert_eq!(config.build.packager, PackagerKind::DpkgDeb);
        assert!(config.patches.is_empty());
        assert!(matches!(config.store, StoreConfig::S3 { ref bucket, .. } if bucket == "apt-archive"));
    }

    #[test]
    fn missing_signing_key_is_config_invalid() {
        let content = MINIMAL.replace("key = \"DEADBEEF\"", "");
        let err = Config::from_toml_str(&content, &no_env).unwrap_err();
        assert!(matches!(err, SyncError::ConfigInvalid { ref key, .. } if key == "signing.key"));
    }

    #[test]
    fn env_overrides_file() {
        let vars: HashMap<&str, &str> = [
            ("ZDEB_STORE_BUCKET", "other-bucket"),
            ("ZDEB_STORE_ACCESS_KEY", "AKIA"),
            ("ZDEB_SIGNING_KEY", "CAFEBABE"),
        ]
        .into_iter()
        .collect();
        let env = |k: &str| vars.get(k).map(ToString::to_string);
        let config = Config::from_toml_str(MINIMAL, &env).unwrap();

        assert_eq!(config.signing.key, "CAFEBABE");
        match config.store {
            StoreConfig::S3 {
                bucket, access_key, ..
            } => {
                assert_eq!(bucket, "other-bucket");
                assert_eq!(access_key.as_deref(), Some("AKIA"));
            }
            StoreConfig::Fs { .. } => panic!("expected s3 store"),
        }
    }

    #[test]
    fn patch_table_and_fs_store() {
        let content = format!(
            "{}\n[patches]\n\"6.0.27-amd64\" = \"p1\"\n",
            MINIMAL.replace("bucket = \"apt-archive\"", "kind = \"fs\"\nroot = \"/srv/apt\"")
        );
        let config = Config::from_toml_str(&content, &no_env).unwrap();
        assert_eq!(config.patches.len(), 1);
        assert_eq!(
            config.store,
            StoreConfig::Fs {
                root: PathBuf::from("/srv/apt")
            }
        );
    }

    #[test]
    fn rejects_bad_package_name_and_templates() {
        let bad_name = format!("{MINIMAL}\nname = \"Zotero_App\"\n");
        assert!(Config::from_toml_str(&bad_name, &no_env).is_err());

        let bad_template = format!(
            "{MINIMAL}\n[upstream]\nmanifest_url = \"https://example.org/manifest.json\"\n"
        );
        let err = Config::from_toml_str(&bad_template, &no_env).unwrap_err();
        assert!(err.to_string().contains("upstream.manifest_url"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let content = format!("{MINIMAL}\n[build]\nparalel = 3\n");
        assert!(Config::from_toml_str(&content, &no_env).is_err());
    }
}
