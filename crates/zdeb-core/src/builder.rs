//! Package Builder: upstream bundle in, signed `.deb` out.
//!
//! Every step runs inside a per-build scratch directory under
//! `<workdir>/tmp`. The finished archive is moved into the repository
//! directory only after packaging and signing succeed, so a failed or
//! cancelled build never leaves a partial artifact behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::OnceCell;
use zdeb_schema::{ArtifactName, Release};

use crate::catalog::expand_url;
use crate::config::{Config, PackageConfig};
use crate::deps::{DependencySource, compute_depends};
use crate::error::{BuildStage, SyncError};
use crate::packager::Packager;
use crate::retry::RetryPolicy;
use crate::signer::Signer;
use crate::{bundle, deb, templates};

/// Preferences that redirect the application to the locked config file.
const LOCAL_SETTINGS: &str = "\
pref(\"general.config.obscure_value\", 0);
pref(\"general.config.filename\", \"mozilla.cfg\");
";

/// Locked preferences that turn off the built-in updater.
const UPDATE_LOCK: &str = "\
lockPref(\"app.update.enabled\", false);
lockPref(\"app.update.auto\", false);
";

/// A signed artifact placed in the repository directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArtifact {
    /// Canonical filename.
    pub name: ArtifactName,
    /// Final location.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Produces one artifact for one release.
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    /// Build `release` and place the signed artifact in `repo_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UpstreamUnavailable`] if the bundle cannot be
    /// fetched and [`SyncError::BuildFailed`] for any later step.
    async fn build(&self, release: &Release, repo_dir: &Path) -> Result<BuiltArtifact, SyncError>;
}

#[async_trait]
impl<T: PackageBuilder + ?Sized> PackageBuilder for Arc<T> {
    async fn build(&self, release: &Release, repo_dir: &Path) -> Result<BuiltArtifact, SyncError> {
        (**self).build(release, repo_dir).await
    }
}

/// The production builder.
pub struct ArtifactBuilder {
    client: Client,
    package: PackageConfig,
    download_url: String,
    scratch_dir: PathBuf,
    retry: RetryPolicy,
    packager: Arc<dyn Packager>,
    signer: Arc<dyn Signer>,
    deps: Arc<dyn DependencySource>,
    depends: OnceCell<String>,
}

impl ArtifactBuilder {
    /// Assemble a builder from configuration and capabilities.
    pub fn new(
        config: &Config,
        client: Client,
        packager: Arc<dyn Packager>,
        signer: Arc<dyn Signer>,
        deps: Arc<dyn DependencySource>,
    ) -> Self {
        Self {
            client,
            package: config.package.clone(),
            download_url: config.upstream.download_url.clone(),
            scratch_dir: config.build.scratch_dir(),
            retry: config.retry,
            packager,
            signer,
            deps,
            depends: OnceCell::new(),
        }
    }

    /// The computed `Depends:` value, queried once and reused for every
    /// release in the run.
    async fn depends(&self) -> Result<&str, SyncError> {
        let value = self
            .depends
            .get_or_try_init(|| async {
                let reference = self
                    .deps
                    .depends_of(&self.package.reference_package)
                    .await
                    .map_err(|e| SyncError::build(BuildStage::Dependencies, e))?;
                Ok::<_, SyncError>(compute_depends(
                    &reference,
                    self.package.exclude_dependency.as_deref(),
                    self.package.extra_dependency.as_deref(),
                ))
            })
            .await?;
        Ok(value.as_str())
    }
}

#[async_trait]
impl PackageBuilder for ArtifactBuilder {
    async fn build(&self, release: &Release, repo_dir: &Path) -> Result<BuiltArtifact, SyncError> {
        let pkg = &self.package;
        let name = ArtifactName::new(&pkg.name, release);

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| SyncError::build(BuildStage::Prepare, e))?;
        let scratch = tempfile::Builder::new()
            .prefix("zdeb-build-")
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| SyncError::build(BuildStage::Prepare, e))?;
        let staging = scratch.path().join("root");
        let install_root = staging.join(&pkg.install_dir);

        let url = expand_url(&self.download_url, release.arch(), Some(release.version()));
        let bundle_path = scratch.path().join("bundle.tar.bz2");
        let fetched = bundle::download(&self.client, &url, &bundle_path, &self.retry)
            .await
            .map_err(|e| SyncError::upstream(&url, e))?;
        tracing::debug!("{release}: fetched {fetched} bytes from {url}");

        let unpacked = bundle::unpack(&bundle_path, &install_root, &pkg.excluded_files)
            .await
            .map_err(|e| SyncError::build(BuildStage::Unpack, e))?;
        tracing::debug!("{release}: unpacked {unpacked} entries");

        let (root, layout) = (staging.clone(), pkg.clone());
        blocking(BuildStage::Layout, move || {
            write_layout(&root, &layout).map_err(|e| SyncError::build(BuildStage::Layout, e))?;
            lock_updates(&root.join(&layout.install_dir))
                .map_err(|e| SyncError::build(BuildStage::Configure, e))
        })
        .await?;

        let depends = self.depends().await?.to_string();
        let (root, control, target) = (staging.clone(), pkg.clone(), release.clone());
        blocking(BuildStage::Control, move || {
            let installed_kib =
                installed_size_kib(&root).map_err(|e| SyncError::build(BuildStage::Control, e))?;
            deb::write_control(&root, &control_fields(&control, &target, &depends, installed_kib))
                .map_err(|e| SyncError::build(BuildStage::Control, e))
        })
        .await?;

        let unsigned = scratch.path().join(name.as_str());
        self.packager
            .package(&staging, &unsigned)
            .await
            .map_err(|e| SyncError::build(BuildStage::Package, e))?;
        self.signer
            .sign_package(&unsigned)
            .await
            .map_err(|e| SyncError::build(BuildStage::Sign, e))?;

        let dest = repo_dir.join(name.as_str());
        tokio::fs::rename(&unsigned, &dest)
            .await
            .map_err(|e| SyncError::build(BuildStage::Install, e))?;
        let size = tokio::fs::metadata(&dest)
            .await
            .map_err(|e| SyncError::build(BuildStage::Install, e))?
            .len();

        Ok(BuiltArtifact {
            name,
            path: dest,
            size,
        })
    }
}

/// Run filesystem work for `stage` off the async workers.
async fn blocking<F>(stage: BuildStage, work: F) -> Result<(), SyncError>
where
    F: FnOnce() -> Result<(), SyncError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SyncError::build(stage, e))?
}

fn display_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Desktop entry and the command-line symlink.
fn write_layout(staging: &Path, pkg: &PackageConfig) -> std::io::Result<()> {
    let apps = staging.join("usr/share/applications");
    std::fs::create_dir_all(&apps)?;
    let display = display_name(&pkg.name);
    let entry = templates::render(
        templates::DESKTOP_ENTRY,
        &[
            ("display_name", display.as_str()),
            ("install_dir", pkg.install_dir.as_str()),
            ("binary", pkg.binary.as_str()),
            ("package", pkg.name.as_str()),
        ],
    );
    std::fs::write(apps.join(format!("{}.desktop", pkg.name)), entry)?;

    let bin = staging.join("usr/local/bin");
    std::fs::create_dir_all(&bin)?;
    let link = bin.join(&pkg.binary);
    if link.symlink_metadata().is_ok() {
        std::fs::remove_file(&link)?;
    }
    std::os::unix::fs::symlink(format!("/{}/{}", pkg.install_dir, pkg.binary), link)
}

/// Append `block` to `path`, separated from existing content by a blank
/// line. A new file starts with `header` (if any).
fn append_block(path: &Path, block: &str, header: Option<&str>) -> std::io::Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };
    let content = match existing.filter(|t| !t.trim().is_empty()) {
        Some(mut text) => {
            if !text.ends_with('\n') {
                text.push('\n');
            }
            text.push('\n');
            text.push_str(block);
            text
        }
        None => format!("{}{block}", header.unwrap_or_default()),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

/// Disable the self-updater: point the app at `mozilla.cfg`, then lock the
/// update preferences there. The config parser rejects a file whose first
/// line is a statement, hence the leading comment.
fn lock_updates(install_root: &Path) -> std::io::Result<()> {
    append_block(
        &install_root.join("defaults/pref/local-settings.js"),
        LOCAL_SETTINGS,
        None,
    )?;
    append_block(&install_root.join("mozilla.cfg"), UPDATE_LOCK, Some("//\n"))
}

/// Size of the staged payload in KiB, rounded up.
fn installed_size_kib(staging: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(staging).min_depth(1).into_iter().filter_entry(|e| {
        e.depth() != 1 || e.file_name() != std::ffi::OsStr::new(deb::CONTROL_DIR)
    }) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(std::io::Error::other)?.len();
        }
    }
    Ok(total.div_ceil(1024))
}

fn control_fields(
    pkg: &PackageConfig,
    release: &Release,
    depends: &str,
    installed_kib: u64,
) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("Package", pkg.name.clone()),
        ("Version", release.deb_version()),
        ("Architecture", release.arch().deb_label().to_string()),
        ("Maintainer", pkg.maintainer.clone()),
        ("Installed-Size", installed_kib.to_string()),
    ];
    if !depends.is_empty() {
        fields.push(("Depends", depends.to_string()));
    }
    fields.push(("Section", pkg.section.clone()));
    fields.push(("Priority", pkg.priority.clone()));
    if let Some(homepage) = &pkg.homepage {
        fields.push(("Homepage", homepage.clone()));
    }
    fields.push(("Description", pkg.description.clone()));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use zdeb_schema::{Arch, PatchSuffix, Version};

    fn package() -> PackageConfig {
        PackageConfig {
            name: "zotero".to_string(),
            maintainer: "Jane Doe <jane@example.org>".to_string(),
            section: "science".to_string(),
            priority: "optional".to_string(),
            description: "Research assistant".to_string(),
            homepage: None,
            install_dir: "usr/lib/zotero".to_string(),
            binary: "zotero".to_string(),
            reference_package: "firefox-esr".to_string(),
            exclude_dependency: Some("lsb-release".to_string()),
            extra_dependency: Some("libdbus-glib-1-2".to_string()),
            excluded_files: vec![],
        }
    }

    #[test]
    fn update_lock_creates_files_with_leading_comment() {
        let dir = tempfile::tempdir().unwrap();
        lock_updates(dir.path()).unwrap();

        let cfg = std::fs::read_to_string(dir.path().join("mozilla.cfg")).unwrap();
        assert!(cfg.starts_with("//\n"));
        assert!(cfg.contains("lockPref(\"app.update.enabled\", false);"));
        assert!(cfg.contains("lockPref(\"app.update.auto\", false);"));

        let prefs =
            std::fs::read_to_string(dir.path().join("defaults/pref/local-settings.js")).unwrap();
        assert_eq!(prefs, LOCAL_SETTINGS);
    }

    #[test]
    fn update_lock_appends_after_blank_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mozilla.cfg"), "// upstream\nlockPref(\"x\", 1);").unwrap();
        lock_updates(dir.path()).unwrap();

        let cfg = std::fs::read_to_string(dir.path().join("mozilla.cfg")).unwrap();
        assert_eq!(
            cfg,
            format!("// upstream\nlockPref(\"x\", 1);\n\n{UPDATE_LOCK}")
        );
    }

    #[test]
    fn layout_installs_desktop_entry_and_symlink() {
        let dir = tempfile::tempdir().unwrap();
        write_layout(dir.path(), &package()).unwrap();

        let desktop =
            std::fs::read_to_string(dir.path().join("usr/share/applications/zotero.desktop"))
                .unwrap();
        assert!(desktop.contains("Name=Zotero"));
        assert!(desktop.contains("Exec=/usr/lib/zotero/zotero --url %u"));
        assert_eq!(
            std::fs::read_link(dir.path().join("usr/local/bin/zotero")).unwrap(),
            PathBuf::from("/usr/lib/zotero/zotero")
        );
    }

    #[test]
    fn control_fields_in_order() {
        let release = Release::new(
            Version::parse("6.0.27").unwrap(),
            Arch::I386,
            Some(PatchSuffix::parse("p1").unwrap()),
        );
        let fields = control_fields(&package(), &release, "libc6, libgtk-3-0", 12);
        let keys: Vec<&str> = fields.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![
                "Package",
                "Version",
                "Architecture",
                "Maintainer",
                "Installed-Size",
                "Depends",
                "Section",
                "Priority",
                "Description"
            ]
        );
        assert_eq!(fields[1].1, "6.0.27-p1");
        assert_eq!(fields[2].1, "i386");
    }

    #[test]
    fn installed_size_ignores_control_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("DEBIAN")).unwrap();
        std::fs::write(dir.path().join("DEBIAN/control"), vec![b'x'; 4096]).unwrap();
        std::fs::create_dir_all(dir.path().join("usr/lib")).unwrap();
        std::fs::write(dir.path().join("usr/lib/a"), vec![b'x'; 1025]).unwrap();
        assert_eq!(installed_size_kib(dir.path()).unwrap(), 2);
    }

    #[tokio::test]
    async fn blocking_work_keeps_the_failing_stage() {
        let err = blocking(BuildStage::Layout, || {
            Err(SyncError::build(BuildStage::Configure, "read-only file system"))
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            SyncError::BuildFailed {
                stage: BuildStage::Configure,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn blocking_work_writes_the_layout() {
        let dir = tempfile::tempdir().unwrap();
        let (root, pkg) = (dir.path().to_path_buf(), package());
        blocking(BuildStage::Layout, move || {
            write_layout(&root, &pkg).map_err(|e| SyncError::build(BuildStage::Layout, e))
        })
        .await
        .unwrap();
        assert!(dir.path().join("usr/share/applications/zotero.desktop").is_file());
    }
}
