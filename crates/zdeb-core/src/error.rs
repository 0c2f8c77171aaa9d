//! Error taxonomy for a sync run.
//!
//! Every kind is fatal: the synchronizer stops at the first error and wraps
//! it in a [`RunError`] naming the phase (and release, when one is involved).

use thiserror::Error;
use zdeb_schema::Release;

/// The strictly sequential phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Copy remote objects missing from the local working directory.
    Mirror,
    /// Query the catalog and compute the gap.
    Plan,
    /// Build every release in the gap.
    Build,
    /// Regenerate the repository index and signatures.
    Metadata,
    /// Upload new artifacts, then the regenerated metadata.
    Publish,
}

impl Phase {
    /// Upper-case label used in progress output and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mirror => "MIRROR",
            Self::Plan => "PLAN",
            Self::Build => "BUILD",
            Self::Metadata => "METADATA",
            Self::Publish => "PUBLISH",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of the package builder that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Scratch directory setup.
    Prepare,
    /// Unpacking the upstream bundle.
    Unpack,
    /// Desktop entry and command-line symlink.
    Layout,
    /// Writing the update-lock configuration.
    Configure,
    /// Querying the reference package's dependencies.
    Dependencies,
    /// Writing the control file.
    Control,
    /// Producing the archive.
    Package,
    /// Signing the archive.
    Sign,
    /// Moving the signed archive into the repository directory.
    Install,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Prepare => "prepare",
            Self::Unpack => "unpack",
            Self::Layout => "layout",
            Self::Configure => "configure",
            Self::Dependencies => "dependencies",
            Self::Control => "control",
            Self::Package => "package",
            Self::Sign => "sign",
            Self::Install => "install",
        };
        f.write_str(s)
    }
}

/// Errors produced by the pipeline components.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Manifest or bundle fetch failed (after retries).
    #[error("upstream unavailable: {url}: {reason}")]
    UpstreamUnavailable {
        /// URL that could not be fetched.
        url: String,
        /// Underlying failure.
        reason: String,
    },

    /// A build step failed; no artifact was produced.
    #[error("build failed during {stage}: {reason}")]
    BuildFailed {
        /// Step that failed.
        stage: BuildStage,
        /// Underlying failure.
        reason: String,
    },

    /// Listing, fetching, or uploading a store object failed.
    #[error("store unavailable: {operation} '{key}': {reason}")]
    StoreUnavailable {
        /// `list`, `fetch` or `upload`.
        operation: &'static str,
        /// Object key (empty for `list`).
        key: String,
        /// Underlying failure.
        reason: String,
    },

    /// A required configuration key is missing or malformed.
    #[error("invalid configuration: {key}: {reason}")]
    ConfigInvalid {
        /// Dotted configuration key, e.g. `signing.key`.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Index or signature generation failed.
    #[error("metadata generation failed: {0}")]
    MetadataFailed(String),

    /// Local working-directory I/O failed.
    #[error("IO error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled before metadata was regenerated.
    #[error("run cancelled")]
    Cancelled,
}

impl SyncError {
    /// Shorthand for [`SyncError::UpstreamUnavailable`].
    pub fn upstream(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for [`SyncError::BuildFailed`].
    pub fn build(stage: BuildStage, reason: impl std::fmt::Display) -> Self {
        Self::BuildFailed {
            stage,
            reason: format!("{reason:#}"),
        }
    }

    /// Shorthand for [`SyncError::StoreUnavailable`].
    pub fn store(operation: &'static str, key: &str, reason: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable {
            operation,
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for [`SyncError::ConfigInvalid`].
    pub fn config(key: &str, reason: impl std::fmt::Display) -> Self {
        Self::ConfigInvalid {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for [`SyncError::Io`].
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// A failed run: the phase it died in, the release being processed (if any),
/// and the cause.
#[derive(Debug)]
pub struct RunError {
    /// Phase that failed.
    pub phase: Phase,
    /// Release being built or planned when the failure happened.
    pub release: Option<Release>,
    /// Underlying error.
    pub source: SyncError,
}

impl RunError {
    /// Wrap `source` as a failure of `phase`.
    pub fn new(phase: Phase, source: SyncError) -> Self {
        Self {
            phase,
            release: None,
            source,
        }
    }

    /// Attach the release that was being processed.
    pub fn with_release(mut self, release: Release) -> Self {
        self.release = Some(release);
        self
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.release {
            Some(release) => write!(f, "{} failed for {release}: {}", self.phase, self.source),
            None => write!(f, "{} failed: {}", self.phase, self.source),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zdeb_schema::{Arch, Version};

    #[test]
    fn run_error_names_phase_and_release() {
        let release = Release::new(Version::parse("6.0.27").unwrap(), Arch::Amd64, None);
        let err = RunError::new(
            Phase::Build,
            SyncError::build(BuildStage::Sign, "gpg exited with status 2"),
        )
        .with_release(release);

        assert_eq!(
            err.to_string(),
            "BUILD failed for 6.0.27 (amd64): build failed during sign: gpg exited with status 2"
        );
    }

    #[test]
    fn run_error_without_release() {
        let err = RunError::new(Phase::Mirror, SyncError::store("list", "", "timeout"));
        assert_eq!(
            err.to_string(),
            "MIRROR failed: store unavailable: list '': timeout"
        );
    }
}
