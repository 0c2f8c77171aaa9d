//! The synchronizer: MIRROR → PLAN → BUILD → METADATA → PUBLISH.
//!
//! Phases run strictly in sequence; the first failure ends the run with a
//! [`RunError`] naming the phase. Within MIRROR, BUILD and the artifact half
//! of PUBLISH, work items run concurrently up to the configured parallelism.
//!
//! Nothing is ever deleted, locally or remotely. A rerun after a failure
//! picks up where the last one stopped: MIRROR brings back whatever was
//! published, and artifacts already on disk are not rebuilt.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use zdeb_schema::{Arch, ArtifactName, PatchTable, Release, Version};

use crate::builder::PackageBuilder;
use crate::catalog::CatalogSource;
use crate::config::Config;
use crate::error::{Phase, RunError, SyncError};
use crate::inventory::{LocalInventory, write_atomic};
use crate::metadata::{self, MetadataGenerator};
use crate::reporter::Reporter;
use crate::signer::Signer;
use crate::store::RemoteStore;

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The capabilities a synchronizer is assembled from.
pub struct SyncComponents {
    /// Upstream catalog.
    pub catalog: Arc<dyn CatalogSource>,
    /// Published repository.
    pub store: Arc<dyn RemoteStore>,
    /// Artifact builder.
    pub builder: Arc<dyn PackageBuilder>,
    /// Signer for repository metadata.
    pub signer: Arc<dyn Signer>,
    /// Progress sink.
    pub reporter: Arc<dyn Reporter>,
}

/// Required artifacts and the subset that has to be built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Every release upstream currently offers, with its artifact name.
    pub required: Vec<(Release, ArtifactName)>,
    /// Releases whose artifact is absent locally.
    pub gap: Vec<Release>,
}

/// Compute the required set and the gap.
///
/// `catalog` holds each architecture's versions; `present` answers whether an
/// artifact name is already in the local inventory. Pure: no I/O.
pub fn compute_plan(
    product: &str,
    catalog: &[(Arch, Vec<Version>)],
    patches: &PatchTable,
    present: impl Fn(&str) -> bool,
) -> Plan {
    let mut plan = Plan::default();
    let mut seen = BTreeSet::new();
    for (arch, versions) in catalog {
        for version in versions {
            let release = Release::resolve(version.clone(), *arch, patches);
            let name = ArtifactName::new(product, &release);
            if !seen.insert(name.clone()) {
                continue;
            }
            if !present(name.as_str()) {
                plan.gap.push(release.clone());
            }
            plan.required.push((release, name));
        }
    }
    plan
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Remote objects copied into the working directory.
    pub mirrored: Vec<String>,
    /// Artifacts built this run.
    pub built: Vec<ArtifactName>,
    /// Whether METADATA regenerated the index.
    pub metadata_regenerated: bool,
    /// Keys uploaded (or, in a dry run, that would have been), in order.
    pub uploaded: Vec<String>,
    /// Whether the store was left untouched.
    pub dry_run: bool,
}

/// Orchestrates one sync run.
pub struct Synchronizer {
    product: String,
    architectures: Vec<Arch>,
    patches: PatchTable,
    repo_dir: PathBuf,
    parallel: usize,
    dry_run: bool,
    catalog: Arc<dyn CatalogSource>,
    store: Arc<dyn RemoteStore>,
    builder: Arc<dyn PackageBuilder>,
    metadata: MetadataGenerator,
    reporter: Arc<dyn Reporter>,
    clock: Clock,
    cancel: CancellationToken,
}

impl Synchronizer {
    /// Assemble a synchronizer from configuration and capabilities.
    pub fn new(config: &Config, components: SyncComponents) -> Self {
        Self {
            product: config.package.name.clone(),
            architectures: config.upstream.architectures.clone(),
            patches: config.patches.clone(),
            repo_dir: config.build.repo_dir(),
            parallel: config.build.parallel.max(1),
            dry_run: false,
            catalog: components.catalog,
            store: components.store,
            builder: components.builder,
            metadata: MetadataGenerator::new(
                config.repository.clone(),
                config.package.name.clone(),
                components.signer,
            ),
            reporter: components.reporter,
            clock: Box::new(Utc::now),
            cancel: CancellationToken::new(),
        }
    }

    /// Skip every store write.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Override the concurrency limit.
    pub fn parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel.max(1);
        self
    }

    /// Restrict the run to `architectures`.
    pub fn architectures(mut self, architectures: Vec<Arch>) -> Self {
        self.architectures = architectures;
        self
    }

    /// Timestamp source for the `Release` file.
    pub fn clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Token that aborts the run before METADATA when cancelled.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    async fn guarded<T>(
        &self,
        phase: Phase,
        fut: impl Future<Output = Result<T, RunError>>,
    ) -> Result<T, RunError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(RunError::new(phase, SyncError::Cancelled)),
            result = fut => result,
        }
    }

    fn scan(&self, phase: Phase) -> Result<LocalInventory, RunError> {
        LocalInventory::scan(&self.repo_dir).map_err(|e| RunError::new(phase, e))
    }

    /// Run the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first failure, tagged with its phase (and release, during
    /// BUILD). Cancellation surfaces as [`SyncError::Cancelled`].
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let started = Instant::now();
        let mut report = RunReport {
            dry_run: self.dry_run,
            ..RunReport::default()
        };

        self.reporter.phase(Phase::Mirror);
        let mut inventory = self.scan(Phase::Mirror)?;
        let snapshot = self
            .guarded(Phase::Mirror, self.mirror(&mut inventory, &mut report))
            .await?;

        self.reporter.phase(Phase::Plan);
        let plan = self.guarded(Phase::Plan, self.plan(&inventory)).await?;

        self.reporter.phase(Phase::Build);
        self.guarded(Phase::Build, self.build(&plan, &mut inventory, &mut report))
            .await?;

        if self.cancel.is_cancelled() {
            return Err(RunError::new(Phase::Build, SyncError::Cancelled));
        }

        self.reporter.phase(Phase::Metadata);
        let unpublished: Vec<String> = inventory
            .artifacts()
            .filter(|a| !snapshot.contains(*a))
            .map(str::to_string)
            .collect();
        let metadata_current = plan.gap.is_empty()
            && unpublished.is_empty()
            && metadata::is_complete(&inventory)
            && metadata::INDEX_FILES.iter().all(|f| snapshot.contains(*f));
        let written = if metadata_current {
            self.reporter.metadata_skipped();
            Vec::new()
        } else {
            report.metadata_regenerated = true;
            self.metadata
                .generate(&mut inventory, (self.clock)())
                .await
                .map_err(|e| RunError::new(Phase::Metadata, e))?
        };

        self.reporter.phase(Phase::Publish);
        let mut metadata_keys = written;
        let leftovers: Vec<String> = self
            .metadata
            .keys()
            .into_iter()
            .filter(|k| inventory.contains(k) && !snapshot.contains(*k))
            .filter(|k| !metadata_keys.iter().any(|w| w == k))
            .map(str::to_string)
            .collect();
        metadata_keys.extend(leftovers);
        self.publish(&inventory, &unpublished, &metadata_keys, &mut report)
            .await?;

        self.reporter
            .summary(report.built.len(), report.uploaded.len(), started.elapsed());
        Ok(report)
    }

    /// Query the catalog and compute the plan against the local working
    /// directory, without mirroring first.
    ///
    /// # Errors
    ///
    /// Returns a PLAN-phase [`RunError`] on catalog or I/O failure.
    pub async fn plan_only(&self) -> Result<Plan, RunError> {
        let inventory = self.scan(Phase::Plan)?;
        self.guarded(Phase::Plan, self.plan(&inventory)).await
    }

    /// Regenerate metadata from the local working directory, unconditionally.
    ///
    /// # Errors
    ///
    /// Returns a METADATA-phase [`RunError`] on failure.
    pub async fn regenerate_metadata(&self) -> Result<Vec<String>, RunError> {
        let mut inventory = self.scan(Phase::Metadata)?;
        self.metadata
            .generate(&mut inventory, (self.clock)())
            .await
            .map_err(|e| RunError::new(Phase::Metadata, e))
    }

    /// Copy every remote object missing locally. Returns the remote snapshot.
    async fn mirror(
        &self,
        inventory: &mut LocalInventory,
        report: &mut RunReport,
    ) -> Result<BTreeSet<String>, RunError> {
        let err = |e| RunError::new(Phase::Mirror, e);
        let snapshot = self.store.list().await.map_err(err)?;
        let missing: Vec<&String> = snapshot.iter().filter(|k| !inventory.contains(k)).collect();
        tracing::debug!(
            "remote has {} objects, {} missing locally",
            snapshot.len(),
            missing.len()
        );

        let root = inventory.root().to_path_buf();
        {
            let mut fetches = stream::iter(missing)
                .map(|key| {
                    let root = root.clone();
                    async move {
                        let data = self.store.fetch(key).await?;
                        write_atomic(&root, key, &data).await?;
                        Ok::<_, SyncError>((key, data.len() as u64))
                    }
                })
                .buffer_unordered(self.parallel);

            while let Some(result) = fetches.next().await {
                let (key, size) = result.map_err(err)?;
                inventory.insert(key.as_str());
                self.reporter.mirrored(key, size);
                report.mirrored.push(key.clone());
            }
        }
        report.mirrored.sort();
        Ok(snapshot)
    }

    async fn plan(&self, inventory: &LocalInventory) -> Result<Plan, RunError> {
        let mut catalog = Vec::with_capacity(self.architectures.len());
        for &arch in &self.architectures {
            let versions = self
                .catalog
                .releases(arch)
                .await
                .map_err(|e| RunError::new(Phase::Plan, e))?;
            tracing::debug!("{arch}: {} upstream versions", versions.len());
            catalog.push((arch, versions));
        }

        let plan = compute_plan(&self.product, &catalog, &self.patches, |name| {
            inventory.contains(name)
        });
        self.reporter.planned(plan.required.len(), &plan.gap);
        Ok(plan)
    }

    async fn build(
        &self,
        plan: &Plan,
        inventory: &mut LocalInventory,
        report: &mut RunReport,
    ) -> Result<(), RunError> {
        let repo_dir = inventory.root().to_path_buf();
        let mut builds = stream::iter(&plan.gap)
            .map(|release| {
                let repo_dir = repo_dir.clone();
                async move {
                    self.reporter.building(release);
                    self.builder
                        .build(release, &repo_dir)
                        .await
                        .map(|artifact| (release, artifact))
                        .map_err(|e| RunError::new(Phase::Build, e).with_release(release.clone()))
                }
            })
            .buffer_unordered(self.parallel);

        while let Some(result) = builds.next().await {
            let (release, artifact) = result?;
            self.reporter.built(release, &artifact.name, artifact.size);
            inventory.insert(artifact.name.as_str());
            report.built.push(artifact.name);
        }
        report.built.sort();
        Ok(())
    }

    async fn publish(
        &self,
        inventory: &LocalInventory,
        artifacts: &[String],
        metadata: &[String],
        report: &mut RunReport,
    ) -> Result<(), RunError> {
        let err = |e| RunError::new(Phase::Publish, e);

        let mut uploads = stream::iter(artifacts)
            .map(|key| {
                let path = inventory.path_of(key);
                async move {
                    let data = tokio::fs::read(&path)
                        .await
                        .map_err(|e| SyncError::io(&path, e))?;
                    let size = data.len() as u64;
                    if !self.dry_run {
                        self.store.upload(key, data).await?;
                    }
                    Ok::<_, SyncError>((key, size))
                }
            })
            .buffer_unordered(self.parallel);

        let mut uploaded_artifacts = Vec::with_capacity(artifacts.len());
        while let Some(result) = uploads.next().await {
            let (key, size) = result.map_err(err)?;
            self.reporter.uploaded(key, size, self.dry_run);
            uploaded_artifacts.push(key.clone());
        }
        uploaded_artifacts.sort();
        report.uploaded.extend(uploaded_artifacts);

        for key in metadata {
            let path = inventory.path_of(key);
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| err(SyncError::io(&path, e)))?;
            let size = data.len() as u64;
            if !self.dry_run {
                self.store.upload(key, data).await.map_err(err)?;
            }
            self.reporter.uploaded(key, size, self.dry_run);
            report.uploaded.push(key.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(list: &[&str]) -> Vec<Version> {
        list.iter().map(|v| Version::parse(v).unwrap()).collect()
    }

    #[test]
    fn gap_is_required_minus_present() {
        let catalog = vec![
            (Arch::Amd64, versions(&["6.0.26", "6.0.27"])),
            (Arch::I386, versions(&["6.0.27"])),
        ];
        let present = ["zotero_6.0.26_amd64.deb"];
        let plan = compute_plan("zotero", &catalog, &PatchTable::default(), |n| {
            present.contains(&n)
        });

        assert_eq!(plan.required.len(), 3);
        let gap: Vec<String> = plan.gap.iter().map(ToString::to_string).collect();
        assert_eq!(gap, vec!["6.0.27 (amd64)", "6.0.27 (i386)"]);
    }

    #[test]
    fn empty_catalog_plans_nothing() {
        let catalog = vec![(Arch::Amd64, vec![]), (Arch::I386, vec![])];
        let plan = compute_plan("zotero", &catalog, &PatchTable::default(), |_| false);
        assert_eq!(plan, Plan::default());
    }

    #[test]
    fn patched_release_is_a_new_artifact() {
        let mut patches = PatchTable::default();
        patches.insert("6.0.27-amd64", "p1").unwrap();
        let catalog = vec![(Arch::Amd64, versions(&["6.0.27"]))];
        let present = ["zotero_6.0.27_amd64.deb"];
        let plan = compute_plan("zotero", &catalog, &patches, |n| present.contains(&n));

        assert_eq!(plan.gap.len(), 1);
        assert_eq!(plan.required[0].1.as_str(), "zotero_6.0.27-p1_amd64.deb");
    }
}
