use std::time::Duration;

use zdeb_schema::{ArtifactName, Release};

use crate::error::Phase;

/// Progress sink for a sync run.
///
/// Implementations must be cheap and must not fail; diagnostics that need
/// filtering go through `tracing` instead.
pub trait Reporter: Send + Sync {
    /// A phase has started.
    fn phase(&self, phase: Phase);

    /// The plan has been computed: `gap` releases need building.
    fn planned(&self, upstream: usize, gap: &[Release]);

    /// A remote object was copied into the local working directory.
    fn mirrored(&self, key: &str, size: u64);

    /// A release build has started.
    fn building(&self, release: &Release);

    /// A release build produced `name`.
    fn built(&self, release: &Release, name: &ArtifactName, size: u64);

    /// An object was uploaded (or would have been, in a dry run).
    fn uploaded(&self, key: &str, size: u64, dry_run: bool);

    /// Metadata regeneration was skipped because nothing changed.
    fn metadata_skipped(&self);

    /// Display a final summary.
    fn summary(&self, built: usize, uploaded: usize, elapsed: Duration);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn phase(&self, phase: Phase) {
        (**self).phase(phase);
    }
    fn planned(&self, upstream: usize, gap: &[Release]) {
        (**self).planned(upstream, gap);
    }
    fn mirrored(&self, key: &str, size: u64) {
        (**self).mirrored(key, size);
    }
    fn building(&self, release: &Release) {
        (**self).building(release);
    }
    fn built(&self, release: &Release, name: &ArtifactName, size: u64) {
        (**self).built(release, name, size);
    }
    fn uploaded(&self, key: &str, size: u64, dry_run: bool) {
        (**self).uploaded(key, size, dry_run);
    }
    fn metadata_skipped(&self) {
        (**self).metadata_skipped();
    }
    fn summary(&self, built: usize, uploaded: usize, elapsed: Duration) {
        (**self).summary(built, uploaded, elapsed);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn phase(&self, _: Phase) {}
    fn planned(&self, _: usize, _: &[Release]) {}
    fn mirrored(&self, _: &str, _: u64) {}
    fn building(&self, _: &Release) {}
    fn built(&self, _: &Release, _: &ArtifactName, _: u64) {}
    fn uploaded(&self, _: &str, _: u64, _: bool) {}
    fn metadata_skipped(&self) {}
    fn summary(&self, _: usize, _: usize, _: Duration) {}
}

/// Plain line-oriented progress on stdout.
#[derive(Clone, Copy, Default)]
pub struct ConsoleReporter;

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

impl Reporter for ConsoleReporter {
    fn phase(&self, phase: Phase) {
        println!("{phase}");
    }

    fn planned(&self, upstream: usize, gap: &[Release]) {
        println!("  {upstream} upstream releases, {} to build", gap.len());
        for release in gap {
            println!("    + {release}");
        }
    }

    fn mirrored(&self, key: &str, size: u64) {
        println!("  fetched {key} ({})", human_size(size));
    }

    fn building(&self, release: &Release) {
        println!("  building {release}");
    }

    fn built(&self, _release: &Release, name: &ArtifactName, size: u64) {
        println!("  built {name} ({})", human_size(size));
    }

    fn uploaded(&self, key: &str, size: u64, dry_run: bool) {
        if dry_run {
            println!("  would upload {key} ({})", human_size(size));
        } else {
            println!("  uploaded {key} ({})", human_size(size));
        }
    }

    fn metadata_skipped(&self) {
        println!("  index up to date");
    }

    fn summary(&self, built: usize, uploaded: usize, elapsed: Duration) {
        println!(
            "Done: {built} built, {uploaded} uploaded in {:.1}s",
            elapsed.as_secs_f64()
        );
    }
}
