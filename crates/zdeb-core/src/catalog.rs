//! Upstream release catalog.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use zdeb_schema::{Arch, Version};

use crate::error::SyncError;
use crate::retry::{RetryPolicy, is_transient_http};

/// Source of the versions currently offered upstream.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Versions available for `arch`, in manifest order.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UpstreamUnavailable`] when the manifest cannot be
    /// fetched or parsed.
    async fn releases(&self, arch: Arch) -> Result<Vec<Version>, SyncError>;
}

#[derive(Deserialize)]
struct ManifestEntry {
    version: String,
}

/// Expand `{arch}` (upstream name) and `{version}` in a URL template.
pub fn expand_url(template: &str, arch: Arch, version: Option<&Version>) -> String {
    let url = template.replace("{arch}", arch.upstream_name());
    match version {
        Some(v) => url.replace("{version}", v.as_str()),
        None => url,
    }
}

/// Turn raw manifest versions into valid, de-duplicated [`Version`]s.
///
/// Upstream strings that cannot be used in a package name (pre-release tags
/// with `-`, empty strings) are skipped with a warning.
fn collect_versions(arch: Arch, raw: impl IntoIterator<Item = String>) -> Vec<Version> {
    let mut out: Vec<Version> = Vec::new();
    for s in raw {
        match Version::parse(s.trim()) {
            Ok(v) if !out.contains(&v) => out.push(v),
            Ok(_) => {}
            Err(e) => tracing::warn!("skipping upstream version for {arch}: {e}"),
        }
    }
    out
}

/// Catalog backed by the per-architecture JSON update manifest.
pub struct ManifestCatalog {
    client: Client,
    url_template: String,
    retry: RetryPolicy,
}

impl ManifestCatalog {
    /// Create a catalog that queries `url_template` (with `{arch}`).
    pub fn new(client: Client, url_template: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            url_template: url_template.into(),
            retry,
        }
    }
}

#[async_trait]
impl CatalogSource for ManifestCatalog {
    async fn releases(&self, arch: Arch) -> Result<Vec<Version>, SyncError> {
        let url = expand_url(&self.url_template, arch, None);
        tracing::debug!("fetching manifest {url}");

        let body = self
            .retry
            .run(&format!("manifest {arch}"), is_transient_http, || async {
                self.client
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .bytes()
                    .await
            })
            .await
            .map_err(|e| SyncError::upstream(&url, e))?;
        let entries: Vec<ManifestEntry> = serde_json::from_slice(&body)
            .map_err(|e| SyncError::upstream(&url, format!("malformed manifest: {e}")))?;

        Ok(collect_versions(arch, entries.into_iter().map(|e| e.version)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 1.0,
        }
    }

    #[test]
    fn expands_templates() {
        let v = Version::parse("6.0.27").unwrap();
        assert_eq!(
            expand_url("https://x/dl?platform=linux-{arch}&version={version}", Arch::I386, Some(&v)),
            "https://x/dl?platform=linux-i686&version=6.0.27"
        );
    }

    #[test]
    fn invalid_and_duplicate_versions_are_dropped() {
        let raw = ["6.0.27", "7.0.0-beta.5", "6.0.27", "", "6.0.26"]
            .into_iter()
            .map(String::from);
        let versions = collect_versions(Arch::Amd64, raw);
        let as_str: Vec<&str> = versions.iter().map(Version::as_str).collect();
        assert_eq!(as_str, vec!["6.0.27", "6.0.26"]);
    }

    #[tokio::test]
    async fn fetches_manifest_per_arch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/updates-linux-x86_64.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"version":"6.0.26","buildID":"1"},{"version":"6.0.27","detailsURL":"https://www.zotero.org"}]"#,
            )
            .create_async()
            .await;

        let catalog = ManifestCatalog::new(
            Client::new(),
            format!("{}/updates-linux-{{arch}}.json", server.url()),
            fast_retry(1),
        );
        let versions = catalog.releases(Arch::Amd64).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].as_str(), "6.0.27");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_fatal() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/updates-linux-i686.json")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let catalog = ManifestCatalog::new(
            Client::new(),
            format!("{}/updates-linux-{{arch}}.json", server.url()),
            fast_retry(3),
        );
        let err = catalog.releases(Arch::I386).await.unwrap_err();
        assert!(matches!(err, SyncError::UpstreamUnavailable { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn malformed_manifest_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/updates-linux-x86_64.json")
            .with_status(200)
            .with_body("<html>not json</html>")
            .expect(1)
            .create_async()
            .await;

        let catalog = ManifestCatalog::new(
            Client::new(),
            format!("{}/updates-linux-{{arch}}.json", server.url()),
            fast_retry(4),
        );
        assert!(catalog.releases(Arch::Amd64).await.is_err());
        mock.assert_async().await;
    }
}
