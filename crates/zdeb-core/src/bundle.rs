//! Fetching and unpacking upstream release bundles (`tar.bz2`).

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};

use crate::retry::{RetryPolicy, is_transient_http};

#[derive(Error, Debug)]
enum FetchError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => is_transient_http(e),
            Self::Io(_) => false,
        }
    }
}

/// Stream `url` into `dest`, retrying transient failures from scratch.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns the last failure, rendered as a string, once retries are spent.
pub async fn download(
    client: &Client,
    url: &str,
    dest: &Path,
    retry: &RetryPolicy,
) -> Result<u64, String> {
    retry
        .run(
            &format!("download {url}"),
            FetchError::is_transient,
            || async {
                let response = client
                    .get(url)
                    .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
                    .send()
                    .await?
                    .error_for_status()?;

                let mut file = tokio::fs::File::create(dest).await?;
                let mut stream = response.bytes_stream();
                let mut written: u64 = 0;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    file.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                file.flush().await?;
                Ok::<_, FetchError>(written)
            },
        )
        .await
        .map_err(|e| e.to_string())
}

/// Map an archive path onto the install tree: drop the bundle's top-level
/// directory and reject anything that could escape the destination.
///
/// Returns `Ok(None)` for the top-level directory itself.
fn relative_target(path: &Path) -> Result<Option<PathBuf>, String> {
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(format!("unsafe path in bundle: {}", path.display()));
    }
    let out: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .skip(1)
        .collect();
    Ok((!out.as_os_str().is_empty()).then_some(out))
}

fn is_excluded(rel: &Path, excluded: &[String]) -> bool {
    excluded.iter().any(|ex| rel.starts_with(ex))
}

/// Reject `rel` if any of its parents is a symlink unpacked earlier.
fn check_parents(rel: &Path, symlinks: &HashSet<PathBuf>) -> Result<(), String> {
    match rel.ancestors().skip(1).find(|a| symlinks.contains(*a)) {
        Some(link) => Err(format!(
            "{} runs through symlink {}",
            rel.display(),
            link.display()
        )),
        None => Ok(()),
    }
}

/// Unpack a `tar.bz2` bundle into `dest`, stripping the first path
/// component and skipping `excluded` paths (exact match or directory prefix).
///
/// Hard links are recreated against their already unpacked source. Entries
/// below a symlink from the same bundle are rejected.
///
/// Returns the number of entries written.
///
/// # Errors
///
/// Fails on a corrupt archive, an unsafe entry path, an unresolvable hard
/// link, or a write error.
pub async fn unpack(bundle: &Path, dest: &Path, excluded: &[String]) -> Result<usize, String> {
    use async_compression::tokio::bufread::BzDecoder;
    use tokio_tar::Archive;

    let file = tokio::fs::File::open(bundle)
        .await
        .map_err(|e| format!("{}: {e}", bundle.display()))?;
    let mut archive = Archive::new(BzDecoder::new(BufReader::new(file)));
    let mut entries = archive.entries().map_err(|e| e.to_string())?;
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| format!("{}: {e}", dest.display()))?;

    let mut symlinks = HashSet::new();
    let mut count = 0;
    while let Some(entry) = entries.next().await {
        let mut entry = entry.map_err(|e| format!("corrupt bundle: {e}"))?;
        let path = entry.path().map_err(|e| e.to_string())?.into_owned();
        let Some(rel) = relative_target(&path)? else {
            continue;
        };
        if is_excluded(&rel, excluded) {
            tracing::debug!("excluding {}", rel.display());
            continue;
        }
        check_parents(&rel, &symlinks)?;

        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("{}: {e}", parent.display()))?;
        }

        let kind = entry.header().entry_type();
        if kind.is_hard_link() {
            let link = entry
                .link_name()
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("{}: hard link without a target", rel.display()))?
                .into_owned();
            let source = relative_target(&link)?
                .filter(|source| !is_excluded(source, excluded))
                .ok_or_else(|| {
                    format!("{}: unresolvable hard link to {}", rel.display(), link.display())
                })?;
            check_parents(&source, &symlinks)?;
            tokio::fs::hard_link(dest.join(&source), &target)
                .await
                .map_err(|e| format!("{} -> {}: {e}", rel.display(), source.display()))?;
        } else {
            entry
                .unpack(&target)
                .await
                .map_err(|e| format!("{}: {e}", rel.display()))?;
            if kind.is_symlink() {
                symlinks.insert(rel);
            }
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_compression::tokio::write::BzEncoder;

    async fn compress(raw: &[u8]) -> Vec<u8> {
        let mut encoder = BzEncoder::new(Vec::new());
        encoder.write_all(raw).await.unwrap();
        encoder.shutdown().await.unwrap();
        encoder.into_inner()
    }

    fn append_file(tar: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        tar.append_data(&mut header, path, data).unwrap();
    }

    fn append_link(
        tar: &mut tar::Builder<Vec<u8>>,
        kind: tar::EntryType,
        path: &str,
        target: &str,
    ) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(kind);
        header.set_size(0);
        header.set_mode(0o755);
        tar.append_link(&mut header, path, target).unwrap();
    }

    /// A small `tar.bz2` shaped like an upstream bundle.
    async fn sample_bundle() -> Vec<u8> {
        let mut tar = tar::Builder::new(Vec::new());
        let files: [(&str, &[u8]); 4] = [
            ("Zotero_linux-x86_64/zotero", b"#!/bin/sh\necho zotero\n"),
            ("Zotero_linux-x86_64/zotero.desktop", b"[Desktop Entry]\n"),
            ("Zotero_linux-x86_64/updater", b"ELF"),
            ("Zotero_linux-x86_64/defaults/pref/channel-prefs.js", b"pref(\"app.update.channel\", \"release\");\n"),
        ];
        for (path, data) in files {
            append_file(&mut tar, path, data);
        }
        compress(&tar.into_inner().unwrap()).await
    }

    async fn write_bundle(dir: &Path, tar: tar::Builder<Vec<u8>>) -> PathBuf {
        let bundle = dir.join("bundle.tar.bz2");
        let bytes = compress(&tar.into_inner().unwrap()).await;
        tokio::fs::write(&bundle, bytes).await.unwrap();
        bundle
    }

    #[test]
    fn strips_top_level_and_rejects_escapes() {
        assert_eq!(
            relative_target(Path::new("Zotero_linux-x86_64/zotero")).unwrap(),
            Some(PathBuf::from("zotero"))
        );
        assert_eq!(relative_target(Path::new("Zotero_linux-x86_64/")).unwrap(), None);
        assert_eq!(
            relative_target(Path::new("./top/a/b")).unwrap(),
            Some(PathBuf::from("a/b"))
        );
        assert!(relative_target(Path::new("top/../../etc/passwd")).is_err());
        assert!(relative_target(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn exclusion_is_by_path_prefix() {
        let excluded = vec!["updater".to_string(), "updates".to_string()];
        assert!(is_excluded(Path::new("updater"), &excluded));
        assert!(is_excluded(Path::new("updates/0/update.mar"), &excluded));
        assert!(!is_excluded(Path::new("updater.ini"), &excluded));
        assert!(!is_excluded(Path::new("zotero"), &excluded));
    }

    #[tokio::test]
    async fn unpacks_bundle_without_excluded_files() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle.tar.bz2");
        tokio::fs::write(&bundle, sample_bundle().await).await.unwrap();

        let dest = dir.path().join("usr/lib/zotero");
        let excluded = vec!["zotero.desktop".to_string(), "updater".to_string()];
        let count = unpack(&bundle, &dest, &excluded).await.unwrap();

        assert_eq!(count, 2);
        assert!(dest.join("zotero").is_file());
        assert!(dest.join("defaults/pref/channel-prefs.js").is_file());
        assert!(!dest.join("zotero.desktop").exists());
        assert!(!dest.join("updater").exists());
    }

    #[tokio::test]
    async fn hard_links_are_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let mut tar = tar::Builder::new(Vec::new());
        append_file(&mut tar, "Z/lib.so", b"ELF lib");
        append_link(&mut tar, tar::EntryType::Link, "Z/lib2.so", "Z/lib.so");
        let bundle = write_bundle(dir.path(), tar).await;

        let dest = dir.path().join("out");
        let count = unpack(&bundle, &dest, &[]).await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(std::fs::read(dest.join("lib.so")).unwrap(), b"ELF lib");
        assert_eq!(std::fs::read(dest.join("lib2.so")).unwrap(), b"ELF lib");
    }

    #[tokio::test]
    async fn hard_link_to_excluded_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut tar = tar::Builder::new(Vec::new());
        append_file(&mut tar, "Z/updater", b"ELF");
        append_link(&mut tar, tar::EntryType::Link, "Z/updater-copy", "Z/updater");
        let bundle = write_bundle(dir.path(), tar).await;

        let err = unpack(&bundle, &dir.path().join("out"), &["updater".to_string()])
            .await
            .unwrap_err();
        assert!(err.contains("unresolvable hard link"), "{err}");
    }

    #[tokio::test]
    async fn entries_below_a_symlink_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let mut tar = tar::Builder::new(Vec::new());
        append_link(
            &mut tar,
            tar::EntryType::Symlink,
            "Z/lnk",
            outside.path().to_str().unwrap(),
        );
        append_file(&mut tar, "Z/lnk/x", b"escaped");
        let bundle = write_bundle(dir.path(), tar).await;

        let err = unpack(&bundle, &dir.path().join("out"), &[])
            .await
            .unwrap_err();
        assert!(err.contains("runs through symlink"), "{err}");
        assert!(!outside.path().join("x").exists());
    }

    #[tokio::test]
    async fn downloads_to_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/dl")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("bzdata")
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bundle.tar.bz2");

        let url = format!("{}/dl?version=6.0.27", server.url());
        let written = download(&Client::new(), &url, &dest, &RetryPolicy::none())
            .await
            .unwrap();
        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&dest).unwrap(), b"bzdata");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_bundle_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/dl")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let retry = RetryPolicy {
            max_attempts: 3,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(1),
            multiplier: 1.0,
        };

        let url = format!("{}/dl", server.url());
        let err = download(&Client::new(), &url, &dir.path().join("b"), &retry)
            .await
            .unwrap_err();
        assert!(err.contains("404"));
        mock.assert_async().await;
    }
}
