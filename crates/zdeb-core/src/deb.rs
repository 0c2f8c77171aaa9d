//! Debian binary package container (`ar` + tar members).
//!
//! Writes reproducible archives (zero mtimes, root ownership, sorted
//! entries) and reads the control stanza back out for index generation.

use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

const AR_MAGIC: &[u8] = b"!<arch>\n";
const AR_HEADER_LEN: usize = 60;

/// Name of the staging subdirectory holding control files.
pub const CONTROL_DIR: &str = "DEBIAN";

/// Errors from reading or writing package archives.
#[derive(Error, Debug)]
pub enum DebError {
    /// The global `ar` header is missing.
    #[error("not an ar archive")]
    NotAr,

    /// A member header or body runs past the end of the data.
    #[error("truncated ar archive")]
    Truncated,

    /// A member header could not be parsed.
    #[error("malformed ar header: {0}")]
    BadHeader(String),

    /// A member name does not fit in the 16-byte header field.
    #[error("ar member name too long: {0}")]
    NameTooLong(String),

    /// No `control.tar*` member.
    #[error("missing control archive")]
    MissingControl,

    /// The control archive uses a compression this reader does not handle.
    #[error("unsupported control archive compression: {0}")]
    UnsupportedCompression(String),

    /// The control archive has no `control` file.
    #[error("control archive has no control file")]
    MissingControlFile,

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One member of an `ar` archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArMember<'a> {
    /// Member name with GNU trailing `/` and padding removed.
    pub name: &'a str,
    /// Member contents.
    pub data: &'a [u8],
}

/// Serialise members into a deterministic `ar` archive.
///
/// # Errors
///
/// Returns [`DebError::NameTooLong`] if a name exceeds 16 bytes.
pub fn write_ar(members: &[(&str, &[u8])]) -> Result<Vec<u8>, DebError> {
    let mut out = Vec::from(AR_MAGIC);
    for (name, data) in members {
        if name.len() > 16 {
            return Err(DebError::NameTooLong((*name).to_string()));
        }
        let header = format!(
            "{name:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            0,
            0,
            0,
            "100644",
            data.len()
        );
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(data);
        if data.len() % 2 == 1 {
            out.push(b'\n');
        }
    }
    Ok(out)
}

/// Split an `ar` archive into its members.
///
/// # Errors
///
/// Returns an error if the data is not a well-formed `ar` archive.
pub fn ar_members(bytes: &[u8]) -> Result<Vec<ArMember<'_>>, DebError> {
    let mut rest = bytes.strip_prefix(AR_MAGIC).ok_or(DebError::NotAr)?;
    let mut members = Vec::new();

    while !rest.is_empty() {
        if rest.len() < AR_HEADER_LEN {
            return Err(DebError::Truncated);
        }
        let (header, body) = rest.split_at(AR_HEADER_LEN);
        if &header[58..60] != b"`\n" {
            return Err(DebError::BadHeader("missing terminator".to_string()));
        }
        let name = std::str::from_utf8(&header[..16])
            .map_err(|_| DebError::BadHeader("non-utf8 name".to_string()))?
            .trim_end()
            .trim_end_matches('/');
        let size: usize = std::str::from_utf8(&header[48..58])
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| DebError::BadHeader(format!("bad size for '{name}'")))?;
        if body.len() < size {
            return Err(DebError::Truncated);
        }
        members.push(ArMember {
            name,
            data: &body[..size],
        });
        let advance = (size + size % 2).min(body.len());
        rest = &body[advance..];
    }

    Ok(members)
}

fn normalized_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if meta.is_dir() || meta.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

fn base_header(entry_type: tar::EntryType, mode: u32, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    // Only fails on over-long names; "root" always fits.
    let _ = header.set_username("root");
    let _ = header.set_groupname("root");
    header
}

/// Build a gzip-compressed tarball of `root`, reproducibly.
///
/// Entries are sorted by path, with zero mtimes and root ownership.
/// Top-level names in `skip` are left out.
///
/// # Errors
///
/// Returns [`DebError::Io`] on any filesystem or encoder failure.
pub fn tar_gz_tree(root: &Path, skip: &[&str]) -> Result<Vec<u8>, DebError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::best());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut header = base_header(tar::EntryType::Directory, 0o755, 0);
    builder.append_data(&mut header, "./", std::io::empty())?;

    let walker = walkdir::WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() != 1 || !skip.iter().any(|s| e.file_name() == std::ffi::OsStr::new(s))
        });

    for entry in walker {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(std::io::Error::other)?;
        let name = rel.to_path_buf();
        let meta = entry.path().symlink_metadata()?;
        let file_type = meta.file_type();

        if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            let mut header = base_header(tar::EntryType::Symlink, 0o777, 0);
            builder.append_link(&mut header, &name, &target)?;
        } else if file_type.is_dir() {
            let mut header = base_header(tar::EntryType::Directory, 0o755, 0);
            builder.append_data(&mut header, &name, std::io::empty())?;
        } else {
            let mut header =
                base_header(tar::EntryType::Regular, normalized_mode(&meta), meta.len());
            let file = std::fs::File::open(entry.path())?;
            builder.append_data(&mut header, &name, file)?;
        }
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Assemble a `.deb` from a staging tree whose control files live in
/// [`CONTROL_DIR`].
///
/// # Errors
///
/// Returns an error if the tree cannot be read or archived.
pub fn build_deb(staging: &Path) -> Result<Vec<u8>, DebError> {
    let control = tar_gz_tree(&staging.join(CONTROL_DIR), &[])?;
    let data = tar_gz_tree(staging, &[CONTROL_DIR])?;
    write_ar(&[
        ("debian-binary", b"2.0\n".as_slice()),
        ("control.tar.gz", control.as_slice()),
        ("data.tar.gz", data.as_slice()),
    ])
}

fn find_control<R: Read>(reader: R) -> Result<String, DebError> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_control = {
            let path = entry.path()?;
            path == Path::new("./control") || path == Path::new("control")
        };
        if is_control {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            return Ok(text);
        }
    }
    Err(DebError::MissingControlFile)
}

/// Extract the text of the `control` file from a `.deb`.
///
/// # Errors
///
/// Returns an error if the archive is malformed or its control member is
/// compressed with something other than gzip or zstd.
pub fn read_control(deb: &[u8]) -> Result<String, DebError> {
    let members = ar_members(deb)?;
    let member = members
        .iter()
        .find(|m| m.name.starts_with("control.tar"))
        .ok_or(DebError::MissingControl)?;

    match &member.name["control.tar".len()..] {
        "" => find_control(member.data),
        ".gz" => find_control(GzDecoder::new(member.data)),
        ".zst" => find_control(zstd::stream::read::Decoder::new(member.data)?),
        other => Err(DebError::UnsupportedCompression(
            other.trim_start_matches('.').to_string(),
        )),
    }
}

/// Value of a single-line field in a control stanza.
pub fn control_field<'a>(control: &'a str, field: &str) -> Option<&'a str> {
    control.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (!line.starts_with([' ', '\t']) && key.eq_ignore_ascii_case(field)).then(|| value.trim())
    })
}

/// Write a control stanza into `<staging>/DEBIAN/control`.
///
/// # Errors
///
/// Returns [`DebError::Io`] on write failure.
pub fn write_control(staging: &Path, fields: &[(&str, String)]) -> Result<(), DebError> {
    let dir = staging.join(CONTROL_DIR);
    std::fs::create_dir_all(&dir)?;
    let mut file = std::fs::File::create(dir.join("control"))?;
    for (key, value) in fields {
        writeln!(file, "{key}: {value}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_control(
            root,
            &[
                ("Package", "zotero".to_string()),
                ("Version", "6.0.27".to_string()),
                ("Architecture", "amd64".to_string()),
            ],
        )
        .unwrap();
        std::fs::create_dir_all(root.join("usr/lib/zotero")).unwrap();
        std::fs::write(root.join("usr/lib/zotero/zotero"), b"#!/bin/sh\n").unwrap();
        std::fs::create_dir_all(root.join("usr/local/bin")).unwrap();
        std::os::unix::fs::symlink("/usr/lib/zotero/zotero", root.join("usr/local/bin/zotero"))
            .unwrap();
        dir
    }

    #[test]
    fn ar_layout_matches_dpkg_expectations() {
        let dir = staging_tree();
        let deb = build_deb(dir.path()).unwrap();
        let names: Vec<&str> = ar_members(&deb).unwrap().iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["debian-binary", "control.tar.gz", "data.tar.gz"]);
        assert_eq!(ar_members(&deb).unwrap()[0].data, b"2.0\n");
    }

    #[test]
    fn control_is_readable_back() {
        let dir = staging_tree();
        let deb = build_deb(dir.path()).unwrap();
        let control = read_control(&deb).unwrap();
        assert_eq!(control_field(&control, "Package"), Some("zotero"));
        assert_eq!(control_field(&control, "architecture"), Some("amd64"));
        assert_eq!(control_field(&control, "Depends"), None);
    }

    #[test]
    fn data_tar_excludes_control_dir_and_keeps_symlink() {
        let dir = staging_tree();
        let deb = build_deb(dir.path()).unwrap();
        let members = ar_members(&deb).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(members[2].data));
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path().unwrap().display().to_string();
            assert_eq!(entry.header().mtime().unwrap(), 0);
            assert_eq!(entry.header().uid().unwrap(), 0);
            if path == "usr/local/bin/zotero" {
                assert_eq!(entry.header().entry_type(), tar::EntryType::Symlink);
            }
            seen.push(path);
        }
        assert!(seen.iter().all(|p| !p.contains(CONTROL_DIR)));
        assert!(seen.contains(&"usr/lib/zotero/zotero".to_string()));
    }

    #[test]
    fn archives_are_reproducible() {
        let a = staging_tree();
        let b = staging_tree();
        assert_eq!(build_deb(a.path()).unwrap(), build_deb(b.path()).unwrap());
    }

    #[test]
    fn odd_sized_members_are_padded() {
        let ar = write_ar(&[("a", b"xyz".as_slice()), ("b", b"12".as_slice())]).unwrap();
        let members = ar_members(&ar).unwrap();
        assert_eq!(members[0].data, b"xyz");
        assert_eq!(members[1].data, b"12");
    }

    #[test]
    fn rejects_garbage_and_xz() {
        assert!(matches!(ar_members(b"PK\x03\x04"), Err(DebError::NotAr)));

        let ar = write_ar(&[
            ("debian-binary", b"2.0\n".as_slice()),
            ("control.tar.xz", b"".as_slice()),
        ])
        .unwrap();
        assert!(matches!(
            read_control(&ar),
            Err(DebError::UnsupportedCompression(c)) if c == "xz"
        ));
    }
}
