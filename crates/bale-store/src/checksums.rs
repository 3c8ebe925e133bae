//! Generation and validation of `checksums.txt`.
//!
//! The checksum manifest lists every regular file under a package root
//! except the package definition, the manifest itself and the detached
//! signature, one `<sha256> <relative-path>` line per file, sorted by path,
//! each line newline-terminated. The SHA-256 of those exact bytes is the
//! package's aggregate digest.
//!
//! Validation is closed-world: in full mode every file on disk must be
//! listed and match, and any unlisted file is an error. Symlinks count as
//! files on disk but are never accepted as listed content. Blank lines in
//! the manifest are skipped.

use crate::cancel::CancelToken;
use crate::digest::{bytes_digest, file_digest, verify_file};
use crate::layout::{is_safe_relative, PackageLayout, METADATA_FILES};
use crate::{fsync_dir, StoreError};
use bale_schema::{is_sha256_hex, Sha256Digest};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub digest: Sha256Digest,
    pub path: String,
}

/// Sorted list of per-file digests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    entries: Vec<ChecksumEntry>,
}

impl ChecksumManifest {
    /// Build a manifest from unordered entries.
    pub fn from_entries(mut entries: Vec<ChecksumEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self { entries }
    }

    pub fn entries(&self) -> &[ChecksumEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Sha256Digest> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i].digest)
    }

    /// Serialized form: one `<digest> <path>\n` line per entry.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            out.push_str(&e.digest);
            out.push(' ');
            out.push_str(&e.path);
            out.push('\n');
        }
        out
    }

    /// SHA-256 of the serialized bytes.
    pub fn aggregate(&self) -> Sha256Digest {
        bytes_digest(self.serialize().as_bytes())
    }

    /// Parse a checksum file body. Lines split on the first space.
    pub fn parse(content: &str) -> Result<Self, StoreError> {
        let mut entries = Vec::new();
        for line in content.lines().filter(|l| !l.is_empty()) {
            entries.push(parse_line(line)?);
        }
        Ok(Self::from_entries(entries))
    }
}

fn parse_line(line: &str) -> Result<ChecksumEntry, StoreError> {
    let invalid = || StoreError::InvalidChecksumLine(line.to_owned());
    let (digest, path) = line.split_once(' ').ok_or_else(invalid)?;
    if !is_sha256_hex(digest) || !is_safe_relative(path) {
        return Err(invalid());
    }
    Ok(ChecksumEntry {
        digest: Sha256Digest::new(digest.to_ascii_lowercase()),
        path: path.to_owned(),
    })
}

/// Package-relative paths of every entry under the package root that is not
/// a directory, sorted. Symlinks are listed but not followed.
pub fn list_package_files(
    layout: &PackageLayout,
    cancel: &CancelToken,
) -> Result<Vec<String>, StoreError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(layout.root()).follow_links(false).min_depth(1) {
        cancel.check()?;
        let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
        if !entry.file_type().is_dir() {
            files.push(layout.relative(entry.path())?);
        }
    }
    files.sort();
    Ok(files)
}

/// Fail unless `rel` is a regular file on disk. Symlinks are never hashed
/// through to their target.
fn ensure_regular(layout: &PackageLayout, rel: &str) -> Result<(), StoreError> {
    let meta = fs::symlink_metadata(layout.path_of(rel))?;
    if meta.file_type().is_file() {
        Ok(())
    } else {
        Err(StoreError::NotRegularFile(rel.to_owned()))
    }
}

/// Digest every tracked file under the package root, write `checksums.txt`
/// atomically, and return the manifest with its aggregate digest.
pub fn generate_checksums(
    layout: &PackageLayout,
    cancel: &CancelToken,
) -> Result<(ChecksumManifest, Sha256Digest), StoreError> {
    let root = layout.root();
    if !root.is_dir() {
        return Err(StoreError::InvalidPackageRoot(root.display().to_string()));
    }

    let mut entries = Vec::new();
    for rel in list_package_files(layout, cancel)? {
        if METADATA_FILES.contains(&rel.as_str()) {
            continue;
        }
        cancel.check()?;
        ensure_regular(layout, &rel)?;
        let digest = file_digest(layout.path_of(&rel))?;
        debug!("checksum {digest} {rel}");
        entries.push(ChecksumEntry { digest, path: rel });
    }

    let manifest = ChecksumManifest::from_entries(entries);
    let content = manifest.serialize();
    let aggregate = bytes_digest(content.as_bytes());

    let mut tmp = NamedTempFile::new_in(root)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(layout.checksums_path())
        .map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(root)?;

    info!(
        "wrote checksums for {} files (aggregate {aggregate})",
        manifest.len()
    );
    Ok((manifest, aggregate))
}

/// Validate a package root against its checksum manifest.
///
/// An empty `expected_aggregate` means the package carries no integrity data
/// and validation succeeds once the checksum file is readable.
///
/// With a non-empty `subset` (a partially fetched package), listed files that
/// are absent are accepted unless the subset names them, and every subset
/// path must end up verified. Files on disk that are not listed are ignored.
/// With an empty subset every listed file must be present, and every file on
/// disk must be listed. In both modes a present listed file must match.
pub fn validate_checksums(
    layout: &PackageLayout,
    expected_aggregate: &str,
    subset: &BTreeSet<String>,
    cancel: &CancelToken,
) -> Result<(), StoreError> {
    let root = layout.root();
    if !root.is_dir() {
        return Err(StoreError::InvalidPackageRoot(root.display().to_string()));
    }
    let checksums_path = layout.checksums_path();
    let content = fs::read(&checksums_path)?;

    if expected_aggregate.is_empty() {
        warn!("package has no aggregate checksum; skipping integrity validation");
        return Ok(());
    }
    if !is_sha256_hex(expected_aggregate) {
        return Err(StoreError::InvalidAggregate(expected_aggregate.to_owned()));
    }

    let actual = bytes_digest(&content);
    if !actual.eq_ignore_ascii_case(expected_aggregate) {
        return Err(StoreError::ChecksumMismatch {
            path: crate::layout::CHECKSUMS_FILE.to_owned(),
            expected: expected_aggregate.to_ascii_lowercase(),
            actual: actual.into_inner(),
        });
    }
    let content = String::from_utf8(content)
        .map_err(|_| StoreError::InvalidChecksumLine("<non-UTF-8 content>".to_owned()))?;

    let partial = !subset.is_empty();
    let requested: BTreeSet<&str> = subset
        .iter()
        .map(String::as_str)
        .filter(|p| !METADATA_FILES.contains(p))
        .collect();

    let mut seen: BTreeMap<String, bool> = list_package_files(layout, cancel)?
        .into_iter()
        .map(|p| (p, false))
        .collect();
    for exempt in METADATA_FILES {
        if let Some(flag) = seen.get_mut(exempt) {
            *flag = true;
        }
    }
    let mut checked: BTreeSet<&str> = BTreeSet::new();

    for line in content.lines() {
        cancel.check()?;
        if line.is_empty() {
            continue;
        }
        let entry = parse_line(line)?;
        let Some(flag) = seen.get_mut(&entry.path) else {
            if partial && !requested.contains(entry.path.as_str()) {
                continue;
            }
            return Err(StoreError::MissingFile(entry.path));
        };
        ensure_regular(layout, &entry.path)?;
        verify_file(layout.path_of(&entry.path), &entry.path, &entry.digest)?;
        *flag = true;
        if let Some(p) = requested.get(entry.path.as_str()) {
            checked.insert(*p);
        }
    }

    if partial {
        if let Some(missing) = requested.iter().find(|p| !checked.contains(*p)) {
            return Err(StoreError::IncompletePartialValidation((*missing).to_owned()));
        }
        debug!("validated {} requested files", checked.len());
    } else {
        if let Some((path, _)) = seen.iter().find(|(_, ok)| !**ok) {
            return Err(StoreError::UnverifiedFile(path.clone()));
        }
        debug!("validated {} files", seen.len());
    }
    Ok(())
}
