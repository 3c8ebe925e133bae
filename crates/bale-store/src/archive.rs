use crate::{fsync_dir, StoreError};
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;
use walkdir::WalkDir;

const ZSTD_LEVEL: i32 = 3;

/// Compression applied to a component archive, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Zstd,
    Gzip,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        match self {
            Self::None => "tar",
            Self::Zstd => "tar.zst",
            Self::Gzip => "tar.gz",
        }
    }

    /// Infer compression from a path's extension. Unknown extensions are
    /// treated as plain tar.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("zst" | "zstd") => Self::Zstd,
            Some("gz" | "tgz") => Self::Gzip,
            _ => Self::None,
        }
    }
}

/// Create a deterministic tar archive of `source_dir` at `dest`.
///
/// Entries are stored under `prefix` (which may be empty). Determinism:
/// - Entries sorted lexicographically by relative path
/// - All timestamps set to 0 (Unix epoch)
/// - All ownership set to 0:0
/// - Permissions preserved as-is from source
///
/// Device nodes, sockets and FIFOs are skipped with a warning. The archive is
/// written to a temporary file and renamed into place.
pub fn pack_dir(
    source_dir: &Path,
    prefix: &str,
    dest: &Path,
    compression: Compression,
) -> Result<(), StoreError> {
    let entries = collect_entries(source_dir, prefix)?;
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;

    {
        let file = tmp.as_file_mut();
        match compression {
            Compression::None => {
                let mut ar = builder(&mut *file);
                append_entries(&mut ar, &entries)?;
                ar.into_inner()?.flush()?;
            }
            Compression::Zstd => {
                let mut ar = builder(zstd::stream::Encoder::new(&mut *file, ZSTD_LEVEL)?);
                append_entries(&mut ar, &entries)?;
                ar.into_inner()?.finish()?.flush()?;
            }
            Compression::Gzip => {
                let encoder = flate2::write::GzEncoder::new(&mut *file, flate2::Compression::default());
                let mut ar = builder(encoder);
                append_entries(&mut ar, &entries)?;
                ar.into_inner()?.finish()?.flush()?;
            }
        }
    }

    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

/// Extract an archive into `target_dir`, decompressing by extension.
pub fn unpack_archive(archive: &Path, target_dir: &Path) -> Result<(), StoreError> {
    let file = fs::File::open(archive)?;
    match Compression::from_path(archive) {
        Compression::None => unpack_reader(file, target_dir),
        Compression::Zstd => unpack_reader(zstd::stream::Decoder::new(file)?, target_dir),
        Compression::Gzip => unpack_reader(flate2::read::GzDecoder::new(file), target_dir),
    }
}

/// Extract a tar stream into `target_dir`.
pub fn unpack_reader(reader: impl Read, target_dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(target_dir)?;
    let mut ar = tar::Archive::new(reader);
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(false);
    ar.set_unpack_xattrs(false);
    ar.unpack(target_dir)?;
    Ok(())
}

/// Extract only the entries whose `/`-separated path satisfies `keep`.
/// Returns the extracted paths.
pub fn unpack_matching(
    archive: &Path,
    target_dir: &Path,
    keep: impl Fn(&str) -> bool,
) -> Result<Vec<String>, StoreError> {
    let file = fs::File::open(archive)?;
    match Compression::from_path(archive) {
        Compression::None => unpack_entries(file, target_dir, keep),
        Compression::Zstd => unpack_entries(zstd::stream::Decoder::new(file)?, target_dir, keep),
        Compression::Gzip => unpack_entries(flate2::read::GzDecoder::new(file), target_dir, keep),
    }
}

fn unpack_entries(
    reader: impl Read,
    target_dir: &Path,
    keep: impl Fn(&str) -> bool,
) -> Result<Vec<String>, StoreError> {
    fs::create_dir_all(target_dir)?;
    let mut ar = tar::Archive::new(reader);
    let mut extracted = Vec::new();
    for entry in ar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().trim_start_matches("./").to_owned();
        if keep(&path) && entry.unpack_in(target_dir)? {
            extracted.push(path);
        }
    }
    Ok(extracted)
}

fn builder<W: Write>(w: W) -> tar::Builder<W> {
    let mut ar = tar::Builder::new(w);
    ar.follow_symlinks(false);
    ar
}

/// Collect (archive path, full path) pairs, sorted by archive path.
fn collect_entries(root: &Path, prefix: &str) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut result = Vec::new();
    if !root.exists() {
        return Ok(result);
    }
    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| StoreError::Io(std::io::Error::other(format!("path strip: {e}"))))?
            .to_string_lossy()
            .replace('\\', "/");
        let name = if prefix.is_empty() {
            rel
        } else {
            format!("{}/{rel}", prefix.trim_end_matches('/'))
        };
        result.push((name, entry.into_path()));
    }
    result.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(result)
}

fn append_entries<W: Write>(
    ar: &mut tar::Builder<W>,
    entries: &[(String, PathBuf)],
) -> Result<(), StoreError> {
    for (rel_path, full_path) in entries {
        let ft = match full_path.symlink_metadata() {
            Ok(m) => m.file_type(),
            Err(e) => {
                warn!("skipping {rel_path}: metadata error: {e}");
                continue;
            }
        };

        if ft.is_file() {
            append_file(ar, rel_path, full_path)?;
        } else if ft.is_dir() {
            append_dir(ar, rel_path, full_path)?;
        } else if ft.is_symlink() {
            append_symlink(ar, rel_path, full_path)?;
        } else {
            warn!("skipping unsupported file type: {rel_path}");
        }
    }
    Ok(())
}

fn make_header(full_path: &Path, entry_type: tar::EntryType) -> Result<tar::Header, StoreError> {
    let meta = full_path.symlink_metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(meta.permissions().mode());
    Ok(header)
}

fn append_file<W: Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let file = fs::File::open(full_path)?;
    let len = file.metadata()?.len();
    let mut header = make_header(full_path, tar::EntryType::Regular)?;
    header.set_size(len);
    header.set_cksum();
    ar.append_data(&mut header, rel_path, file)?;
    Ok(())
}

fn append_dir<W: Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let mut header = make_header(full_path, tar::EntryType::Directory)?;
    header.set_size(0);
    header.set_cksum();
    let path = if rel_path.ends_with('/') {
        rel_path.to_owned()
    } else {
        format!("{rel_path}/")
    };
    ar.append_data(&mut header, &path, &[] as &[u8])?;
    Ok(())
}

fn append_symlink<W: Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let target = fs::read_link(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Symlink)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_link(&mut header, rel_path, &target)?;
    Ok(())
}
