//! SHA-256 digests of files and byte slices.

use crate::StoreError;
use bale_schema::Sha256Digest;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const CHUNK: usize = 8192;

/// Compute the SHA-256 digest of a file, streaming it in 8 KiB chunks.
pub fn file_digest(path: impl AsRef<Path>) -> Result<Sha256Digest, StoreError> {
    let mut file = std::fs::File::open(path.as_ref())?;
    reader_digest(&mut file).map(|(digest, _)| digest)
}

/// Compute the SHA-256 digest of everything `reader` yields, together with
/// the number of bytes read.
pub fn reader_digest(reader: &mut impl Read) -> Result<(Sha256Digest, u64), StoreError> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((Sha256Digest::new(hex::encode(hasher.finalize())), total))
}

pub fn bytes_digest(data: &[u8]) -> Sha256Digest {
    Sha256Digest::new(hex::encode(Sha256::digest(data)))
}

/// Check that the file at `path` has the expected digest.
///
/// Comparison is case-insensitive on the hex form.
pub fn verify_file(
    path: impl AsRef<Path>,
    rel_path: &str,
    expected: &str,
) -> Result<(), StoreError> {
    let actual = file_digest(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(StoreError::ChecksumMismatch {
            path: rel_path.to_owned(),
            expected: expected.to_ascii_lowercase(),
            actual: actual.into_inner(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn bytes_digest_empty() {
        assert_eq!(bytes_digest(b""), EMPTY_SHA256);
    }

    #[test]
    fn bytes_digest_hello_world() {
        assert_eq!(
            bytes_digest(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn file_digest_matches_bytes_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        assert_eq!(file_digest(&path).unwrap(), bytes_digest(&data));
    }

    #[test]
    fn reader_digest_counts_bytes() {
        let mut cursor = std::io::Cursor::new(vec![7u8; 20_000]);
        let (_, n) = reader_digest(&mut cursor).unwrap();
        assert_eq!(n, 20_000);
    }

    #[test]
    fn verify_file_reports_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"content").unwrap();
        let good = bytes_digest(b"content");
        verify_file(&path, "f", &good.to_ascii_uppercase()).unwrap();
        let err = verify_file(&path, "f", EMPTY_SHA256).unwrap_err();
        assert!(matches!(err, StoreError::ChecksumMismatch { ref path, .. } if path == "f"));
    }

    #[test]
    fn file_digest_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            file_digest(dir.path().join("missing")),
            Err(StoreError::Io(_))
        ));
    }
}
